use serde_json::Value as JsonValue;

/// Look up the first of several candidate keys on an object (used for
/// Gemini's camelCase/snake_case request field ambiguity, e.g.
/// `responseJsonSchema` vs `response_json_schema`).
pub fn get_any<'a>(value: &'a JsonValue, keys: &[&str]) -> Option<&'a JsonValue> {
    let obj = value.as_object()?;
    keys.iter().find_map(|k| obj.get(*k))
}

pub fn str_eq(value: Option<&JsonValue>, expected: &str) -> bool {
    value.and_then(JsonValue::as_str) == Some(expected)
}

pub fn non_empty_array(value: Option<&JsonValue>) -> bool {
    value.and_then(JsonValue::as_array).is_some_and(|a| !a.is_empty())
}

/// Walk `$.messages[*].content[*]` (openai/anthropic shape) or
/// `$.input[*].content[*]` (openai-res shape) looking for a content part
/// whose `type` field matches one of `part_types`. Only `role: "user"`
/// entries are considered — an assistant or system message echoing an
/// image part back doesn't mean the caller sent one.
pub fn any_message_has_part_type(
    body: &JsonValue,
    messages_key: &str,
    part_types: &[&str],
) -> bool {
    let Some(messages) = body.get(messages_key).and_then(JsonValue::as_array) else {
        return false;
    };
    messages.iter().any(|message| {
        if message.get("role").and_then(JsonValue::as_str) != Some("user") {
            return false;
        }
        let Some(parts) = message.get("content").and_then(JsonValue::as_array) else {
            return false;
        };
        parts.iter().any(|part| {
            part.get("type")
                .and_then(JsonValue::as_str)
                .is_some_and(|t| part_types.contains(&t))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ignores_image_parts_on_non_user_messages() {
        let body = json!({
            "messages": [
                {"role": "assistant", "content": [{"type": "image_url", "image_url": {}}]}
            ]
        });
        assert!(!any_message_has_part_type(&body, "messages", &["image_url"]));
    }

    #[test]
    fn detects_image_part_on_user_message() {
        let body = json!({
            "messages": [
                {"role": "system", "content": [{"type": "image_url", "image_url": {}}]},
                {"role": "user", "content": [{"type": "image_url", "image_url": {}}]}
            ]
        });
        assert!(any_message_has_part_type(&body, "messages", &["image_url"]));
    }
}
