use serde_json::{json, Value as JsonValue};

use crate::jsonpath::any_message_has_part_type;
use crate::outbound::{build_headers, header_set, HeaderContext, HttpMethod, UpstreamTarget};
use crate::usage::{i64_field, non_zero_i64};
use crate::{Before, CoreError, OutboundRequest, UsageAccumulator, UsageSummary};

pub fn parse_request(body: &JsonValue) -> Result<Before, CoreError> {
    let model = body
        .get("model")
        .and_then(JsonValue::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CoreError::InvalidRequest("missing model".into()))?
        .to_string();

    let stream = body.get("stream").and_then(JsonValue::as_bool).unwrap_or(false);
    let needs_tool = body
        .get("tools")
        .and_then(JsonValue::as_array)
        .is_some_and(|t| !t.is_empty());
    let needs_structured = body.get("response_format").is_some();
    let needs_image = any_message_has_part_type(body, "messages", &["image_url"]);

    let mut rewritten_body = body.clone();
    if stream {
        ensure_usage_option(&mut rewritten_body);
    }

    Ok(Before {
        model,
        stream,
        needs_tool,
        needs_structured,
        needs_image,
        rewritten_body,
    })
}

/// Sets `stream_options.include_usage = true` without clobbering any other
/// `stream_options` keys the caller already set, and is a no-op if already
/// present (parseRequest is idempotent on an already-rewritten body).
fn ensure_usage_option(body: &mut JsonValue) {
    let obj = body.as_object_mut().expect("request body is a JSON object");
    let opts = obj
        .entry("stream_options")
        .or_insert_with(|| json!({}));
    if let Some(opts) = opts.as_object_mut() {
        opts.insert("include_usage".to_string(), JsonValue::Bool(true));
    }
}

pub fn build_outbound(
    before: &Before,
    target: UpstreamTarget<'_>,
    headers: HeaderContext<'_>,
) -> OutboundRequest {
    let mut body = before.rewritten_body.clone();
    if let Some(obj) = body.as_object_mut() {
        obj.insert("model".to_string(), json!(target.provider_model));
    }

    let mut request_headers = build_headers(headers, before.stream);
    header_set(&mut request_headers, "Authorization", &format!("Bearer {}", target.api_key));
    header_set(&mut request_headers, "Content-Type", "application/json");

    OutboundRequest {
        method: HttpMethod::Post,
        url: format!("{}/chat/completions", target.base_url),
        headers: request_headers,
        body: Some(body),
    }
}

#[derive(Debug, Default)]
pub struct OpenaiUsageAccumulator {
    last: Option<UsageSummary>,
}

impl OpenaiUsageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UsageAccumulator for OpenaiUsageAccumulator {
    fn on_event(&mut self, _event: Option<&str>, data: &str) -> Result<(), String> {
        if self.is_terminal(data) {
            return Ok(());
        }
        let parsed: JsonValue = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(_) => return Ok(()),
        };
        if let Some(err) = parsed.get("error") {
            return Err(err.to_string());
        }
        if let Some(usage) = parsed.get("usage") {
            if non_zero_i64(usage.get("total_tokens")).is_some() {
                self.last = Some(UsageSummary {
                    prompt_tokens: i64_field(usage, "prompt_tokens"),
                    completion_tokens: i64_field(usage, "completion_tokens"),
                    total_tokens: i64_field(usage, "total_tokens"),
                    cached_tokens: usage
                        .get("prompt_tokens_details")
                        .map(|d| i64_field(d, "cached_tokens"))
                        .unwrap_or(0),
                });
            }
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> Option<UsageSummary> {
        self.last
    }
}

/// Non-stream response: usage sits at `$.usage` of the single JSON body.
pub fn usage_from_body(body: &JsonValue) -> Option<UsageSummary> {
    let usage = body.get("usage")?;
    Some(UsageSummary {
        prompt_tokens: i64_field(usage, "prompt_tokens"),
        completion_tokens: i64_field(usage, "completion_tokens"),
        total_tokens: i64_field(usage, "total_tokens"),
        cached_tokens: usage
            .get("prompt_tokens_details")
            .map(|d| i64_field(d, "cached_tokens"))
            .unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_model() {
        let body = json!({"messages": []});
        assert!(matches!(parse_request(&body), Err(CoreError::InvalidRequest(_))));
    }

    #[test]
    fn stream_adds_usage_option_once() {
        let body = json!({"model": "m", "stream": true, "messages": []});
        let before = parse_request(&body).unwrap();
        let twice = parse_request(&before.rewritten_body).unwrap();
        assert_eq!(before.rewritten_body, twice.rewritten_body);
        assert_eq!(
            before.rewritten_body["stream_options"]["include_usage"],
            json!(true)
        );
    }

    #[test]
    fn detects_image_parts() {
        let body = json!({
            "model": "m",
            "messages": [{"role": "user", "content": [{"type": "image_url", "image_url": {}}]}]
        });
        let before = parse_request(&body).unwrap();
        assert!(before.needs_image);
    }

    #[test]
    fn stream_accumulator_takes_last_nonzero_usage() {
        let mut acc = OpenaiUsageAccumulator::new();
        acc.on_event(None, r#"{"usage":{"total_tokens":0}}"#).unwrap();
        acc.on_event(
            None,
            r#"{"usage":{"total_tokens":7,"prompt_tokens":3,"completion_tokens":4}}"#,
        )
        .unwrap();
        let summary = Box::new(acc).finish().unwrap();
        assert_eq!(summary.total_tokens, 7);
        assert_eq!(summary.prompt_tokens, 3);
        assert_eq!(summary.completion_tokens, 4);
    }

    #[test]
    fn stream_accumulator_fails_on_error_line() {
        let mut acc = OpenaiUsageAccumulator::new();
        let err = acc.on_event(None, r#"{"error":{"message":"boom"}}"#);
        assert!(err.is_err());
    }
}
