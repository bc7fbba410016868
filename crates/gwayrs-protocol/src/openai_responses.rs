use serde_json::{json, Value as JsonValue};

use crate::jsonpath::any_message_has_part_type;
use crate::outbound::{build_headers, header_set, HeaderContext, HttpMethod, UpstreamTarget};
use crate::usage::i64_field;
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
    let needs_structured = body
        .get("text")
        .and_then(|t| t.get("format"))
        .and_then(|f| f.get("type"))
        .and_then(JsonValue::as_str)
        == Some("json_schema");
    let needs_image = any_message_has_part_type(body, "input", &["input_image"]);

    Ok(Before {
        model,
        stream,
        needs_tool,
        needs_structured,
        needs_image,
        rewritten_body: body.clone(),
    })
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
        url: format!("{}/responses", target.base_url),
        headers: request_headers,
        body: Some(body),
    }
}

/// Non-stream response: usage sits at `$.usage`, same field the streamed
/// `response.completed` event carries under `$.response.usage`.
pub fn usage_from_body(body: &JsonValue) -> Option<UsageSummary> {
    let usage = body.get("usage")?;
    let prompt = i64_field(usage, "input_tokens");
    let completion = i64_field(usage, "output_tokens");
    Some(UsageSummary {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: prompt + completion,
        cached_tokens: usage
            .get("input_tokens_details")
            .map(|d| i64_field(d, "cached_tokens"))
            .unwrap_or(0),
    })
}

#[derive(Debug, Default)]
pub struct ResponsesUsageAccumulator {
    current_event: Option<String>,
    last: Option<UsageSummary>,
}

impl ResponsesUsageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UsageAccumulator for ResponsesUsageAccumulator {
    fn on_event(&mut self, event: Option<&str>, data: &str) -> Result<(), String> {
        if let Some(event) = event {
            self.current_event = Some(event.to_string());
        }
        if self.is_terminal(data) {
            return Ok(());
        }
        if self.current_event.as_deref() != Some("response.completed") {
            return Ok(());
        }
        let parsed: JsonValue = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(_) => return Ok(()),
        };
        let Some(usage) = parsed.get("response").and_then(|r| r.get("usage")) else {
            return Ok(());
        };
        let prompt = i64_field(usage, "input_tokens");
        let completion = i64_field(usage, "output_tokens");
        self.last = Some(UsageSummary {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
            cached_tokens: usage
                .get("input_tokens_details")
                .map(|d| i64_field(d, "cached_tokens"))
                .unwrap_or(0),
        });
        Ok(())
    }

    fn finish(self: Box<Self>) -> Option<UsageSummary> {
        self.last
    }
}
