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
    let needs_image = any_message_has_part_type(body, "messages", &["image"]);

    Ok(Before {
        model,
        stream,
        needs_tool,
        needs_structured: needs_tool,
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
    header_set(&mut request_headers, "x-api-key", target.api_key);
    header_set(&mut request_headers, "anthropic-version", target.anthropic_version);
    header_set(&mut request_headers, "content-type", "application/json");

    OutboundRequest {
        method: HttpMethod::Post,
        url: format!("{}/messages", target.base_url),
        headers: request_headers,
        body: Some(body),
    }
}

/// `/v1/messages/count_tokens` is proxied as-is: same model substitution and
/// auth headers as a normal message, just a different upstream path and no
/// usage accounting (the response carries a token count, not usage).
pub fn build_outbound_count_tokens(
    before: &Before,
    target: UpstreamTarget<'_>,
    headers: HeaderContext<'_>,
) -> OutboundRequest {
    let mut request = build_outbound(before, target, headers);
    request.url = format!("{}/messages/count_tokens", target.base_url);
    request
}

#[derive(Debug, Default)]
pub struct AnthropicUsageAccumulator {
    current_event: Option<String>,
    last: Option<UsageSummary>,
}

impl AnthropicUsageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UsageAccumulator for AnthropicUsageAccumulator {
    fn on_event(&mut self, event: Option<&str>, data: &str) -> Result<(), String> {
        if let Some(event) = event {
            self.current_event = Some(event.to_string());
        }
        if self.is_terminal(data) {
            return Ok(());
        }
        if self.current_event.as_deref() != Some("message_delta") {
            return Ok(());
        }
        let parsed: JsonValue = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(_) => return Ok(()),
        };
        let Some(usage) = parsed.get("usage") else {
            return Ok(());
        };
        let prompt = i64_field(usage, "input_tokens");
        let completion = i64_field(usage, "output_tokens");
        self.last = Some(UsageSummary {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
            cached_tokens: i64_field(usage, "cache_read_input_tokens"),
        });
        Ok(())
    }

    fn finish(self: Box<Self>) -> Option<UsageSummary> {
        self.last
    }
}

/// Non-stream response: Anthropic always puts usage at the body's top-level
/// `usage` field, same shape as the streamed `message_delta` payload.
pub fn usage_from_body(body: &JsonValue) -> Option<UsageSummary> {
    let usage = body.get("usage")?;
    let prompt = i64_field(usage, "input_tokens");
    let completion = i64_field(usage, "output_tokens");
    Some(UsageSummary {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: prompt + completion,
        cached_tokens: i64_field(usage, "cache_read_input_tokens"),
    })
}
