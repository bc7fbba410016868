use serde_json::Value as JsonValue;

use crate::jsonpath::get_any;
use crate::outbound::{build_headers, header_set, HeaderContext, HttpMethod, UpstreamTarget};
use crate::usage::i64_field;
use crate::{Before, CoreError, OutboundRequest, UsageAccumulator, UsageSummary};

/// The action named in a Gemini URL path: `.../models/{model}:{action}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeminiAction {
    GenerateContent,
    StreamGenerateContent,
}

impl GeminiAction {
    pub fn parse(action: &str) -> Result<Self, CoreError> {
        match action {
            "generateContent" => Ok(GeminiAction::GenerateContent),
            "streamGenerateContent" => Ok(GeminiAction::StreamGenerateContent),
            other => Err(CoreError::InvalidRequest(format!(
                "unsupported gemini action: {other}"
            ))),
        }
    }

    pub fn is_stream(self) -> bool {
        matches!(self, GeminiAction::StreamGenerateContent)
    }
}

/// Unlike the other three dialects, the logical model name and the stream
/// bit come from the URL, not the body — the body is never rewritten to
/// carry a model field.
pub fn parse_request(body: &JsonValue, url_model: &str, action: GeminiAction) -> Result<Before, CoreError> {
    if url_model.is_empty() {
        return Err(CoreError::InvalidRequest("missing model".into()));
    }

    let parts = collect_parts(body);

    let needs_tool = get_any(body, &["tools"]).is_some_and(|t| t.as_array().is_some_and(|a| !a.is_empty()))
        || get_any(body, &["toolConfig", "tool_config"]).is_some()
        || parts.iter().any(|p| {
            get_any(p, &["functionCall", "function_call"]).is_some()
                || get_any(p, &["functionResponse", "function_response"]).is_some()
        });

    let needs_structured = ["generationConfig", "generation_config", "config"]
        .iter()
        .filter_map(|key| body.get(*key))
        .any(|cfg| {
            get_any(cfg, &["responseJsonSchema", "response_json_schema"]).is_some()
                || get_any(cfg, &["responseMimeType", "response_mime_type"])
                    .and_then(JsonValue::as_str)
                    == Some("application/json")
        });

    let needs_image = parts.iter().any(|p| {
        ["inlineData", "inline_data", "fileData", "file_data"]
            .iter()
            .any(|key| {
                p.get(*key)
                    .and_then(|v| get_any(v, &["mimeType", "mime_type"]))
                    .and_then(JsonValue::as_str)
                    .is_some_and(|m| m.starts_with("image/"))
            })
    });

    Ok(Before {
        model: url_model.to_string(),
        stream: action.is_stream(),
        needs_tool,
        needs_structured,
        needs_image,
        rewritten_body: body.clone(),
    })
}

fn collect_parts(body: &JsonValue) -> Vec<&JsonValue> {
    let Some(contents) = body.get("contents").and_then(JsonValue::as_array) else {
        return Vec::new();
    };
    contents
        .iter()
        .filter_map(|c| c.get("parts").and_then(JsonValue::as_array))
        .flatten()
        .collect()
}

pub fn build_outbound(
    before: &Before,
    target: UpstreamTarget<'_>,
    headers: HeaderContext<'_>,
) -> OutboundRequest {
    let provider_model = target.provider_model.strip_prefix("models/").unwrap_or(target.provider_model);
    let action = if before.stream {
        "streamGenerateContent"
    } else {
        "generateContent"
    };
    let mut url = format!("{}/models/{}:{}", target.base_url, provider_model, action);
    if before.stream {
        url.push_str("?alt=sse");
    }

    let mut request_headers = build_headers(headers, before.stream);
    header_set(&mut request_headers, "x-goog-api-key", target.api_key);
    header_set(&mut request_headers, "Content-Type", "application/json");
    if before.stream {
        header_set(&mut request_headers, "Accept", "text/event-stream");
    }

    OutboundRequest {
        method: HttpMethod::Post,
        url,
        headers: request_headers,
        body: Some(before.rewritten_body.clone()),
    }
}

#[derive(Debug, Default)]
pub struct GeminiUsageAccumulator {
    last: Option<UsageSummary>,
}

impl GeminiUsageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UsageAccumulator for GeminiUsageAccumulator {
    fn on_event(&mut self, _event: Option<&str>, data: &str) -> Result<(), String> {
        if self.is_terminal(data) {
            return Ok(());
        }
        // Non-SSE streaming mode emits a raw JSON array (`[`, `{...},`, `]`)
        // rather than strict `data:` frames; strip surrounding array/comma
        // punctuation before parsing so both shapes land here.
        let trimmed = data.trim().trim_matches(|c| c == '[' || c == ']');
        let trimmed = trimmed.strip_suffix(',').unwrap_or(trimmed).trim();
        if trimmed.is_empty() {
            return Ok(());
        }
        let parsed: JsonValue = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(_) => return Ok(()),
        };
        if let Some(err) = parsed.get("error") {
            return Err(err.to_string());
        }
        if let Some(usage) = parsed.get("usageMetadata") {
            if let Some(summary) = summary_from_usage_metadata(usage) {
                self.last = Some(summary);
            }
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> Option<UsageSummary> {
        self.last
    }
}

fn summary_from_usage_metadata(usage: &JsonValue) -> Option<UsageSummary> {
    let total = i64_field(usage, "totalTokenCount");
    if total == 0 {
        return None;
    }
    let prompt = i64_field(usage, "promptTokenCount");
    let completion = i64_field(usage, "candidatesTokenCount") + i64_field(usage, "thoughtsTokenCount");
    Some(UsageSummary {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: if total != 0 { total } else { prompt + completion },
        cached_tokens: i64_field(usage, "cachedContentTokenCount"),
    })
}

/// Non-stream response: usage sits at the whole body's `$.usageMetadata`.
pub fn usage_from_body(body: &JsonValue) -> Option<UsageSummary> {
    summary_from_usage_metadata(body.get("usageMetadata")?)
}
