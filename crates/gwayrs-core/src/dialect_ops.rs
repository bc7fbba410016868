use gwayrs_protocol::outbound::{HeaderContext, UpstreamTarget};
use gwayrs_protocol::{anthropic, gemini, openai, openai_responses};
use gwayrs_protocol::{Before, Dialect, OutboundRequest, UsageAccumulator, UsageSummary};
use serde_json::Value as JsonValue;

/// Distinguishes the one call shape that reuses a dialect's adapter but
/// targets a different upstream path: anthropic's `count_tokens` passthrough.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Normal,
    AnthropicCountTokens,
}

pub fn build_outbound(
    dialect: Dialect,
    kind: CallKind,
    before: &Before,
    target: UpstreamTarget<'_>,
    headers: HeaderContext<'_>,
) -> OutboundRequest {
    match (dialect, kind) {
        (Dialect::Openai, _) => openai::build_outbound(before, target, headers),
        (Dialect::OpenaiResponses, _) => openai_responses::build_outbound(before, target, headers),
        (Dialect::Anthropic, CallKind::AnthropicCountTokens) => {
            anthropic::build_outbound_count_tokens(before, target, headers)
        }
        (Dialect::Anthropic, CallKind::Normal) => anthropic::build_outbound(before, target, headers),
        (Dialect::Gemini, _) => gemini::build_outbound(before, target, headers),
    }
}

pub fn new_usage_accumulator(dialect: Dialect) -> Box<dyn UsageAccumulator> {
    match dialect {
        Dialect::Openai => Box::new(openai::OpenaiUsageAccumulator::new()),
        Dialect::OpenaiResponses => Box::new(openai_responses::ResponsesUsageAccumulator::new()),
        Dialect::Anthropic => Box::new(anthropic::AnthropicUsageAccumulator::new()),
        Dialect::Gemini => Box::new(gemini::GeminiUsageAccumulator::new()),
    }
}

pub fn usage_from_body(dialect: Dialect, body: &JsonValue) -> Option<UsageSummary> {
    match dialect {
        Dialect::Openai => openai::usage_from_body(body),
        Dialect::OpenaiResponses => openai_responses::usage_from_body(body),
        Dialect::Anthropic => anthropic::usage_from_body(body),
        Dialect::Gemini => gemini::usage_from_body(body),
    }
}
