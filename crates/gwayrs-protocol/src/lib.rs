pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod openai_responses;
pub mod outbound;
pub mod sse;
pub mod usage;

mod jsonpath;

pub use gwayrs_common::{CoreError, Dialect};
pub use outbound::{HeaderContext, HttpMethod, OutboundRequest, UpstreamTarget};
pub use sse::{SseEvent, SseParser};
pub use usage::{UsageAccumulator, UsageSummary};

use serde_json::Value as JsonValue;

/// The result of parsing an inbound request body/URL for one dialect: the
/// fields the candidate resolver and retry pipeline need, plus the body the
/// request should be forwarded with (already rewritten where the dialect
/// requires it).
#[derive(Debug, Clone)]
pub struct Before {
    pub model: String,
    pub stream: bool,
    pub needs_tool: bool,
    pub needs_structured: bool,
    pub needs_image: bool,
    pub rewritten_body: JsonValue,
}

/// A capability a candidate must support to serve a request with the given
/// `Before`. Used by the candidate resolver (C2) to build its column gates.
#[derive(Debug, Clone, Copy, Default)]
pub struct CapabilityFlags {
    pub tool_call: bool,
    pub structured_output: bool,
    pub image: bool,
}

impl From<&Before> for CapabilityFlags {
    fn from(before: &Before) -> Self {
        Self {
            tool_call: before.needs_tool,
            structured_output: before.needs_structured,
            image: before.needs_image,
        }
    }
}
