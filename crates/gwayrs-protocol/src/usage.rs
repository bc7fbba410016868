use serde_json::Value as JsonValue;

/// Token usage extracted from an upstream response, normalized across the
/// four dialects' differing field names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageSummary {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub cached_tokens: i64,
}

/// Accumulates usage from a streamed response, one SSE event at a time.
/// Implementations are dialect-specific: they know which event name (if
/// any) carries the usage payload and how to map its fields.
pub trait UsageAccumulator: Send {
    /// Feed one SSE event. Returns `Err` if the event itself signals an
    /// upstream error (e.g. an OpenAI `data:` line containing `"error"`).
    fn on_event(&mut self, event: Option<&str>, data: &str) -> Result<(), String>;

    /// True when `data` is the dialect's stream terminator (`[DONE]`).
    fn is_terminal(&self, data: &str) -> bool {
        data.trim() == "[DONE]"
    }

    fn finish(self: Box<Self>) -> Option<UsageSummary>;
}

pub(crate) fn non_zero_i64(value: Option<&JsonValue>) -> Option<i64> {
    value.and_then(JsonValue::as_i64).filter(|v| *v != 0)
}

pub(crate) fn i64_field(value: &JsonValue, key: &str) -> i64 {
    value.get(key).and_then(JsonValue::as_i64).unwrap_or(0)
}
