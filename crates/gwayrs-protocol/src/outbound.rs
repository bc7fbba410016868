use serde_json::Value as JsonValue;

/// HTTP method for the outbound upstream call. All four dialects only ever
/// issue POST or GET (models-list), but the type keeps `OutboundRequest`
/// honest about what it can express.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Everything needed to issue the upstream call for one candidate: already
/// has the candidate's base URL and credential folded in, headers already
/// stripped/overlaid per the passthrough rule below.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<JsonValue>,
}

/// Request headers that must never be forwarded upstream: they either name
/// the inbound credential, or describe the inbound connection/transport and
/// would be wrong (or duplicated) on the outbound one.
const STRIPPED_HEADERS: &[&str] = &[
    "authorization",
    "x-api-key",
    "x-goog-api-key",
    "host",
    "content-length",
    "connection",
    "keep-alive",
    "transfer-encoding",
];

/// Per-candidate target for an outbound call: base URL, credential, and the
/// provider-side model name to substitute for the client-facing one.
#[derive(Debug, Clone, Copy)]
pub struct UpstreamTarget<'a> {
    pub base_url: &'a str,
    pub api_key: &'a str,
    pub provider_model: &'a str,
    pub anthropic_version: &'a str,
}

/// Header passthrough inputs shared by every dialect's `build_outbound`.
#[derive(Debug, Clone, Copy)]
pub struct HeaderContext<'a> {
    pub inbound: &'a [(String, String)],
    pub customer_headers: &'a [(String, String)],
    pub with_header: bool,
}

/// Build the outbound header set per the passthrough rule: start from the
/// inbound headers (or empty, when `with_header` is false) minus the
/// stripped ones, then overlay `customer_headers` (these win on conflict).
/// The credential header for the dialect is added by the caller afterward.
pub fn build_headers(ctx: HeaderContext<'_>, stream: bool) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = if ctx.with_header {
        ctx.inbound
            .iter()
            .filter(|(k, _)| !STRIPPED_HEADERS.contains(&k.to_ascii_lowercase().as_str()))
            .cloned()
            .collect()
    } else {
        Vec::new()
    };

    for (k, v) in ctx.customer_headers {
        header_set(&mut headers, k, v);
    }

    if stream {
        header_set(&mut headers, "X-Accel-Buffering", "no");
    }

    headers
}

pub fn header_set(headers: &mut Vec<(String, String)>, key: &str, value: &str) {
    if let Some(slot) = headers
        .iter_mut()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
    {
        slot.1 = value.to_string();
    } else {
        headers.push((key.to_string(), value.to_string()));
    }
}

pub fn header_get<'a>(headers: &'a [(String, String)], key: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}
