use gwayrs_storage::Storage;
use http::HeaderMap;
use time::OffsetDateTime;

use crate::error::ProxyError;

/// Resolved identity for one inbound request. The admin token (or, when no
/// admin token is configured, every key) resolves to `allow_all=1` with
/// `key_id=0`; everything else comes from the auth-key table.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub key_id: i64,
    pub allow_all: bool,
    pub models: Vec<String>,
}

impl AuthContext {
    fn admin() -> Self {
        Self {
            key_id: 0,
            allow_all: true,
            models: Vec::new(),
        }
    }

    pub fn permits(&self, model: &str) -> bool {
        self.allow_all || self.models.iter().any(|m| m == model)
    }
}

/// Checks `x-api-key`, `x-goog-api-key`, `Authorization: Bearer`, then the
/// `key=` query parameter, in that order — covering all three dialects'
/// native credential placements with one helper.
pub fn extract_api_key(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(value) = header_str(headers, "x-api-key") {
        return Some(value);
    }
    if let Some(value) = header_str(headers, "x-goog-api-key") {
        return Some(value);
    }
    if let Some(value) = headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }
    query.and_then(|q| {
        q.split('&')
            .find_map(|pair| pair.strip_prefix("key=").map(str::to_string))
    })
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|s| !s.is_empty())
}

/// A missing admin token disables admin auth entirely: every inbound key is
/// treated as admin and storage is never consulted.
pub async fn authenticate(
    storage: &dyn Storage,
    admin_token: Option<&str>,
    headers: &HeaderMap,
    query: Option<&str>,
) -> Result<AuthContext, ProxyError> {
    let Some(key) = extract_api_key(headers, query) else {
        return Err(ProxyError::unauthorized("missing api key"));
    };

    let Some(admin_token) = admin_token else {
        return Ok(AuthContext::admin());
    };
    if key == admin_token {
        return Ok(AuthContext::admin());
    }

    let row = storage
        .find_auth_key(&key)
        .await
        .map_err(|err| ProxyError::internal(err.to_string()))?
        .ok_or_else(|| ProxyError::unauthorized("invalid api key"))?;

    if let Some(expires_at) = row.expires_at
        && OffsetDateTime::now_utc() >= expires_at
    {
        return Err(ProxyError::unauthorized("api key expired"));
    }

    Ok(AuthContext {
        key_id: row.id,
        allow_all: row.allow_all,
        models: row.models,
    })
}
