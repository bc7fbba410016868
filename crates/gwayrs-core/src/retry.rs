use std::net::IpAddr;
use std::time::{Duration, Instant};

use base64::Engine;
use bytes::Bytes;
use gwayrs_common::{CoreError, Dialect};
use gwayrs_protocol::outbound::{HeaderContext, UpstreamTarget};
use gwayrs_protocol::{Before, OutboundRequest};
use gwayrs_resilience::{Balancer, BalancerError, CircuitBreaker, Gate, Lottery, Rotor};
use gwayrs_storage::{CandidateRow, RequestLogInput, Storage};
use tracing::warn;
use uuid::Uuid;

use crate::dialect_ops::{self, CallKind};
use crate::resolver::ResolvedCandidates;
use crate::upstream_client::{UpstreamBody, UpstreamClient, UpstreamResponse};

const TOKEN_LOCK_TTL: Duration = Duration::from_secs(120);
const MAX_ERROR_BODY_BYTES: usize = 4096;
const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";

/// Everything the dispatch loop needs about the inbound request beyond
/// `Before` — what the gates key on, and what the log row records.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub dialect: Dialect,
    pub call_kind: CallKind,
    pub inbound_headers: Vec<(String, String)>,
    pub user_agent: Option<String>,
    pub client_ip: IpAddr,
    pub auth_key_id: Option<i64>,
}

/// What the retry loop hands to the streaming tee once a candidate
/// succeeds: the live response, which candidate served it, and the log row
/// to finish once the body has been consumed.
pub struct DispatchOutcome {
    pub response: UpstreamResponse,
    pub candidate: CandidateRow,
    pub log_id: i64,
    pub retry_index: i32,
    pub started_at: Instant,
}

/// The selecting/dispatching/retrying loop. Builds a private balancer from
/// the resolved candidate set, optionally wraps it in the shared breaker,
/// and walks candidates until one returns 2xx, the deadline elapses, or the
/// retry budget is spent. Gate rejections (RPM, token lock, IP lock) demote
/// a candidate without charging the retry budget; only an actual dispatch
/// attempt does.
pub async fn dispatch(
    storage: &dyn Storage,
    gate: &dyn Gate,
    breaker: &CircuitBreaker,
    upstream: &UpstreamClient,
    resolved: ResolvedCandidates,
    before: &Before,
    ctx: &RequestContext,
) -> Result<DispatchOutcome, CoreError> {
    let timeout_seconds = resolved.meta.timeout_seconds.max(1);
    let deadline = Instant::now() + Duration::from_secs(timeout_seconds);
    let header_timeout = if before.stream {
        Duration::from_secs((timeout_seconds / 3).max(1))
    } else {
        Duration::from_secs(timeout_seconds)
    };

    let known_ids: Vec<String> = resolved.weights.iter().map(|(id, _)| id.clone()).collect();
    let inner: Box<dyn Balancer> = if resolved.meta.strategy == "rotor" {
        Box::new(Rotor::new(resolved.weights.clone()))
    } else {
        Box::new(Lottery::new(resolved.weights.clone()))
    };
    let mut balancer: Box<dyn Balancer> = if resolved.meta.breaker {
        breaker.wrap(inner, &known_ids)
    } else {
        inner
    };

    let started_at = Instant::now();
    let mut retry_index: i32 = 0;
    let mut last_error: Option<CoreError> = None;
    let mut saw_non_rpm_rejection = false;

    loop {
        if Instant::now() >= deadline {
            return Err(last_error.unwrap_or(CoreError::RetryTimeout));
        }
        if retry_index as u32 >= resolved.meta.max_retry.max(1) {
            return Err(last_error
                .unwrap_or_else(|| CoreError::MaxRetries("retry budget exhausted".into())));
        }

        let id = match balancer.pop() {
            Ok(id) => id,
            Err(BalancerError::NoItems) => {
                return Err(last_error.unwrap_or(if saw_non_rpm_rejection {
                    CoreError::MaxRetries("no candidates left".into())
                } else {
                    CoreError::RateLimitExhausted
                }));
            }
        };

        let Some(candidate) = resolved.candidates.get(&id) else {
            balancer.delete(&id);
            continue;
        };
        let provider_id = candidate.provider.id.to_string();

        match gate.rpm_check_admit(&provider_id, candidate.provider.rpm_limit).await {
            Ok(true) => {}
            Ok(false) => {
                balancer.reduce(&id);
                continue;
            }
            Err(err) => warn!(error = %err, provider = %provider_id, "rpm gate unavailable, failing open"),
        }

        if let Some(auth_key_id) = ctx.auth_key_id {
            match gate
                .token_check_and_touch(&id, &auth_key_id.to_string(), TOKEN_LOCK_TTL)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    saw_non_rpm_rejection = true;
                    balancer.reduce(&id);
                    continue;
                }
                Err(err) => warn!(error = %err, candidate = %id, "token lock unavailable, failing open"),
            }
        }

        match gate
            .ip_check_and_touch(&provider_id, ctx.client_ip, candidate.provider.ip_lock_minutes)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                saw_non_rpm_rejection = true;
                balancer.reduce(&id);
                continue;
            }
            Err(err) => warn!(error = %err, provider = %provider_id, "ip lock unavailable, failing open"),
        }

        let outbound = build_outbound_request(candidate, ctx, before);
        gate.rpm_record(&provider_id).await.ok();
        let proxy_time_ms = started_at.elapsed().as_millis() as i64;

        match upstream.send(&outbound, header_timeout, before.stream).await {
            Err(failure) => {
                record_retry_log(
                    storage,
                    &resolved.meta.name,
                    candidate,
                    ctx,
                    retry_index,
                    proxy_time_ms,
                    failure.to_string(),
                )
                .await;
                balancer.delete(&id);
                last_error = Some(CoreError::UpstreamError {
                    status: 0,
                    body: failure.to_string(),
                });
                retry_index += 1;
            }
            Ok(resp) if (200..300).contains(&resp.status) => {
                balancer.success(&id);
                let log_id = storage
                    .insert_request_log(success_log_input(
                        &resolved.meta.name,
                        candidate,
                        ctx,
                        retry_index,
                        proxy_time_ms,
                    ))
                    .await
                    .unwrap_or(0);
                return Ok(DispatchOutcome {
                    response: resp,
                    candidate: candidate.clone(),
                    log_id,
                    retry_index,
                    started_at,
                });
            }
            Ok(resp) if resp.status == 429 => {
                let UpstreamResponse { status, body, .. } = resp;
                let text = truncate_body(body).await;
                record_retry_log(
                    storage,
                    &resolved.meta.name,
                    candidate,
                    ctx,
                    retry_index,
                    proxy_time_ms,
                    format!("http {status}: {text}"),
                )
                .await;
                balancer.reduce(&id);
                last_error = Some(CoreError::UpstreamError { status, body: text });
                retry_index += 1;
            }
            Ok(resp) => {
                let UpstreamResponse { status, body, .. } = resp;
                let text = truncate_body(body).await;
                record_retry_log(
                    storage,
                    &resolved.meta.name,
                    candidate,
                    ctx,
                    retry_index,
                    proxy_time_ms,
                    format!("http {status}: {text}"),
                )
                .await;
                balancer.delete(&id);
                last_error = Some(CoreError::UpstreamError { status, body: text });
                retry_index += 1;
            }
        }
    }
}

fn build_outbound_request(candidate: &CandidateRow, ctx: &RequestContext, before: &Before) -> OutboundRequest {
    let anthropic_version = candidate
        .provider
        .anthropic_version
        .as_deref()
        .unwrap_or(DEFAULT_ANTHROPIC_VERSION);
    let target = UpstreamTarget {
        base_url: &candidate.provider.base_url,
        api_key: &candidate.provider.api_key,
        provider_model: &candidate.provider_model,
        anthropic_version,
    };
    let headers = HeaderContext {
        inbound: &ctx.inbound_headers,
        customer_headers: &candidate.customer_headers,
        with_header: candidate.with_header,
    };
    dialect_ops::build_outbound(ctx.dialect, ctx.call_kind, before, target, headers)
}

fn success_log_input(
    name: &str,
    candidate: &CandidateRow,
    ctx: &RequestContext,
    retry_index: i32,
    proxy_time_ms: i64,
) -> RequestLogInput {
    RequestLogInput {
        uuid: Uuid::now_v7(),
        name: name.to_string(),
        provider_model: Some(candidate.provider_model.clone()),
        provider_name: Some(candidate.provider.name.clone()),
        status: "success",
        style: ctx.dialect,
        user_agent: ctx.user_agent.clone(),
        remote_ip: Some(ctx.client_ip.to_string()),
        auth_key_id: ctx.auth_key_id,
        retry: retry_index,
        proxy_time_ms,
        error: None,
    }
}

async fn record_retry_log(
    storage: &dyn Storage,
    name: &str,
    candidate: &CandidateRow,
    ctx: &RequestContext,
    retry_index: i32,
    proxy_time_ms: i64,
    error: String,
) {
    let input = RequestLogInput {
        uuid: Uuid::now_v7(),
        name: name.to_string(),
        provider_model: Some(candidate.provider_model.clone()),
        provider_name: Some(candidate.provider.name.clone()),
        status: "error",
        style: ctx.dialect,
        user_agent: ctx.user_agent.clone(),
        remote_ip: Some(ctx.client_ip.to_string()),
        auth_key_id: ctx.auth_key_id,
        retry: retry_index,
        proxy_time_ms,
        error: Some(error),
    };
    if let Err(err) = storage.insert_request_log(input).await {
        warn!(error = %err, "failed to record retry log row");
    }
}

/// Drains up to 4KB of the body for an error message. wreq's gzip/deflate/
/// brotli/zstd features already transparently decompress the wire body, so
/// the only encoding concern left here is non-UTF-8 content.
async fn truncate_body(body: UpstreamBody) -> String {
    let bytes = match body {
        UpstreamBody::Bytes(b) => b,
        UpstreamBody::Stream(mut rx) => {
            let mut buf = Vec::new();
            while buf.len() < MAX_ERROR_BODY_BYTES {
                match rx.recv().await {
                    Some(chunk) => buf.extend_from_slice(&chunk),
                    None => break,
                }
            }
            Bytes::from(buf)
        }
    };
    let capped = &bytes[..bytes.len().min(MAX_ERROR_BODY_BYTES)];
    match std::str::from_utf8(capped) {
        Ok(s) => s.to_string(),
        Err(_) => base64::engine::general_purpose::STANDARD.encode(capped),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gwayrs_resilience::GateError;
    use gwayrs_storage::{
        AuthKeyRow, IoLogInput, LogicalModelRow, ProviderRow, RequestLogFinish, StorageResult,
    };
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct AlwaysAdmitGate;

    #[async_trait]
    impl Gate for AlwaysAdmitGate {
        async fn rpm_check_admit(&self, _provider_id: &str, _limit: i64) -> Result<bool, GateError> {
            Ok(true)
        }
        async fn rpm_record(&self, _provider_id: &str) -> Result<(), GateError> {
            Ok(())
        }
        async fn ip_check_and_touch(
            &self,
            _provider_id: &str,
            _client_ip: IpAddr,
            _lock_minutes: i64,
        ) -> Result<bool, GateError> {
            Ok(true)
        }
        async fn token_check_and_touch(
            &self,
            _candidate_id: &str,
            _auth_key_id: &str,
            _ttl: Duration,
        ) -> Result<bool, GateError> {
            Ok(true)
        }
    }

    struct RecordingStorage {
        logs: Mutex<Vec<RequestLogInput>>,
    }

    #[async_trait]
    impl Storage for RecordingStorage {
        async fn sync(&self) -> StorageResult<()> {
            Ok(())
        }
        async fn find_logical_model(&self, _name: &str) -> StorageResult<Option<LogicalModelRow>> {
            Ok(None)
        }
        async fn list_candidates(&self, _model_id: i64) -> StorageResult<Vec<CandidateRow>> {
            Ok(Vec::new())
        }
        async fn find_auth_key(&self, _key: &str) -> StorageResult<Option<AuthKeyRow>> {
            Ok(None)
        }
        async fn list_models_for_dialect(&self, _dialect: Dialect) -> StorageResult<Vec<String>> {
            Ok(Vec::new())
        }
        async fn insert_request_log(&self, input: RequestLogInput) -> StorageResult<i64> {
            self.logs.lock().unwrap().push(input);
            Ok(self.logs.lock().unwrap().len() as i64)
        }
        async fn finish_request_log(&self, _id: i64, _finish: RequestLogFinish) -> StorageResult<()> {
            Ok(())
        }
        async fn insert_io_log(&self, _request_log_id: i64, _input: IoLogInput) -> StorageResult<()> {
            Ok(())
        }
    }

    fn provider() -> ProviderRow {
        ProviderRow {
            id: 1,
            name: "p1".into(),
            dialect: Dialect::Openai,
            // Port 9 (discard) is never listening in a test sandbox, so the
            // connection is refused immediately instead of depending on DNS
            // or an external service being reachable.
            base_url: "http://127.0.0.1:9".into(),
            api_key: "k".into(),
            anthropic_version: None,
            rpm_limit: 0,
            ip_lock_minutes: 0,
        }
    }

    fn candidate(id: i64) -> CandidateRow {
        CandidateRow {
            id,
            provider_model: "real-model".into(),
            tool_call: false,
            structured_output: false,
            image: false,
            with_header: false,
            weight: 1,
            customer_headers: Vec::new(),
            provider: provider(),
        }
    }

    fn before() -> Before {
        Before {
            model: "M".into(),
            stream: false,
            needs_tool: false,
            needs_structured: false,
            needs_image: false,
            rewritten_body: serde_json::json!({}),
        }
    }

    fn ctx() -> RequestContext {
        RequestContext {
            dialect: Dialect::Openai,
            call_kind: CallKind::Normal,
            inbound_headers: Vec::new(),
            user_agent: None,
            client_ip: "127.0.0.1".parse().unwrap(),
            auth_key_id: Some(1),
        }
    }

    fn resolved_with(candidates: Vec<CandidateRow>, max_retry: u32, breaker: bool) -> ResolvedCandidates {
        let weights = candidates.iter().map(|c| (c.id.to_string(), c.weight)).collect();
        let mut map = HashMap::new();
        for c in candidates {
            map.insert(c.id.to_string(), c);
        }
        ResolvedCandidates {
            candidates: map,
            weights,
            meta: crate::resolver::LogicalModelMeta {
                name: "M".into(),
                max_retry,
                timeout_seconds: 30,
                io_log: false,
                strategy: "lottery".into(),
                breaker,
            },
        }
    }

    #[tokio::test]
    async fn exhausts_retry_budget_and_surfaces_last_error() {
        let storage = RecordingStorage { logs: Mutex::new(Vec::new()) };
        let gate = AlwaysAdmitGate;
        let breaker = CircuitBreaker::new();
        let upstream = UpstreamClient::new();
        let resolved = resolved_with(vec![candidate(1)], 1, false);

        let err = dispatch(&storage, &gate, &breaker, &upstream, resolved, &before(), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::UpstreamError { .. }));
        assert_eq!(storage.logs.lock().unwrap().len(), 1);
    }

    #[test]
    fn truncate_body_base64_encodes_non_utf8() {
        let body = UpstreamBody::Bytes(Bytes::from_static(&[0xff, 0xfe, 0xfd]));
        let text = tokio::runtime::Runtime::new().unwrap().block_on(truncate_body(body));
        assert_eq!(text, base64::engine::general_purpose::STANDARD.encode([0xff, 0xfe, 0xfd]));
    }
}
