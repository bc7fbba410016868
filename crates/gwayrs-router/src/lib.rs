use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, Request, State};
use axum::response::{IntoResponse, Response};
use axum::Router;
use bytes::Bytes;
use futures_util::StreamExt;
use gwayrs_common::Dialect;
use gwayrs_core::{
    authenticate, dispatch, finish_nonstream, resolve, resolve_client_ip, response_headers,
    tee_stream, AppState, AuthContext, CallKind, ProxyError, RequestContext, Route,
};
use gwayrs_core::upstream_client::UpstreamBody;
use gwayrs_protocol::{anthropic, gemini, openai, openai_responses, Before};
use gwayrs_storage::Storage;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde_json::Value as JsonValue;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

const MAX_INBOUND_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Builds the single fallback-routed `Router` for the gateway. Every inbound
/// path and method is matched by [`gwayrs_core::classify`], so there is no
/// declarative per-path table here — the router's job is pulling the request
/// apart, invoking the core pipeline, and putting a response back together.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new().fallback(handle).with_state(state)
}

async fn handle(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request,
) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let headers = req.headers().clone();
    let path = uri.path().to_string();
    let query = uri.query().map(str::to_string);

    let body = match to_bytes(req.into_body(), MAX_INBOUND_BODY_BYTES).await {
        Ok(body) => body,
        Err(_) => return error_response(ProxyError::bad_request("body too large")),
    };

    match route_request(&state, &method, &path, query.as_deref(), &headers, body, peer).await {
        Ok(resp) => resp,
        Err(err) => error_response(err),
    }
}

async fn route_request(
    state: &AppState,
    method: &Method,
    path: &str,
    query: Option<&str>,
    headers: &HeaderMap,
    body: Bytes,
    peer: SocketAddr,
) -> Result<Response, ProxyError> {
    let route = gwayrs_core::classify(method, path)?;

    if matches!(route, Route::Healthz) {
        return Ok((StatusCode::OK, "ok").into_response());
    }

    let auth = authenticate(state.storage.as_ref(), state.admin_token.as_deref(), headers, query).await?;
    let client_ip = resolve_client_ip(headers, peer.ip(), &state.trusted_proxies);

    match route {
        Route::Call(dialect) => {
            let before = parse_before(dialect, &body, None, None)?;
            handle_call(state, dialect, CallKind::Normal, auth, headers, client_ip, before, body).await
        }
        Route::AnthropicCountTokens => {
            let before = parse_before(Dialect::Anthropic, &body, None, None)?;
            handle_call(state, Dialect::Anthropic, CallKind::AnthropicCountTokens, auth, headers, client_ip, before, body).await
        }
        Route::Gemini { model, action } => {
            let before = parse_before(Dialect::Gemini, &body, Some(&model), Some(action))?;
            handle_call(state, Dialect::Gemini, CallKind::Normal, auth, headers, client_ip, before, body).await
        }
        Route::ModelsList(dialect) => handle_models_list(state, dialect).await,
        Route::Healthz => unreachable!("handled above"),
    }
}

fn parse_before(
    dialect: Dialect,
    body: &Bytes,
    gemini_model: Option<&str>,
    gemini_action: Option<gemini::GeminiAction>,
) -> Result<Before, ProxyError> {
    let value: JsonValue = serde_json::from_slice(body)
        .map_err(|_| ProxyError::bad_request("invalid json body"))?;

    let before = match dialect {
        Dialect::Openai => openai::parse_request(&value),
        Dialect::OpenaiResponses => openai_responses::parse_request(&value),
        Dialect::Anthropic => anthropic::parse_request(&value),
        Dialect::Gemini => {
            let model = gemini_model.unwrap_or_default();
            let action = gemini_action.ok_or_else(|| ProxyError::bad_request("missing gemini action"))?;
            gemini::parse_request(&value, model, action)
        }
    };

    before.map_err(ProxyError::from)
}

#[allow(clippy::too_many_arguments)]
async fn handle_call(
    state: &AppState,
    dialect: Dialect,
    call_kind: CallKind,
    auth: AuthContext,
    headers: &HeaderMap,
    client_ip: std::net::IpAddr,
    before: Before,
    raw_body: Bytes,
) -> Result<Response, ProxyError> {
    if !auth.permits(&before.model) {
        return Err(ProxyError::forbidden("model not permitted for this key"));
    }

    let resolved = resolve(state.storage.as_ref(), dialect, &before).await?;
    let io_log = resolved.meta.io_log;

    let ctx = RequestContext {
        dialect,
        call_kind,
        inbound_headers: headers_to_vec(headers),
        user_agent: header_str(headers, header::USER_AGENT.as_str()),
        client_ip,
        auth_key_id: Some(auth.key_id),
    };

    let outcome = dispatch(
        state.storage.as_ref(),
        state.gate.as_ref(),
        state.breaker.as_ref(),
        &state.upstream,
        resolved,
        &before,
        &ctx,
    )
    .await
    .map_err(ProxyError::from)?;

    let gwayrs_core::DispatchOutcome { response, log_id, started_at, .. } = outcome;
    let out_headers = response_headers(&response.headers, before.stream);
    let input_body = String::from_utf8_lossy(&raw_body).to_string();

    let resp = match response.body {
        UpstreamBody::Bytes(bytes) => {
            finish_nonstream(state.storage.as_ref(), dialect, log_id, io_log, input_body, &bytes, started_at).await;
            build_response(response.status, out_headers, Body::from(bytes))
        }
        UpstreamBody::Stream(rx) => {
            let tee = tee_stream(state.storage.clone(), dialect, log_id, io_log, input_body, rx, started_at);
            let stream = ReceiverStream::new(tee.client_rx).map(Ok::<_, std::convert::Infallible>);
            build_response(response.status, out_headers, Body::from_stream(stream))
        }
    };

    Ok(resp)
}

async fn handle_models_list(state: &AppState, dialect: Dialect) -> Result<Response, ProxyError> {
    let names = state
        .storage
        .list_models_for_dialect(dialect)
        .await
        .map_err(|err| ProxyError::internal(err.to_string()))?;

    let payload = match dialect {
        Dialect::Gemini => serde_json::json!({
            "models": names.into_iter().map(|n| serde_json::json!({"name": format!("models/{n}")})).collect::<Vec<_>>(),
        }),
        Dialect::Anthropic => serde_json::json!({
            "data": names.into_iter().map(|n| serde_json::json!({"id": n, "type": "model"})).collect::<Vec<_>>(),
            "has_more": false,
        }),
        _ => serde_json::json!({
            "object": "list",
            "data": names.into_iter().map(|n| serde_json::json!({"id": n, "object": "model"})).collect::<Vec<_>>(),
        }),
    };

    Ok((StatusCode::OK, axum::Json(payload)).into_response())
}

fn build_response(status: u16, headers: Vec<(String, String)>, body: Body) -> Response {
    let mut builder = Response::builder().status(StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY));
    if let Some(h) = builder.headers_mut() {
        for (k, v) in headers {
            if is_hop_by_hop(&k) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(k.as_bytes()), HeaderValue::from_str(&v)) {
                h.append(name, value);
            }
        }
    }
    builder.body(body).unwrap_or_else(|_| {
        warn!("failed to build upstream response");
        (StatusCode::INTERNAL_SERVER_ERROR, "response_build_failed").into_response()
    })
}

fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "content-length" | "transfer-encoding" | "connection" | "keep-alive" | "upgrade"
    )
}

fn headers_to_vec(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
        .collect()
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn error_response(err: ProxyError) -> Response {
    let status = err.status;
    let body = serde_json::json!({ "error": String::from_utf8_lossy(&err.body) });
    (status, axum::Json(body)).into_response()
}
