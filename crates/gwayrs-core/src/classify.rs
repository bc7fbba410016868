use gwayrs_common::Dialect;
use gwayrs_protocol::gemini::GeminiAction;
use http::Method;

use crate::error::ProxyError;

/// The result of matching an inbound request's method+path against the
/// routing table. Body parsing (model/stream/capability extraction) is left
/// to the dialect adapter — classification only resolves which adapter and
/// which shape of call this is.
#[derive(Debug, Clone)]
pub enum Route {
    Call(Dialect),
    AnthropicCountTokens,
    Gemini { model: String, action: GeminiAction },
    ModelsList(Dialect),
    Healthz,
}

pub fn classify(method: &Method, path: &str) -> Result<Route, ProxyError> {
    let path = path.trim_start_matches('/');
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match segments.as_slice() {
        ["healthz"] => {
            ensure_method(method, Method::GET, "healthz")?;
            Ok(Route::Healthz)
        }
        ["v1", "chat", "completions"] | ["openai", "v1", "chat", "completions"] => {
            ensure_method(method, Method::POST, "openai chat completions")?;
            Ok(Route::Call(Dialect::Openai))
        }
        ["v1", "responses"] | ["openai", "v1", "responses"] => {
            ensure_method(method, Method::POST, "openai responses")?;
            Ok(Route::Call(Dialect::OpenaiResponses))
        }
        ["v1", "messages"] | ["anthropic", "v1", "messages"] => {
            ensure_method(method, Method::POST, "anthropic messages")?;
            Ok(Route::Call(Dialect::Anthropic))
        }
        ["v1", "messages", "count_tokens"] => {
            ensure_method(method, Method::POST, "anthropic count tokens")?;
            Ok(Route::AnthropicCountTokens)
        }
        ["gemini", "v1beta", "models", rest @ ..] if !rest.is_empty() => {
            ensure_method(method, Method::POST, "gemini generate")?;
            let joined = rest.join("/");
            let (model, action) = joined
                .split_once(':')
                .ok_or_else(|| ProxyError::not_found("missing gemini action"))?;
            let action = GeminiAction::parse(action)
                .map_err(|_| ProxyError::not_found("unknown gemini action"))?;
            Ok(Route::Gemini {
                model: model.to_string(),
                action,
            })
        }
        ["v1", "models"] => {
            ensure_method(method, Method::GET, "openai models list")?;
            Ok(Route::ModelsList(Dialect::Openai))
        }
        ["anthropic", "v1", "models"] => {
            ensure_method(method, Method::GET, "anthropic models list")?;
            Ok(Route::ModelsList(Dialect::Anthropic))
        }
        ["gemini", "v1beta", "models"] => {
            ensure_method(method, Method::GET, "gemini models list")?;
            Ok(Route::ModelsList(Dialect::Gemini))
        }
        _ => Err(ProxyError::not_found("unknown path")),
    }
}

fn ensure_method(method: &Method, expected: Method, label: &str) -> Result<(), ProxyError> {
    if *method == expected {
        Ok(())
    } else {
        Err(ProxyError::method_not_allowed(format!(
            "invalid method for {label}"
        )))
    }
}
