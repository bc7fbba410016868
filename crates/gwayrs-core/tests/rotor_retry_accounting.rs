//! 429 reduces, 500 evicts: with a rotor balancer over two equal-weight
//! candidates, a 429 on c1 demotes it to the tail (not evicted — it comes
//! back around), a 500 on c2 evicts it outright, and the retry that follows
//! lands back on c1, which now succeeds.

mod support;

use std::sync::Arc;

use gwayrs_common::Dialect;
use gwayrs_core::resolver::resolve;
use gwayrs_core::retry::{dispatch, RequestContext};
use gwayrs_core::upstream_client::UpstreamClient;
use gwayrs_core::CallKind;
use gwayrs_protocol::openai;
use gwayrs_resilience::{CircuitBreaker, MemoryGate};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use support::{candidate, logical_model, provider, MockStorage};

fn ctx() -> RequestContext {
    RequestContext {
        dialect: Dialect::Openai,
        call_kind: CallKind::Normal,
        inbound_headers: Vec::new(),
        user_agent: None,
        client_ip: "203.0.113.3".parse().unwrap(),
        auth_key_id: Some(1),
    }
}

#[tokio::test]
async fn c1_429_then_c2_500_then_c1_succeeds() {
    let c1_server = MockServer::start().await;
    // First call to c1 returns 429, the retried call (after c2 is evicted)
    // returns 200 — wiremock serves mounted mocks in last-mounted-first
    // order, so the 200 mock (mounted second) is tried first and only
    // falls through to the 429 mock once its own `up_to_n_times` is spent.
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&c1_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
        })))
        .mount(&c1_server)
        .await;

    let c2_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("dead"))
        .mount(&c2_server)
        .await;

    let body = serde_json::json!({"model": "M", "messages": [{"role": "user", "content": "hi"}]});
    let before = openai::parse_request(&body).unwrap();

    let storage = Arc::new(MockStorage::new(
        logical_model("M", 3, "rotor"),
        vec![
            candidate(1, "p1", 9, provider(1, Dialect::Openai, &c1_server.uri())),
            candidate(2, "p2", 9, provider(2, Dialect::Openai, &c2_server.uri())),
        ],
    ));
    let gate = MemoryGate::new();
    let breaker = CircuitBreaker::new();
    let client = UpstreamClient::new();

    let resolved = resolve(storage.as_ref(), Dialect::Openai, &before).await.unwrap();
    let outcome = dispatch(storage.as_ref(), &gate, &breaker, &client, resolved, &before, &ctx())
        .await
        .unwrap();

    // c1 (429, reduced to tail), c2 (500, evicted), c1 again (success): two
    // attempts precede the winning one.
    assert_eq!(outcome.retry_index, 2);
    assert_eq!(outcome.candidate.id, 1);

    let logs = storage.logs();
    assert_eq!(logs.len(), 3);
    assert_eq!(logs[0].status, "error");
    assert!(logs[0].error.as_deref().unwrap().contains("429"));
    assert_eq!(logs[1].status, "error");
    assert!(logs[1].error.as_deref().unwrap().contains("dead"));
    assert_eq!(logs[2].status, "success");
}
