//! OpenAI streaming, first candidate succeeds: the client must receive the
//! upstream SSE body byte-for-byte, and the finished log row must carry the
//! usage totals parsed out of the trailing `data:` line.

mod support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use gwayrs_common::Dialect;
use gwayrs_core::resolver::resolve;
use gwayrs_core::retry::{dispatch, RequestContext};
use gwayrs_core::stream_tee::tee_stream;
use gwayrs_core::upstream_client::{UpstreamBody, UpstreamClient};
use gwayrs_core::CallKind;
use gwayrs_protocol::{openai, Before};
use gwayrs_resilience::{CircuitBreaker, MemoryGate};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use support::{candidate, logical_model, provider, MockStorage};

fn before(body: &serde_json::Value) -> Before {
    openai::parse_request(body).unwrap()
}

fn ctx() -> RequestContext {
    RequestContext {
        dialect: Dialect::Openai,
        call_kind: CallKind::Normal,
        inbound_headers: Vec::new(),
        user_agent: Some("test-agent".to_string()),
        client_ip: "203.0.113.1".parse().unwrap(),
        auth_key_id: Some(1),
    }
}

#[tokio::test]
async fn sse_body_passes_through_byte_for_byte_and_logs_usage() {
    let upstream = MockServer::start().await;
    let sse_body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\n",
        "data: {\"usage\":{\"total_tokens\":7,\"prompt_tokens\":3,\"completion_tokens\":4}}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(sse_body)
                .insert_header("content-type", "text/event-stream"),
        )
        .mount(&upstream)
        .await;

    let body = serde_json::json!({
        "model": "M",
        "stream": true,
        "messages": [{"role": "user", "content": "hi"}],
    });
    let before = before(&body);

    let storage = Arc::new(MockStorage::new(
        logical_model("M", 2, "lottery"),
        vec![candidate(1, "P1", 1, provider(1, Dialect::Openai, &upstream.uri()))],
    ));
    let gate = MemoryGate::new();
    let breaker = CircuitBreaker::new();
    let client = UpstreamClient::new();

    let resolved = resolve(storage.as_ref(), Dialect::Openai, &before).await.unwrap();
    let outcome = dispatch(storage.as_ref(), &gate, &breaker, &client, resolved, &before, &ctx())
        .await
        .unwrap();

    assert_eq!(outcome.retry_index, 0);
    assert_eq!(storage.logs()[0].status, "success");

    let UpstreamBody::Stream(rx) = outcome.response.body else {
        panic!("expected a streamed response body");
    };

    let tee = tee_stream(storage.clone(), Dialect::Openai, outcome.log_id, false, String::new(), rx, Instant::now());
    let mut client_rx = tee.client_rx;
    let mut received = Vec::new();
    while let Some(chunk) = client_rx.recv().await {
        received.extend_from_slice(&chunk);
    }
    assert_eq!(received, sse_body.as_bytes());

    // Give the background recorder a moment to finish the log row.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let finish = storage.finish_for(outcome.log_id).unwrap();
    assert_eq!(finish.prompt_tokens, Some(3));
    assert_eq!(finish.completion_tokens, Some(4));
    assert_eq!(finish.total_tokens, Some(7));
}
