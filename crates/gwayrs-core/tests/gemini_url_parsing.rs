//! Gemini streaming URL parsing: the logical model name and the stream bit
//! come from the URL path, not the body, and the outbound URL carries
//! `?alt=sse` for the streaming action.

mod support;

use gwayrs_core::classify::{classify, Route};
use gwayrs_protocol::gemini;
use gwayrs_protocol::outbound::{HeaderContext, UpstreamTarget};
use http::Method;

use support::provider;
use gwayrs_common::Dialect;

#[test]
fn classifies_model_and_action_from_the_url() {
    let route = classify(
        &Method::POST,
        "/gemini/v1beta/models/gemini-2.5-flash:streamGenerateContent",
    )
    .unwrap();

    let Route::Gemini { model, action } = route else {
        panic!("expected a gemini route");
    };
    assert_eq!(model, "gemini-2.5-flash");
    assert_eq!(action, gemini::GeminiAction::StreamGenerateContent);

    let before = gemini::parse_request(&serde_json::json!({}), &model, action).unwrap();
    assert_eq!(before.model, "gemini-2.5-flash");
    assert!(before.stream);
    // The body is never rewritten to carry the model name.
    assert_eq!(before.rewritten_body, serde_json::json!({}));

    let target = UpstreamTarget {
        base_url: "https://example.test",
        api_key: "k",
        provider_model: "gemini-2.5-flash",
        anthropic_version: "",
    };
    let headers = HeaderContext {
        inbound: &[],
        customer_headers: &[],
        with_header: false,
    };
    let outbound = gemini::build_outbound(&before, target, headers);
    assert_eq!(
        outbound.url,
        "https://example.test/models/gemini-2.5-flash:streamGenerateContent?alt=sse"
    );

    // Cross-check the candidate provider this path would resolve against is
    // the gemini dialect, not one of the other three.
    let p = provider(1, Dialect::Gemini, "https://example.test");
    assert_eq!(p.dialect, Dialect::Gemini);
}
