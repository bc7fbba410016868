use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use gwayrs_common::Dialect;
use gwayrs_protocol::outbound::header_set;
use gwayrs_protocol::sse::SseParser;
use gwayrs_storage::{IoLogInput, RequestLogFinish, Storage};
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tracing::warn;

use crate::dialect_ops;

/// Upstream response headers copied to the client, with the SSE-framing
/// headers forced on for streaming responses per the streaming teer's
/// contract — the writer must not let an intermediary buffer the body.
pub fn response_headers(upstream_headers: &[(String, String)], stream: bool) -> Vec<(String, String)> {
    let mut headers = upstream_headers.to_vec();
    if stream {
        header_set(&mut headers, "Content-Type", "text/event-stream");
        header_set(&mut headers, "Cache-Control", "no-cache");
        header_set(&mut headers, "Connection", "keep-alive");
        header_set(&mut headers, "X-Accel-Buffering", "no");
    }
    headers
}

/// The client-visible half of a teed stream: bytes forwarded unchanged, in
/// order, as they arrive from upstream.
pub struct StreamTee {
    pub client_rx: mpsc::Receiver<Bytes>,
}

/// Tee an upstream stream into the client writer and a background recorder.
/// The recorder decodes SSE framing only to feed the dialect's usage
/// accumulator (and, when `io_log` is set, to collect the ordered payload
/// list); it never blocks or slows the forwarded bytes, which are sent to
/// the client channel before being handed to the parser.
pub fn tee_stream(
    storage: Arc<dyn Storage>,
    dialect: Dialect,
    log_id: i64,
    io_log: bool,
    input_body: String,
    mut upstream_rx: mpsc::Receiver<Bytes>,
    started_at: Instant,
) -> StreamTee {
    let (client_tx, client_rx) = mpsc::channel::<Bytes>(16);

    tokio::spawn(async move {
        let mut accumulator = dialect_ops::new_usage_accumulator(dialect);
        let mut parser = SseParser::new();
        let mut first_chunk_at: Option<Instant> = None;
        let mut last_chunk_at = started_at;
        let mut total_bytes: i64 = 0;
        let mut output_events: Vec<String> = Vec::new();
        let mut client_open = true;

        while let Some(chunk) = upstream_rx.recv().await {
            if first_chunk_at.is_none() {
                first_chunk_at = Some(Instant::now());
            }
            last_chunk_at = Instant::now();
            total_bytes += chunk.len() as i64;

            if client_open && client_tx.send(chunk.clone()).await.is_err() {
                // Client disconnected mid-stream: stop forwarding and stop
                // parsing further chunks, but finish the log row with
                // whatever usage/bytes were collected up to this point.
                client_open = false;
                warn!(log_id, "client disconnected mid-stream");
                break;
            }

            for event in parser.push_bytes(&chunk) {
                if io_log {
                    output_events.push(event.data.clone());
                }
                if accumulator.is_terminal(&event.data) {
                    continue;
                }
                if let Err(err) = accumulator.on_event(event.event.as_deref(), &event.data) {
                    warn!(log_id, error = %err, "upstream stream event signaled an error");
                }
            }
        }

        if client_open {
            for event in parser.finish() {
                if io_log {
                    output_events.push(event.data.clone());
                }
                let _ = accumulator.on_event(event.event.as_deref(), &event.data);
            }
        }

        let usage = accumulator.finish();
        let elapsed_ms = started_at.elapsed().as_millis() as i64;
        let finish = RequestLogFinish {
            first_chunk_time_ms: first_chunk_at.map(|t| t.duration_since(started_at).as_millis() as i64),
            chunk_time_ms: Some(last_chunk_at.duration_since(started_at).as_millis() as i64),
            tps: usage.map(|u| tokens_per_second(u.completion_tokens, elapsed_ms)),
            size: total_bytes,
            prompt_tokens: usage.map(|u| u.prompt_tokens),
            completion_tokens: usage.map(|u| u.completion_tokens),
            total_tokens: usage.map(|u| u.total_tokens),
            prompt_tokens_details: usage.map(|u| serde_json::json!({ "cached_tokens": u.cached_tokens })),
        };
        if let Err(err) = storage.finish_request_log(log_id, finish).await {
            warn!(log_id, error = %err, "failed to finish streaming log row");
        }

        if io_log {
            let io = IoLogInput {
                input: input_body,
                output_string: None,
                output_string_array: Some(JsonValue::Array(
                    output_events.into_iter().map(JsonValue::String).collect(),
                )),
            };
            if let Err(err) = storage.insert_io_log(log_id, io).await {
                warn!(log_id, error = %err, "failed to insert io log row");
            }
        }
    });

    StreamTee { client_rx }
}

/// Finish a non-stream log row: the whole body arrived already, so there is
/// no tee — just extract usage and optionally persist the IO pair.
pub async fn finish_nonstream(
    storage: &dyn Storage,
    dialect: Dialect,
    log_id: i64,
    io_log: bool,
    input_body: String,
    body: &Bytes,
    started_at: Instant,
) {
    let parsed: Option<JsonValue> = serde_json::from_slice(body).ok();
    let usage = parsed
        .as_ref()
        .and_then(|value| dialect_ops::usage_from_body(dialect, value));

    let finish = RequestLogFinish {
        first_chunk_time_ms: None,
        chunk_time_ms: Some(started_at.elapsed().as_millis() as i64),
        tps: None,
        size: body.len() as i64,
        prompt_tokens: usage.map(|u| u.prompt_tokens),
        completion_tokens: usage.map(|u| u.completion_tokens),
        total_tokens: usage.map(|u| u.total_tokens),
        prompt_tokens_details: usage.map(|u| serde_json::json!({ "cached_tokens": u.cached_tokens })),
    };
    if let Err(err) = storage.finish_request_log(log_id, finish).await {
        warn!(log_id, error = %err, "failed to finish non-stream log row");
    }

    if io_log {
        let output_string = String::from_utf8_lossy(body).to_string();
        let io = IoLogInput {
            input: input_body,
            output_string: Some(output_string),
            output_string_array: None,
        };
        if let Err(err) = storage.insert_io_log(log_id, io).await {
            warn!(log_id, error = %err, "failed to insert io log row");
        }
    }
}

fn tokens_per_second(completion_tokens: i64, elapsed_ms: i64) -> f64 {
    if elapsed_ms <= 0 {
        return 0.0;
    }
    completion_tokens as f64 / (elapsed_ms as f64 / 1000.0)
}
