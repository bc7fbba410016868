use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use gwayrs_protocol::outbound::HttpMethod;
use gwayrs_protocol::OutboundRequest;
use wreq::{Client, Method};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// A failed upstream attempt. The retry pipeline (C8) does not distinguish
/// transport-error kinds — connect failure, DNS failure, and a header
/// timeout are all treated identically (evict the candidate and continue) —
/// so this carries only a message for the log row.
#[derive(Debug, Clone)]
pub struct UpstreamFailure(pub String);

impl std::fmt::Display for UpstreamFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct UpstreamResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: UpstreamBody,
}

pub enum UpstreamBody {
    Bytes(Bytes),
    Stream(tokio::sync::mpsc::Receiver<Bytes>),
}

/// Upstream HTTP client pooled by response-header timeout: §4.8 varies this
/// timeout between stream and non-stream dispatch, so a single shared client
/// with one fixed timeout would either cut streams short or let non-stream
/// calls hang too long.
#[derive(Clone)]
pub struct UpstreamClient {
    clients: std::sync::Arc<Mutex<HashMap<Duration, Client>>>,
}

impl Default for UpstreamClient {
    fn default() -> Self {
        Self::new()
    }
}

impl UpstreamClient {
    pub fn new() -> Self {
        Self {
            clients: std::sync::Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn client_for(&self, header_timeout: Duration) -> Result<Client, UpstreamFailure> {
        let mut guard = self
            .clients
            .lock()
            .map_err(|_| UpstreamFailure("upstream client cache lock poisoned".into()))?;
        if let Some(client) = guard.get(&header_timeout) {
            return Ok(client.clone());
        }
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(STREAM_IDLE_TIMEOUT)
            .build()
            .map_err(|err| UpstreamFailure(err.to_string()))?;
        guard.insert(header_timeout, client.clone());
        Ok(client)
    }

    /// `want_stream` controls how the body is returned; `header_timeout` is
    /// the deadline on reaching a response (non-stream: full response body
    /// too, since headers and body arrive together for a JSON reply; stream:
    /// headers only — the body itself is bounded by the idle-read timeout).
    pub async fn send(
        &self,
        req: &OutboundRequest,
        header_timeout: Duration,
        want_stream: bool,
    ) -> Result<UpstreamResponse, UpstreamFailure> {
        let client = self.client_for(header_timeout)?;
        let method = match req.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
        };
        let mut builder = client.request(method, &req.url);
        for (k, v) in &req.headers {
            builder = builder.header(k, v);
        }
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }

        if want_stream {
            let resp = tokio::time::timeout(header_timeout, builder.send())
                .await
                .map_err(|_| UpstreamFailure("response header timeout".into()))?
                .map_err(|err| UpstreamFailure(err.to_string()))?;
            convert_stream(resp)
        } else {
            let resp = tokio::time::timeout(header_timeout, async {
                let resp = builder.send().await.map_err(|err| UpstreamFailure(err.to_string()))?;
                let status = resp.status().as_u16();
                let headers = headers_from_wreq(resp.headers());
                let body = resp.bytes().await.map_err(|err| UpstreamFailure(err.to_string()))?;
                Ok(UpstreamResponse {
                    status,
                    headers,
                    body: UpstreamBody::Bytes(body),
                })
            })
            .await
            .map_err(|_| UpstreamFailure("response timeout".into()))??;
            Ok(resp)
        }
    }
}

fn convert_stream(resp: wreq::Response) -> Result<UpstreamResponse, UpstreamFailure> {
    let status = resp.status().as_u16();
    let headers = headers_from_wreq(resp.headers());

    let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(16);
    tokio::spawn(async move {
        let mut stream = resp.bytes_stream();
        loop {
            let next = tokio::time::timeout(STREAM_IDLE_TIMEOUT, stream.next()).await;
            let item = match next {
                Ok(item) => item,
                Err(_) => break,
            };
            let Some(item) = item else {
                break;
            };
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(_) => break,
            };
            if tx.send(chunk).await.is_err() {
                break;
            }
        }
    });

    Ok(UpstreamResponse {
        status,
        headers,
        body: UpstreamBody::Stream(rx),
    })
}

fn headers_from_wreq(map: &wreq::header::HeaderMap) -> Vec<(String, String)> {
    map.iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.as_str().to_string(), s.to_string())))
        .collect()
}
