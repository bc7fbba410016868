use std::sync::Arc;

use gwayrs_resilience::{CircuitBreaker, Gate, MemoryGate};
use gwayrs_storage::Storage;
use ipnet::IpNet;

use crate::upstream_client::UpstreamClient;

/// Process-global pieces shared across requests. Candidate rows themselves
/// are never cached here — per the data model's lifecycle rules they are
/// fetched fresh from storage on every request — only state that genuinely
/// needs to persist and be mutated across requests lives on `AppState`.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub gate: Arc<dyn Gate>,
    pub breaker: Arc<CircuitBreaker>,
    pub upstream: UpstreamClient,
    pub admin_token: Option<String>,
    pub trusted_proxies: Vec<IpNet>,
}

impl AppState {
    pub fn new(storage: Arc<dyn Storage>, admin_token: Option<String>) -> Self {
        Self {
            storage,
            gate: Arc::new(MemoryGate::new()),
            breaker: Arc::new(CircuitBreaker::new()),
            upstream: UpstreamClient::new(),
            admin_token,
            trusted_proxies: Vec::new(),
        }
    }

    pub fn with_gate(mut self, gate: Arc<dyn Gate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_trusted_proxies(mut self, trusted_proxies: Vec<IpNet>) -> Self {
        self.trusted_proxies = trusted_proxies;
        self
    }
}
