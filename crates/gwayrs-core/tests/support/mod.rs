use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use gwayrs_common::Dialect;
use gwayrs_storage::{
    AuthKeyRow, CandidateRow, IoLogInput, LogicalModelRow, ProviderRow, RequestLogFinish,
    RequestLogInput, Storage, StorageResult,
};

/// A `Storage` double that serves one preset logical model + candidate set
/// and records every log write, so assertions can inspect retry/usage
/// accounting without a database.
#[derive(Default)]
pub struct MockStorage {
    pub model: Mutex<Option<LogicalModelRow>>,
    pub candidates: Mutex<Vec<CandidateRow>>,
    pub request_logs: Mutex<Vec<RequestLogInput>>,
    pub finishes: Mutex<HashMap<i64, RequestLogFinish>>,
}

impl MockStorage {
    pub fn new(model: LogicalModelRow, candidates: Vec<CandidateRow>) -> Self {
        Self {
            model: Mutex::new(Some(model)),
            candidates: Mutex::new(candidates),
            request_logs: Mutex::new(Vec::new()),
            finishes: Mutex::new(HashMap::new()),
        }
    }

    pub fn logs(&self) -> Vec<RequestLogInput> {
        self.request_logs.lock().unwrap().clone()
    }

    pub fn finish_for(&self, log_id: i64) -> Option<RequestLogFinish> {
        self.finishes.lock().unwrap().get(&log_id).cloned()
    }
}

#[async_trait]
impl Storage for MockStorage {
    async fn sync(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn find_logical_model(&self, name: &str) -> StorageResult<Option<LogicalModelRow>> {
        let guard = self.model.lock().unwrap();
        Ok(guard.as_ref().filter(|m| m.name == name).cloned())
    }

    async fn list_candidates(&self, _model_id: i64) -> StorageResult<Vec<CandidateRow>> {
        Ok(self.candidates.lock().unwrap().clone())
    }

    async fn find_auth_key(&self, _key: &str) -> StorageResult<Option<AuthKeyRow>> {
        Ok(None)
    }

    async fn list_models_for_dialect(&self, _dialect: Dialect) -> StorageResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn insert_request_log(&self, input: RequestLogInput) -> StorageResult<i64> {
        let mut guard = self.request_logs.lock().unwrap();
        guard.push(input);
        Ok(guard.len() as i64)
    }

    async fn finish_request_log(&self, id: i64, finish: RequestLogFinish) -> StorageResult<()> {
        self.finishes.lock().unwrap().insert(id, finish);
        Ok(())
    }

    async fn insert_io_log(&self, _request_log_id: i64, _input: IoLogInput) -> StorageResult<()> {
        Ok(())
    }
}

pub fn provider(id: i64, dialect: Dialect, base_url: &str) -> ProviderRow {
    ProviderRow {
        id,
        name: format!("provider-{id}"),
        dialect,
        base_url: base_url.to_string(),
        api_key: "test-key".to_string(),
        anthropic_version: None,
        rpm_limit: 0,
        ip_lock_minutes: 0,
    }
}

pub fn candidate(id: i64, provider_model: &str, weight: i64, provider: ProviderRow) -> CandidateRow {
    CandidateRow {
        id,
        provider_model: provider_model.to_string(),
        tool_call: false,
        structured_output: false,
        image: false,
        with_header: false,
        weight,
        customer_headers: Vec::new(),
        provider,
    }
}

pub fn logical_model(name: &str, max_retry: u32, strategy: &str) -> LogicalModelRow {
    LogicalModelRow {
        id: 1,
        name: name.to_string(),
        max_retry,
        timeout_seconds: 5,
        io_log: false,
        strategy: strategy.to_string(),
        breaker: false,
    }
}
