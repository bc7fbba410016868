use async_trait::async_trait;
use serde_json::Value as JsonValue;
use time::OffsetDateTime;
use uuid::Uuid;

use gwayrs_common::Dialect;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("db error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid stored data: {0}")]
    InvalidData(String),
}

/// Provider row joined in from the candidate query, trimmed to the fields
/// the dialect adapter and gates need.
#[derive(Debug, Clone)]
pub struct ProviderRow {
    pub id: i64,
    pub name: String,
    pub dialect: Dialect,
    pub base_url: String,
    pub api_key: String,
    pub anthropic_version: Option<String>,
    pub rpm_limit: i64,
    pub ip_lock_minutes: i64,
}

/// A `LogicalModel`↔`Provider` binding, with its own provider already
/// resolved — the candidate resolver returns these directly rather than
/// forcing every caller to re-join.
#[derive(Debug, Clone)]
pub struct CandidateRow {
    pub id: i64,
    pub provider_model: String,
    pub tool_call: bool,
    pub structured_output: bool,
    pub image: bool,
    pub with_header: bool,
    pub weight: i64,
    pub customer_headers: Vec<(String, String)>,
    pub provider: ProviderRow,
}

#[derive(Debug, Clone)]
pub struct LogicalModelRow {
    pub id: i64,
    pub name: String,
    pub max_retry: u32,
    pub timeout_seconds: u64,
    pub io_log: bool,
    pub strategy: String,
    pub breaker: bool,
}

#[derive(Debug, Clone)]
pub struct AuthKeyRow {
    pub id: i64,
    pub allow_all: bool,
    pub models: Vec<String>,
    pub expires_at: Option<OffsetDateTime>,
}

/// One retry-log row as recorded by the retry pipeline (C8). `status` is
/// `"success"` on the row finalized by a 2xx dispatch, `"error"` on every
/// exhausted attempt before it.
#[derive(Debug, Clone)]
pub struct RequestLogInput {
    pub uuid: Uuid,
    pub name: String,
    pub provider_model: Option<String>,
    pub provider_name: Option<String>,
    pub status: &'static str,
    pub style: Dialect,
    pub user_agent: Option<String>,
    pub remote_ip: Option<String>,
    pub auth_key_id: Option<i64>,
    pub retry: i32,
    pub proxy_time_ms: i64,
    pub error: Option<String>,
}

/// Streaming-completion update applied by C9 once the tee's recorder has
/// finished parsing the response.
#[derive(Debug, Clone, Default)]
pub struct RequestLogFinish {
    pub first_chunk_time_ms: Option<i64>,
    pub chunk_time_ms: Option<i64>,
    pub tps: Option<f64>,
    pub size: i64,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub prompt_tokens_details: Option<JsonValue>,
}

#[derive(Debug, Clone)]
pub struct IoLogInput {
    pub input: String,
    pub output_string: Option<String>,
    pub output_string_array: Option<JsonValue>,
}

/// The durable store. Per the data model's lifecycle rules, candidate sets
/// are fetched fresh on every request rather than served from a cache —
/// there is no in-process snapshot to keep consistent.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn sync(&self) -> StorageResult<()>;

    async fn find_logical_model(&self, name: &str) -> StorageResult<Option<LogicalModelRow>>;
    async fn list_candidates(&self, model_id: i64) -> StorageResult<Vec<CandidateRow>>;
    async fn find_auth_key(&self, key: &str) -> StorageResult<Option<AuthKeyRow>>;
    async fn list_models_for_dialect(&self, dialect: Dialect) -> StorageResult<Vec<String>>;

    /// Insert a new log row, retrying with a freshly generated uuid on a
    /// unique-constraint conflict (insert-before-update needs only a
    /// unique key, per the log-write-ordering design note).
    async fn insert_request_log(&self, input: RequestLogInput) -> StorageResult<i64>;
    async fn finish_request_log(&self, id: i64, finish: RequestLogFinish) -> StorageResult<()>;
    async fn insert_io_log(&self, request_log_id: i64, input: IoLogInput) -> StorageResult<()>;
}
