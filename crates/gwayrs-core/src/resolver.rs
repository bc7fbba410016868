use std::collections::HashMap;

use gwayrs_common::{CoreError, Dialect};
use gwayrs_protocol::{Before, CapabilityFlags};
use gwayrs_storage::{CandidateRow, Storage};

/// Retry/log knobs carried alongside the candidate set, copied straight from
/// the `LogicalModel` row.
#[derive(Debug, Clone)]
pub struct LogicalModelMeta {
    pub name: String,
    pub max_retry: u32,
    pub timeout_seconds: u64,
    pub io_log: bool,
    pub strategy: String,
    pub breaker: bool,
}

/// The eligible candidate set for one request: keyed by candidate id
/// (stringified, since the balancer operates on opaque string ids) so C3's
/// `pop`/`reduce`/`delete` never need to know about storage rows.
#[derive(Debug, Clone)]
pub struct ResolvedCandidates {
    pub candidates: HashMap<String, CandidateRow>,
    pub weights: Vec<(String, i64)>,
    pub meta: LogicalModelMeta,
}

pub async fn resolve(
    storage: &dyn Storage,
    dialect: Dialect,
    before: &Before,
) -> Result<ResolvedCandidates, CoreError> {
    let model = storage
        .find_logical_model(&before.model)
        .await
        .map_err(|err| CoreError::Storage(err.to_string()))?
        .ok_or_else(|| CoreError::ModelNotFound(before.model.clone()))?;

    let flags = CapabilityFlags::from(before);

    let rows = storage
        .list_candidates(model.id)
        .await
        .map_err(|err| CoreError::Storage(err.to_string()))?;

    let mut candidates = HashMap::new();
    let mut weights = Vec::new();
    for row in rows {
        if row.provider.dialect != dialect {
            continue;
        }
        if flags.tool_call && !row.tool_call {
            continue;
        }
        if flags.structured_output && !row.structured_output {
            continue;
        }
        if flags.image && !row.image {
            continue;
        }

        let id = row.id.to_string();
        weights.push((id.clone(), row.weight));
        candidates.insert(id, row);
    }

    if weights.is_empty() {
        return Err(CoreError::NoEligibleProvider);
    }

    Ok(ResolvedCandidates {
        candidates,
        weights,
        meta: LogicalModelMeta {
            name: model.name,
            max_retry: model.max_retry,
            timeout_seconds: model.timeout_seconds,
            io_log: model.io_log,
            strategy: model.strategy,
            breaker: model.breaker,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gwayrs_storage::{ProviderRow, StorageError, StorageResult};
    use async_trait::async_trait;
    use gwayrs_storage::{AuthKeyRow, IoLogInput, LogicalModelRow, RequestLogFinish, RequestLogInput};

    struct FakeStorage {
        model: LogicalModelRow,
        candidates: Vec<CandidateRow>,
    }

    #[async_trait]
    impl Storage for FakeStorage {
        async fn sync(&self) -> StorageResult<()> {
            Ok(())
        }
        async fn find_logical_model(&self, name: &str) -> StorageResult<Option<LogicalModelRow>> {
            if name == self.model.name {
                Ok(Some(self.model.clone()))
            } else {
                Ok(None)
            }
        }
        async fn list_candidates(&self, _model_id: i64) -> StorageResult<Vec<CandidateRow>> {
            Ok(self.candidates.clone())
        }
        async fn find_auth_key(&self, _key: &str) -> StorageResult<Option<AuthKeyRow>> {
            Ok(None)
        }
        async fn list_models_for_dialect(&self, _dialect: Dialect) -> StorageResult<Vec<String>> {
            Ok(Vec::new())
        }
        async fn insert_request_log(&self, _input: RequestLogInput) -> StorageResult<i64> {
            Ok(1)
        }
        async fn finish_request_log(&self, _id: i64, _finish: RequestLogFinish) -> StorageResult<()> {
            Ok(())
        }
        async fn insert_io_log(&self, _request_log_id: i64, _input: IoLogInput) -> StorageResult<()> {
            Ok(())
        }
    }

    fn provider(dialect: Dialect) -> ProviderRow {
        ProviderRow {
            id: 1,
            name: "p1".into(),
            dialect,
            base_url: "https://example.com".into(),
            api_key: "k".into(),
            anthropic_version: None,
            rpm_limit: 0,
            ip_lock_minutes: 0,
        }
    }

    fn candidate(id: i64, dialect: Dialect, image: bool) -> CandidateRow {
        CandidateRow {
            id,
            provider_model: "real-model".into(),
            tool_call: false,
            structured_output: false,
            image,
            with_header: false,
            weight: 1,
            customer_headers: Vec::new(),
            provider: provider(dialect),
        }
    }

    fn model() -> LogicalModelRow {
        LogicalModelRow {
            id: 1,
            name: "M".into(),
            max_retry: 3,
            timeout_seconds: 30,
            io_log: false,
            strategy: "lottery".into(),
            breaker: true,
        }
    }

    #[tokio::test]
    async fn excludes_candidates_from_other_dialects() {
        let storage = FakeStorage {
            model: model(),
            candidates: vec![
                candidate(1, Dialect::Openai, false),
                candidate(2, Dialect::Anthropic, false),
            ],
        };
        let before = Before {
            model: "M".into(),
            stream: false,
            needs_tool: false,
            needs_structured: false,
            needs_image: false,
            rewritten_body: serde_json::json!({}),
        };
        let resolved = resolve(&storage, Dialect::Openai, &before).await.unwrap();
        assert_eq!(resolved.candidates.len(), 1);
        assert!(resolved.candidates.contains_key("1"));
    }

    #[tokio::test]
    async fn requires_image_capability_when_needed() {
        let storage = FakeStorage {
            model: model(),
            candidates: vec![candidate(1, Dialect::Openai, false)],
        };
        let before = Before {
            model: "M".into(),
            stream: false,
            needs_tool: false,
            needs_structured: false,
            needs_image: true,
            rewritten_body: serde_json::json!({}),
        };
        let err = resolve(&storage, Dialect::Openai, &before).await.unwrap_err();
        assert!(matches!(err, CoreError::NoEligibleProvider));
    }

    #[tokio::test]
    async fn missing_model_is_terminal() {
        let storage = FakeStorage {
            model: model(),
            candidates: Vec::new(),
        };
        let before = Before {
            model: "other".into(),
            stream: false,
            needs_tool: false,
            needs_structured: false,
            needs_image: false,
            rewritten_body: serde_json::json!({}),
        };
        let err = resolve(&storage, Dialect::Openai, &before).await.unwrap_err();
        assert!(matches!(err, CoreError::ModelNotFound(_)));
    }
}
