use std::str::FromStr;

use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, ConnectionTrait, Database, DatabaseBackend,
    DatabaseConnection, DbErr, EntityTrait, QueryFilter, Schema,
};
use time::OffsetDateTime;
use uuid::Uuid;

use gwayrs_common::Dialect;

use crate::entities;
use crate::storage::{
    AuthKeyRow, CandidateRow, IoLogInput, LogicalModelRow, ProviderRow, RequestLogFinish,
    RequestLogInput, Storage, StorageError, StorageResult,
};

const UUID_INSERT_ATTEMPTS: u32 = 3;

#[derive(Clone)]
pub struct SeaOrmStorage {
    db: DatabaseConnection,
}

impl SeaOrmStorage {
    pub async fn connect(dsn: &str) -> StorageResult<Self> {
        let db = Database::connect(dsn).await?;
        if db.get_database_backend() == DatabaseBackend::Sqlite {
            db.execute_unprepared("PRAGMA foreign_keys = ON").await?;
        }
        Ok(Self { db })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

fn header_map_to_vec(value: serde_json::Value) -> Vec<(String, String)> {
    value
        .as_object()
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn provider_row(model: entities::providers::Model) -> StorageResult<ProviderRow> {
    let dialect = Dialect::from_str(&model.dialect)
        .map_err(|_| StorageError::InvalidData(format!("unknown dialect {}", model.dialect)))?;
    Ok(ProviderRow {
        id: model.id,
        name: model.name,
        dialect,
        base_url: model.base_url,
        api_key: model.api_key,
        anthropic_version: model.anthropic_version,
        rpm_limit: model.rpm_limit,
        ip_lock_minutes: model.ip_lock_minutes,
    })
}

#[async_trait]
impl Storage for SeaOrmStorage {
    async fn sync(&self) -> StorageResult<()> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::Providers)
            .register(entities::LogicalModels)
            .register(entities::Candidates)
            .register(entities::AuthKeys)
            .register(entities::RequestLogs)
            .register(entities::IoLogs)
            .sync(&self.db)
            .await?;
        Ok(())
    }

    async fn find_logical_model(&self, name: &str) -> StorageResult<Option<LogicalModelRow>> {
        use entities::logical_models::Column;
        let row = entities::LogicalModels::find()
            .filter(Column::Name.eq(name))
            .one(&self.db)
            .await?;
        Ok(row.map(|m| LogicalModelRow {
            id: m.id,
            name: m.name,
            max_retry: m.max_retry.max(1) as u32,
            timeout_seconds: m.timeout_seconds.max(1) as u64,
            io_log: m.io_log,
            strategy: m.strategy,
            breaker: m.breaker,
        }))
    }

    async fn list_candidates(&self, model_id: i64) -> StorageResult<Vec<CandidateRow>> {
        use entities::candidates::Column as CandidateColumn;

        let rows = entities::Candidates::find()
            .filter(CandidateColumn::ModelId.eq(model_id))
            .filter(CandidateColumn::Status.eq(true))
            .find_also_related(entities::Providers)
            .all(&self.db)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for (candidate, provider) in rows {
            let Some(provider) = provider else {
                continue;
            };
            out.push(CandidateRow {
                id: candidate.id,
                provider_model: candidate.provider_model,
                tool_call: candidate.tool_call,
                structured_output: candidate.structured_output,
                image: candidate.image,
                with_header: candidate.with_header,
                weight: candidate.weight,
                customer_headers: header_map_to_vec(candidate.customer_headers),
                provider: provider_row(provider)?,
            });
        }
        Ok(out)
    }

    async fn find_auth_key(&self, key: &str) -> StorageResult<Option<AuthKeyRow>> {
        use entities::auth_keys::Column;
        let row = entities::AuthKeys::find()
            .filter(Column::Key.eq(key))
            .filter(Column::Status.eq(true))
            .one(&self.db)
            .await?;
        Ok(row.map(|m| AuthKeyRow {
            id: m.id,
            allow_all: m.allow_all,
            models: m
                .models
                .as_array()
                .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default(),
            expires_at: m.expires_at,
        }))
    }

    async fn list_models_for_dialect(&self, dialect: Dialect) -> StorageResult<Vec<String>> {
        use entities::candidates::Column as CandidateColumn;

        let candidates = entities::Candidates::find()
            .filter(CandidateColumn::Status.eq(true))
            .find_also_related(entities::Providers)
            .all(&self.db)
            .await?;

        let mut model_ids: Vec<i64> = candidates
            .into_iter()
            .filter(|(_, provider)| {
                provider
                    .as_ref()
                    .is_some_and(|p| p.dialect == dialect.as_str())
            })
            .map(|(candidate, _)| candidate.model_id)
            .collect();
        model_ids.sort_unstable();
        model_ids.dedup();
        if model_ids.is_empty() {
            return Ok(Vec::new());
        }

        use entities::logical_models::Column as ModelColumn;
        let mut names: Vec<String> = entities::LogicalModels::find()
            .filter(ModelColumn::Id.is_in(model_ids))
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| m.name)
            .collect();
        names.sort_unstable();
        Ok(names)
    }

    async fn insert_request_log(&self, input: RequestLogInput) -> StorageResult<i64> {
        let now = OffsetDateTime::now_utc();
        let mut uuid = input.uuid;
        for attempt in 0..UUID_INSERT_ATTEMPTS {
            let active = entities::request_logs::ActiveModel {
                uuid: ActiveValue::Set(uuid),
                name: ActiveValue::Set(input.name.clone()),
                provider_model: ActiveValue::Set(input.provider_model.clone()),
                provider_name: ActiveValue::Set(input.provider_name.clone()),
                status: ActiveValue::Set(input.status.to_string()),
                style: ActiveValue::Set(input.style.as_str().to_string()),
                user_agent: ActiveValue::Set(input.user_agent.clone()),
                remote_ip: ActiveValue::Set(input.remote_ip.clone()),
                auth_key_id: ActiveValue::Set(input.auth_key_id),
                retry: ActiveValue::Set(input.retry),
                proxy_time_ms: ActiveValue::Set(input.proxy_time_ms),
                first_chunk_time_ms: ActiveValue::Set(None),
                chunk_time_ms: ActiveValue::Set(None),
                tps: ActiveValue::Set(None),
                size: ActiveValue::Set(0),
                prompt_tokens: ActiveValue::Set(None),
                completion_tokens: ActiveValue::Set(None),
                total_tokens: ActiveValue::Set(None),
                prompt_tokens_details: ActiveValue::Set(None),
                error: ActiveValue::Set(input.error.clone()),
                created_at: ActiveValue::Set(now),
                ..Default::default()
            };
            match active.insert(&self.db).await {
                Ok(model) => return Ok(model.id),
                Err(err) if attempt + 1 < UUID_INSERT_ATTEMPTS && is_unique_violation(&err) => {
                    uuid = Uuid::now_v7();
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }
        unreachable!("loop always returns or propagates on its final iteration")
    }

    async fn finish_request_log(&self, id: i64, finish: RequestLogFinish) -> StorageResult<()> {
        let Some(model) = entities::RequestLogs::find_by_id(id).one(&self.db).await? else {
            return Ok(());
        };
        let mut active: entities::request_logs::ActiveModel = model.into();
        active.first_chunk_time_ms = ActiveValue::Set(finish.first_chunk_time_ms);
        active.chunk_time_ms = ActiveValue::Set(finish.chunk_time_ms);
        active.tps = ActiveValue::Set(finish.tps);
        active.size = ActiveValue::Set(finish.size);
        active.prompt_tokens = ActiveValue::Set(finish.prompt_tokens);
        active.completion_tokens = ActiveValue::Set(finish.completion_tokens);
        active.total_tokens = ActiveValue::Set(finish.total_tokens);
        active.prompt_tokens_details = ActiveValue::Set(finish.prompt_tokens_details);
        active.update(&self.db).await?;
        Ok(())
    }

    async fn insert_io_log(&self, request_log_id: i64, input: IoLogInput) -> StorageResult<()> {
        let active = entities::io_logs::ActiveModel {
            request_log_id: ActiveValue::Set(request_log_id),
            input: ActiveValue::Set(input.input),
            output_string: ActiveValue::Set(input.output_string),
            output_string_array: ActiveValue::Set(input.output_string_array),
            ..Default::default()
        };
        active.insert(&self.db).await?;
        Ok(())
    }
}

fn is_unique_violation(err: &DbErr) -> bool {
    err.to_string().to_ascii_lowercase().contains("unique")
}
