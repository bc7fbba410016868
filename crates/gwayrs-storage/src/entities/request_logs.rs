use sea_orm::entity::prelude::*;
use time::OffsetDateTime;
use uuid::Uuid;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "request_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique_key = "request_log_uuid")]
    pub uuid: Uuid,
    pub name: String,
    pub provider_model: Option<String>,
    pub provider_name: Option<String>,
    /// `"success"` or `"error"`.
    pub status: String,
    pub style: String,
    pub user_agent: Option<String>,
    pub remote_ip: Option<String>,
    pub auth_key_id: Option<i64>,
    pub retry: i32,
    pub proxy_time_ms: i64,
    pub first_chunk_time_ms: Option<i64>,
    pub chunk_time_ms: Option<i64>,
    pub tps: Option<f64>,
    pub size: i64,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub prompt_tokens_details: Option<Json>,
    pub error: Option<String>,
    pub created_at: OffsetDateTime,
    #[sea_orm(has_one)]
    pub io_log: HasOne<super::io_logs::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
