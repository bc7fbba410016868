use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "providers")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique_key = "provider_name")]
    pub name: String,
    pub dialect: String,
    pub base_url: String,
    pub api_key: String,
    pub anthropic_version: Option<String>,
    pub rpm_limit: i64,
    pub ip_lock_minutes: i64,
    pub updated_at: OffsetDateTime,
    #[sea_orm(has_many)]
    pub candidates: HasMany<super::candidates::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
