use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "auth_keys")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique_key = "auth_key_value")]
    pub key: String,
    pub status: bool,
    pub allow_all: bool,
    pub models: Json,
    pub expires_at: Option<OffsetDateTime>,
}

impl ActiveModelBehavior for ActiveModel {}
