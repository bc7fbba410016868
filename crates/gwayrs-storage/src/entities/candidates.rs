use sea_orm::entity::prelude::*;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "candidates")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub model_id: i64,
    pub provider_id: i64,
    pub provider_model: String,
    pub tool_call: bool,
    pub structured_output: bool,
    pub image: bool,
    pub with_header: bool,
    pub weight: i64,
    pub status: bool,
    pub customer_headers: Json,
    #[sea_orm(belongs_to, from = "model_id", to = "id", on_delete = "Cascade")]
    pub logical_model: HasOne<super::logical_models::Entity>,
    #[sea_orm(belongs_to, from = "provider_id", to = "id", on_delete = "Cascade")]
    pub provider: HasOne<super::providers::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
