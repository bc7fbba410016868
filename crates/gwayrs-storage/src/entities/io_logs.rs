use sea_orm::entity::prelude::*;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "io_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique_key = "io_log_request_log_id")]
    pub request_log_id: i64,
    pub input: String,
    pub output_string: Option<String>,
    pub output_string_array: Option<Json>,
    #[sea_orm(belongs_to, from = "request_log_id", to = "id", on_delete = "Cascade")]
    pub request_log: HasOne<super::request_logs::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
