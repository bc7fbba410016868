use sea_orm::entity::prelude::*;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "logical_models")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique_key = "logical_model_name")]
    pub name: String,
    pub max_retry: i32,
    pub timeout_seconds: i32,
    pub io_log: bool,
    /// `"lottery"` or `"rotor"`; validated at the boundary, stored as text
    /// to match how the rest of the schema represents small closed sets.
    pub strategy: String,
    pub breaker: bool,
    #[sea_orm(has_many)]
    pub candidates: HasMany<super::candidates::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
