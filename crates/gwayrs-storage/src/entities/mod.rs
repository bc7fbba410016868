pub mod auth_keys;
pub mod candidates;
pub mod io_logs;
pub mod logical_models;
pub mod providers;
pub mod request_logs;

pub use auth_keys::Entity as AuthKeys;
pub use candidates::Entity as Candidates;
pub use io_logs::Entity as IoLogs;
pub use logical_models::Entity as LogicalModels;
pub use providers::Entity as Providers;
pub use request_logs::Entity as RequestLogs;
