pub mod db;
pub mod entities;
pub mod seaorm_storage;
pub mod storage;

pub use seaorm_storage::SeaOrmStorage;
pub use storage::{
    AuthKeyRow, CandidateRow, IoLogInput, LogicalModelRow, ProviderRow, RequestLogFinish,
    RequestLogInput, Storage, StorageError, StorageResult,
};
