//! 本地会话存储
//!
//! 断网期间唯一的数据来源：会话、消息与待同步操作队列全部落在 SQLite 中，
//! 每次修改与对应的入队在同一事务内完成。

mod database;
mod models;
mod schema;
mod sessions;

pub use database::Database;
pub use models::{
    Message, OperationKind, Role, Session, SyncOperation, SyncPayload, SyncStatus,
};
pub use sessions::{RemoteMetadata, SessionStore, DEFAULT_SESSION_TITLE};

/// 存储层错误
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}
