//! 会话、消息与同步操作的数据模型

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use super::StoreError;

/// 会话同步状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// 仅存在于本地
    Local,
    /// 已有远端 ID，但本地还有未推送的变更
    Pending,
    Synced,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Local => "local",
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "local" => Ok(SyncStatus::Local),
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            other => Err(StoreError::Serialization(format!("unknown sync status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(StoreError::Serialization(format!("unknown role: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub local_id: String,
    pub remote_id: Option<String>,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub sync_status: SyncStatus,
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    /// 会话内从 1 开始、无间隙递增
    pub seq: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    CreateSession,
    UpdateSession,
    AddMessage,
    DeleteSession,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::CreateSession => "create_session",
            OperationKind::UpdateSession => "update_session",
            OperationKind::AddMessage => "add_message",
            OperationKind::DeleteSession => "delete_session",
        }
    }
}

/// 队列行中的操作负载（JSON 存储）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncPayload {
    CreateSession,
    UpdateSession { title: String },
    AddMessage { message_id: String },
    DeleteSession { remote_id: Option<String> },
}

impl SyncPayload {
    pub fn kind(&self) -> OperationKind {
        match self {
            SyncPayload::CreateSession => OperationKind::CreateSession,
            SyncPayload::UpdateSession { .. } => OperationKind::UpdateSession,
            SyncPayload::AddMessage { .. } => OperationKind::AddMessage,
            SyncPayload::DeleteSession { .. } => OperationKind::DeleteSession,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncOperation {
    /// 自增 ID，顺序即入队顺序
    pub id: i64,
    pub session_id: String,
    pub payload: SyncPayload,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl SyncOperation {
    pub fn kind(&self) -> OperationKind {
        self.payload.kind()
    }
}

/// 存储精度为微秒；返回给调用方的记录必须与重新读取的一致
pub(crate) fn now_ts() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("bad timestamp {raw:?}: {e}")))
}
