//! Hub 连接层
//!
//! - `client`: REST 客户端（健康检查、鉴权、设备注册、会话 CRUD、流式对话）
//! - `retry`: 显式重试策略与重连退避
//! - `protocol`: 线上数据结构与保活通道消息
//! - `channel`: 保活通道（WebSocket）
//! - `connection`: 连接生命周期状态机
//! - `device`: 设备 ID 持久化
//! - `skills`: 本地能力注册与 skill_request 处理

mod channel;
mod client;
mod connection;
mod device;
#[cfg(test)]
pub(crate) mod fake;
mod protocol;
mod retry;
mod skills;

pub use channel::{ChannelConnector, KeepAliveChannel, WsConnector};
pub use client::{HttpHubClient, HubApi, HubEventStream, MessageUpload};
pub use connection::{ConnectionManager, ConnectionState, ConnectionStatus, HubLink};
pub use device::DeviceIdFile;
pub use protocol::{
    ChannelMessage, ChatRequest, ChatTurn, DeviceInfo, HubStreamEvent, Identity, RemoteMessage,
    RemoteSession, SkillDescriptor,
};
pub use retry::{with_retry, Backoff, RetryPolicy};
pub use skills::{handle_skill_request, register_skills, skill_descriptors};

/// Hub 调用错误
#[derive(Debug, Clone, thiserror::Error)]
pub enum HubError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Hub rejected request ({status}): {message}")]
    Client { status: u16, message: String },

    #[error("Hub server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("No auth token configured")]
    MissingToken,

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl HubError {
    /// 超时 / 拒绝连接等网络层错误
    pub fn is_transport(&self) -> bool {
        matches!(self, HubError::Transport(_) | HubError::Timeout(_))
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self, HubError::Client { .. })
    }

    pub fn is_server_error(&self) -> bool {
        matches!(self, HubError::Server { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            HubError::Client { status, .. } | HubError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub(crate) fn from_status(status: u16, message: String) -> Self {
        if (400..500).contains(&status) {
            HubError::Client { status, message }
        } else {
            HubError::Server { status, message }
        }
    }
}

impl From<reqwest::Error> for HubError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            HubError::Timeout(e.to_string())
        } else if e.is_decode() {
            HubError::Protocol(e.to_string())
        } else if let Some(status) = e.status() {
            HubError::from_status(status.as_u16(), e.to_string())
        } else {
            HubError::Transport(e.to_string())
        }
    }
}
