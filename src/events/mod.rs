//! 内核事件：通过 EventBus 推送给展示层等外部协作者

mod bus;

pub use bus::{EventBus, Subscription};

use serde::Serialize;

use crate::agent::AgentMode;
use crate::hub::ConnectionStatus;
use crate::store::Message;

/// 内核对外事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoreEvent {
    /// 内核组件全部就绪
    CoreReady,
    /// 消息已写入本地存储
    MessageAdded { session_id: String, message: Message },
    /// 委托模式下 Hub 流式返回的回复片段
    ContentDelta { session_id: String, text: String },
    ToolCallStarted {
        session_id: String,
        tool: String,
        args: serde_json::Value,
    },
    ToolCallResult {
        session_id: String,
        tool: String,
        success: bool,
        output: String,
    },
    /// 连接状态变化；重连失败时 error 携带原因
    ConnectionChanged {
        status: ConnectionStatus,
        error: Option<String>,
    },
    /// 应答策略切换（delegate / local）
    ModeChanged { mode: AgentMode, offline: bool },
    /// 同步队列剩余数量
    SyncStatus { pending: usize },
    CoreError {
        session_id: Option<String>,
        code: String,
        message: String,
    },
}

impl CoreEvent {
    pub fn error(session_id: Option<&str>, code: &str, message: impl Into<String>) -> Self {
        CoreEvent::CoreError {
            session_id: session_id.map(str::to_string),
            code: code.to_string(),
            message: message.into(),
        }
    }
}
