//! Agent 编排：每轮对话按离线判定在委托（Hub 执行工具）与本地工具循环之间选择
//!
//! 两种策略共用同一个写入约定（TurnScope）：assistant 消息先落库、再通知，再进行下一步。

mod delegate;
mod legacy;
mod local;
mod orchestrator;
mod signature;

pub use legacy::{extract_legacy_calls, LEGACY_PREFIXES};
pub use orchestrator::{AgentOrchestrator, TurnOutcome};
pub use signature::{SignatureSet, ToolCallSignature};

use serde::Serialize;

use crate::core::CoreError;
use crate::events::{CoreEvent, EventBus};
use crate::offline::SharedTracker;
use crate::store::{Message, Role, SessionStore};

/// 应答策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    /// Hub 执行工具，本地只转发事件
    Delegate,
    /// 本地推理后端 + 本地工具循环
    Local,
}

impl AgentMode {
    /// 当前模式下模型可用的调用面
    pub fn surface(&self) -> &'static str {
        match self {
            AgentMode::Delegate => "remote-devices",
            AgentMode::Local => "local-device",
        }
    }

    /// 模式切换后注入系统提示的一次性说明
    pub fn switch_notice(&self) -> String {
        match self {
            AgentMode::Delegate => format!(
                "[Mode switched] The Hub is reachable again. Tools now run through `{}`; calls may target any registered device.",
                self.surface()
            ),
            AgentMode::Local => format!(
                "[Mode switched] The Hub is unreachable. Only `{}` tools on this machine are available until the connection returns.",
                self.surface()
            ),
        }
    }
}

impl std::fmt::Display for AgentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentMode::Delegate => write!(f, "delegate"),
            AgentMode::Local => write!(f, "local"),
        }
    }
}

/// 单轮对话的写入上下文
pub(crate) struct TurnScope<'a> {
    pub session_id: &'a str,
    pub store: &'a SessionStore,
    pub bus: &'a EventBus,
    pub tracker: &'a SharedTracker,
}

impl TurnScope<'_> {
    pub fn persist_assistant(&self, content: &str) -> Result<Message, CoreError> {
        let message = self
            .store
            .add_message(self.session_id, Role::Assistant, content)?;
        self.bus.publish(CoreEvent::MessageAdded {
            session_id: self.session_id.to_string(),
            message: message.clone(),
        });
        Ok(message)
    }

    /// 推理来源是离线判定的唯一输入
    pub fn record_provenance(&self, variant: &str, is_fallback: bool) {
        crate::offline::report_response(self.tracker, variant, is_fallback);
    }

    pub fn publish(&self, event: CoreEvent) {
        self.bus.publish(event);
    }
}
