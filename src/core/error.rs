//! 内核错误类型
//!
//! 各层（存储 / Hub / 推理 / 工具）的错误在此汇总为 CoreError，供编排器与上层统一处理。
//! 任何错误都只终止当前操作，不会使进程崩溃。

use thiserror::Error;

use crate::hub::HubError;
use crate::inference::InferenceError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Hub error: {0}")]
    Hub(#[from] HubError),

    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// 同一会话已有一轮对话在进行中（背压：拒绝而不是排队）
    #[error("Session is busy: {0}")]
    SessionBusy(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl CoreError {
    /// 事件总线上使用的简短错误码
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Store(_) => "store_error",
            CoreError::Hub(_) => "hub_error",
            CoreError::Inference(_) => "inference_error",
            CoreError::SessionNotFound(_) => "session_not_found",
            CoreError::SessionBusy(_) => "session_busy",
            CoreError::ToolExecutionFailed(_) => "tool_failed",
            CoreError::ToolTimeout(_) => "tool_timeout",
            CoreError::Config(_) => "config_error",
        }
    }
}

impl From<config::ConfigError> for CoreError {
    fn from(e: config::ConfigError) -> Self {
        CoreError::Config(e.to_string())
    }
}
