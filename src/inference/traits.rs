//! 推理后端抽象
//!
//! 所有后端实现 InferenceBackend::chat：输入完整历史 + 系统提示 + 可用工具，
//! 返回内容、原生工具调用以及响应来源（variant / is_fallback）。

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::hub::SkillDescriptor;

#[derive(Debug, Clone, thiserror::Error)]
pub enum InferenceError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Decode error: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for InferenceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            InferenceError::Decode(e.to_string())
        } else {
            InferenceError::Transport(e.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    /// 工具结果，只存在于循环内存历史中
    Tool,
}

/// 模型原生工具调用
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub id: Option<String>,
    pub name: String,
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: None,
            name: name.into(),
            arguments,
        }
    }
}

/// 发送给后端的一轮消息
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    /// assistant 轮携带的原生工具调用
    pub tool_calls: Vec<ToolCallRequest>,
    /// tool 轮对应的调用 ID
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn plain(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::Assistant, content)
    }

    pub fn assistant_with_calls(content: impl Into<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::plain(ChatRole::Assistant, content)
        }
    }

    pub fn tool_result(call_id: Option<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: call_id,
            ..Self::plain(ChatRole::Tool, content)
        }
    }
}

/// 一次推理响应
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
    /// 实际作答的模型变体
    pub variant: String,
    /// 是否由兜底模型生成
    pub is_fallback: bool,
}

impl InferenceResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            variant: "primary".to_string(),
            is_fallback: false,
        }
    }

    pub fn with_tool_call(mut self, name: impl Into<String>, arguments: Value) -> Self {
        let id = format!("call_{}", self.tool_calls.len() + 1);
        self.tool_calls.push(ToolCallRequest {
            id: Some(id),
            name: name.into(),
            arguments,
        });
        self
    }

    pub fn fallback(mut self, variant: impl Into<String>) -> Self {
        self.variant = variant.into();
        self.is_fallback = true;
        self
    }
}

#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        system_prompt: &str,
        tools: &[SkillDescriptor],
    ) -> Result<InferenceResponse, InferenceError>;

    /// 状态栏展示用的模型名
    fn model_name(&self) -> &str;
}
