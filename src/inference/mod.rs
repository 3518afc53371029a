//! 本地推理后端：抽象与实现（OpenAI 兼容 HTTP / 脚本化 Mock）
//!
//! 响应里的 variant / is_fallback 是离线判定的唯一依据；传输错误只作为错误返回。

pub mod http;
pub mod mock;
pub mod traits;

pub use http::HttpInferenceBackend;
pub use mock::ScriptedBackend;
pub use traits::{
    ChatMessage, ChatRole, InferenceBackend, InferenceError, InferenceResponse, ToolCallRequest,
};
