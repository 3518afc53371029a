//! 脚本化推理后端（用于测试，无需模型服务）
//!
//! 按顺序返回预置响应，并记录每次调用收到的历史与系统提示。

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::traits::{ChatMessage, InferenceBackend, InferenceError, InferenceResponse};
use crate::hub::SkillDescriptor;

/// 一次调用的快照
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<ChatMessage>,
    pub system_prompt: String,
    pub tool_names: Vec<String>,
}

#[derive(Default)]
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<InferenceResponse, InferenceError>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedBackend {
    pub fn new(responses: Vec<InferenceResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into_iter().map(Ok).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, response: InferenceResponse) {
        self.script.lock().push_back(Ok(response));
    }

    pub fn push_error(&self, error: InferenceError) {
        self.script.lock().push_back(Err(error));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        system_prompt: &str,
        tools: &[SkillDescriptor],
    ) -> Result<InferenceResponse, InferenceError> {
        self.calls.lock().push(RecordedCall {
            messages: messages.to_vec(),
            system_prompt: system_prompt.to_string(),
            tool_names: tools.iter().map(|t| t.name.clone()).collect(),
        });
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(InferenceError::Decode("script exhausted".into())))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}
