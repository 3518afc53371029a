//! OpenAI 兼容的推理后端
//!
//! POST {base_url}/chat/completions（非流式）。响应来源优先取 body 的 `variant` / `is_fallback`，
//! 其次取 `x-model-variant` / `x-is-fallback` 响应头；都没有时视为主模型作答。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use super::traits::{
    ChatMessage, ChatRole, InferenceBackend, InferenceError, InferenceResponse, ToolCallRequest,
};
use crate::config::InferenceSection;
use crate::hub::SkillDescriptor;

pub struct HttpInferenceBackend {
    http: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpInferenceBackend {
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, InferenceError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InferenceError::Transport(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key
                .or_else(|| std::env::var("OPENAI_API_KEY").ok())
                .filter(|k| !k.is_empty()),
        })
    }

    pub fn from_config(section: &InferenceSection) -> Result<Self, InferenceError> {
        Self::new(
            &section.base_url,
            &section.model,
            section.api_key.clone(),
            Duration::from_secs(section.timeout_secs.max(1)),
        )
    }

    fn request_body(
        &self,
        messages: &[ChatMessage],
        system_prompt: &str,
        tools: &[SkillDescriptor],
    ) -> Value {
        let mut wire = Vec::with_capacity(messages.len() + 1);
        if !system_prompt.is_empty() {
            wire.push(json!({ "role": "system", "content": system_prompt }));
        }
        wire.extend(messages.iter().map(to_wire_message));

        let mut body = json!({
            "model": self.model,
            "messages": wire,
            "stream": false,
        });
        if !tools.is_empty() {
            body["tools"] = tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
        }
        body
    }
}

fn to_wire_message(message: &ChatMessage) -> Value {
    let mut value = json!({ "role": message.role, "content": message.content });
    if message.role == ChatRole::Assistant && !message.tool_calls.is_empty() {
        value["tool_calls"] = message
            .tool_calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": {
                        "name": call.name,
                        "arguments": call.arguments.to_string(),
                    }
                })
            })
            .collect();
    }
    if let Some(id) = &message.tool_call_id {
        value["tool_call_id"] = json!(id);
    }
    value
}

#[derive(Debug, Deserialize)]
struct CompletionBody {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    variant: Option<String>,
    #[serde(default)]
    is_fallback: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: Option<String>,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    /// OpenAI 返回 JSON 字符串，部分兼容实现直接返回对象
    #[serde(default)]
    arguments: Value,
}

fn parse_arguments(raw: Value) -> Value {
    match raw {
        Value::String(s) if s.trim().is_empty() => json!({}),
        Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        Value::Null => json!({}),
        other => other,
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[async_trait]
impl InferenceBackend for HttpInferenceBackend {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        system_prompt: &str,
        tools: &[SkillDescriptor],
    ) -> Result<InferenceResponse, InferenceError> {
        let mut request = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .json(&self.request_body(messages, system_prompt, tools));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(InferenceError::Http {
                status: status.as_u16(),
                message,
            });
        }
        let body: CompletionBody = response
            .json()
            .await
            .map_err(|e| InferenceError::Decode(e.to_string()))?;

        let variant = body
            .variant
            .or_else(|| header_str(&headers, "x-model-variant").map(str::to_string))
            .or(body.model)
            .unwrap_or_else(|| self.model.clone());
        let is_fallback = body
            .is_fallback
            .or_else(|| header_str(&headers, "x-is-fallback").map(|v| v.eq_ignore_ascii_case("true")))
            .unwrap_or(false);

        let Some(choice) = body.choices.into_iter().next() else {
            return Err(InferenceError::Decode("response has no choices".into()));
        };
        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .enumerate()
            // 部分本地服务不返回 id；在解析时补齐，工具结果才能与调用配对
            .map(|(i, call)| ToolCallRequest {
                id: Some(call.id.unwrap_or_else(|| format!("call_{}", i + 1))),
                name: call.function.name,
                arguments: parse_arguments(call.function.arguments),
            })
            .collect();

        tracing::debug!(variant = %variant, is_fallback, "Inference response received");
        Ok(InferenceResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            variant,
            is_fallback,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
