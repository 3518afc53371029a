//! Hub 线上协议定义
//!
//! REST 请求/响应体、对话流事件以及保活通道消息

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 远端会话
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSession {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// 创建时客户端传入的本地 ID，用于崩溃后重新绑定
    #[serde(default)]
    pub client_session_id: Option<String>,
}

/// 远端消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteMessage {
    pub id: String,
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub sequence: Option<i64>,
    #[serde(default)]
    pub client_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// whoami 返回的身份
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// 设备注册请求 / 响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// 之前持久化的设备 ID；首次注册为空
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub name: String,
    pub platform: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DeviceRegistration {
    pub device_id: String,
}

/// 向 Hub 声明的本地能力
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// 对话请求中的一轮消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

/// 委托模式的对话请求（Hub 负责执行工具）
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub messages: Vec<ChatTurn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub execute_tools: bool,
    pub stream: bool,
}

/// 对话流事件（SSE `data:` 行）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubStreamEvent {
    ToolCallStarted {
        tool: String,
        #[serde(default)]
        args: serde_json::Value,
    },
    ToolCallResult {
        tool: String,
        success: bool,
        #[serde(default)]
        output: String,
    },
    ContentDelta {
        text: String,
    },
    AssistantMessage {
        content: String,
    },
    Error {
        message: String,
    },
    Done {
        #[serde(default)]
        variant: Option<String>,
        #[serde(default)]
        is_fallback: Option<bool>,
    },
}

/// 保活通道消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelMessage {
    Ping,
    Pong,
    SkillRequest {
        request_id: String,
        skill_name: String,
        #[serde(default)]
        method_name: Option<String>,
        #[serde(default)]
        args: Vec<serde_json::Value>,
        #[serde(default)]
        kwargs: serde_json::Map<String, serde_json::Value>,
    },
    SkillResponse {
        request_id: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl ChannelMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skill_request_decoding() {
        let raw = r#"{"type":"skill_request","request_id":"r1","skill_name":"echo","method_name":"run","args":["hi"],"kwargs":{"loud":true}}"#;
        match ChannelMessage::from_json(raw).unwrap() {
            ChannelMessage::SkillRequest {
                request_id,
                skill_name,
                args,
                kwargs,
                ..
            } => {
                assert_eq!(request_id, "r1");
                assert_eq!(skill_name, "echo");
                assert_eq!(args, vec![serde_json::json!("hi")]);
                assert_eq!(kwargs["loud"], true);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_skill_response_omits_absent_fields() {
        let msg = ChannelMessage::SkillResponse {
            request_id: "r1".into(),
            success: false,
            result: None,
            error: Some("unknown skill".into()),
        };
        let json: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "skill_response");
        assert!(json.get("result").is_none());
        assert_eq!(json["error"], "unknown skill");
    }

    #[test]
    fn test_done_event_without_provenance() {
        let event: HubStreamEvent = serde_json::from_str(r#"{"type":"done"}"#).unwrap();
        assert_eq!(
            event,
            HubStreamEvent::Done {
                variant: None,
                is_fallback: None
            }
        );
    }
}
