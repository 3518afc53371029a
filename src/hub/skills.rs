//! 本地能力（skills）注册与远端调用处理

use std::time::Duration;

use serde_json::{Map, Value};

use super::client::HubApi;
use super::protocol::{ChannelMessage, SkillDescriptor};
use crate::tools::ToolExecutor;

pub fn skill_descriptors(executor: &ToolExecutor) -> Vec<SkillDescriptor> {
    executor.descriptors()
}

/// 向 Hub 注册本地能力：固定次数、固定间隔重试，全部失败只记日志
///
/// 返回是否注册成功；失败不影响连接本身。
pub async fn register_skills(
    hub: &dyn HubApi,
    device_id: Option<&str>,
    skills: &[SkillDescriptor],
    attempts: u32,
    delay: Duration,
) -> bool {
    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        match hub.register_skills(device_id, skills).await {
            Ok(()) => {
                tracing::info!(count = skills.len(), attempt, "Skills registered with Hub");
                return true;
            }
            Err(e) => {
                tracing::warn!(attempt, attempts, error = %e, "Skill registration attempt failed");
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    tracing::error!(attempts, "Skill registration failed, continuing without remote skills");
    false
}

/// 执行一次 skill_request 并构造 skill_response
///
/// skill 名即工具名；kwargs 合并为参数对象，位置参数放在 "args" 下。
pub async fn handle_skill_request(
    executor: &ToolExecutor,
    request_id: String,
    skill_name: &str,
    method_name: Option<&str>,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
) -> ChannelMessage {
    let mut params = kwargs;
    if !args.is_empty() {
        params.insert("args".to_string(), Value::Array(args));
    }
    tracing::info!(request_id = %request_id, skill = skill_name, method = ?method_name, "Skill request from Hub");

    match executor.execute(skill_name, Value::Object(params)).await {
        Ok(output) => ChannelMessage::SkillResponse {
            request_id,
            success: true,
            result: Some(Value::String(output)),
            error: None,
        },
        Err(e) => ChannelMessage::SkillResponse {
            request_id,
            success: false,
            result: None,
            error: Some(e.to_string()),
        },
    }
}
