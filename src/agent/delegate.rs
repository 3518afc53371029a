//! 委托模式：对话交给 Hub，Hub 负责执行工具、限制轮数与去重；本地只转发流事件并落库

use futures_util::StreamExt;

use crate::core::CoreError;
use crate::events::CoreEvent;
use crate::hub::{ChatRequest, HubApi, HubError, HubStreamEvent};
use crate::store::Message;

use super::TurnScope;

/// 委托失败的两种结局
pub(crate) enum DelegateFailure {
    /// 流都没打开就遇到传输错误：本轮改走本地策略
    Unavailable(HubError),
    Failed(CoreError),
}

impl From<CoreError> for DelegateFailure {
    fn from(e: CoreError) -> Self {
        DelegateFailure::Failed(e)
    }
}

pub(crate) struct DelegateOutcome {
    pub message: Message,
    pub tool_events: usize,
}

pub(crate) async fn run_delegate(
    hub: &dyn HubApi,
    request: &ChatRequest,
    scope: &TurnScope<'_>,
) -> Result<DelegateOutcome, DelegateFailure> {
    let mut stream = match hub.chat_stream(request).await {
        Ok(stream) => stream,
        Err(e) if e.is_transport() => return Err(DelegateFailure::Unavailable(e)),
        Err(e) => return Err(DelegateFailure::Failed(e.into())),
    };

    let mut buffer = String::new();
    let mut last_saved: Option<Message> = None;
    let mut tool_events = 0;

    while let Some(item) = stream.next().await {
        let event = item.map_err(CoreError::from)?;
        match event {
            HubStreamEvent::ToolCallStarted { tool, args } => {
                tool_events += 1;
                scope.publish(CoreEvent::ToolCallStarted {
                    session_id: scope.session_id.to_string(),
                    tool,
                    args,
                });
            }
            HubStreamEvent::ToolCallResult {
                tool,
                success,
                output,
            } => {
                scope.publish(CoreEvent::ToolCallResult {
                    session_id: scope.session_id.to_string(),
                    tool,
                    success,
                    output,
                });
            }
            HubStreamEvent::ContentDelta { text } => {
                buffer.push_str(&text);
                scope.publish(CoreEvent::ContentDelta {
                    session_id: scope.session_id.to_string(),
                    text,
                });
            }
            HubStreamEvent::AssistantMessage { content } => {
                buffer.clear();
                last_saved = Some(scope.persist_assistant(&content)?);
            }
            HubStreamEvent::Error { message } => {
                tracing::warn!(session_id = scope.session_id, error = %message, "Hub reported stream error");
                if !buffer.trim().is_empty() {
                    scope.persist_assistant(&buffer)?;
                }
                return Err(CoreError::Hub(HubError::Protocol(message)).into());
            }
            HubStreamEvent::Done {
                variant,
                is_fallback,
            } => {
                let message = finish(scope, &mut buffer, last_saved)?;
                scope.record_provenance(
                    variant.as_deref().unwrap_or("hub"),
                    is_fallback.unwrap_or(false),
                );
                return Ok(DelegateOutcome {
                    message,
                    tool_events,
                });
            }
        }
    }

    // 流在 done 之前结束：保留已收到的内容，不更新离线判定
    tracing::warn!(session_id = scope.session_id, "Hub stream ended without done");
    let message = finish(scope, &mut buffer, last_saved)?;
    Ok(DelegateOutcome {
        message,
        tool_events,
    })
}

/// 未落库的增量内容作为最终回复
fn finish(
    scope: &TurnScope<'_>,
    buffer: &mut String,
    last_saved: Option<Message>,
) -> Result<Message, CoreError> {
    if !buffer.trim().is_empty() {
        let content = std::mem::take(buffer);
        return scope.persist_assistant(&content);
    }
    match last_saved {
        Some(message) => Ok(message),
        None => Err(CoreError::Hub(HubError::Protocol(
            "stream finished without a reply".into(),
        ))),
    }
}
