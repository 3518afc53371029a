//! 本地工具循环
//!
//! 每轮：完整历史 + 系统提示发给本地推理后端 ->
//! 有原生工具调用（或旧式文本调用）则逐个执行、结果追加进历史 -> 下一轮；
//! 没有调用则该内容即最终回复。
//! 同一签名第二次出现立即中止；达到轮数上限时合成一条说明作为最终回复。

use crate::core::CoreError;
use crate::events::CoreEvent;
use crate::inference::{ChatMessage, InferenceBackend, ToolCallRequest};
use crate::store::Message;
use crate::tools::ToolExecutor;

use super::legacy::extract_legacy_calls;
use super::signature::{SignatureSet, ToolCallSignature};
use super::TurnScope;

pub(crate) struct LoopOutcome {
    pub message: Message,
    pub iterations: usize,
    pub aborted: bool,
}

pub(crate) struct LocalLoop<'a> {
    pub backend: &'a dyn InferenceBackend,
    pub executor: &'a ToolExecutor,
    pub max_iterations: usize,
}

impl LocalLoop<'_> {
    pub async fn run(
        &self,
        scope: &TurnScope<'_>,
        mut history: Vec<ChatMessage>,
        system_prompt: &str,
    ) -> Result<LoopOutcome, CoreError> {
        let tools = self.executor.descriptors();
        let max_iterations = self.max_iterations.max(1);
        let mut seen = SignatureSet::default();

        for iteration in 1..=max_iterations {
            tracing::debug!(session_id = scope.session_id, iteration, "Local loop iteration");
            let response = self.backend.chat(&history, system_prompt, &tools).await?;
            scope.record_provenance(&response.variant, response.is_fallback);

            let native = !response.tool_calls.is_empty();
            let calls: Vec<ToolCallRequest> = if native {
                response.tool_calls.clone()
            } else {
                extract_legacy_calls(&response.content)
            };

            if calls.is_empty() {
                let message = scope.persist_assistant(&response.content)?;
                return Ok(LoopOutcome {
                    message,
                    iterations: iteration,
                    aborted: false,
                });
            }

            if !response.content.trim().is_empty() {
                scope.persist_assistant(&response.content)?;
            }
            history.push(if native {
                ChatMessage::assistant_with_calls(response.content.clone(), calls.clone())
            } else {
                ChatMessage::assistant(response.content.clone())
            });

            for call in calls {
                if !seen.insert(ToolCallSignature::of(&call.name, &call.arguments)) {
                    tracing::warn!(
                        session_id = scope.session_id,
                        tool = %call.name,
                        iteration,
                        "Repeated identical tool call, aborting loop"
                    );
                    let explanation = format!(
                        "I stopped here: the model asked to run `{}` again with exactly the same arguments, which would repeat the previous step without progress.",
                        call.name
                    );
                    scope.publish(CoreEvent::error(
                        Some(scope.session_id),
                        "duplicate_tool_call",
                        format!("duplicate call to {}", call.name),
                    ));
                    let message = scope.persist_assistant(&explanation)?;
                    return Ok(LoopOutcome {
                        message,
                        iterations: iteration,
                        aborted: true,
                    });
                }

                let observation = self.execute(scope, &call).await;
                history.push(if native {
                    ChatMessage::tool_result(call.id.clone(), observation)
                } else {
                    ChatMessage::user(format!("Observation from {}: {}", call.name, observation))
                });
            }
        }

        tracing::warn!(
            session_id = scope.session_id,
            max_iterations,
            "Local loop hit iteration cap"
        );
        scope.publish(CoreEvent::error(
            Some(scope.session_id),
            "iteration_limit",
            format!("no final answer after {max_iterations} iterations"),
        ));
        let explanation = format!(
            "I stopped after {max_iterations} tool-calling rounds without reaching a final answer. Please narrow the request or try again."
        );
        let message = scope.persist_assistant(&explanation)?;
        Ok(LoopOutcome {
            message,
            iterations: max_iterations,
            aborted: true,
        })
    }

    /// 执行单个调用；失败也作为观察结果返回给模型
    async fn execute(&self, scope: &TurnScope<'_>, call: &ToolCallRequest) -> String {
        scope.publish(CoreEvent::ToolCallStarted {
            session_id: scope.session_id.to_string(),
            tool: call.name.clone(),
            args: call.arguments.clone(),
        });
        let (success, output) = match self.executor.execute(&call.name, call.arguments.clone()).await {
            Ok(output) => (true, output),
            Err(e) => (false, format!("Error: {e}")),
        };
        scope.publish(CoreEvent::ToolCallResult {
            session_id: scope.session_id.to_string(),
            tool: call.name.clone(),
            success,
            output: output.clone(),
        });
        output
    }
}
