//! Agent 编排器
//!
//! 一轮对话：用户消息落库并触发后台同步 -> 依据离线判定选择策略 ->
//! 得到最终回复（已落库）-> 再次触发后台同步。
//! 同一会话同一时刻只允许一轮对话，后到的请求直接拒绝。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::AgentSection;
use crate::core::CoreError;
use crate::events::{CoreEvent, EventBus};
use crate::hub::{ChatRequest, ChatTurn, HubApi, HubLink};
use crate::inference::{ChatMessage, InferenceBackend};
use crate::offline::SharedTracker;
use crate::store::{Message, Role, Session, SessionStore, StoreError};
use crate::sync::SyncEngine;
use crate::tools::ToolExecutor;

use super::delegate::{run_delegate, DelegateFailure};
use super::local::LocalLoop;
use super::{AgentMode, TurnScope};

/// 一轮对话的结果
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub mode: AgentMode,
    /// 已写入存储的最终 assistant 消息
    pub message: Message,
    /// 本地循环的轮数；委托模式为 Hub 侧工具事件数
    pub iterations: usize,
    /// 因重复调用或轮数上限而中止
    pub aborted: bool,
}

pub struct AgentOrchestrator {
    store: SessionStore,
    sync: Arc<SyncEngine>,
    link: Arc<dyn HubLink>,
    backend: Arc<dyn InferenceBackend>,
    executor: Arc<ToolExecutor>,
    tracker: SharedTracker,
    bus: EventBus,
    settings: AgentSection,
    busy: Mutex<HashSet<String>>,
    /// 进程级当前模式，变化时发布 ModeChanged
    current_mode: Mutex<Option<AgentMode>>,
    /// 每个会话上一轮使用的模式，变化时注入一次切换说明
    session_modes: Mutex<HashMap<String, AgentMode>>,
}

/// 会话忙标记，离开作用域即释放
struct BusyGuard<'a> {
    busy: &'a Mutex<HashSet<String>>,
    session_id: String,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.busy.lock().remove(&self.session_id);
    }
}

impl AgentOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: SessionStore,
        sync: Arc<SyncEngine>,
        link: Arc<dyn HubLink>,
        backend: Arc<dyn InferenceBackend>,
        executor: Arc<ToolExecutor>,
        tracker: SharedTracker,
        bus: EventBus,
        settings: AgentSection,
    ) -> Self {
        Self {
            store,
            sync,
            link,
            backend,
            executor,
            tracker,
            bus,
            settings,
            busy: Mutex::new(HashSet::new()),
            current_mode: Mutex::new(None),
            session_modes: Mutex::new(HashMap::new()),
        }
    }

    /// 处理一条用户消息，返回最终回复
    pub async fn send_message(&self, session_id: &str, content: &str) -> Result<TurnOutcome, CoreError> {
        let result = self.run_turn(session_id, content).await;
        if let Err(e) = &result {
            tracing::warn!(session_id, error = %e, "Turn failed");
            self.bus
                .publish(CoreEvent::error(Some(session_id), e.code(), e.to_string()));
        }
        result
    }

    async fn run_turn(&self, session_id: &str, content: &str) -> Result<TurnOutcome, CoreError> {
        let _guard = self.acquire(session_id)?;

        match self.store.get_session(session_id) {
            Ok(session) if session.deleted => {
                return Err(CoreError::SessionNotFound(session_id.to_string()))
            }
            Ok(_) => {}
            Err(StoreError::NotFound(_)) => {
                return Err(CoreError::SessionNotFound(session_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        }

        let user = self.store.add_message(session_id, Role::User, content)?;
        self.bus.publish(CoreEvent::MessageAdded {
            session_id: session_id.to_string(),
            message: user,
        });
        self.after_write();

        let scope = TurnScope {
            session_id,
            store: &self.store,
            bus: &self.bus,
            tracker: &self.tracker,
        };

        let mut outcome = None;
        let (target, offline) = self.delegate_target();
        if let Some(hub) = target {
            self.note_mode(AgentMode::Delegate, offline);
            let prompt = self.system_prompt(session_id, AgentMode::Delegate);
            let request = self.chat_request(session_id, prompt)?;
            match run_delegate(hub.as_ref(), &request, &scope).await {
                Ok(delegated) => {
                    outcome = Some(TurnOutcome {
                        mode: AgentMode::Delegate,
                        message: delegated.message,
                        iterations: delegated.tool_events,
                        aborted: false,
                    });
                }
                Err(DelegateFailure::Unavailable(e)) => {
                    tracing::warn!(session_id, error = %e, "Hub unreachable, answering locally this turn");
                }
                Err(DelegateFailure::Failed(e)) => return Err(e),
            }
        }

        let outcome = match outcome {
            Some(outcome) => outcome,
            None => {
                self.note_mode(AgentMode::Local, offline);
                self.run_local(&scope).await?
            }
        };

        self.after_write();
        Ok(outcome)
    }

    async fn run_local(&self, scope: &TurnScope<'_>) -> Result<TurnOutcome, CoreError> {
        let prompt = self.system_prompt(scope.session_id, AgentMode::Local);
        let history = self.local_history(scope.session_id)?;
        let looper = LocalLoop {
            backend: self.backend.as_ref(),
            executor: &self.executor,
            max_iterations: self.settings.max_iterations,
        };
        let result = looper.run(scope, history, &prompt).await?;
        Ok(TurnOutcome {
            mode: AgentMode::Local,
            message: result.message,
            iterations: result.iterations,
            aborted: result.aborted,
        })
    }

    /// 判定在线且 Hub 可用时返回委托目标，连同当时的离线判定
    fn delegate_target(&self) -> (Option<Arc<dyn HubApi>>, bool) {
        let offline = self.tracker.lock().is_offline();
        let hub = if offline { None } else { self.link.live_hub() };
        (hub, offline)
    }

    /// 记录本轮实际应答的策略，与上次不同时发布 ModeChanged
    fn note_mode(&self, mode: AgentMode, offline: bool) {
        let mut current = self.current_mode.lock();
        if *current != Some(mode) {
            tracing::info!(mode = %mode, offline, "Agent mode changed");
            *current = Some(mode);
            self.bus.publish(CoreEvent::ModeChanged { mode, offline });
        }
    }

    /// 基础系统提示；该会话的模式与上一轮不同时附加一次切换说明
    fn system_prompt(&self, session_id: &str, mode: AgentMode) -> String {
        let previous = self
            .session_modes
            .lock()
            .insert(session_id.to_string(), mode);
        match previous {
            Some(prev) if prev != mode => {
                format!("{}\n\n{}", self.settings.system_prompt, mode.switch_notice())
            }
            _ => self.settings.system_prompt.clone(),
        }
    }

    fn chat_request(&self, session_id: &str, system_prompt: String) -> Result<ChatRequest, CoreError> {
        let session = self.store.get_session(session_id)?;
        let messages = self
            .store
            .recent_messages(session_id, self.settings.history_limit)?
            .into_iter()
            .map(|m| ChatTurn {
                role: m.role.as_str().to_string(),
                content: m.content,
            })
            .collect();
        Ok(ChatRequest {
            session_id: session.remote_id,
            messages,
            system_prompt: Some(system_prompt),
            execute_tools: true,
            stream: true,
        })
    }

    fn local_history(&self, session_id: &str) -> Result<Vec<ChatMessage>, CoreError> {
        let history = self
            .store
            .recent_messages(session_id, self.settings.history_limit)?
            .into_iter()
            .map(|m| match m.role {
                Role::User => ChatMessage::user(m.content),
                Role::Assistant => ChatMessage::assistant(m.content),
                Role::System => ChatMessage::system(m.content),
            })
            .collect();
        Ok(history)
    }

    fn acquire(&self, session_id: &str) -> Result<BusyGuard<'_>, CoreError> {
        if !self.busy.lock().insert(session_id.to_string()) {
            return Err(CoreError::SessionBusy(session_id.to_string()));
        }
        Ok(BusyGuard {
            busy: &self.busy,
            session_id: session_id.to_string(),
        })
    }

    pub fn is_busy(&self, session_id: &str) -> bool {
        self.busy.lock().contains(session_id)
    }

    pub fn current_mode(&self) -> AgentMode {
        if self.tracker.lock().is_offline() || self.link.live_hub().is_none() {
            AgentMode::Local
        } else {
            AgentMode::Delegate
        }
    }

    pub fn status_text(&self) -> String {
        self.tracker
            .lock()
            .status_text(Some(self.backend.model_name()))
    }

    pub fn new_session(&self, title: Option<&str>) -> Result<Session, CoreError> {
        let session = self.store.create_session(title)?;
        self.after_write();
        Ok(session)
    }

    pub fn rename_session(&self, session_id: &str, title: &str) -> Result<(), CoreError> {
        self.store.rename_session(session_id, title)?;
        self.after_write();
        Ok(())
    }

    pub fn delete_session(&self, session_id: &str) -> Result<(), CoreError> {
        if self.is_busy(session_id) {
            return Err(CoreError::SessionBusy(session_id.to_string()));
        }
        self.store.delete_session(session_id, true)?;
        self.session_modes.lock().remove(session_id);
        self.after_write();
        Ok(())
    }

    pub fn get_session(&self, session_id: &str) -> Result<Session, CoreError> {
        match self.store.get_session(session_id) {
            Ok(session) => Ok(session),
            Err(StoreError::NotFound(_)) => Err(CoreError::SessionNotFound(session_id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_messages(&self, session_id: &str) -> Result<Vec<Message>, CoreError> {
        Ok(self.store.get_messages(session_id)?)
    }

    /// 侧边栏：未删除的会话，最近活动在前
    pub fn list_sessions_for_sidebar(&self) -> Result<Vec<Session>, CoreError> {
        Ok(self.store.list_sessions(false)?)
    }

    pub fn pending_sync_count(&self) -> usize {
        self.sync.get_pending_count()
    }

    /// 本地写入后：刷新待同步计数（离线时状态栏也要显示），再尝试后台推送
    fn after_write(&self) {
        let pending = self.sync.get_pending_count();
        self.tracker.lock().set_pending_sync(pending);
        self.bus.publish(CoreEvent::SyncStatus { pending });
        self.sync.spawn_sync();
    }
}
