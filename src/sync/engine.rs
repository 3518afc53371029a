//! 同步引擎
//!
//! 按入队顺序把待同步操作推送给 Hub：
//! - create_session 创建远端会话并 markSynced
//! - 其余操作若所属会话尚无远端 ID，则原地保留（延后），下一轮再试
//! - 单飞：同一时刻只有一轮 drain；期间到来的 sync_all 只登记“再跑一轮”
//!
//! 传输层错误说明 Hub 已不可达，本轮立即结束；单个操作的 4xx/5xx 记在队列行上，不阻塞其他操作。

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::core::CoreError;
use crate::events::{CoreEvent, EventBus};
use crate::hub::{HubApi, HubError, HubLink, MessageUpload};
use crate::store::{RemoteMetadata, SessionStore, StoreError, SyncOperation, SyncPayload};

/// 单个操作的处理结果
enum Step {
    /// 远端已确认，可出队
    Done,
    /// 依赖未满足，留在队列
    Deferred,
    /// 会话已被物理删除（连同它的队列行）
    Purged,
}

pub struct SyncEngine {
    store: SessionStore,
    link: Arc<dyn HubLink>,
    bus: EventBus,
    draining: AtomicBool,
    rerun: AtomicBool,
}

/// drain 结束（含 future 被取消）时释放单飞标记
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SyncEngine {
    pub fn new(store: SessionStore, link: Arc<dyn HubLink>, bus: EventBus) -> Self {
        Self {
            store,
            link,
            bus,
            draining: AtomicBool::new(false),
            rerun: AtomicBool::new(false),
        }
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// 推送全部待同步操作
    ///
    /// 没有可用 Hub 或已有 drain 在进行时返回 false；
    /// 本轮完整走完（未因传输错误中止）返回 true。
    pub async fn sync_all(&self) -> bool {
        let Some(hub) = self.link.live_hub() else {
            tracing::debug!("Sync skipped, Hub not connected");
            self.publish_pending();
            return false;
        };

        if self.draining.swap(true, Ordering::SeqCst) {
            self.rerun.store(true, Ordering::SeqCst);
            tracing::debug!("Sync already in progress, rerun requested");
            return false;
        }

        let completed = loop {
            let guard = DrainGuard(&self.draining);
            self.rerun.store(false, Ordering::SeqCst);
            let completed = loop {
                let ok = self.drain(hub.as_ref()).await;
                if !ok || !self.rerun.swap(false, Ordering::SeqCst) {
                    break ok;
                }
            };
            drop(guard);

            // 释放标记前一刻到达的请求
            if completed
                && self.rerun.load(Ordering::SeqCst)
                && !self.draining.swap(true, Ordering::SeqCst)
            {
                continue;
            }
            break completed;
        };

        self.publish_pending();
        completed
    }

    /// 在后台执行一次 sync_all
    pub fn spawn_sync(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.sync_all().await;
        });
    }

    pub fn get_pending_count(&self) -> usize {
        match self.store.pending_count() {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to count pending operations");
                0
            }
        }
    }

    /// 单轮 drain；遇到传输错误返回 false
    async fn drain(&self, hub: &dyn HubApi) -> bool {
        let ops = match self.store.pending_operations() {
            Ok(ops) => ops,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read sync queue");
                return true;
            }
        };
        if ops.is_empty() {
            return true;
        }
        tracing::info!(count = ops.len(), "Draining sync queue");

        let mut touched = BTreeSet::new();
        let mut aborted = false;
        for op in &ops {
            match self.process(hub, op).await {
                Ok(Step::Done) => {
                    if let Err(e) = self.store.remove_operation(op.id) {
                        tracing::error!(op_id = op.id, error = %e, "Failed to dequeue synced operation");
                    }
                    touched.insert(op.session_id.clone());
                }
                Ok(Step::Deferred) => {
                    tracing::debug!(
                        op_id = op.id,
                        kind = op.kind().as_str(),
                        session_id = %op.session_id,
                        "Deferred until session exists remotely"
                    );
                }
                Ok(Step::Purged) => {}
                Err(CoreError::Hub(e)) if e.is_transport() => {
                    tracing::warn!(op_id = op.id, error = %e, "Hub unreachable, sync aborted");
                    aborted = true;
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        op_id = op.id,
                        kind = op.kind().as_str(),
                        error = %e,
                        "Sync operation failed, kept in queue"
                    );
                    if let Err(store_err) = self.store.record_operation_failure(op.id, &e.to_string()) {
                        tracing::error!(op_id = op.id, error = %store_err, "Failed to record sync failure");
                    }
                }
            }
        }

        for session_id in touched {
            if let Err(e) = self.store.refresh_sync_status(&session_id) {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to refresh sync status");
            }
        }
        !aborted
    }

    async fn process(&self, hub: &dyn HubApi, op: &SyncOperation) -> Result<Step, CoreError> {
        let session = match self.store.get_session(&op.session_id) {
            Ok(session) => session,
            // 会话已被清除，操作作废
            Err(StoreError::NotFound(_)) => return Ok(Step::Done),
            Err(e) => return Err(e.into()),
        };

        if let SyncPayload::CreateSession = op.payload {
            if session.remote_id.is_some() {
                return Ok(Step::Done);
            }
            if session.deleted {
                // 从未到达 Hub 就被删除：本地直接清除
                self.store.purge_session(&session.local_id)?;
                return Ok(Step::Purged);
            }
            let remote = hub
                .create_session(&session.title, &session.local_id)
                .await?;
            self.store.mark_synced(&session.local_id, &remote.id)?;
            tracing::info!(session_id = %session.local_id, remote_id = %remote.id, "Session created on Hub");
            return Ok(Step::Done);
        }

        let Some(remote_id) = session.remote_id.as_deref() else {
            return Ok(Step::Deferred);
        };

        match &op.payload {
            SyncPayload::CreateSession => Ok(Step::Done),
            SyncPayload::UpdateSession { .. } => {
                if session.deleted {
                    return Ok(Step::Done);
                }
                // 推送当前标题，重复执行也只会得到最终标题
                hub.update_session(remote_id, &session.title).await?;
                Ok(Step::Done)
            }
            SyncPayload::AddMessage { message_id } => {
                if session.deleted {
                    return Ok(Step::Done);
                }
                let Some(message) = self.store.get_message(message_id)? else {
                    return Ok(Step::Done);
                };
                let upload = MessageUpload {
                    role: message.role.as_str().to_string(),
                    content: message.content,
                    client_message_id: message.id,
                    sequence: message.seq,
                };
                hub.append_message(remote_id, &upload).await?;
                Ok(Step::Done)
            }
            SyncPayload::DeleteSession { remote_id: recorded } => {
                let target = recorded.as_deref().unwrap_or(remote_id);
                match hub.delete_session(target).await {
                    Ok(()) => {}
                    Err(HubError::Client { status: 404, .. }) => {
                        tracing::debug!(remote_id = target, "Remote session already gone");
                    }
                    Err(e) => return Err(e.into()),
                }
                self.store.purge_session(&session.local_id)?;
                tracing::info!(session_id = %session.local_id, "Session deleted on Hub and purged locally");
                Ok(Step::Purged)
            }
        }
    }

    /// 拉取远端会话列表并合并元数据，返回新增或更新的本地会话数
    ///
    /// - 已绑定的会话：远端标题与最近活动覆盖本地（本地有未推送的重命名时保留本地标题）
    /// - 远端会话的 client_session_id 指向本地未绑定会话：直接绑定，不重复导入
    /// - 其余远端会话导入为 Synced；本地软删除的会话不会被复活
    pub async fn pull_remote_metadata(&self) -> Result<usize, CoreError> {
        let Some(hub) = self.link.live_hub() else {
            return Ok(0);
        };
        let remotes = hub.list_sessions().await?;
        let mut changed = 0;

        for remote in remotes {
            if let Some(local) = self.store.find_by_remote_id(&remote.id)? {
                if local.deleted {
                    continue;
                }
                let title = if self.store.has_pending_update(&local.local_id)? {
                    None
                } else {
                    Some(remote.title.as_str())
                };
                self.store
                    .apply_remote_metadata(&local.local_id, title, remote.last_activity)?;
                changed += 1;
                continue;
            }

            if let Some(client_id) = remote.client_session_id.as_deref() {
                match self.store.get_session(client_id) {
                    Ok(local) if local.remote_id.is_none() => {
                        self.store.mark_synced(&local.local_id, &remote.id)?;
                        self.store.refresh_sync_status(&local.local_id)?;
                        tracing::info!(session_id = %local.local_id, remote_id = %remote.id, "Rebound local session to existing remote");
                        changed += 1;
                        continue;
                    }
                    Ok(_) | Err(StoreError::NotFound(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }

            self.store.import_remote_session(&RemoteMetadata {
                remote_id: remote.id.clone(),
                title: remote.title.clone(),
                created_at: remote.created_at,
                last_activity: remote.last_activity,
            })?;
            changed += 1;
        }

        tracing::info!(changed, "Remote session metadata merged");
        Ok(changed)
    }

    fn publish_pending(&self) {
        let pending = self.get_pending_count();
        self.bus.publish(CoreEvent::SyncStatus { pending });
    }
}
