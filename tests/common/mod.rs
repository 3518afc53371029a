//! 集成测试共用的 Hub 替身

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bee_link::hub::{
    ChatRequest, DeviceInfo, HubApi, HubError, HubEventStream, HubLink, HubStreamEvent, Identity,
    MessageUpload, RemoteMessage, RemoteSession, SkillDescriptor,
};
use chrono::Utc;
use parking_lot::Mutex;

/// 记录每次调用的内存 Hub
#[derive(Default)]
pub struct RecordingHub {
    pub calls: Mutex<Vec<String>>,
    pub sessions: Mutex<Vec<RemoteSession>>,
    pub uploads: Mutex<Vec<(String, MessageUpload)>>,
    pub chat_events: Mutex<Vec<HubStreamEvent>>,
    pub chat_requests: Mutex<Vec<ChatRequest>>,
    /// 非空时 chat_stream 直接返回此错误
    pub chat_error: Mutex<Option<HubError>>,
    pub latency: Mutex<Option<Duration>>,
    next_id: AtomicU64,
}

impl RecordingHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// 模拟其他设备在 Hub 上建的会话
    pub fn create_session_for_test(&self, title: &str) -> RemoteSession {
        let session = RemoteSession {
            id: format!("remote-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
            title: title.to_string(),
            created_at: Utc::now(),
            last_activity: Utc::now(),
            client_session_id: None,
        };
        self.sessions.lock().push(session.clone());
        session
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }

    async fn delay(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

fn not_found() -> HubError {
    HubError::Client {
        status: 404,
        message: "no such session".into(),
    }
}

#[async_trait]
impl HubApi for RecordingHub {
    async fn health(&self) -> Result<(), HubError> {
        self.record("health".into());
        Ok(())
    }

    async fn whoami(&self) -> Result<Identity, HubError> {
        Ok(Identity {
            user_id: "it-user".into(),
            display_name: None,
        })
    }

    async fn register_device(&self, device: &DeviceInfo) -> Result<String, HubError> {
        Ok(device.device_id.clone().unwrap_or_else(|| "it-device".into()))
    }

    async fn create_session(
        &self,
        title: &str,
        client_session_id: &str,
    ) -> Result<RemoteSession, HubError> {
        self.record(format!("create_session:{title}"));
        self.delay().await;
        let session = RemoteSession {
            id: format!("remote-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
            title: title.to_string(),
            created_at: Utc::now(),
            last_activity: Utc::now(),
            client_session_id: Some(client_session_id.to_string()),
        };
        self.sessions.lock().push(session.clone());
        Ok(session)
    }

    async fn list_sessions(&self) -> Result<Vec<RemoteSession>, HubError> {
        self.record("list_sessions".into());
        Ok(self.sessions.lock().clone())
    }

    async fn get_session(&self, remote_id: &str) -> Result<RemoteSession, HubError> {
        self.sessions
            .lock()
            .iter()
            .find(|s| s.id == remote_id)
            .cloned()
            .ok_or_else(not_found)
    }

    async fn update_session(&self, remote_id: &str, title: &str) -> Result<(), HubError> {
        self.record(format!("update_session:{title}"));
        self.delay().await;
        let mut sessions = self.sessions.lock();
        let session = sessions.iter_mut().find(|s| s.id == remote_id).ok_or_else(not_found)?;
        session.title = title.to_string();
        Ok(())
    }

    async fn delete_session(&self, remote_id: &str) -> Result<(), HubError> {
        self.record(format!("delete_session:{remote_id}"));
        self.delay().await;
        self.sessions.lock().retain(|s| s.id != remote_id);
        Ok(())
    }

    async fn append_message(&self, remote_id: &str, message: &MessageUpload) -> Result<(), HubError> {
        self.record(format!("append_message:{}", message.content));
        self.delay().await;
        self.uploads.lock().push((remote_id.to_string(), message.clone()));
        Ok(())
    }

    async fn list_messages(&self, remote_id: &str) -> Result<Vec<RemoteMessage>, HubError> {
        Ok(self
            .uploads
            .lock()
            .iter()
            .filter(|(rid, _)| rid == remote_id)
            .map(|(_, m)| RemoteMessage {
                id: m.client_message_id.clone(),
                role: m.role.clone(),
                content: m.content.clone(),
                sequence: Some(m.sequence),
                client_message_id: Some(m.client_message_id.clone()),
                created_at: Utc::now(),
            })
            .collect())
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<HubEventStream, HubError> {
        self.record("chat_stream".into());
        self.chat_requests.lock().push(request.clone());
        if let Some(e) = self.chat_error.lock().clone() {
            return Err(e);
        }
        let events: Vec<Result<HubStreamEvent, HubError>> =
            self.chat_events.lock().iter().cloned().map(Ok).collect();
        Ok(Box::pin(futures_util::stream::iter(events)))
    }

    async fn register_skills(
        &self,
        _device_id: Option<&str>,
        _skills: &[SkillDescriptor],
    ) -> Result<(), HubError> {
        self.record("register_skills".into());
        Ok(())
    }

    async fn heartbeat(&self, _device_id: Option<&str>) -> Result<(), HubError> {
        Ok(())
    }
}

/// 可手动切换在线 / 离线的 HubLink
#[derive(Default)]
pub struct SwitchLink {
    hub: Mutex<Option<Arc<dyn HubApi>>>,
}

impl SwitchLink {
    pub fn offline() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connect(&self, hub: Arc<RecordingHub>) {
        *self.hub.lock() = Some(hub);
    }

    pub fn disconnect(&self) {
        *self.hub.lock() = None;
    }
}

impl HubLink for SwitchLink {
    fn live_hub(&self) -> Option<Arc<dyn HubApi>> {
        self.hub.lock().clone()
    }
}
