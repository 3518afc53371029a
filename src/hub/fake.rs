//! 进程内的 Hub / 保活通道替身，供单元测试使用

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::channel::{ChannelConnector, KeepAliveChannel};
use super::client::{HubApi, HubEventStream, MessageUpload};
use super::protocol::{
    ChannelMessage, ChatRequest, DeviceInfo, HubStreamEvent, Identity, RemoteMessage,
    RemoteSession, SkillDescriptor,
};
use super::HubError;

#[derive(Default)]
pub(crate) struct FakeHub {
    pub calls: Mutex<Vec<String>>,
    pub health_errors: Mutex<VecDeque<HubError>>,
    pub health_down: Mutex<Option<HubError>>,
    pub whoami_error: Mutex<Option<HubError>>,
    pub skill_failures: AtomicU32,
    pub assigned_device_id: Mutex<Option<String>>,
    pub registered_with: Mutex<Vec<Option<String>>>,
    pub sessions: Mutex<Vec<RemoteSession>>,
    pub messages: Mutex<Vec<(String, MessageUpload)>>,
    pub session_error: Mutex<Option<HubError>>,
    pub chat_events: Mutex<Vec<HubStreamEvent>>,
    /// 会话类调用的模拟网络延迟
    pub latency: Mutex<Option<std::time::Duration>>,
    next_id: AtomicU64,
}

impl FakeHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }

    async fn session_error(&self) -> Result<(), HubError> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match self.session_error.lock().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl HubApi for FakeHub {
    async fn health(&self) -> Result<(), HubError> {
        self.record("health".into());
        if let Some(e) = self.health_errors.lock().pop_front() {
            return Err(e);
        }
        match self.health_down.lock().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn whoami(&self) -> Result<Identity, HubError> {
        self.record("whoami".into());
        match self.whoami_error.lock().clone() {
            Some(e) => Err(e),
            None => Ok(Identity {
                user_id: "user-1".into(),
                display_name: None,
            }),
        }
    }

    async fn register_device(&self, device: &DeviceInfo) -> Result<String, HubError> {
        self.record("register_device".into());
        self.registered_with.lock().push(device.device_id.clone());
        let assigned = self.assigned_device_id.lock().clone();
        Ok(assigned
            .or_else(|| device.device_id.clone())
            .unwrap_or_else(|| "dev-1".to_string()))
    }

    async fn create_session(
        &self,
        title: &str,
        client_session_id: &str,
    ) -> Result<RemoteSession, HubError> {
        self.record(format!("create_session:{title}"));
        self.session_error().await?;
        let id = format!("r-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let session = RemoteSession {
            id,
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
            .ok_or_else(|| HubError::from_status(404, "no such session".into()))
    }

    async fn update_session(&self, remote_id: &str, title: &str) -> Result<(), HubError> {
        self.record(format!("update_session:{remote_id}:{title}"));
        self.session_error().await?;
        let mut sessions = self.sessions.lock();
        let session = sessions
            .iter_mut()
            .find(|s| s.id == remote_id)
            .ok_or_else(|| HubError::from_status(404, "no such session".into()))?;
        session.title = title.to_string();
        Ok(())
    }

    async fn delete_session(&self, remote_id: &str) -> Result<(), HubError> {
        self.record(format!("delete_session:{remote_id}"));
        self.session_error().await?;
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|s| s.id != remote_id);
        if sessions.len() == before {
            return Err(HubError::from_status(404, "no such session".into()));
        }
        Ok(())
    }

    async fn append_message(&self, remote_id: &str, message: &MessageUpload) -> Result<(), HubError> {
        self.record(format!("append_message:{remote_id}:{}", message.content));
        self.session_error().await?;
        self.messages
            .lock()
            .push((remote_id.to_string(), message.clone()));
        Ok(())
    }

    async fn list_messages(&self, remote_id: &str) -> Result<Vec<RemoteMessage>, HubError> {
        Ok(self
            .messages
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

    async fn chat_stream(&self, _request: &ChatRequest) -> Result<HubEventStream, HubError> {
        self.record("chat_stream".into());
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
        let remaining = self.skill_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.skill_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(HubError::from_status(503, "registry busy".into()));
        }
        Ok(())
    }

    async fn heartbeat(&self, _device_id: Option<&str>) -> Result<(), HubError> {
        self.record("heartbeat".into());
        Ok(())
    }
}

/// 测试端持有的通道另一头
pub(crate) struct ChannelPeer {
    pub inbound: mpsc::UnboundedSender<ChannelMessage>,
    pub outbound: mpsc::UnboundedReceiver<ChannelMessage>,
}

#[derive(Default)]
pub(crate) struct FakeConnector {
    pub opens: AtomicU32,
    pub fail_opens: AtomicU32,
    pub peers: Mutex<Vec<ChannelPeer>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 取出最近一次打开的通道对端
    pub fn take_peer(&self) -> Option<ChannelPeer> {
        self.peers.lock().pop()
    }
}

#[async_trait]
impl ChannelConnector for FakeConnector {
    async fn open(
        &self,
        _hub_url: &str,
        _token: &str,
        _device_id: Option<&str>,
    ) -> Result<Box<dyn KeepAliveChannel>, HubError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_opens.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_opens.store(remaining - 1, Ordering::SeqCst);
            return Err(HubError::Transport("connection refused".into()));
        }
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        self.peers.lock().push(ChannelPeer {
            inbound: in_tx,
            outbound: out_rx,
        });
        Ok(Box::new(FakeChannel {
            inbound: in_rx,
            outbound: out_tx,
        }))
    }
}

struct FakeChannel {
    inbound: mpsc::UnboundedReceiver<ChannelMessage>,
    outbound: mpsc::UnboundedSender<ChannelMessage>,
}

#[async_trait]
impl KeepAliveChannel for FakeChannel {
    async fn send(&mut self, message: &ChannelMessage) -> Result<(), HubError> {
        self.outbound
            .send(message.clone())
            .map_err(|_| HubError::Transport("peer gone".into()))
    }

    async fn recv(&mut self) -> Option<Result<ChannelMessage, HubError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.inbound.close();
    }
}
