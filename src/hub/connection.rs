//! Hub 连接生命周期
//!
//! 状态机：Disconnected → Connecting → Connected；Connected 在保活丢失后进入 Reconnecting。
//!
//! 建连顺序：令牌检查 → 健康检查 → 身份校验 → 设备注册 → Connected → 注册 skills → 打开保活通道。
//! 保活与重连由唯一的监管任务负责；disconnect() 取消并等待该任务结束后才返回。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;

use super::channel::{ChannelConnector, KeepAliveChannel};
use super::client::HubApi;
use super::device::DeviceIdFile;
use super::protocol::{ChannelMessage, DeviceInfo};
use super::retry::Backoff;
use super::skills::{handle_skill_request, register_skills};
use super::HubError;
use crate::config::HubSection;
use crate::events::{CoreEvent, EventBus};
use crate::tools::ToolExecutor;

/// 心跳随保活 ping 发送的间隔（每 N 次 ping 一次）
const HEARTBEAT_EVERY_PINGS: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// 连接状态快照，仅由 ConnectionManager 修改
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub hub_url: String,
    pub token: Option<String>,
    pub status: ConnectionStatus,
    pub last_error: Option<String>,
    /// 下一次重连前的等待时长
    pub reconnect_delay: Duration,
    pub device_id: Option<String>,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

/// 同步引擎 / 编排器获取可用 Hub 句柄的接缝
pub trait HubLink: Send + Sync {
    /// 已连接时返回 Hub 句柄，否则 None
    fn live_hub(&self) -> Option<Arc<dyn HubApi>>;
}

/// 建连与监管任务共享的部分
struct LinkShared {
    settings: HubSection,
    hub: Arc<dyn HubApi>,
    connector: Arc<dyn ChannelConnector>,
    executor: Arc<ToolExecutor>,
    device_file: DeviceIdFile,
    bus: EventBus,
    state: Mutex<ConnectionState>,
}

struct Supervisor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct ConnectionManager {
    shared: Arc<LinkShared>,
    supervisor: tokio::sync::Mutex<Option<Supervisor>>,
}

impl ConnectionManager {
    pub fn new(
        settings: HubSection,
        hub: Arc<dyn HubApi>,
        connector: Arc<dyn ChannelConnector>,
        executor: Arc<ToolExecutor>,
        device_file: DeviceIdFile,
        bus: EventBus,
    ) -> Self {
        let token = settings.token.clone().filter(|t| !t.trim().is_empty());
        let state = ConnectionState {
            hub_url: settings.url.clone(),
            token,
            status: ConnectionStatus::Disconnected,
            last_error: None,
            reconnect_delay: Duration::from_millis(settings.reconnect_base_ms),
            device_id: device_file.load(),
        };
        Self {
            shared: Arc::new(LinkShared {
                settings,
                hub,
                connector,
                executor,
                device_file,
                bus,
                state: Mutex::new(state),
            }),
            supervisor: tokio::sync::Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.lock().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.state.lock().status
    }

    /// 单次建连
    ///
    /// 缺少令牌或 Hub 返回 4xx 时立即失败；成功后启动保活监管任务。
    /// 已有的监管任务会先被停止，保证任何时刻至多一个。
    pub async fn connect(&self) -> Result<(), HubError> {
        let mut supervisor = self.supervisor.lock().await;
        stop_supervisor(supervisor.take()).await;

        self.shared.require_token()?;
        self.shared.transition(ConnectionStatus::Connecting, None);

        if let Err(e) = self.shared.handshake().await {
            tracing::warn!(error = %e, "Hub connect failed");
            self.shared
                .transition(ConnectionStatus::Disconnected, Some(e.to_string()));
            return Err(e);
        }
        self.shared.on_connected().await;

        let channel = match self.shared.open_channel().await {
            Ok(channel) => Some(channel),
            Err(e) => {
                tracing::warn!(error = %e, "Keep-alive channel unavailable, reconnecting");
                self.shared
                    .transition(ConnectionStatus::Reconnecting, Some(e.to_string()));
                None
            }
        };

        *supervisor = Some(self.spawn_supervisor(channel, false));
        Ok(())
    }

    /// 后台建连：传输层失败按退避重试，直到成功、遇到 4xx 或 disconnect()
    pub async fn start(&self) -> Result<(), HubError> {
        let mut supervisor = self.supervisor.lock().await;
        stop_supervisor(supervisor.take()).await;

        self.shared.require_token()?;
        self.shared.transition(ConnectionStatus::Connecting, None);
        *supervisor = Some(self.spawn_supervisor(None, true));
        Ok(())
    }

    /// 取消保活 / 重连任务并等待其退出，然后进入 Disconnected
    pub async fn disconnect(&self) {
        let mut supervisor = self.supervisor.lock().await;
        stop_supervisor(supervisor.take()).await;
        self.shared.transition(ConnectionStatus::Disconnected, None);
        tracing::info!("Disconnected from Hub");
    }

    /// 监管任务是否仍在运行
    pub async fn has_background_task(&self) -> bool {
        self.supervisor
            .lock()
            .await
            .as_ref()
            .is_some_and(|s| !s.handle.is_finished())
    }

    fn spawn_supervisor(
        &self,
        channel: Option<Box<dyn KeepAliveChannel>>,
        initial: bool,
    ) -> Supervisor {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(supervise(
            Arc::clone(&self.shared),
            cancel.clone(),
            channel,
            initial,
        ));
        Supervisor { cancel, handle }
    }
}

impl HubLink for ConnectionManager {
    fn live_hub(&self) -> Option<Arc<dyn HubApi>> {
        if self.shared.state.lock().is_connected() {
            Some(Arc::clone(&self.shared.hub))
        } else {
            None
        }
    }
}

async fn stop_supervisor(supervisor: Option<Supervisor>) {
    if let Some(supervisor) = supervisor {
        supervisor.cancel.cancel();
        if let Err(e) = supervisor.handle.await {
            tracing::warn!(error = %e, "Connection supervisor ended abnormally");
        }
    }
}

impl LinkShared {
    fn require_token(&self) -> Result<&str, HubError> {
        match self.settings.token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => Ok(token),
            _ => {
                let e = HubError::MissingToken;
                self.transition(ConnectionStatus::Disconnected, Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// 更新状态；状态变化或携带错误时发布 ConnectionChanged
    fn transition(&self, status: ConnectionStatus, error: Option<String>) {
        let changed = {
            let mut state = self.state.lock();
            let changed = state.status != status;
            state.status = status;
            if error.is_some() || status == ConnectionStatus::Connected {
                state.last_error = error.clone();
            }
            changed
        };
        if changed || error.is_some() {
            tracing::info!(status = %status, error = ?error, "Hub connection state");
            self.bus
                .publish(CoreEvent::ConnectionChanged { status, error });
        }
    }

    fn set_reconnect_delay(&self, delay: Duration) {
        self.state.lock().reconnect_delay = delay;
    }

    /// 健康检查 → 身份校验 → 设备注册
    async fn handshake(&self) -> Result<(), HubError> {
        self.hub.health().await?;
        let identity = self.hub.whoami().await?;
        tracing::debug!(user = %identity.user_id, "Hub identity confirmed");

        if self.settings.register_device {
            let known = self.device_file.load();
            let device = DeviceInfo {
                device_id: known.clone(),
                name: self.settings.device_name.clone(),
                platform: std::env::consts::OS.to_string(),
            };
            let device_id = self.hub.register_device(&device).await?;
            if known.as_deref() != Some(device_id.as_str()) {
                if let Err(e) = self.device_file.save(&device_id) {
                    tracing::warn!(error = %e, "Failed to persist device id");
                }
            }
            tracing::info!(device_id = %device_id, "Device registered with Hub");
            self.state.lock().device_id = Some(device_id);
        }
        Ok(())
    }

    /// 进入 Connected 并注册本地能力（失败不影响连接）
    async fn on_connected(&self) {
        self.transition(ConnectionStatus::Connected, None);
        let device_id = self.state.lock().device_id.clone();
        register_skills(
            self.hub.as_ref(),
            device_id.as_deref(),
            &self.executor.descriptors(),
            self.settings.skill_registration_attempts,
            Duration::from_millis(self.settings.skill_registration_delay_ms),
        )
        .await;
    }

    async fn open_channel(&self) -> Result<Box<dyn KeepAliveChannel>, HubError> {
        let token = self.settings.token.as_deref().ok_or(HubError::MissingToken)?;
        let device_id = self.state.lock().device_id.clone();
        self.connector
            .open(&self.settings.url, token, device_id.as_deref())
            .await
    }

    /// 一次完整的重连尝试
    async fn attempt(&self) -> Result<Box<dyn KeepAliveChannel>, HubError> {
        self.handshake().await?;
        self.on_connected().await;
        self.open_channel().await
    }
}

/// 4xx 与缺少令牌不再重试
fn is_terminal(e: &HubError) -> bool {
    e.is_client_error() || matches!(e, HubError::MissingToken)
}

/// 监管任务：保活 → 丢失后按退避重连，直到取消或遇到终止性错误
async fn supervise(
    shared: Arc<LinkShared>,
    cancel: CancellationToken,
    mut channel: Option<Box<dyn KeepAliveChannel>>,
    mut immediate: bool,
) {
    let mut backoff = Backoff::new(
        Duration::from_millis(shared.settings.reconnect_base_ms),
        Duration::from_millis(shared.settings.reconnect_max_ms),
    );
    let mut retry_status = if immediate {
        ConnectionStatus::Connecting
    } else {
        ConnectionStatus::Reconnecting
    };

    loop {
        if let Some(active) = channel.take() {
            match keep_alive(&shared, &cancel, active).await {
                None => break,
                Some(reason) => {
                    tracing::warn!(reason = %reason, "Keep-alive lost");
                    retry_status = ConnectionStatus::Reconnecting;
                    shared.transition(retry_status, Some(reason));
                }
            }
        }

        if !immediate {
            let delay = backoff.next_delay();
            shared.set_reconnect_delay(backoff.current());
            tracing::info!(delay_ms = delay.as_millis() as u64, "Reconnecting to Hub after backoff");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        immediate = false;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            outcome = shared.attempt() => outcome,
        };
        match outcome {
            Ok(active) => {
                backoff.reset();
                shared.set_reconnect_delay(backoff.current());
                channel = Some(active);
            }
            Err(e) if is_terminal(&e) => {
                tracing::error!(error = %e, "Hub rejected reconnect, giving up");
                shared.transition(ConnectionStatus::Disconnected, Some(e.to_string()));
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Reconnect attempt failed");
                shared.transition(retry_status, Some(e.to_string()));
            }
        }
    }
    tracing::debug!("Connection supervisor stopped");
}

/// 保活循环；取消时返回 None，连接丢失时返回原因
async fn keep_alive(
    shared: &LinkShared,
    cancel: &CancellationToken,
    mut channel: Box<dyn KeepAliveChannel>,
) -> Option<String> {
    let interval = Duration::from_secs(shared.settings.keepalive_interval_secs.max(1));
    let idle_limit = Duration::from_secs(shared.settings.keepalive_timeout_secs.max(1));
    let mut ticker = interval_at(Instant::now() + interval, interval);
    let mut last_seen = Instant::now();
    let mut pings: u32 = 0;
    let mut skill_tasks: JoinSet<ChannelMessage> = JoinSet::new();

    let reason = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                channel.close().await;
                return None;
            }
            Some(joined) = skill_tasks.join_next(), if !skill_tasks.is_empty() => {
                match joined {
                    Ok(response) => {
                        if let Err(e) = channel.send(&response).await {
                            break e.to_string();
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Skill task aborted"),
                }
            }
            _ = ticker.tick() => {
                if last_seen.elapsed() > idle_limit {
                    break format!("no traffic for {}s", idle_limit.as_secs());
                }
                if let Err(e) = channel.send(&ChannelMessage::Ping).await {
                    break e.to_string();
                }
                pings = pings.wrapping_add(1);
                if pings % HEARTBEAT_EVERY_PINGS == 0 {
                    send_heartbeat(shared);
                }
            }
            inbound = channel.recv() => {
                match inbound {
                    None => break "channel closed by Hub".to_string(),
                    Some(Err(e)) => break e.to_string(),
                    Some(Ok(message)) => {
                        last_seen = Instant::now();
                        match message {
                            ChannelMessage::Ping => {
                                if let Err(e) = channel.send(&ChannelMessage::Pong).await {
                                    break e.to_string();
                                }
                            }
                            ChannelMessage::Pong => {}
                            ChannelMessage::SkillRequest { request_id, skill_name, method_name, args, kwargs } => {
                                let executor = Arc::clone(&shared.executor);
                                skill_tasks.spawn(async move {
                                    handle_skill_request(
                                        &executor,
                                        request_id,
                                        &skill_name,
                                        method_name.as_deref(),
                                        args,
                                        kwargs,
                                    )
                                    .await
                                });
                            }
                            ChannelMessage::SkillResponse { request_id, .. } => {
                                tracing::debug!(request_id = %request_id, "Unexpected skill_response from Hub");
                            }
                        }
                    }
                }
            }
        }
    };

    channel.close().await;
    Some(reason)
}

/// 尽力而为的心跳，不阻塞保活循环
fn send_heartbeat(shared: &LinkShared) {
    let hub = Arc::clone(&shared.hub);
    let device_id = shared.state.lock().device_id.clone();
    tokio::spawn(async move {
        if let Err(e) = hub.heartbeat(device_id.as_deref()).await {
            tracing::debug!(error = %e, "Skill heartbeat failed");
        }
    });
}

#[async_trait]
impl crate::core::shutdown::ShutdownCleanup for ConnectionManager {
    async fn cleanup(&self) -> anyhow::Result<()> {
        self.disconnect().await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "HubConnection"
    }
}
