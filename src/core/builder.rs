//! 内核装配：显式构造存储、总线、离线判定、连接管理、同步引擎与编排器
//!
//! 没有全局状态；各组件以 Arc 句柄在 CoreRuntime 中共享。
//! 任一组件都可以替换（测试用假 Hub、脚本化推理后端等）。

use std::sync::Arc;
use std::time::Duration;

use crate::agent::AgentOrchestrator;
use crate::config::AppConfig;
use crate::core::shutdown::{DatabaseCleanup, ShutdownCoordinator, ShutdownManager};
use crate::core::CoreError;
use crate::events::{CoreEvent, EventBus, Subscription};
use crate::hub::{
    ChannelConnector, ConnectionManager, ConnectionStatus, DeviceIdFile, HttpHubClient, HubApi,
    HubLink, RetryPolicy, WsConnector,
};
use crate::inference::{HttpInferenceBackend, InferenceBackend};
use crate::offline::{OfflineTracker, SharedTracker};
use crate::store::SessionStore;
use crate::sync::SyncEngine;
use crate::tools::{default_registry, ToolExecutor, ToolRegistry};

pub struct CoreBuilder {
    config: AppConfig,
    store: Option<SessionStore>,
    hub: Option<Arc<dyn HubApi>>,
    connector: Option<Arc<dyn ChannelConnector>>,
    backend: Option<Arc<dyn InferenceBackend>>,
    registry: Option<ToolRegistry>,
}

impl CoreBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            store: None,
            hub: None,
            connector: None,
            backend: None,
            registry: None,
        }
    }

    pub fn with_store(mut self, store: SessionStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_hub(mut self, hub: Arc<dyn HubApi>) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn with_connector(mut self, connector: Arc<dyn ChannelConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_tools(mut self, registry: ToolRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// 构造全部组件并接好事件联动；需在 tokio 运行时内调用
    pub fn build(self) -> Result<CoreRuntime, CoreError> {
        let config = self.config;

        let store = match self.store {
            Some(store) => store,
            None => SessionStore::open(&config.store.db_path)?,
        };
        let hub: Arc<dyn HubApi> = match self.hub {
            Some(hub) => hub,
            None => Arc::new(HttpHubClient::new(
                config.hub.url.clone(),
                config.hub.token.clone(),
                Duration::from_secs(config.hub.request_timeout_secs.max(1)),
                Duration::from_secs(config.hub.health_timeout_secs.max(1)),
                RetryPolicy::server_errors(
                    config.hub.server_retry_attempts,
                    Duration::from_millis(config.hub.server_retry_base_ms),
                ),
            )?),
        };
        let connector: Arc<dyn ChannelConnector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(WsConnector),
        };
        let backend: Arc<dyn InferenceBackend> = match self.backend {
            Some(backend) => backend,
            None => Arc::new(HttpInferenceBackend::from_config(&config.inference)?),
        };
        let registry = self
            .registry
            .unwrap_or_else(|| default_registry(&config.hub.device_name));

        let bus = EventBus::new();
        let tracker = OfflineTracker::shared();
        let executor = Arc::new(ToolExecutor::new(registry, config.agent.tool_timeout_secs));
        let connection = Arc::new(ConnectionManager::new(
            config.hub.clone(),
            hub,
            connector,
            Arc::clone(&executor),
            DeviceIdFile::new(config.store.device_id_path.clone()),
            bus.clone(),
        ));
        let link: Arc<dyn HubLink> = connection.clone();
        let sync = Arc::new(SyncEngine::new(store.clone(), Arc::clone(&link), bus.clone()));
        let orchestrator = Arc::new(AgentOrchestrator::new(
            store.clone(),
            Arc::clone(&sync),
            link,
            backend,
            Arc::clone(&executor),
            tracker.clone(),
            bus.clone(),
            config.agent.clone(),
        ));

        tracker.lock().set_pending_sync(sync.get_pending_count());
        let subscription = wire_reconnect_sync(&bus, &tracker, &sync);

        tracing::info!(
            db = %store.database().path().display(),
            hub = %config.hub.url,
            tools = executor.tool_names().len(),
            "Core assembled"
        );
        bus.publish(CoreEvent::CoreReady);

        Ok(CoreRuntime {
            config,
            store,
            bus,
            tracker,
            executor,
            connection,
            sync,
            orchestrator,
            _subscription: subscription,
        })
    }
}

/// 连上 Hub 时：清零兜底计数、推送队列并拉取远端元数据；队列长度同步进离线判定
fn wire_reconnect_sync(bus: &EventBus, tracker: &SharedTracker, sync: &Arc<SyncEngine>) -> Subscription {
    let tracker = tracker.clone();
    let sync = Arc::clone(sync);
    bus.subscribe(move |event| match event {
        CoreEvent::ConnectionChanged {
            status: ConnectionStatus::Connected,
            ..
        } => {
            tracker.lock().force_online_check();
            let sync = Arc::clone(&sync);
            tokio::spawn(async move {
                sync.sync_all().await;
                if let Err(e) = sync.pull_remote_metadata().await {
                    tracing::warn!(error = %e, "Remote metadata pull failed");
                }
            });
        }
        CoreEvent::SyncStatus { pending } => {
            tracker.lock().set_pending_sync(*pending);
        }
        _ => {}
    })
}

/// 装配完成的内核
pub struct CoreRuntime {
    pub config: AppConfig,
    pub store: SessionStore,
    pub bus: EventBus,
    pub tracker: SharedTracker,
    pub executor: Arc<ToolExecutor>,
    pub connection: Arc<ConnectionManager>,
    pub sync: Arc<SyncEngine>,
    pub orchestrator: Arc<AgentOrchestrator>,
    _subscription: Subscription,
}

impl CoreRuntime {
    /// 后台连接 Hub；缺少令牌时直接返回错误，内核仍以本地模式可用
    pub async fn start(&self) -> Result<(), CoreError> {
        self.connection.start().await?;
        Ok(())
    }

    pub fn status_text(&self) -> String {
        self.orchestrator.status_text()
    }

    /// 关闭时依次断开 Hub、写回数据库
    pub fn shutdown_coordinator(&self, manager: Arc<ShutdownManager>) -> ShutdownCoordinator {
        let mut coordinator = ShutdownCoordinator::new(manager);
        coordinator.register_shared(self.connection.clone());
        coordinator.register(DatabaseCleanup::new(self.store.database().clone()));
        coordinator
    }
}
