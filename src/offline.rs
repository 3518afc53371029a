//! 离线判定（OfflineVerdict）
//!
//! 纯状态机，不做任何 I/O：只根据推理响应的来源（是否兜底模型）推断在线/离线。
//! 非对称滞回：连续 2 次兜底响应才判定离线，一次成功的远端响应立即恢复在线。
//! 传输层错误本身不会进入这里。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// 判定离线所需的连续兜底响应次数
pub const OFFLINE_THRESHOLD: u32 = 2;

/// 判定快照（只读视图）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OfflineVerdict {
    pub consecutive_fallbacks: u32,
    pub is_offline: bool,
    pub last_variant: Option<String>,
    pub last_remote_success: Option<DateTime<Utc>>,
    pub pending_sync: usize,
}

pub type ListenerId = u64;

type Listener = Arc<dyn Fn(bool) + Send + Sync>;

/// 供多组件共享的判定器
pub type SharedTracker = Arc<Mutex<OfflineTracker>>;

pub struct OfflineTracker {
    verdict: OfflineVerdict,
    threshold: u32,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener: ListenerId,
}

impl OfflineTracker {
    pub fn new() -> Self {
        Self::with_threshold(OFFLINE_THRESHOLD)
    }

    pub fn with_threshold(threshold: u32) -> Self {
        Self {
            verdict: OfflineVerdict::default(),
            threshold: threshold.max(1),
            listeners: Vec::new(),
            next_listener: 1,
        }
    }

    pub fn shared() -> SharedTracker {
        Arc::new(Mutex::new(Self::new()))
    }

    /// 记录一次推理响应；返回 is_offline 是否发生了变化
    pub fn on_response(&mut self, variant: &str, is_fallback: bool) -> bool {
        match self.apply_response(variant, is_fallback) {
            Some(change) => {
                change.notify();
                true
            }
            None => false,
        }
    }

    /// 只更新状态；判定翻转时返回待通知的变化，由调用方在释放锁之后 notify
    pub fn apply_response(&mut self, variant: &str, is_fallback: bool) -> Option<VerdictChange> {
        self.verdict.last_variant = Some(variant.to_string());

        if is_fallback {
            self.verdict.consecutive_fallbacks = self.verdict.consecutive_fallbacks.saturating_add(1);
            if self.verdict.consecutive_fallbacks >= self.threshold {
                return self.set_offline(true);
            }
            None
        } else {
            self.verdict.consecutive_fallbacks = 0;
            self.verdict.last_remote_success = Some(Utc::now());
            self.set_offline(false)
        }
    }

    /// 外部信号（如网络恢复）到来时清零计数，给远端路径一次不受干扰的机会；不改变 is_offline
    pub fn force_online_check(&mut self) {
        self.verdict.consecutive_fallbacks = 0;
    }

    pub fn add_listener<F>(&mut self, listener: F) -> ListenerId
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = self.next_listener;
        self.next_listener += 1;
        self.listeners.push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    pub fn verdict(&self) -> &OfflineVerdict {
        &self.verdict
    }

    pub fn is_offline(&self) -> bool {
        self.verdict.is_offline
    }

    pub fn set_pending_sync(&mut self, pending: usize) {
        self.verdict.pending_sync = pending;
    }

    /// 状态栏文案，无副作用
    pub fn status_text(&self, model_name: Option<&str>) -> String {
        let mut text = if self.verdict.is_offline {
            let variant = self
                .verdict
                .last_variant
                .as_deref()
                .or(model_name)
                .unwrap_or("fallback");
            format!("Offline · local {}", variant)
        } else {
            match model_name {
                Some(model) => format!("Online · {}", model),
                None => "Online".to_string(),
            }
        };
        if self.verdict.pending_sync > 0 {
            text.push_str(&format!(" · {} pending", self.verdict.pending_sync));
        }
        text
    }

    fn set_offline(&mut self, offline: bool) -> Option<VerdictChange> {
        if self.verdict.is_offline == offline {
            return None;
        }
        self.verdict.is_offline = offline;
        tracing::info!(offline, "Offline verdict changed");
        Some(VerdictChange {
            offline,
            listeners: self.listeners.clone(),
        })
    }
}

/// 一次判定翻转及当时注册的监听者快照
#[must_use = "listeners only run when notify() is called"]
pub struct VerdictChange {
    pub offline: bool,
    listeners: Vec<(ListenerId, Listener)>,
}

impl VerdictChange {
    /// 逐个调用监听者；panic 只记录，不影响其余监听者
    pub fn notify(self) {
        for (id, listener) in &self.listeners {
            let outcome =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener(self.offline)));
            if outcome.is_err() {
                tracing::warn!(listener = id, "Offline verdict listener panicked");
            }
        }
    }
}

/// 在共享判定器上记录响应：持锁更新状态，释放锁后再通知监听者，
/// 监听者因此可以再次读取判定器
pub fn report_response(tracker: &SharedTracker, variant: &str, is_fallback: bool) -> bool {
    let change = tracker.lock().apply_response(variant, is_fallback);
    match change {
        Some(change) => {
            change.notify();
            true
        }
        None => false,
    }
}

impl Default for OfflineTracker {
    fn default() -> Self {
        Self::new()
    }
}
