//! 进程内事件总线
//!
//! 每个订阅者拥有独立的无界通道与投递任务：慢订阅者不会阻塞 publish，
//! 订阅者 panic 只会被记录，不影响其他订阅者。

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::CoreEvent;

struct BusInner {
    subscribers: Mutex<HashMap<u64, mpsc::UnboundedSender<CoreEvent>>>,
    next_id: AtomicU64,
}

impl BusInner {
    fn unregister(&self, id: u64) {
        self.subscribers.lock().remove(&id);
    }
}

/// 事件总线（Clone 共享同一组订阅者）
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// 投递给当前所有订阅者；接收端已关闭的订阅者顺带清理
    pub fn publish(&self, event: CoreEvent) {
        let mut subscribers = self.inner.subscribers.lock();
        subscribers.retain(|id, tx| {
            if tx.send(event.clone()).is_err() {
                tracing::debug!(subscriber = id, "Subscriber channel closed, removing");
                false
            } else {
                true
            }
        });
    }

    /// 以回调方式订阅；回调在独立任务中执行，需在 tokio 运行时内调用
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&CoreEvent) + Send + Sync + 'static,
    {
        let (subscription, mut rx) = self.subscribe_channel();
        let token = subscription.cancel.clone();
        let id = subscription.id;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    event = rx.recv() => {
                        let Some(event) = event else { break };
                        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| handler(&event)));
                        if outcome.is_err() {
                            tracing::warn!(subscriber = id, "Event subscriber panicked, event skipped");
                        }
                    }
                }
            }
        });

        subscription
    }

    /// 以通道方式订阅，供异步消费者使用
    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<CoreEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.lock().insert(id, tx);
        let subscription = Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
            cancel: CancellationToken::new(),
        };
        (subscription, rx)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// 订阅句柄：cancel 或 drop 后不再接收新事件，正在执行的回调会正常结束
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
    cancel: CancellationToken,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
        if let Some(bus) = self.bus.upgrade() {
            bus.unregister(self.id);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
