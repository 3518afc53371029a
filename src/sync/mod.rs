//! 本地队列与 Hub 之间的同步

mod engine;

pub use engine::SyncEngine;
