//! Bee Link - 桌面助手的连接与连续性内核
//!
//! 模块划分：
//! - **agent**: 委托 / 本地双策略编排、工具循环、重复调用检测
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、组件装配、优雅关闭
//! - **events**: 进程内事件总线
//! - **hub**: Hub REST 客户端、保活通道、连接生命周期
//! - **inference**: 本地推理后端（OpenAI 兼容 / 脚本化）
//! - **offline**: 离线判定状态机
//! - **store**: SQLite 会话存储与同步队列
//! - **sync**: 队列推送与远端元数据合并
//! - **tools**: 本地能力（工具注册表与执行器）

pub mod agent;
pub mod config;
pub mod core;
pub mod events;
pub mod hub;
pub mod inference;
pub mod observability;
pub mod offline;
pub mod store;
pub mod sync;
pub mod tools;

pub use crate::core::{CoreBuilder, CoreError, CoreRuntime};
pub use crate::events::{CoreEvent, EventBus};
