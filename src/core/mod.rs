//! 内核：错误类型、组件装配与优雅关闭

pub mod builder;
pub mod error;
pub mod shutdown;

pub use builder::{CoreBuilder, CoreRuntime};
pub use error::CoreError;
pub use shutdown::{ShutdownCleanup, ShutdownCoordinator, ShutdownManager, ShutdownReason};
