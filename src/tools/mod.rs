pub mod device_info;
pub mod echo;
pub mod executor;
pub mod registry;

pub use device_info::DeviceInfoTool;
pub use echo::EchoTool;
pub use executor::ToolExecutor;
pub use registry::{Tool, ToolRegistry};

/// 默认的本地能力集合
pub fn default_registry(device_name: &str) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(EchoTool);
    registry.register(DeviceInfoTool::new(device_name));
    registry
}
