//! 本机信息工具：本地模式下回答“这台设备”相关的问题

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::Tool;

pub struct DeviceInfoTool {
    device_name: String,
}

impl DeviceInfoTool {
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
        }
    }
}

#[async_trait]
impl Tool for DeviceInfoTool {
    fn name(&self) -> &str {
        "device_info"
    }

    fn description(&self) -> &str {
        "Report this device's name, operating system, architecture and local time."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "field": {
                    "type": "string",
                    "enum": ["name", "os", "arch", "time"],
                    "description": "Return only this field"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let info = json!({
            "name": self.device_name,
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
            "time": chrono::Local::now().to_rfc3339(),
        });
        match args.get("field").and_then(Value::as_str) {
            Some(field) => info
                .get(field)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| format!("unknown field: {field}")),
            None => Ok(info.to_string()),
        }
    }
}
