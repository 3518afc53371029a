//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BEE__*` 覆盖（双下划线表示嵌套，如 `BEE__HUB__TOKEN=xxx`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub hub: HubSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub inference: InferenceSection,
}

/// [hub] 段：Hub 地址、令牌、保活与重连参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HubSection {
    pub url: String,
    /// 认证令牌；为空时 connect() 直接失败，不重试
    pub token: Option<String>,
    pub device_name: String,
    /// 是否向 Hub 注册本机设备
    pub register_device: bool,
    /// 健康检查超时（秒）
    pub health_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub keepalive_interval_secs: u64,
    /// 超过此时长无任何入站消息视为保活丢失
    pub keepalive_timeout_secs: u64,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub skill_registration_attempts: u32,
    pub skill_registration_delay_ms: u64,
    /// 5xx 重试次数（含首次）
    pub server_retry_attempts: u32,
    pub server_retry_base_ms: u64,
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8700".to_string(),
            token: None,
            device_name: default_device_name(),
            register_device: true,
            health_timeout_secs: 5,
            request_timeout_secs: 30,
            keepalive_interval_secs: 25,
            keepalive_timeout_secs: 60,
            reconnect_base_ms: 1_000,
            reconnect_max_ms: 60_000,
            skill_registration_attempts: 3,
            skill_registration_delay_ms: 1_000,
            server_retry_attempts: 3,
            server_retry_base_ms: 200,
        }
    }
}

fn default_device_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "bee-desktop".to_string())
}

/// [store] 段：SQLite 路径与设备 ID 文件
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub db_path: PathBuf,
    pub device_id_path: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/bee-link.db"),
            device_id_path: PathBuf::from("data/device_id"),
        }
    }
}

/// [agent] 段：本地工具循环参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// 本地策略最大迭代轮数
    pub max_iterations: usize,
    pub system_prompt: String,
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    /// 发送给模型的历史消息上限
    pub history_limit: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            system_prompt: "You are Bee, a helpful desktop assistant.".to_string(),
            tool_timeout_secs: 30,
            history_limit: 40,
        }
    }
}

/// [inference] 段：本地兜底推理后端（OpenAI 兼容端点）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InferenceSection {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for InferenceSection {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434/v1".to_string(),
            model: "qwen2.5:7b".to_string(),
            api_key: None,
            timeout_secs: 120,
        }
    }
}

/// 从 config 目录加载配置，环境变量 BEE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BEE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BEE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
