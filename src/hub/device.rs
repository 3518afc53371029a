//! 设备 ID 持久化
//!
//! Hub 分配的设备 ID 写在一个小文本文件里，重启后重新注册时带上，注册因此是幂等的。

use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct DeviceIdFile {
    path: PathBuf,
}

impl DeviceIdFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取已保存的设备 ID；文件不存在或为空返回 None
    pub fn load(&self) -> Option<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => {
                let id = raw.trim();
                (!id.is_empty()).then(|| id.to_string())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read device id");
                None
            }
        }
    }

    pub fn save(&self, device_id: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, format!("{device_id}\n"))
    }
}
