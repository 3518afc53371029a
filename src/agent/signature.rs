//! 工具调用签名：检测模型在同一轮循环里重复发出完全相同的调用

use std::collections::HashSet;
use std::fmt::Write as _;

use serde_json::Value;

/// (工具名, 规范化参数) 指纹；对象键递归排序
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ToolCallSignature(String);

impl ToolCallSignature {
    pub fn of(tool: &str, arguments: &Value) -> Self {
        let mut fingerprint = String::with_capacity(tool.len() + 32);
        fingerprint.push_str(tool);
        fingerprint.push('|');
        write_canonical(&mut fingerprint, arguments);
        Self(fingerprint)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}:", Value::String(key.clone()));
                if let Some(v) = map.get(key) {
                    write_canonical(out, v);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        other => {
            let _ = write!(out, "{other}");
        }
    }
}

/// 单次循环内见过的签名；循环结束即丢弃
#[derive(Debug, Default)]
pub struct SignatureSet {
    seen: HashSet<ToolCallSignature>,
}

impl SignatureSet {
    /// 首次出现返回 true，重复返回 false
    pub fn insert(&mut self, signature: ToolCallSignature) -> bool {
        self.seen.insert(signature)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
