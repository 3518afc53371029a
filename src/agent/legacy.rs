//! 旧式文本工具调用
//!
//! 不支持原生 tool calling 的模型会在正文里写出调用，例如：
//!
//! ```text
//! TOOL_CALL: echo {"text": "hi"}
//! Action: device_info({"field": "os"})
//! ```

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Value};

use crate::inference::ToolCallRequest;

pub const LEGACY_PREFIXES: [&str; 3] = ["TOOL_CALL:", "CALL_TOOL:", "Action:"];

static LEGACY_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn legacy_re() -> Option<&'static Regex> {
    LEGACY_RE
        .get_or_init(|| {
            Regex::new(r"(?m)^\s*(?:TOOL_CALL|CALL_TOOL|Action)\s*:\s*([A-Za-z_][A-Za-z0-9_.\-]*)\s*(.*?)\s*$").ok()
        })
        .as_ref()
}

/// 提取正文中的全部旧式调用；参数无法解析为 JSON 的行会被忽略
pub fn extract_legacy_calls(content: &str) -> Vec<ToolCallRequest> {
    let Some(re) = legacy_re() else {
        return Vec::new();
    };

    let mut calls = Vec::new();
    for caps in re.captures_iter(content) {
        let name = &caps[1];
        let raw = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        match parse_arguments(raw) {
            Some(arguments) => calls.push(ToolCallRequest::new(name, arguments)),
            None => {
                tracing::debug!(tool = name, raw, "Ignoring legacy tool call with unparsable arguments");
            }
        }
    }
    calls
}

fn parse_arguments(raw: &str) -> Option<Value> {
    let raw = raw.trim();
    let inner = match raw.strip_prefix('(').and_then(|r| r.strip_suffix(')')) {
        Some(inner) => inner.trim(),
        None => raw,
    };
    if inner.is_empty() {
        return Some(json!({}));
    }
    match serde_json::from_str::<Value>(inner).ok()? {
        Value::Object(map) => Some(Value::Object(map)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_prefixes_and_both_forms() {
        let content = "Let me check.\n\
            TOOL_CALL: echo {\"text\": \"hi\"}\n\
            CALL_TOOL: device_info({\"field\": \"os\"})\n\
            Action: device_info()";
        let calls = extract_legacy_calls(content);
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].name, "echo");
        assert_eq!(calls[0].arguments, json!({"text": "hi"}));
        assert_eq!(calls[1].name, "device_info");
        assert_eq!(calls[1].arguments, json!({"field": "os"}));
        assert_eq!(calls[2].arguments, json!({}));
    }

    #[test]
    fn test_plain_text_has_no_calls() {
        assert!(extract_legacy_calls("The Action: plan is simple.").is_empty());
        assert!(extract_legacy_calls("Here is your answer: 42.").is_empty());
        assert!(extract_legacy_calls("We discussed TOOL_CALL: semantics mid-line").is_empty());
    }

    #[test]
    fn test_unparsable_arguments_are_skipped() {
        assert!(extract_legacy_calls("TOOL_CALL: echo {not json}").is_empty());
        assert!(extract_legacy_calls("Action: echo [1, 2]").is_empty());
    }
}
