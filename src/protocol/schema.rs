//! 动作格式 JSON Schema 生成（schemars）
//!
//! 将「合法动作」的 JSON 结构注入系统说明，减少 agent 输出格式错误。

use schemars::{schema_for, JsonSchema};
use std::collections::HashMap;

/// 动作格式：与 parse_action 接受的两种形状一致（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ActionFormat {
    /// 调用一个操作，如 api_docs.list_domains、spotify.show_playlist_library
    CallOperation {
        /// 完整操作名：`<domain>.<operation>`
        operation_name: String,
        /// 操作参数（JSON 对象）
        parameters: HashMap<String, serde_json::Value>,
    },
    /// 提交最终答案并结束会话
    Answer {
        /// 答案内容；无需返回值的任务可为空串
        content: String,
    },
}

/// 返回动作格式的 JSON Schema 字符串，可拼入系统说明
pub fn action_schema_json() -> String {
    let schema = schema_for!(ActionFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_mentions_both_actions() {
        let schema = action_schema_json();
        assert!(schema.contains("call_operation"));
        assert!(schema.contains("answer"));
        assert!(schema.contains("operation_name"));
    }
}
