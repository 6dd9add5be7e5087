//! Action 解析：从 agent 回复中提取唯一的动作块并解析为 Action
//!
//! 动作块优先使用 `<json>...</json>` 标签，没有标签时回退到 ```json 代码块；
//! 每条回复必须恰好包含一个动作块，零个或多个都算协议违规。

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::EvalError;

/// agent 每轮只能发出的两种动作之一
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Action {
    #[serde(rename = "call_operation", alias = "call_api")]
    CallOperation {
        #[serde(alias = "api_name")]
        operation_name: String,
        #[serde(default = "empty_parameters")]
        parameters: Value,
    },
    #[serde(rename = "answer")]
    SubmitAnswer {
        #[serde(default)]
        content: String,
    },
}

fn empty_parameters() -> Value {
    Value::Object(serde_json::Map::new())
}

const KNOWN_ACTIONS: [&str; 3] = ["call_operation", "call_api", "answer"];

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<json>(.*?)</json>").expect("static regex"))
}

fn fence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```json\s*(.*?)```").expect("static regex"))
}

/// 提取回复中的全部动作块（标签优先；存在标签时忽略代码块）
pub fn extract_action_blocks(reply: &str) -> Vec<&str> {
    let tagged: Vec<&str> = tag_regex()
        .captures_iter(reply)
        .filter_map(|c| c.get(1).map(|m| m.as_str().trim()))
        .collect();
    if !tagged.is_empty() {
        return tagged;
    }
    fence_regex()
        .captures_iter(reply)
        .filter_map(|c| c.get(1).map(|m| m.as_str().trim()))
        .collect()
}

/// 解析 agent 回复为 Action；失败时返回 ProtocolViolation 或 UnknownAction
pub fn parse_action(reply: &str) -> Result<Action, EvalError> {
    let blocks = extract_action_blocks(reply);
    let block = match blocks.as_slice() {
        [] => {
            return Err(EvalError::ProtocolViolation(
                "no action block found; wrap exactly one JSON action in <json>...</json>".into(),
            ))
        }
        [single] => *single,
        many => {
            return Err(EvalError::ProtocolViolation(format!(
                "found {} action blocks; send exactly one action per turn",
                many.len()
            )))
        }
    };

    let value: Value = serde_json::from_str(block)
        .map_err(|e| EvalError::ProtocolViolation(format!("action block is not valid JSON: {e}")))?;

    let tag = match value.get("action") {
        Some(Value::String(tag)) => tag.clone(),
        Some(_) => {
            return Err(EvalError::ProtocolViolation(
                "\"action\" field must be a string".into(),
            ))
        }
        None => {
            return Err(EvalError::ProtocolViolation(
                "action block is missing the \"action\" field".into(),
            ))
        }
    };
    if !KNOWN_ACTIONS.contains(&tag.as_str()) {
        return Err(EvalError::UnknownAction(tag));
    }

    let action: Action = serde_json::from_value(value)
        .map_err(|e| EvalError::ProtocolViolation(format!("malformed {tag} action: {e}")))?;

    if let Action::CallOperation {
        operation_name,
        parameters,
    } = &action
    {
        if operation_name.trim().is_empty() {
            return Err(EvalError::ProtocolViolation(
                "operation_name must not be empty".into(),
            ));
        }
        if !parameters.is_object() {
            return Err(EvalError::ProtocolViolation(
                "parameters must be a JSON object".into(),
            ));
        }
    }
    Ok(action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_call_operation_in_tags() {
        let reply = r#"Let me look at the playlists.
<json>{"action": "call_operation", "operation_name": "spotify.show_playlist_library", "parameters": {"page_index": 0}}</json>"#;
        let action = parse_action(reply).unwrap();
        assert_eq!(
            action,
            Action::CallOperation {
                operation_name: "spotify.show_playlist_library".into(),
                parameters: json!({"page_index": 0}),
            }
        );
    }

    #[test]
    fn test_parse_answer_in_fence() {
        let reply = "Done.\n```json\n{\"action\": \"answer\", \"content\": \"42\"}\n```";
        assert_eq!(
            parse_action(reply).unwrap(),
            Action::SubmitAnswer { content: "42".into() }
        );
    }

    #[test]
    fn test_call_api_alias_and_default_parameters() {
        let reply = r#"<json>{"action": "call_api", "api_name": "api_docs.list_domains"}</json>"#;
        match parse_action(reply).unwrap() {
            Action::CallOperation {
                operation_name,
                parameters,
            } => {
                assert_eq!(operation_name, "api_docs.list_domains");
                assert_eq!(parameters, json!({}));
            }
            _ => panic!("Expected CallOperation"),
        }
    }

    #[test]
    fn test_tags_take_precedence_over_fence() {
        let reply = "```json\n{\"action\": \"answer\", \"content\": \"a\"}\n```\n<json>{\"action\": \"answer\", \"content\": \"b\"}</json>";
        assert_eq!(
            parse_action(reply).unwrap(),
            Action::SubmitAnswer { content: "b".into() }
        );
    }

    #[test]
    fn test_missing_block_is_violation() {
        let err = parse_action("I think the answer is 42").unwrap_err();
        assert!(matches!(err, EvalError::ProtocolViolation(_)));
    }

    #[test]
    fn test_multiple_blocks_is_violation() {
        let reply = r#"<json>{"action": "answer", "content": "a"}</json><json>{"action": "answer", "content": "b"}</json>"#;
        match parse_action(reply).unwrap_err() {
            EvalError::ProtocolViolation(msg) => assert!(msg.contains("2 action blocks")),
            other => panic!("Expected ProtocolViolation, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_action_is_distinct() {
        let reply = r#"<json>{"action": "jump", "height": 3}</json>"#;
        assert_eq!(
            parse_action(reply).unwrap_err(),
            EvalError::UnknownAction("jump".into())
        );
    }

    #[test]
    fn test_invalid_json_and_bad_parameters() {
        assert!(parse_action("<json>{not json}</json>").unwrap_err().is_protocol());
        let reply = r#"<json>{"action": "call_operation", "operation_name": "a.b", "parameters": [1]}</json>"#;
        assert!(matches!(
            parse_action(reply).unwrap_err(),
            EvalError::ProtocolViolation(_)
        ));
        let reply = r#"<json>{"action": "call_operation", "parameters": {}}</json>"#;
        assert!(matches!(
            parse_action(reply).unwrap_err(),
            EvalError::ProtocolViolation(_)
        ));
    }
}
