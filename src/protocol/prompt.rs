//! 会话文本：系统说明、任务陈述、协议提醒与观察结果
//!
//! 观察结果使用固定的首行格式（`Operation `x.y` returned:` / `Operation `x.y` failed:`），
//! 压缩器据此抽取进度里程碑。

use std::sync::OnceLock;

use regex::Regex;

use crate::core::EvalError;
use crate::environment::TaskInfo;
use crate::protocol::schema::action_schema_json;

/// 两种动作格式的简明复述；压缩摘要与纠正提醒都会附带
pub const PROTOCOL_REMINDER: &str = "\
Respond with exactly ONE action per turn, wrapped in <json>...</json> tags.
To call an operation:
<json>{\"action\": \"call_operation\", \"operation_name\": \"<domain>.<operation>\", \"parameters\": {...}}</json>
To submit the final answer:
<json>{\"action\": \"answer\", \"content\": \"<your answer>\"}</json>
Always wrap in <json>...</json> tags.";

/// 系统说明（日志第 0 条）；`meta_operations` 为发现类操作的说明
pub fn system_instructions(meta_operations: &str) -> String {
    format!(
        "You are an agent completing a task inside a simulated environment.\n\
         You cannot see the available operations up front. Discover them with the api_docs domain:\n\
         {meta_operations}\n\n\
         Action format (JSON Schema):\n{schema}\n\n\
         {PROTOCOL_REMINDER}",
        schema = action_schema_json(),
    )
}

/// 任务陈述（日志第 1 条）
pub fn task_statement(task: &TaskInfo) -> String {
    let mut text = format!(
        "<task>\n{}\n</task>\n\n\
         Suggested approach:\n\
         1. Call api_docs.list_domains to see which domains exist.\n\
         2. Call api_docs.list_operations with a domain to see its operations.\n\
         3. Call api_docs.describe_operation before using an operation you have not used yet.\n\
         4. Submit the answer with the answer action when the task is done.",
        task.instruction.trim()
    );
    if let Some(difficulty) = &task.difficulty {
        text.push_str(&format!("\n\nTask difficulty: {difficulty}"));
    }
    text
}

/// 协议违规后的纠正提醒
pub fn reminder_message(err: &EvalError) -> String {
    format!("Your last reply could not be executed ({err}).\n\n{PROTOCOL_REMINDER}")
}

pub fn observation_ok(operation: &str, output: &str) -> String {
    format!("Operation `{operation}` returned:\n{output}")
}

pub fn observation_err(operation: &str, err: &EvalError) -> String {
    format!("Operation `{operation}` failed: {err}")
}

/// 解析观察结果首行：返回 (操作名, 是否成功)
pub fn parse_observation_header(content: &str) -> Option<(&str, bool)> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"^Operation `([^`]+)` (returned|failed)").expect("static regex")
    });
    let caps = re.captures(content)?;
    let name = caps.get(1)?.as_str();
    let ok = caps.get(2)?.as_str() == "returned";
    Some((name, ok))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observation_roundtrip_header() {
        let ok = observation_ok("spotify.login", "{\"access_token\": \"t\"}");
        assert_eq!(parse_observation_header(&ok), Some(("spotify.login", true)));
        let err = observation_err("venmo.pay", &EvalError::OperationExecution("denied".into()));
        assert_eq!(parse_observation_header(&err), Some(("venmo.pay", false)));
        assert_eq!(parse_observation_header("hello"), None);
    }

    #[test]
    fn test_reminder_restates_both_shapes() {
        let msg = reminder_message(&EvalError::ProtocolViolation("no action block".into()));
        assert!(msg.contains("no action block"));
        assert!(msg.contains("\"call_operation\""));
        assert!(msg.contains("\"answer\""));
    }

    #[test]
    fn test_task_statement_wraps_instruction() {
        let task = TaskInfo {
            task_id: "t1".into(),
            instruction: "  Like every song in my top playlist. ".into(),
            difficulty: Some("2".into()),
        };
        let text = task_statement(&task);
        assert!(text.starts_with("<task>\nLike every song in my top playlist.\n</task>"));
        assert!(text.contains("Task difficulty: 2"));
    }
}
