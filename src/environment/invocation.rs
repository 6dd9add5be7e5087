//! 调用代码生成与输出捕获约定
//!
//! 每次操作调用被渲染为两行：先把返回值赋给 `result`，再显式 `print(result)`。
//! 只返回值而不打印的调用与「无输出」无法区分，因此输出为空时统一替换为占位文本。

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::core::EvalError;

pub const NO_OUTPUT_PLACEHOLDER: &str = "Execution successful, no output.";

/// 任务完成入口
pub const COMPLETION_DOMAIN: &str = "supervisor";
pub const COMPLETION_OPERATION: &str = "complete_task";

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"))
}

/// 一次待执行的操作调用
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    domain: String,
    operation: String,
    arguments: Map<String, Value>,
}

impl Invocation {
    /// 由 `<domain>.<operation>` 与参数对象构造；名字不合法时返回 OperationExecution
    pub fn call(operation_name: &str, parameters: &Value) -> Result<Self, EvalError> {
        let (domain, operation) = split_operation_name(operation_name)?;
        let arguments = match parameters {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                return Err(EvalError::OperationExecution(format!(
                    "parameters for {operation_name} must be an object, got {other}"
                )))
            }
        };
        if let Some(bad) = arguments.keys().find(|k| !identifier_regex().is_match(k)) {
            return Err(EvalError::OperationExecution(format!(
                "invalid parameter name '{bad}' for {operation_name}"
            )));
        }
        Ok(Self {
            domain: domain.to_string(),
            operation: operation.to_string(),
            arguments,
        })
    }

    /// 提交答案：`apis.supervisor.complete_task(answer=...)`
    pub fn completion(answer: &str) -> Self {
        let mut arguments = Map::new();
        arguments.insert("answer".into(), Value::String(answer.to_string()));
        Self {
            domain: COMPLETION_DOMAIN.into(),
            operation: COMPLETION_OPERATION.into(),
            arguments,
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.domain, self.operation)
    }

    pub fn is_completion(&self) -> bool {
        self.domain == COMPLETION_DOMAIN && self.operation == COMPLETION_OPERATION
    }

    /// 渲染为环境执行的代码
    pub fn render(&self) -> String {
        let args: Vec<String> = self
            .arguments
            .iter()
            .map(|(k, v)| format!("{k}={}", literal(v)))
            .collect();
        format!(
            "result = apis.{}.{}({})\nprint(result)",
            self.domain,
            self.operation,
            args.join(", ")
        )
    }
}

/// 拆分 `<domain>.<operation>`，两段都必须是标识符
pub fn split_operation_name(name: &str) -> Result<(&str, &str), EvalError> {
    let (domain, operation) = name.trim().split_once('.').ok_or_else(|| {
        EvalError::OperationExecution(format!(
            "operation name '{name}' must have the form <domain>.<operation>"
        ))
    })?;
    let re = identifier_regex();
    if !re.is_match(domain) || !re.is_match(operation) {
        return Err(EvalError::OperationExecution(format!(
            "invalid operation name '{name}'"
        )));
    }
    Ok((domain, operation))
}

/// JSON 值 → 环境脚本字面量（true/false/null 对应 True/False/None）
fn literal(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        // JSON 字符串转义在目标脚本中同样合法
        Value::String(s) => Value::String(s.clone()).to_string(),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(literal).collect();
            format!("[{}]", inner.join(", "))
        }
        Value::Object(map) => {
            let inner: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", Value::String(k.clone()), literal(v)))
                .collect();
            format!("{{{}}}", inner.join(", "))
        }
    }
}

/// 规整捕获的输出：空输出（或环境的默认成功提示）替换为占位文本
pub fn normalize_capture(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "Execution successful." {
        NO_OUTPUT_PLACEHOLDER.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_call() {
        let inv = Invocation::call(
            "spotify.show_playlist_library",
            &json!({"access_token": "abc", "page_index": 0, "is_public": true, "q": null}),
        )
        .unwrap();
        assert_eq!(
            inv.render(),
            "result = apis.spotify.show_playlist_library(access_token=\"abc\", is_public=True, page_index=0, q=None)\nprint(result)"
        );
    }

    #[test]
    fn test_render_nested_and_escaped() {
        let inv = Invocation::call(
            "notes.create",
            &json!({"tags": ["a", false], "body": "line\n\"quoted\"", "meta": {"k": 1.5}}),
        )
        .unwrap();
        let code = inv.render();
        assert!(code.contains("tags=[\"a\", False]"));
        assert!(code.contains("body=\"line\\n\\\"quoted\\\"\""));
        assert!(code.contains("meta={\"k\": 1.5}"));
        assert!(code.ends_with(")\nprint(result)"));
    }

    #[test]
    fn test_completion_passes_answer_explicitly() {
        let inv = Invocation::completion("42");
        assert!(inv.is_completion());
        assert_eq!(
            inv.render(),
            "result = apis.supervisor.complete_task(answer=\"42\")\nprint(result)"
        );
    }

    #[test]
    fn test_rejects_bad_names() {
        assert!(Invocation::call("no_domain", &json!({})).is_err());
        assert!(Invocation::call("a.b; import os", &json!({})).is_err());
        assert!(Invocation::call("a.b", &json!({"x)": 1})).is_err());
        assert!(Invocation::call("a.b", &json!([1])).is_err());
        assert!(Invocation::call("a.b", &Value::Null).is_ok());
    }

    #[test]
    fn test_normalize_capture() {
        assert_eq!(normalize_capture("  \n"), NO_OUTPUT_PLACEHOLDER);
        assert_eq!(normalize_capture("Execution successful."), NO_OUTPUT_PLACEHOLDER);
        assert_eq!(normalize_capture(" [1, 2]\n"), "[1, 2]");
    }
}
