//! 通过 JSON-RPC `message/send` 访问 agent 进程
//!
//! 当前轮的消息取日志最后一条，完整（压缩后）日志放在 `metadata.history`；
//! 回复可以是 Message（`parts`）或 Task（`artifacts[].parts` / `status.message.parts`），取第一段文本。

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::agent::PolicyAgent;
use crate::memory::Message;

pub struct HttpPolicyAgent {
    client: reqwest::Client,
    url: String,
}

impl HttpPolicyAgent {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
        }
    }

    fn request_body(context_id: &str, messages: &[Message]) -> Value {
        let current = messages.last().map(|m| m.content.as_str()).unwrap_or_default();
        json!({
            "jsonrpc": "2.0",
            "id": uuid::Uuid::new_v4().to_string(),
            "method": "message/send",
            "params": {
                "message": {
                    "role": "user",
                    "parts": [{"kind": "text", "text": current}],
                    "messageId": uuid::Uuid::new_v4().to_string(),
                    "contextId": context_id,
                },
                "metadata": { "history": messages },
            }
        })
    }
}

fn first_text(parts: Option<&Value>) -> Option<String> {
    parts?
        .as_array()?
        .iter()
        .find_map(|p| p.get("text").and_then(Value::as_str).map(str::to_string))
}

/// 从 JSON-RPC 响应中取出回复文本
pub fn extract_reply(body: &Value) -> Result<String, String> {
    if let Some(err) = body.get("error") {
        let msg = err
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return Err(format!("agent error: {msg}"));
    }
    let result = body.get("result").ok_or("response has no result")?;

    if let Some(text) = first_text(result.get("parts")) {
        return Ok(text);
    }
    if let Some(artifacts) = result.get("artifacts").and_then(Value::as_array) {
        if let Some(text) = artifacts.iter().find_map(|a| first_text(a.get("parts"))) {
            return Ok(text);
        }
    }
    let status_parts = result
        .get("status")
        .and_then(|s| s.get("message"))
        .and_then(|m| m.get("parts"));
    first_text(status_parts).ok_or_else(|| "response contains no text part".to_string())
}

#[async_trait]
impl PolicyAgent for HttpPolicyAgent {
    async fn respond(&self, context_id: &str, messages: &[Message]) -> Result<String, String> {
        let resp = self
            .client
            .post(&self.url)
            .json(&Self::request_body(context_id, messages))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = resp.status();
        if !status.is_success() {
            return Err(format!("HTTP {status}"));
        }
        let body: Value = resp.json().await.map_err(|e| e.to_string())?;
        extract_reply(&body)
    }

    fn name(&self) -> &str {
        &self.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_carries_context_and_history() {
        let messages = vec![Message::system("sys"), Message::user("task")];
        let body = HttpPolicyAgent::request_body("ctx-9", &messages);
        assert_eq!(body["method"], "message/send");
        assert_eq!(body["params"]["message"]["contextId"], "ctx-9");
        assert_eq!(body["params"]["message"]["parts"][0]["text"], "task");
        assert_eq!(body["params"]["metadata"]["history"][0]["role"], "system");
    }

    #[test]
    fn test_extract_from_message_and_task() {
        let msg = json!({"result": {"kind": "message", "parts": [{"kind": "text", "text": "hi"}]}});
        assert_eq!(extract_reply(&msg).unwrap(), "hi");

        let task = json!({"result": {"kind": "task", "artifacts": [{"parts": [{"kind": "text", "text": "from artifact"}]}]}});
        assert_eq!(extract_reply(&task).unwrap(), "from artifact");

        let status = json!({"result": {"status": {"message": {"parts": [{"text": "from status"}]}}}});
        assert_eq!(extract_reply(&status).unwrap(), "from status");
    }

    #[test]
    fn test_extract_errors() {
        let err = json!({"error": {"code": -32000, "message": "overloaded"}});
        assert_eq!(extract_reply(&err).unwrap_err(), "agent error: overloaded");
        assert!(extract_reply(&json!({"result": {}})).is_err());
    }
}
