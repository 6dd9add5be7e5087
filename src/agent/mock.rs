//! 脚本化 agent（用于测试，无需真实模型）
//!
//! 按顺序返回预设回复，用完后重复最后一条；记录每轮收到的日志长度。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::agent::PolicyAgent;
use crate::memory::Message;

#[derive(Debug, Default)]
pub struct ScriptedAgent {
    replies: Mutex<VecDeque<String>>,
    last: Mutex<String>,
    seen_lengths: Mutex<Vec<usize>>,
    seen_contexts: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl ScriptedAgent {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    /// 每轮回复前等待（用于超时测试）
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn seen_lengths(&self) -> Vec<usize> {
        self.seen_lengths.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn seen_contexts(&self) -> Vec<String> {
        self.seen_contexts.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn turns(&self) -> usize {
        self.seen_lengths().len()
    }
}

#[async_trait]
impl PolicyAgent for ScriptedAgent {
    async fn respond(&self, context_id: &str, messages: &[Message]) -> Result<String, String> {
        if let Ok(mut seen) = self.seen_lengths.lock() {
            seen.push(messages.len());
        }
        if let Ok(mut seen) = self.seen_contexts.lock() {
            seen.push(context_id.to_string());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut replies = self.replies.lock().map_err(|e| e.to_string())?;
        let mut last = self.last.lock().map_err(|e| e.to_string())?;
        if let Some(next) = replies.pop_front() {
            *last = next;
        }
        Ok(last.clone())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
