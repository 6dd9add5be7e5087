//! 对话压缩：有界上下文
//!
//! 日志长度超过阈值 M 时：保留前两条（系统说明 + 任务陈述）与最近 R 条原文，
//! 中间部分折叠为一条「进度摘要」，摘要末尾附带协议提醒。压缩后长度恰为 2 + 1 + R。
//! 构造时要求 R + 3 <= M，因此对未变化的已压缩日志再次压缩是空操作。

use crate::core::EvalError;
use crate::memory::Message;
use crate::protocol::{parse_action, prompt, Action, PROTOCOL_REMINDER};

/// 不可变前缀长度
pub const PREFIX_LEN: usize = 2;
pub const SUMMARY_HEADER: &str = "=== Progress Summary ===";
pub const REMINDER_HEADER: &str = "=== Protocol Reminder ===";
const DEFAULT_MAX_MILESTONES: usize = 10;

#[derive(Debug, Clone)]
pub struct ConversationCompressor {
    max_messages: usize,
    recent_window: usize,
    max_milestones: usize,
}

impl ConversationCompressor {
    pub fn new(max_messages: usize, recent_window: usize) -> Result<Self, EvalError> {
        if recent_window + PREFIX_LEN + 1 > max_messages {
            return Err(EvalError::Config(format!(
                "recent window {recent_window} too large for threshold {max_messages}"
            )));
        }
        Ok(Self {
            max_messages,
            recent_window,
            max_milestones: DEFAULT_MAX_MILESTONES,
        })
    }

    pub fn with_max_milestones(mut self, n: usize) -> Self {
        self.max_milestones = n.max(1);
        self
    }

    pub fn needs_compression(&self, log: &[Message]) -> bool {
        log.len() > self.max_messages
    }

    /// 返回压缩后的日志；未超过阈值时原样返回
    pub fn compress(&self, log: &[Message]) -> Vec<Message> {
        if !self.needs_compression(log) {
            return log.to_vec();
        }
        let middle_end = log.len() - self.recent_window;
        let middle = &log[PREFIX_LEN..middle_end];

        let mut out = Vec::with_capacity(PREFIX_LEN + 1 + self.recent_window);
        out.extend_from_slice(&log[..PREFIX_LEN]);
        out.push(Message::user(self.render_summary(middle)));
        out.extend_from_slice(&log[middle_end..]);
        out
    }

    /// 原地压缩；返回是否发生了压缩
    pub fn compress_in_place(&self, log: &mut Vec<Message>) -> bool {
        if !self.needs_compression(log) {
            return false;
        }
        let before = log.len();
        *log = self.compress(log);
        tracing::debug!(before, after = log.len(), "conversation compressed");
        true
    }

    fn render_summary(&self, middle: &[Message]) -> String {
        let mut milestones = extract_milestones(middle);
        if milestones.len() > self.max_milestones {
            milestones.drain(..milestones.len() - self.max_milestones);
        }

        let mut text = String::from(SUMMARY_HEADER);
        text.push('\n');
        if milestones.is_empty() {
            text.push_str("- No notable progress yet\n");
        } else {
            for m in &milestones {
                text.push_str("- ");
                text.push_str(m);
                text.push('\n');
            }
        }
        text.push('\n');
        text.push_str(REMINDER_HEADER);
        text.push('\n');
        text.push_str(PROTOCOL_REMINDER);
        text
    }
}

/// 从被折叠的中间条目里抽取里程碑（去重、保持首次出现顺序）
///
/// 里程碑来源：agent 发起的操作调用、失败的观察结果、凭据与登录关键字、
/// 以及中间部分已有摘要里的里程碑（重复压缩时沿用而不是嵌套）。
pub fn extract_milestones(entries: &[Message]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut add = |m: String| {
        if !out.contains(&m) {
            out.push(m);
        }
    };

    for entry in entries {
        if entry.content.starts_with(SUMMARY_HEADER) {
            for m in carried_milestones(&entry.content) {
                add(m);
            }
            continue;
        }
        if let Ok(Action::CallOperation { operation_name, .. }) = parse_action(&entry.content) {
            add(format!("Called {operation_name}"));
            continue;
        }
        match prompt::parse_observation_header(&entry.content) {
            Some((name, false)) => add(format!("{name} failed")),
            Some((_, true)) => {
                let lower = entry.content.to_lowercase();
                if lower.contains("password") || lower.contains("credential") {
                    add("Obtained user credentials".to_string());
                }
                if lower.contains("access_token")
                    || (lower.contains("login") && lower.contains("success"))
                {
                    add("Successfully authenticated".to_string());
                }
            }
            None => {}
        }
    }
    out
}

fn carried_milestones(summary: &str) -> Vec<String> {
    summary
        .lines()
        .skip(1)
        .take_while(|line| *line != REMINDER_HEADER)
        .filter_map(|line| line.strip_prefix("- "))
        .filter(|m| *m != "No notable progress yet")
        .map(str::to_string)
        .collect()
}
