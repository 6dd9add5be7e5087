//! 执行轨迹：每个会话一份 JSONL
//!
//! 每条事件写入后立即 flush，会话中途崩溃也能保留已发生的调用。
//! 读取时跳过无法解析的行（记 warn），并兼容没有 `kind` 字段的旧格式调用记录。

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::core::EvalError;

/// 单次操作调用记录（追加写入，不修改）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Value,
    pub success: bool,
    #[serde(default)]
    pub duration_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LogEntry {
    /// 调用是否失败：success 为 false，或结果里带 `response.is_error == true`
    pub fn is_failure(&self) -> bool {
        if !self.success {
            return true;
        }
        self.result
            .as_ref()
            .and_then(|r| r.get("response"))
            .and_then(|r| r.get("is_error"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// 轨迹事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceEvent {
    ToolCall(LogEntry),
    ProtocolReminder {
        timestamp: DateTime<Utc>,
        step: usize,
        attempt: usize,
        reason: String,
    },
    AnswerSubmitted {
        timestamp: DateTime<Utc>,
        step: usize,
        content: String,
    },
}

/// 兼容带时区的 RFC 3339 与不带时区的 ISO 时间（按 UTC 处理）
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

/// 会话轨迹写入器；没有输出目录时只保留在内存
pub struct TraceWriter {
    path: Option<PathBuf>,
    writer: Option<BufWriter<File>>,
    events: Vec<TraceEvent>,
}

impl TraceWriter {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            writer: None,
            events: Vec::new(),
        }
    }

    /// 在 `dir` 下创建 `trace_<session_id>.jsonl`
    pub fn create(dir: &Path, session_id: &str) -> Result<Self, EvalError> {
        fs::create_dir_all(dir)
            .map_err(|e| EvalError::Trace(format!("create {}: {e}", dir.display())))?;
        let path = dir.join(format!("trace_{session_id}.jsonl"));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| EvalError::Trace(format!("open {}: {e}", path.display())))?;
        Ok(Self {
            path: Some(path),
            writer: Some(BufWriter::new(file)),
            events: Vec::new(),
        })
    }

    /// 有目录则写文件，写失败时退化为仅内存并记录 warn
    pub fn open_or_memory(dir: Option<&Path>, session_id: &str) -> Self {
        match dir {
            Some(dir) => Self::create(dir, session_id).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "trace file unavailable, keeping trace in memory");
                Self::in_memory()
            }),
            None => Self::in_memory(),
        }
    }

    pub fn append(&mut self, event: TraceEvent) {
        if let Some(writer) = self.writer.as_mut() {
            let written = serde_json::to_string(&event)
                .map_err(|e| e.to_string())
                .and_then(|line| {
                    writeln!(writer, "{line}")
                        .and_then(|_| writer.flush())
                        .map_err(|e| e.to_string())
                });
            if let Err(e) = written {
                tracing::warn!(error = %e, "failed to append trace event");
            }
        }
        self.events.push(event);
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn tool_calls(&self) -> Vec<LogEntry> {
        tool_calls(&self.events)
    }
}

pub fn tool_calls(events: &[TraceEvent]) -> Vec<LogEntry> {
    events
        .iter()
        .filter_map(|e| match e {
            TraceEvent::ToolCall(entry) => Some(entry.clone()),
            _ => None,
        })
        .collect()
}

/// 读取 JSONL 轨迹；空行忽略，无法解析的行跳过并记 warn
pub fn read_trace(path: &Path) -> Result<Vec<TraceEvent>, EvalError> {
    let file = File::open(path)
        .map_err(|e| EvalError::Trace(format!("open {}: {e}", path.display())))?;
    let mut events = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| EvalError::Trace(format!("read {}: {e}", path.display())))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_line(line) {
            Some(event) => events.push(event),
            None => tracing::warn!(line = idx + 1, path = %path.display(), "skipping malformed trace line"),
        }
    }
    Ok(events)
}

fn parse_line(line: &str) -> Option<TraceEvent> {
    if let Ok(event) = serde_json::from_str::<TraceEvent>(line) {
        return Some(event);
    }
    serde_json::from_str::<LogEntry>(line)
        .ok()
        .map(TraceEvent::ToolCall)
}
