//! 操作执行器
//!
//! 元操作交给 DiscoveryGateway，其余渲染为调用代码交给环境执行；环境调用施加超时。
//! 每次调用产出一条 LogEntry（供轨迹写入）并输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::core::EvalError;
use crate::environment::{normalize_capture, Invocation, TaskEnvironment};
use crate::tools::{DiscoveryGateway, MetaOperation};
use crate::trace::LogEntry;

/// 一次调用的结果与对应的轨迹记录
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub entry: LogEntry,
    pub outcome: Result<String, EvalError>,
}

pub struct OperationExecutor<'a> {
    env: &'a dyn TaskEnvironment,
    gateway: &'a DiscoveryGateway,
    timeout: Duration,
    cancel: CancellationToken,
}

impl<'a> OperationExecutor<'a> {
    pub fn new(env: &'a dyn TaskEnvironment, gateway: &'a DiscoveryGateway, timeout: Duration) -> Self {
        Self {
            env,
            gateway,
            timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// 取消令牌触发时，进行中的环境调用以 Cancelled 结束
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn execute(&self, operation_name: &str, parameters: &Value) -> CallRecord {
        let timestamp = Utc::now();
        let start = Instant::now();

        let outcome = match MetaOperation::parse(operation_name, parameters) {
            Some(meta) => meta
                .and_then(|op| self.gateway.dispatch(&op))
                .map(|v| serde_json::to_string_pretty(&v).unwrap_or_else(|_| v.to_string())),
            None => self.execute_remote(operation_name, parameters).await,
        };

        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        let (ok, kind) = match &outcome {
            Ok(_) => (true, "ok"),
            Err(EvalError::Timeout { .. }) => (false, "timeout"),
            Err(EvalError::NotFound(_)) => (false, "not_found"),
            Err(EvalError::Cancelled) => (false, "cancelled"),
            Err(_) => (false, "error"),
        };
        let audit = serde_json::json!({
            "event": "operation_audit",
            "operation": operation_name,
            "ok": ok,
            "outcome": kind,
            "duration_ms": duration_ms.round() as u64,
            "args_preview": args_preview(parameters),
        });
        tracing::info!(audit = %audit.to_string(), "operation");

        let entry = LogEntry {
            timestamp,
            tool_name: operation_name.to_string(),
            arguments: parameters.clone(),
            success: ok,
            duration_ms,
            result: outcome.as_ref().ok().map(|out| result_value(out)),
            error: outcome.as_ref().err().map(|e| e.to_string()),
        };
        CallRecord { entry, outcome }
    }

    async fn execute_remote(&self, operation_name: &str, parameters: &Value) -> Result<String, EvalError> {
        let invocation = Invocation::call(operation_name, parameters)?;
        let call = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(EvalError::Cancelled),
            call = timeout(self.timeout, self.env.execute(&invocation)) => call,
        };
        match call {
            Ok(Ok(raw)) => Ok(normalize_capture(&raw)),
            Ok(Err(e)) => Err(EvalError::OperationExecution(e)),
            Err(_) => Err(EvalError::Timeout {
                what: format!("operation {operation_name}"),
                secs: self.timeout.as_secs(),
            }),
        }
    }
}

/// 输出是 JSON 时按结构保存，否则保存为字符串
fn result_value(output: &str) -> Value {
    serde_json::from_str(output).unwrap_or_else(|_| Value::String(output.to_string()))
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
