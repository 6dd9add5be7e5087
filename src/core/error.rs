//! 评测错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 EvalError 决定注入协议提醒 / 作为观察结果返回 / 终止会话。

use thiserror::Error;

/// 评测过程中可能出现的错误（协议、操作执行、超时、进程生命周期、聚合等）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    /// agent 回复中没有（或有多个）合法的动作块
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// 动作块格式正确，但 action 标签未知
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Operation execution failed: {0}")]
    OperationExecution(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timeout after {secs}s: {what}")]
    Timeout { what: String, secs: u64 },

    /// agent 或环境的远程调用失败（非超时）
    #[error("Remote call failed: {0}")]
    Remote(String),

    #[error("Process lifecycle error: {0}")]
    ProcessLifecycle(String),

    #[error("Aggregation error: {0}")]
    Aggregation(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Trace error: {0}")]
    Trace(String),

    #[error("interrupted")]
    Cancelled,
}

impl EvalError {
    /// 是否属于可通过提醒恢复的协议类错误
    pub fn is_protocol(&self) -> bool {
        matches!(self, EvalError::ProtocolViolation(_) | EvalError::UnknownAction(_))
    }

    /// 是否使当前会话立即失败（只影响本会话，不影响批次）
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            EvalError::Timeout { .. } | EvalError::Remote(_) | EvalError::Cancelled
        )
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 注入协议提醒，让 agent 重发（消耗一次提醒额度）
    RemindProtocol(String),
    /// 把错误作为观察结果写回对话，会话继续
    Observe(String),
    /// 终止当前会话
    FailSession(EvalError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(EvalError::UnknownAction("jump".into()).is_protocol());
        assert!(!EvalError::NotFound("x".into()).is_protocol());
        assert!(EvalError::Timeout { what: "agent".into(), secs: 300 }.is_session_fatal());
        assert!(!EvalError::OperationExecution("boom".into()).is_session_fatal());
    }

    #[test]
    fn test_display() {
        let err = EvalError::Timeout { what: "policy agent reply".into(), secs: 5 };
        assert_eq!(err.to_string(), "Timeout after 5s: policy agent reply");
    }
}
