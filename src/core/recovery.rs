//! 错误恢复引擎
//!
//! 根据 EvalError 类型返回 RecoveryAction；协议类错误经由 ReminderBudget 这一有界重试状态机，
//! 额度内注入提醒，额度用尽后会话以 ProtocolViolation 失败。

use crate::core::{EvalError, RecoveryAction};
use crate::protocol::prompt;

/// 提醒额度状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderState {
    /// 还可以提醒；`used` 为已发出的提醒数
    Armed { used: usize, max: usize },
    /// 额度已用尽，下一次违规即失败
    Exhausted { used: usize },
}

/// 单个会话的提醒额度
#[derive(Debug, Clone)]
pub struct ReminderBudget {
    used: usize,
    max: usize,
}

impl ReminderBudget {
    pub fn new(max: usize) -> Self {
        Self { used: 0, max }
    }

    pub fn state(&self) -> ReminderState {
        if self.used < self.max {
            ReminderState::Armed {
                used: self.used,
                max: self.max,
            }
        } else {
            ReminderState::Exhausted { used: self.used }
        }
    }

    /// 尝试消耗一次提醒；返回 false 表示已用尽
    fn try_consume(&mut self) -> bool {
        match self.state() {
            ReminderState::Armed { .. } => {
                self.used += 1;
                true
            }
            ReminderState::Exhausted { .. } => false,
        }
    }

    pub fn used(&self) -> usize {
        self.used
    }
}

/// 将错误映射为可执行动作（提醒 / 观察 / 失败）
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &EvalError, budget: &mut ReminderBudget) -> RecoveryAction {
        match err {
            EvalError::ProtocolViolation(_) | EvalError::UnknownAction(_) => {
                if budget.try_consume() {
                    RecoveryAction::RemindProtocol(prompt::reminder_message(err))
                } else {
                    tracing::warn!(
                        reminders = budget.used(),
                        error = %err,
                        "reminder budget exhausted"
                    );
                    RecoveryAction::FailSession(EvalError::ProtocolViolation(format!(
                        "no well-formed action after {} reminders: {}",
                        budget.used(),
                        err
                    )))
                }
            }
            EvalError::OperationExecution(_) | EvalError::NotFound(_) => {
                RecoveryAction::Observe(err.to_string())
            }
            other => RecoveryAction::FailSession(other.clone()),
        }
    }
}
