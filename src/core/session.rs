//! 会话与会话仓库
//!
//! 每个评测会话有唯一的 context id、消息日志、单调递增的步数与状态。
//! 会话只存放在创建它的 Orchestrator 的 SessionArena 中，终止后由 Orchestrator 移除。

use std::collections::HashMap;

use crate::memory::Message;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionStatus {
    Active,
    /// agent 提交了答案
    Answered,
    /// 步数用尽仍未提交答案
    BudgetExhausted,
    /// 协议违规用尽提醒、超时或远程错误
    Failed(String),
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Active)
    }
}

#[derive(Debug)]
pub struct Session {
    context_id: String,
    task_id: String,
    log: Vec<Message>,
    step: usize,
    status: SessionStatus,
}

impl Session {
    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut Vec<Message> {
        &mut self.log
    }

    pub fn push(&mut self, msg: Message) {
        self.log.push(msg);
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn advance_step(&mut self) -> usize {
        self.step += 1;
        self.step
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    /// 进入终止状态；已终止的会话不会被覆盖
    pub fn finish(&mut self, status: SessionStatus) {
        if !self.status.is_terminal() {
            self.status = status;
        }
    }
}

/// 会话仓库：context id → Session
#[derive(Debug, Default)]
pub struct SessionArena {
    sessions: HashMap<String, Session>,
}

impl SessionArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新建会话，日志以系统说明与任务陈述两条不可变前缀开头；返回 context id
    pub fn create(&mut self, task_id: &str, instructions: String, task_statement: String) -> String {
        let mut context_id = uuid::Uuid::new_v4().to_string();
        while self.sessions.contains_key(&context_id) {
            context_id = uuid::Uuid::new_v4().to_string();
        }
        let session = Session {
            context_id: context_id.clone(),
            task_id: task_id.to_string(),
            log: vec![Message::system(instructions), Message::user(task_statement)],
            step: 0,
            status: SessionStatus::Active,
        };
        self.sessions.insert(context_id.clone(), session);
        context_id
    }

    pub fn get(&self, context_id: &str) -> Option<&Session> {
        self.sessions.get(context_id)
    }

    pub fn get_mut(&mut self, context_id: &str) -> Option<&mut Session> {
        self.sessions.get_mut(context_id)
    }

    pub fn remove(&mut self, context_id: &str) -> Option<Session> {
        self.sessions.remove(context_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
