//! 内存环境（测试用）
//!
//! `StaticWorld` 按操作名回放预设结果，并记录执行过的代码与提交的答案；
//! `StaticProvider` 每次 open 都返回指向同一个 world 的句柄，便于测试事后检查。

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::environment::{
    EnvironmentProvider, Invocation, OperationCatalog, SplitSource, TaskEnvironment, TaskInfo,
};

#[derive(Debug, Default)]
pub struct StaticWorld {
    task: Option<TaskInfo>,
    catalog: OperationCatalog,
    responses: Mutex<HashMap<String, VecDeque<Result<String, String>>>>,
    grade: Value,
    execute_delay: Option<Duration>,
    executed: Mutex<Vec<String>>,
    answers: Mutex<Vec<String>>,
    closed: Mutex<usize>,
}

impl StaticWorld {
    pub fn new(task: TaskInfo, catalog: OperationCatalog) -> Self {
        Self {
            task: Some(task),
            catalog,
            ..Default::default()
        }
    }

    /// 为 `<domain>.<operation>` 追加一个结果；队列只剩最后一个时重复返回它
    pub fn with_response(self, operation: &str, result: Result<&str, &str>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .entry(operation.to_string())
            .or_default()
            .push_back(result.map(str::to_string).map_err(str::to_string));
        self
    }

    pub fn with_grade(mut self, grade: Value) -> Self {
        self.grade = grade;
        self
    }

    pub fn with_execute_delay(mut self, delay: Duration) -> Self {
        self.execute_delay = Some(delay);
        self
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn answers(&self) -> Vec<String> {
        self.answers.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        *self.closed.lock().unwrap()
    }

    fn next_response(&self, operation: &str) -> Result<String, String> {
        let mut responses = self.responses.lock().unwrap();
        match responses.get_mut(operation) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_else(|| Ok(String::new())),
            Some(queue) => queue.front().cloned().unwrap_or_else(|| Ok(String::new())),
            None => Err(format!("NameError: operation {operation} does not exist")),
        }
    }
}

pub struct StaticEnvironment {
    world: Arc<StaticWorld>,
    task: TaskInfo,
}

#[async_trait]
impl TaskEnvironment for StaticEnvironment {
    fn task(&self) -> &TaskInfo {
        &self.task
    }

    async fn catalog(&self) -> Result<OperationCatalog, String> {
        Ok(self.world.catalog.clone())
    }

    async fn execute(&self, invocation: &Invocation) -> Result<String, String> {
        if let Some(delay) = self.world.execute_delay {
            tokio::time::sleep(delay).await;
        }
        self.world.executed.lock().unwrap().push(invocation.render());
        if invocation.is_completion() {
            return Ok(String::new());
        }
        self.world.next_response(&invocation.qualified_name())
    }

    async fn complete_task(&self, answer: &str) -> Result<String, String> {
        self.world.answers.lock().unwrap().push(answer.to_string());
        self.execute(&Invocation::completion(answer)).await
    }

    async fn evaluate(&self) -> Result<Value, String> {
        Ok(self.world.grade.clone())
    }

    async fn close(&self) -> Result<(), String> {
        *self.world.closed.lock().unwrap() += 1;
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct StaticProvider {
    worlds: HashMap<String, Arc<StaticWorld>>,
    splits: HashMap<String, Vec<String>>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_world(mut self, world: Arc<StaticWorld>) -> Self {
        if let Some(task) = &world.task {
            self.worlds.insert(task.task_id.clone(), world.clone());
        }
        self
    }

    pub fn with_split(mut self, name: &str, ids: &[&str]) -> Self {
        self.splits
            .insert(name.to_string(), ids.iter().map(|s| s.to_string()).collect());
        self
    }
}

#[async_trait]
impl EnvironmentProvider for StaticProvider {
    async fn open(&self, task_id: &str) -> Result<Box<dyn TaskEnvironment>, String> {
        let world = self
            .worlds
            .get(task_id)
            .ok_or_else(|| format!("unknown task {task_id}"))?;
        let task = world
            .task
            .clone()
            .ok_or_else(|| format!("task {task_id} has no description"))?;
        Ok(Box::new(StaticEnvironment {
            world: world.clone(),
            task,
        }))
    }
}

#[async_trait]
impl SplitSource for StaticProvider {
    async fn task_ids(&self, split: &str) -> Result<Vec<String>, String> {
        self.splits
            .get(split)
            .cloned()
            .ok_or_else(|| format!("unknown split {split}"))
    }
}
