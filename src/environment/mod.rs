//! 任务环境边界
//!
//! 环境本身（模拟世界、标准答案与评分）在进程外；这里只定义协调器所需的契约：
//! 打开任务、获取操作目录、执行调用代码、提交答案、请求评分、关闭。

pub mod catalog;
pub mod fake;
pub mod grading;
pub mod http;
pub mod invocation;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use catalog::{DomainSpec, OperationCatalog, OperationSpec, ParameterSpec, ReturnSpec};
pub use grading::{GradeReport, GradeSource};
pub use http::HttpEnvironmentProvider;
pub use invocation::{normalize_capture, Invocation, NO_OUTPUT_PLACEHOLDER};

/// 任务描述（标准答案只在环境内部）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_id: String,
    pub instruction: String,
    #[serde(default)]
    pub difficulty: Option<String>,
}

/// 一个已打开任务的环境句柄
#[async_trait]
pub trait TaskEnvironment: Send + Sync {
    fn task(&self) -> &TaskInfo;

    /// 本任务可用的全部操作（会话开始时取一次）
    async fn catalog(&self) -> Result<OperationCatalog, String>;

    /// 执行调用代码，返回显式打印出的输出
    async fn execute(&self, invocation: &Invocation) -> Result<String, String>;

    /// 把答案显式交给环境的任务完成入口
    async fn complete_task(&self, answer: &str) -> Result<String, String> {
        self.execute(&Invocation::completion(answer)).await
    }

    /// 请求评分；结果形状由环境决定，交给 GradeReport 宽松解析
    async fn evaluate(&self) -> Result<Value, String>;

    async fn close(&self) -> Result<(), String> {
        Ok(())
    }
}

/// 按任务 id 打开环境
#[async_trait]
pub trait EnvironmentProvider: Send + Sync {
    async fn open(&self, task_id: &str) -> Result<Box<dyn TaskEnvironment>, String>;
}

/// 命名数据划分（split）→ 任务 id 列表
#[async_trait]
pub trait SplitSource: Send + Sync {
    async fn task_ids(&self, split: &str) -> Result<Vec<String>, String>;
}
