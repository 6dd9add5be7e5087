//! 任务环境 HTTP 客户端
//!
//! 端点：
//! - `POST /environments {task_id, experiment_name}` → `{env_id, instruction, difficulty?}`
//! - `GET /environments/{id}/catalog` → OperationCatalog
//! - `POST /environments/{id}/execute {code}` → `{output}` 或 `{error}`
//! - `POST /environments/{id}/evaluate` → 评分 JSON
//! - `DELETE /environments/{id}`
//! - `GET /splits/{name}` → 任务 id 列表

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::environment::{
    EnvironmentProvider, Invocation, OperationCatalog, SplitSource, TaskEnvironment, TaskInfo,
};

#[derive(Debug, Deserialize)]
struct OpenResponse {
    env_id: String,
    instruction: String,
    #[serde(default)]
    difficulty: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// 通过 HTTP 打开环境；同时提供 split 查询
#[derive(Clone)]
pub struct HttpEnvironmentProvider {
    client: reqwest::Client,
    base_url: String,
    experiment_name: String,
}

impl HttpEnvironmentProvider {
    pub fn new(base_url: impl Into<String>, experiment_name: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            experiment_name: experiment_name.into(),
        }
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T, String> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(format!("HTTP {status}: {body}"));
    }
    resp.json::<T>().await.map_err(|e| e.to_string())
}

#[async_trait]
impl EnvironmentProvider for HttpEnvironmentProvider {
    async fn open(&self, task_id: &str) -> Result<Box<dyn TaskEnvironment>, String> {
        let resp = self
            .client
            .post(format!("{}/environments", self.base_url))
            .json(&serde_json::json!({
                "task_id": task_id,
                "experiment_name": self.experiment_name,
            }))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let opened: OpenResponse = read_json(resp).await?;
        let difficulty = opened.difficulty.map(|d| match d {
            Value::String(s) => s,
            other => other.to_string(),
        });
        tracing::info!(task_id, env_id = %opened.env_id, "environment opened");
        Ok(Box::new(HttpTaskEnvironment {
            client: self.client.clone(),
            url: format!("{}/environments/{}", self.base_url, opened.env_id),
            task: TaskInfo {
                task_id: task_id.to_string(),
                instruction: opened.instruction,
                difficulty,
            },
        }))
    }
}

#[async_trait]
impl SplitSource for HttpEnvironmentProvider {
    async fn task_ids(&self, split: &str) -> Result<Vec<String>, String> {
        let resp = self
            .client
            .get(format!("{}/splits/{}", self.base_url, split))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        read_json(resp).await
    }
}

pub struct HttpTaskEnvironment {
    client: reqwest::Client,
    url: String,
    task: TaskInfo,
}

#[async_trait]
impl TaskEnvironment for HttpTaskEnvironment {
    fn task(&self) -> &TaskInfo {
        &self.task
    }

    async fn catalog(&self) -> Result<OperationCatalog, String> {
        let resp = self
            .client
            .get(format!("{}/catalog", self.url))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        read_json(resp).await
    }

    async fn execute(&self, invocation: &Invocation) -> Result<String, String> {
        let resp = self
            .client
            .post(format!("{}/execute", self.url))
            .json(&serde_json::json!({ "code": invocation.render() }))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let out: ExecuteResponse = read_json(resp).await?;
        match (out.output, out.error) {
            (_, Some(err)) => Err(err),
            (Some(output), None) => Ok(output),
            (None, None) => Ok(String::new()),
        }
    }

    async fn evaluate(&self) -> Result<Value, String> {
        let resp = self
            .client
            .post(format!("{}/evaluate", self.url))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        read_json(resp).await
    }

    async fn close(&self) -> Result<(), String> {
        let resp = self
            .client
            .delete(&self.url)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(format!("HTTP {}", resp.status()))
        }
    }
}
