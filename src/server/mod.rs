//! 协调器 HTTP 服务
//!
//! 批量模式下每个 worker 启动一个协调器进程，调度器通过它跑单个任务：
//! - GET  /health    → "OK"
//! - POST /evaluate  {task_id, agent_url} → EvaluationResult

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::agent::{HttpPolicyAgent, PolicyAgent};
use crate::core::Orchestrator;
use crate::evaluator::EvaluationResult;

/// 按 agent 地址构造策略 agent
pub type AgentFactory = Box<dyn Fn(&str, Duration) -> Arc<dyn PolicyAgent> + Send + Sync>;

/// 协调器共享状态
pub struct CoordinatorState {
    orchestrator: Mutex<Orchestrator>,
    agent_factory: AgentFactory,
}

impl CoordinatorState {
    /// 使用 HTTP agent 客户端
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self::with_agent_factory(
            orchestrator,
            Box::new(|url, timeout| Arc::new(HttpPolicyAgent::new(url, timeout)) as Arc<dyn PolicyAgent>),
        )
    }

    pub fn with_agent_factory(orchestrator: Orchestrator, agent_factory: AgentFactory) -> Self {
        Self {
            orchestrator: Mutex::new(orchestrator),
            agent_factory,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EvaluateRequest {
    pub task_id: String,
    pub agent_url: String,
}

/// 创建协调器路由
pub fn create_router(state: Arc<CoordinatorState>) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/evaluate", post(evaluate_handler))
        .with_state(state)
}

/// POST /evaluate - 跑完一个任务并返回结果
async fn evaluate_handler(
    State(state): State<Arc<CoordinatorState>>,
    Json(req): Json<EvaluateRequest>,
) -> Result<Json<EvaluationResult>, (StatusCode, String)> {
    if req.task_id.trim().is_empty() || req.agent_url.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "task_id and agent_url are required".into()));
    }
    tracing::info!(task_id = %req.task_id, agent_url = %req.agent_url, "evaluate request");

    let mut orchestrator = state.orchestrator.lock().await;
    let timeout = orchestrator.config().request_timeout;
    let agent = (state.agent_factory)(&req.agent_url, timeout);
    let outcome = orchestrator.run_task(&req.task_id, agent.as_ref()).await;

    tracing::info!(
        task_id = %req.task_id,
        success = outcome.result.success,
        steps = outcome.result.steps,
        status = ?outcome.status,
        "evaluate finished"
    );
    Ok(Json(outcome.result))
}

/// 在已绑定的 listener 上提供服务，直到 shutdown 被触发
pub async fn serve_listener(
    listener: TcpListener,
    state: Arc<CoordinatorState>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = create_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

pub async fn serve(
    host: &str,
    port: u16,
    state: Arc<CoordinatorState>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Coordinator listening on http://{}", addr);
    serve_listener(listener, state, shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ScriptedAgent;
    use crate::core::OrchestratorConfig;
    use crate::environment::fake::{StaticProvider, StaticWorld};
    use crate::environment::{OperationCatalog, TaskInfo};
    use serde_json::json;

    async fn spawn_coordinator() -> (String, CancellationToken) {
        let task = TaskInfo {
            task_id: "t1".into(),
            instruction: "Say hello".into(),
            difficulty: None,
        };
        let world = Arc::new(
            StaticWorld::new(task, OperationCatalog::default())
                .with_grade(json!({"success": true, "passes": 2, "fails": 0})),
        );
        let provider = Arc::new(StaticProvider::new().with_world(world));
        let config = OrchestratorConfig {
            trace_dir: None,
            ..OrchestratorConfig::default()
        };
        let orchestrator = Orchestrator::new(config, provider).unwrap();
        let state = Arc::new(CoordinatorState::with_agent_factory(
            orchestrator,
            Box::new(|_, _| {
                Arc::new(ScriptedAgent::new([r#"<json>{"action": "answer", "content": "hello"}</json>"#]))
                    as Arc<dyn PolicyAgent>
            }),
        ));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let shutdown = CancellationToken::new();
        tokio::spawn(serve_listener(listener, state, shutdown.clone()));
        (url, shutdown)
    }

    #[tokio::test]
    async fn test_health_and_evaluate() {
        let (url, shutdown) = spawn_coordinator().await;
        let client = reqwest::Client::new();

        let health = client.get(format!("{url}/health")).send().await.unwrap();
        assert!(health.status().is_success());
        assert_eq!(health.text().await.unwrap(), "OK");

        let resp = client
            .post(format!("{url}/evaluate"))
            .json(&json!({"task_id": "t1", "agent_url": "http://unused"}))
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());
        let result: EvaluationResult = resp.json().await.unwrap();
        assert_eq!(result.task_id, "t1");
        assert!(result.success);
        assert_eq!(result.steps, 1);
        assert_eq!(result.passes, 2);

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_evaluate_rejects_missing_fields() {
        let (url, shutdown) = spawn_coordinator().await;
        let resp = reqwest::Client::new()
            .post(format!("{url}/evaluate"))
            .json(&json!({"task_id": "", "agent_url": "http://x"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_unknown_task_reports_failure() {
        let (url, shutdown) = spawn_coordinator().await;
        let result: EvaluationResult = reqwest::Client::new()
            .post(format!("{url}/evaluate"))
            .json(&json!({"task_id": "missing", "agent_url": "http://x"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.is_some());
        shutdown.cancel();
    }
}
