//! 交互编排器：把一个任务跑到底
//!
//! 每轮：检查步数 → 压缩日志 → 发给 agent → 解析动作 → 执行操作 / 提交答案 / 注入协议提醒。
//! 所有远程往返都有超时；超时与远程错误只让本会话失败。终止后请求评分并产出 EvaluationResult。
//! 取消令牌触发后，进行中的往返立即结束，会话以 "interrupted" 失败，不再评分。

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::agent::PolicyAgent;
use crate::config::AppConfig;
use crate::core::session::{SessionArena, SessionStatus};
use crate::core::{EvalError, RecoveryAction, RecoveryEngine, ReminderBudget};
use crate::environment::{EnvironmentProvider, GradeReport, TaskEnvironment};
use crate::evaluator::analyzer::analyze;
use crate::evaluator::EvaluationResult;
use crate::memory::{ConversationCompressor, Message};
use crate::protocol::{parse_action, prompt, Action};
use crate::tools::{DiscoveryGateway, OperationExecutor};
use crate::trace::{TraceEvent, TraceWriter};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_steps: usize,
    pub max_reminders: usize,
    pub request_timeout: Duration,
    pub max_messages: usize,
    pub recent_window: usize,
    pub trace_dir: Option<PathBuf>,
}

impl OrchestratorConfig {
    pub fn from_app(cfg: &AppConfig) -> Self {
        Self {
            max_steps: cfg.session.max_steps,
            max_reminders: cfg.session.max_reminders,
            request_timeout: cfg.session.request_timeout(),
            max_messages: cfg.compression.max_messages,
            recent_window: cfg.compression.recent_window,
            trace_dir: cfg.trace.dir.clone(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_app(&AppConfig::default())
    }
}

/// 一次会话的完整产出
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub context_id: String,
    pub status: SessionStatus,
    pub result: EvaluationResult,
    pub answer: Option<String>,
    pub grade: Option<GradeReport>,
    pub reminders_sent: usize,
    pub trace: Vec<TraceEvent>,
    pub trace_path: Option<PathBuf>,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    compressor: ConversationCompressor,
    recovery: RecoveryEngine,
    provider: Arc<dyn EnvironmentProvider>,
    arena: SessionArena,
    cancel: CancellationToken,
}

/// 取消后关闭环境的时限
const CLOSE_AFTER_CANCEL: Duration = Duration::from_secs(2);

/// 带超时的远程调用：超时 → Timeout，调用方报错 → Remote
async fn bounded<T, F>(limit: Duration, what: &str, fut: F) -> Result<T, EvalError>
where
    F: Future<Output = Result<T, String>>,
{
    match timeout(limit, fut).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(EvalError::Remote(format!("{what}: {e}"))),
        Err(_) => Err(EvalError::Timeout {
            what: what.to_string(),
            secs: limit.as_secs(),
        }),
    }
}

/// 取消优先于往返结果
async fn interruptible<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, EvalError>
where
    F: Future<Output = Result<T, EvalError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(EvalError::Cancelled),
        res = fut => res,
    }
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, provider: Arc<dyn EnvironmentProvider>) -> Result<Self, EvalError> {
        let compressor = ConversationCompressor::new(config.max_messages, config.recent_window)?;
        Ok(Self {
            config,
            compressor,
            recovery: RecoveryEngine::new(),
            provider,
            arena: SessionArena::new(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// 当前仍在仓库中的会话数（会话终止后即移除）
    pub fn active_sessions(&self) -> usize {
        self.arena.len()
    }

    pub async fn run_task(&mut self, task_id: &str, agent: &dyn PolicyAgent) -> SessionOutcome {
        let started = Instant::now();
        let limit = self.config.request_timeout;
        let cancel = self.cancel.clone();

        let env = match interruptible(&cancel, bounded(limit, "environment open", self.provider.open(task_id))).await {
            Ok(env) => env,
            Err(e) => return setup_failure(task_id, started, e),
        };
        let catalog = match interruptible(&cancel, bounded(limit, "operation catalog", env.catalog())).await {
            Ok(catalog) => catalog,
            Err(e) => {
                close_quietly(env.as_ref(), close_limit(&cancel, limit)).await;
                return setup_failure(task_id, started, e);
            }
        };

        let gateway = DiscoveryGateway::new(catalog);
        let context_id = self.arena.create(
            task_id,
            prompt::system_instructions(&gateway.meta_operations_help()),
            prompt::task_statement(env.task()),
        );
        let mut trace = TraceWriter::open_or_memory(self.config.trace_dir.as_deref(), &context_id);
        let mut budget = ReminderBudget::new(self.config.max_reminders);
        let executor = OperationExecutor::new(env.as_ref(), &gateway, limit).with_cancel(cancel.clone());
        tracing::info!(
            task_id,
            context_id = %context_id,
            agent = agent.name(),
            domains = gateway.domain_count(),
            "session started"
        );

        let Some(session) = self.arena.get_mut(&context_id) else {
            return setup_failure(task_id, started, EvalError::Trace("session missing from arena".into()));
        };

        let mut answer: Option<String> = None;
        let mut failure: Option<EvalError> = None;
        let status = loop {
            if cancel.is_cancelled() {
                tracing::warn!(task_id, steps = session.step(), "session interrupted");
                failure = Some(EvalError::Cancelled);
                break SessionStatus::Failed(EvalError::Cancelled.to_string());
            }
            if session.step() >= self.config.max_steps {
                tracing::warn!(task_id, steps = session.step(), "step budget exhausted");
                break SessionStatus::BudgetExhausted;
            }
            let step = session.advance_step();
            self.compressor.compress_in_place(session.log_mut());

            let round_trip = bounded(limit, "policy agent reply", agent.respond(&context_id, session.messages()));
            let reply = match interruptible(&cancel, round_trip).await {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::error!(task_id, step, error = %e, "agent round trip failed");
                    failure = Some(e.clone());
                    break SessionStatus::Failed(e.to_string());
                }
            };
            let parsed = parse_action(&reply);
            session.push(Message::assistant(reply));

            match parsed {
                Err(violation) => match self.recovery.handle(&violation, &mut budget) {
                    RecoveryAction::RemindProtocol(text) | RecoveryAction::Observe(text) => {
                        tracing::warn!(task_id, step, attempt = budget.used(), error = %violation, "protocol reminder");
                        trace.append(TraceEvent::ProtocolReminder {
                            timestamp: Utc::now(),
                            step,
                            attempt: budget.used(),
                            reason: violation.to_string(),
                        });
                        session.push(Message::user(text));
                    }
                    RecoveryAction::FailSession(e) => {
                        failure = Some(e.clone());
                        break SessionStatus::Failed(e.to_string());
                    }
                },
                Ok(Action::CallOperation {
                    operation_name,
                    parameters,
                }) => {
                    let record = executor.execute(&operation_name, &parameters).await;
                    trace.append(TraceEvent::ToolCall(record.entry));
                    match record.outcome {
                        Ok(output) => {
                            session.push(Message::user(prompt::observation_ok(&operation_name, &output)));
                        }
                        Err(err) => match self.recovery.handle(&err, &mut budget) {
                            RecoveryAction::Observe(_) | RecoveryAction::RemindProtocol(_) => {
                                session.push(Message::user(prompt::observation_err(&operation_name, &err)));
                            }
                            RecoveryAction::FailSession(e) => {
                                tracing::error!(task_id, step, error = %e, "operation failed fatally");
                                failure = Some(e.clone());
                                break SessionStatus::Failed(e.to_string());
                            }
                        },
                    }
                }
                Ok(Action::SubmitAnswer { content }) => {
                    let completion = bounded(limit, "task completion", env.complete_task(&content));
                    if let Err(e) = interruptible(&cancel, completion).await {
                        tracing::warn!(task_id, error = %e, "task completion call failed");
                    }
                    trace.append(TraceEvent::AnswerSubmitted {
                        timestamp: Utc::now(),
                        step,
                        content: content.clone(),
                    });
                    answer = Some(content);
                    break SessionStatus::Answered;
                }
            }
        };
        session.finish(status.clone());
        let steps = session.step();

        // 远程失败（超时 / 连接错误）后不再请求评分
        let mut grade_error: Option<String> = None;
        let grade = match &failure {
            Some(e) if e.is_session_fatal() => None,
            _ => match bounded(limit, "evaluation", env.evaluate()).await {
                Ok(value) => Some(GradeReport::from_value(&value)),
                Err(e) => {
                    tracing::warn!(task_id, error = %e, "grading failed");
                    grade_error = Some(e.to_string());
                    None
                }
            },
        };
        close_quietly(env.as_ref(), close_limit(&cancel, limit)).await;

        let error = match (&status, failure, grade_error) {
            (_, Some(e), _) => Some(e.to_string()),
            (SessionStatus::BudgetExhausted, None, _) => {
                Some(format!("step budget exhausted after {steps} steps"))
            }
            (_, None, grade_err) => grade_err,
        };
        let grade_view = grade.clone().unwrap_or_else(GradeReport::unavailable);
        let result = EvaluationResult {
            task_id: task_id.to_string(),
            success: matches!(status, SessionStatus::Answered) && grade_view.success,
            steps,
            time: started.elapsed().as_secs_f64(),
            score: grade_view.score,
            passes: grade_view.passes,
            fails: grade_view.fails,
            total: grade_view.total,
            error,
            trajectory: Some(analyze(&trace.tool_calls())),
        };

        self.arena.remove(&context_id);
        tracing::info!(
            task_id,
            context_id = %context_id,
            success = result.success,
            steps,
            reminders = budget.used(),
            "session finished"
        );

        SessionOutcome {
            context_id,
            status,
            result,
            answer,
            grade,
            reminders_sent: budget.used(),
            trace_path: trace.path().map(|p| p.to_path_buf()),
            trace: trace.events().to_vec(),
        }
    }
}

async fn close_quietly(env: &dyn TaskEnvironment, limit: Duration) {
    if let Err(e) = bounded(limit, "environment close", env.close()).await {
        tracing::warn!(error = %e, "environment close failed");
    }
}

fn close_limit(cancel: &CancellationToken, limit: Duration) -> Duration {
    if cancel.is_cancelled() {
        limit.min(CLOSE_AFTER_CANCEL)
    } else {
        limit
    }
}

fn setup_failure(task_id: &str, started: Instant, err: EvalError) -> SessionOutcome {
    tracing::error!(task_id, error = %err, "session setup failed");
    SessionOutcome {
        context_id: String::new(),
        status: SessionStatus::Failed(err.to_string()),
        result: EvaluationResult::failed(task_id, started.elapsed().as_secs_f64(), err.to_string()),
        answer: None,
        grade: None,
        reminders_sent: 0,
        trace: Vec::new(),
        trace_path: None,
    }
}
