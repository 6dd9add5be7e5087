//! 批量调度：P 个 worker 槽位从共享队列领取任务
//!
//! - 每个槽位同一时刻只跑一个任务，端口对由槽位独占
//! - 每完成一个任务就重写一次报告文件（原子替换）
//! - 收到关闭信号后不再领取新任务；进行中的任务由 TaskRunner 记为 "interrupted"
//! - 单个任务 panic 时记为失败，槽位继续领取后续任务

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::core::EvalError;
use crate::environment::SplitSource;
use crate::evaluator::summary::{render_summary, write_report, BatchReport, EvaluationResult, ExportFormat};
use crate::evaluator::worker::PortPair;

/// 任务 id 的来源
#[derive(Debug, Clone, PartialEq)]
pub enum TaskSource {
    /// 逗号分隔的 id 列表
    Ids(Vec<String>),
    /// 每行一个 id，忽略空行与 `#` 注释
    File(PathBuf),
    /// 环境服务中的命名划分
    Split(String),
}

impl TaskSource {
    pub fn parse_id_list(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }

    /// 解析为任务 id 列表，`limit` 只保留前 N 个
    pub async fn resolve(&self, splits: &dyn SplitSource, limit: Option<usize>) -> Result<Vec<String>, EvalError> {
        let mut ids = match self {
            TaskSource::Ids(ids) => ids.clone(),
            TaskSource::File(path) => {
                let text = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| EvalError::Config(format!("read task file {}: {e}", path.display())))?;
                text.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty() && !l.starts_with('#'))
                    .map(String::from)
                    .collect()
            }
            TaskSource::Split(name) => splits
                .task_ids(name)
                .await
                .map_err(|e| EvalError::Remote(format!("load split '{name}': {e}")))?,
        };
        if let Some(n) = limit {
            ids.truncate(n);
        }
        Ok(ids)
    }
}

/// 在给定槽位上执行单个任务；永不失败，错误体现在结果的 error 字段中
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, slot: usize, ports: PortPair, task_id: &str, cancel: CancellationToken) -> EvaluationResult;
}

/// 批量调度器
pub struct BatchScheduler {
    runner: Arc<dyn TaskRunner>,
    ports: Vec<PortPair>,
    cancel: CancellationToken,
    sink: Option<(PathBuf, ExportFormat)>,
}

impl BatchScheduler {
    /// `ports` 的长度即并行度
    pub fn new(runner: Arc<dyn TaskRunner>, ports: Vec<PortPair>, cancel: CancellationToken) -> Self {
        Self {
            runner,
            ports,
            cancel,
            sink: None,
        }
    }

    /// 每完成一个任务即写出报告
    pub fn with_sink(mut self, path: PathBuf, format: ExportFormat) -> Self {
        self.sink = Some((path, format));
        self
    }

    pub fn parallelism(&self) -> usize {
        self.ports.len()
    }

    pub async fn run(&self, task_ids: Vec<String>) -> BatchReport {
        let total = task_ids.len();
        let queue: Arc<Mutex<VecDeque<(usize, String)>>> =
            Arc::new(Mutex::new(task_ids.into_iter().enumerate().collect()));
        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, EvaluationResult)>();

        tracing::info!(total, parallel = self.parallelism(), "batch started");

        let mut workers = JoinSet::new();
        for (slot, ports) in self.ports.iter().copied().enumerate().take(total) {
            let runner = Arc::clone(&self.runner);
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            let cancel = self.cancel.clone();
            workers.spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let next = match queue.lock() {
                        Ok(mut q) => q.pop_front(),
                        Err(_) => None,
                    };
                    let Some((index, task_id)) = next else {
                        break;
                    };
                    tracing::info!(slot, task_id = %task_id, "task started");
                    let result = run_isolated(Arc::clone(&runner), slot, ports, task_id, cancel.clone()).await;
                    if tx.send((index, result)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        let mut collected: Vec<(usize, EvaluationResult)> = Vec::with_capacity(total);
        while let Some((index, result)) = rx.recv().await {
            tracing::info!(
                task_id = %result.task_id,
                success = result.success,
                done = collected.len() + 1,
                total,
                "task finished"
            );
            collected.push((index, result));
            self.flush(&collected);
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "batch worker aborted");
            }
        }

        if collected.len() < total {
            tracing::warn!(
                skipped = total - collected.len(),
                "batch stopped early; remaining tasks were not started"
            );
        }
        let report = ordered_report(collected);
        self.flush_report(&report);
        tracing::info!("\n{}", render_summary(&report));
        report
    }

    fn flush(&self, collected: &[(usize, EvaluationResult)]) {
        if self.sink.is_some() {
            self.flush_report(&ordered_report(collected.to_vec()));
        }
    }

    fn flush_report(&self, report: &BatchReport) {
        if let Some((path, format)) = &self.sink {
            if let Err(e) = write_report(path, report, *format) {
                tracing::error!(path = %path.display(), error = %e, "failed to write batch report");
            }
        }
    }
}

/// 在独立任务中执行，runner panic 不会带走整个槽位
async fn run_isolated(
    runner: Arc<dyn TaskRunner>,
    slot: usize,
    ports: PortPair,
    task_id: String,
    cancel: CancellationToken,
) -> EvaluationResult {
    let started = Instant::now();
    let id = task_id.clone();
    match tokio::spawn(async move { runner.run(slot, ports, &id, cancel).await }).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(slot, task_id = %task_id, error = %e, "task runner panicked");
            EvaluationResult::failed(&task_id, started.elapsed().as_secs_f64(), format!("worker panicked: {e}"))
        }
    }
}

fn ordered_report(mut collected: Vec<(usize, EvaluationResult)>) -> BatchReport {
    collected.sort_by_key(|(index, _)| *index);
    BatchReport::new(collected.into_iter().map(|(_, r)| r).collect())
}
