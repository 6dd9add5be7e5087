//! 批量评测的 worker 进程管理
//!
//! 每个 worker 槽位独占一对端口（协调器 + agent），每个任务启动一对新进程：
//! 就绪探测 → POST /evaluate → 解析结果 → 按进程组 SIGTERM，宽限期后 SIGKILL。
//! 任何路径退出（包括 panic、取消）都由 ProcessGuard 的 Drop 兜底杀掉进程组。

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::EvalError;
use crate::evaluator::batch::TaskRunner;
use crate::evaluator::summary::EvaluationResult;

const PORT_PLACEHOLDER: &str = "{port}";
const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// 一个 worker 槽位的端口对
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortPair {
    pub coordinator: u16,
    pub agent: u16,
}

/// 槽位 i 使用 base + i*stride 与 base + i*stride + 1；stride >= 2 时各槽位互不相交
pub fn allocate_ports(base: u16, stride: u16, workers: usize) -> Result<Vec<PortPair>, EvalError> {
    if stride < 2 {
        return Err(EvalError::Config(format!("port stride must be at least 2, got {stride}")));
    }
    (0..workers)
        .map(|slot| {
            let offset = u16::try_from(slot)
                .ok()
                .and_then(|s| s.checked_mul(stride))
                .and_then(|o| base.checked_add(o));
            let coordinator = offset.ok_or_else(|| {
                EvalError::Config(format!("port range exhausted at worker {slot} (base {base}, stride {stride})"))
            })?;
            let agent = coordinator.checked_add(1).ok_or_else(|| {
                EvalError::Config(format!("port range exhausted at worker {slot} (base {base}, stride {stride})"))
            })?;
            Ok(PortPair { coordinator, agent })
        })
        .collect()
}

/// 把 argv 中的 `{port}` 替换为实际端口
pub fn substitute_port(argv: &[String], port: u16) -> Vec<String> {
    argv.iter()
        .map(|arg| arg.replace(PORT_PLACEHOLDER, &port.to_string()))
        .collect()
}

/// 持有一个子进程（及其进程组）；Drop 时强制结束
pub struct ProcessGuard {
    name: String,
    child: Option<Child>,
}

impl ProcessGuard {
    /// 启动进程；unix 下放入独立进程组，便于连同其子进程一起结束
    pub fn spawn(name: &str, argv: &[String], log_file: Option<&Path>) -> Result<Self, EvalError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| EvalError::ProcessLifecycle(format!("{name}: empty command")))?;

        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);
        match log_file {
            Some(path) => {
                let out = std::fs::File::create(path).map_err(|e| {
                    EvalError::ProcessLifecycle(format!("{name}: open log {}: {e}", path.display()))
                })?;
                let err = out
                    .try_clone()
                    .map_err(|e| EvalError::ProcessLifecycle(format!("{name}: clone log handle: {e}")))?;
                cmd.stdout(Stdio::from(out)).stderr(Stdio::from(err));
            }
            None => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd
            .spawn()
            .map_err(|e| EvalError::ProcessLifecycle(format!("{name}: spawn {program}: {e}")))?;
        tracing::debug!(process = name, pid = ?child.id(), "spawned");
        Ok(Self {
            name: name.to_string(),
            child: Some(child),
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    /// 进程是否已退出（退出后就绪探测没必要再等）
    pub fn has_exited(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(Some(_))),
            None => true,
        }
    }

    /// SIGTERM 整个进程组，等待 grace；仍未退出则 SIGKILL
    pub async fn shutdown(&mut self, grace: Duration) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Ok(Some(_)) = child.try_wait() {
            return;
        }
        if let Some(pid) = child.id() {
            signal_group(pid, Signal::Terminate);
        }
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(_) => tracing::debug!(process = %self.name, "exited after SIGTERM"),
            Err(_) => {
                tracing::warn!(process = %self.name, grace_secs = grace.as_secs(), "did not exit in time, killing");
                if let Some(pid) = child.id() {
                    signal_group(pid, Signal::Kill);
                }
                let _ = child.kill().await;
            }
        }
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if let Some(pid) = child.id() {
                signal_group(pid, Signal::Kill);
            }
            let _ = child.start_kill();
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: Signal) {
    let sig = match signal {
        Signal::Terminate => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    let Ok(pgid) = i32::try_from(pid) else {
        return;
    };
    // 负 pid：发送给整个进程组
    unsafe {
        libc::kill(-pgid, sig);
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: u32, _signal: Signal) {}

/// 轮询 url 直到返回 2xx；超时、取消或进程提前退出都返回错误
pub async fn wait_ready(
    client: &reqwest::Client,
    url: &str,
    limit: Duration,
    cancel: &CancellationToken,
    guard: &mut ProcessGuard,
) -> Result<(), EvalError> {
    let deadline = Instant::now() + limit;
    loop {
        if cancel.is_cancelled() {
            return Err(EvalError::Cancelled);
        }
        if guard.has_exited() {
            return Err(EvalError::ProcessLifecycle(format!(
                "{} exited before becoming ready",
                guard.name
            )));
        }
        if let Ok(resp) = client.get(url).timeout(READY_POLL_INTERVAL * 4).send().await {
            if resp.status().is_success() {
                return Ok(());
            }
        }
        if Instant::now() >= deadline {
            return Err(EvalError::ProcessLifecycle(format!(
                "{} not ready at {url} after {}s",
                guard.name,
                limit.as_secs()
            )));
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(EvalError::Cancelled),
            _ = tokio::time::sleep(READY_POLL_INTERVAL) => {}
        }
    }
}

/// worker 运行参数（由 [worker] 与 [batch] 段组合而来）
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub coordinator_command: Vec<String>,
    pub agent_command: Vec<String>,
    pub coordinator_ready_path: String,
    pub agent_ready_path: String,
    pub ready_timeout: Duration,
    pub grace_period: Duration,
    pub task_timeout: Duration,
    pub log_dir: Option<PathBuf>,
}

impl WorkerSettings {
    /// `config_file` 为批量命令加载的配置文件；协调器是本程序时原样传给它，
    /// 使会话参数（步数、提醒、压缩、环境地址、轨迹目录）与父进程一致
    pub fn from_app(cfg: &AppConfig, config_file: Option<&Path>) -> Self {
        let mut coordinator_command = cfg.worker.coordinator_command.clone();
        if coordinator_command.first().map(String::as_str) == Some(env!("CARGO_PKG_NAME")) {
            if let Ok(exe) = std::env::current_exe() {
                coordinator_command[0] = exe.to_string_lossy().into_owned();
            }
            if let Some(path) = config_file.filter(|p| p.exists()) {
                let absolute = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
                coordinator_command.push("--config".to_string());
                coordinator_command.push(absolute.to_string_lossy().into_owned());
            }
        }
        Self {
            coordinator_command,
            agent_command: cfg.worker.agent_command.clone(),
            coordinator_ready_path: cfg.worker.coordinator_ready_path.clone(),
            agent_ready_path: cfg.worker.agent_ready_path.clone(),
            ready_timeout: Duration::from_secs(cfg.worker.ready_timeout_secs),
            grace_period: Duration::from_secs(cfg.worker.grace_period_secs),
            task_timeout: Duration::from_secs(cfg.batch.task_timeout_secs),
            log_dir: cfg.worker.log_dir.clone(),
        }
    }

    fn log_path(&self, task_id: &str, role: &str) -> Option<PathBuf> {
        let dir = self.log_dir.as_ref()?;
        let safe: String = task_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        Some(dir.join(format!("{safe}_{role}.log")))
    }
}

/// 以真实子进程执行单个任务的 TaskRunner
pub struct ProcessTaskRunner {
    settings: WorkerSettings,
    client: reqwest::Client,
}

impl ProcessTaskRunner {
    pub fn new(settings: WorkerSettings) -> Self {
        Self {
            settings,
            client: reqwest::Client::new(),
        }
    }

    async fn run_inner(
        &self,
        slot: usize,
        ports: PortPair,
        task_id: &str,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<EvaluationResult, EvalError> {
        let s = &self.settings;
        if let Some(dir) = &s.log_dir {
            std::fs::create_dir_all(dir)
                .map_err(|e| EvalError::ProcessLifecycle(format!("create log dir {}: {e}", dir.display())))?;
        }
        let coordinator_log = s.log_path(task_id, "coordinator");
        let agent_log = s.log_path(task_id, "agent");

        let mut coordinator = ProcessGuard::spawn(
            &format!("coordinator[{slot}]"),
            &substitute_port(&s.coordinator_command, ports.coordinator),
            coordinator_log.as_deref(),
        )?;
        let mut agent = match ProcessGuard::spawn(
            &format!("agent[{slot}]"),
            &substitute_port(&s.agent_command, ports.agent),
            agent_log.as_deref(),
        ) {
            Ok(guard) => guard,
            Err(e) => {
                coordinator.shutdown(s.grace_period).await;
                return Err(e);
            }
        };

        let result = self
            .evaluate_with(&mut coordinator, &mut agent, ports, task_id, cancel, started)
            .await;

        agent.shutdown(s.grace_period).await;
        coordinator.shutdown(s.grace_period).await;
        result
    }

    async fn evaluate_with(
        &self,
        coordinator: &mut ProcessGuard,
        agent: &mut ProcessGuard,
        ports: PortPair,
        task_id: &str,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<EvaluationResult, EvalError> {
        let s = &self.settings;
        let coordinator_url = format!("http://127.0.0.1:{}", ports.coordinator);
        let agent_url = format!("http://127.0.0.1:{}", ports.agent);

        wait_ready(
            &self.client,
            &format!("{coordinator_url}{}", s.coordinator_ready_path),
            s.ready_timeout,
            cancel,
            coordinator,
        )
        .await?;
        wait_ready(
            &self.client,
            &format!("{agent_url}{}", s.agent_ready_path),
            s.ready_timeout,
            cancel,
            agent,
        )
        .await?;
        tracing::info!(task_id, coordinator = ports.coordinator, agent = ports.agent, "worker processes ready");

        let request = self
            .client
            .post(format!("{coordinator_url}/evaluate"))
            .json(&json!({ "task_id": task_id, "agent_url": agent_url }))
            .send();
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(EvalError::Cancelled),
            r = tokio::time::timeout(s.task_timeout, request) => r,
        };
        let response = response
            .map_err(|_| EvalError::Timeout {
                what: format!("evaluate {task_id}"),
                secs: s.task_timeout.as_secs(),
            })?
            .map_err(|e| EvalError::Remote(format!("coordinator request failed: {e}")))?;

        let status = response.status();
        let text = tokio::select! {
            _ = cancel.cancelled() => return Err(EvalError::Cancelled),
            t = response.text() => t.map_err(|e| EvalError::Remote(format!("coordinator body: {e}")))?,
        };
        if !status.is_success() {
            let preview: String = text.chars().take(200).collect();
            return Err(EvalError::Remote(format!("coordinator returned {status}: {preview}")));
        }
        Ok(EvaluationResult::from_response_text(
            task_id,
            &text,
            started.elapsed().as_secs_f64(),
        ))
    }
}

#[async_trait]
impl TaskRunner for ProcessTaskRunner {
    async fn run(&self, slot: usize, ports: PortPair, task_id: &str, cancel: CancellationToken) -> EvaluationResult {
        let started = Instant::now();
        match self.run_inner(slot, ports, task_id, &cancel, started).await {
            Ok(result) => result,
            Err(err) => {
                let elapsed = started.elapsed().as_secs_f64();
                tracing::warn!(task_id, slot, error = %err, "task failed");
                EvaluationResult::failed(task_id, elapsed, err.to_string())
            }
        }
    }
}
