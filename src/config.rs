//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BEE_EVAL__*` 覆盖（双下划线表示嵌套，如 `BEE_EVAL__BATCH__PARALLEL=4`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::EvalError;

/// 配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub compression: CompressionSection,
    #[serde(default)]
    pub batch: BatchSection,
    #[serde(default)]
    pub worker: WorkerSection,
    #[serde(default)]
    pub environment: EnvironmentSection,
    #[serde(default)]
    pub trace: TraceSection,
}

/// [session] 段：单个评测会话的步数上限、提醒次数与请求超时
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// 协议违规后最多注入的纠正提醒次数，用尽后会话失败
    #[serde(default = "default_max_reminders")]
    pub max_reminders: usize,
    /// 单次往返（agent / 环境）的超时（秒）
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_max_steps() -> usize {
    30
}

fn default_max_reminders() -> usize {
    3
}

fn default_request_timeout_secs() -> u64 {
    300
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_reminders: default_max_reminders(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl SessionSection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// [compression] 段：对话压缩阈值 M 与最近窗口 R
#[derive(Debug, Clone, Deserialize)]
pub struct CompressionSection {
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    #[serde(default = "default_recent_window")]
    pub recent_window: usize,
}

fn default_max_messages() -> usize {
    20
}

fn default_recent_window() -> usize {
    12
}

impl Default for CompressionSection {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            recent_window: default_recent_window(),
        }
    }
}

/// [batch] 段：并行度、端口规划与结果导出
#[derive(Debug, Clone, Deserialize)]
pub struct BatchSection {
    #[serde(default = "default_parallel")]
    pub parallel: usize,
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    /// 相邻 worker 的端口间距，至少 2（协调器 + agent）
    #[serde(default = "default_port_stride")]
    pub port_stride: u16,
    #[serde(default = "default_output")]
    pub output: PathBuf,
    /// json / csv
    #[serde(default = "default_format")]
    pub format: String,
    /// 单个任务（含整个会话）的总超时（秒）
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
}

fn default_parallel() -> usize {
    1
}

fn default_base_port() -> u16 {
    9001
}

fn default_port_stride() -> u16 {
    2
}

fn default_output() -> PathBuf {
    PathBuf::from("batch_results.json")
}

fn default_format() -> String {
    "json".to_string()
}

fn default_task_timeout_secs() -> u64 {
    3600
}

impl Default for BatchSection {
    fn default() -> Self {
        Self {
            parallel: default_parallel(),
            base_port: default_base_port(),
            port_stride: default_port_stride(),
            output: default_output(),
            format: default_format(),
            task_timeout_secs: default_task_timeout_secs(),
        }
    }
}

/// [worker] 段：每个 worker 启动的两个进程（argv 中的 `{port}` 会被替换为分配的端口）
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSection {
    #[serde(default = "default_coordinator_command")]
    pub coordinator_command: Vec<String>,
    #[serde(default)]
    pub agent_command: Vec<String>,
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
    /// SIGTERM 之后等待多久再 SIGKILL（秒）
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    #[serde(default = "default_coordinator_ready_path")]
    pub coordinator_ready_path: String,
    #[serde(default = "default_agent_ready_path")]
    pub agent_ready_path: String,
    /// 子进程 stdout/stderr 写入 `<log_dir>/<task_id>_<role>.log`；未设置时丢弃
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_coordinator_command() -> Vec<String> {
    vec![
        "bee-eval".into(),
        "coordinator".into(),
        "--port".into(),
        "{port}".into(),
    ]
}

fn default_ready_timeout_secs() -> u64 {
    30
}

fn default_grace_period_secs() -> u64 {
    5
}

fn default_coordinator_ready_path() -> String {
    "/health".to_string()
}

fn default_agent_ready_path() -> String {
    "/.well-known/agent.json".to_string()
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            coordinator_command: default_coordinator_command(),
            agent_command: Vec::new(),
            ready_timeout_secs: default_ready_timeout_secs(),
            grace_period_secs: default_grace_period_secs(),
            coordinator_ready_path: default_coordinator_ready_path(),
            agent_ready_path: default_agent_ready_path(),
            log_dir: None,
        }
    }
}

/// [environment] 段：任务环境服务地址
#[derive(Debug, Clone, Deserialize)]
pub struct EnvironmentSection {
    #[serde(default = "default_environment_url")]
    pub url: String,
    #[serde(default = "default_experiment_name")]
    pub experiment_name: String,
}

fn default_environment_url() -> String {
    "http://127.0.0.1:9000".to_string()
}

fn default_experiment_name() -> String {
    "bee_eval".to_string()
}

impl Default for EnvironmentSection {
    fn default() -> Self {
        Self {
            url: default_environment_url(),
            experiment_name: default_experiment_name(),
        }
    }
}

/// [trace] 段：轨迹 JSONL 输出目录；未设置时只保留在内存
#[derive(Debug, Clone, Deserialize)]
pub struct TraceSection {
    #[serde(default = "default_trace_dir")]
    pub dir: Option<PathBuf>,
}

fn default_trace_dir() -> Option<PathBuf> {
    Some(PathBuf::from("traces"))
}

impl Default for TraceSection {
    fn default() -> Self {
        Self {
            dir: default_trace_dir(),
        }
    }
}

impl AppConfig {
    /// 校验会话与压缩参数（所有命令都需要）
    pub fn validate(&self) -> Result<(), EvalError> {
        if self.session.max_steps == 0 {
            return Err(EvalError::Config("session.max_steps must be at least 1".into()));
        }
        let c = &self.compression;
        if c.recent_window + 3 > c.max_messages {
            return Err(EvalError::Config(format!(
                "compression.recent_window ({}) + 3 must not exceed compression.max_messages ({})",
                c.recent_window, c.max_messages
            )));
        }
        Ok(())
    }

    /// 批量模式额外校验：并行度、端口间距与 worker 命令
    pub fn validate_batch(&self) -> Result<(), EvalError> {
        self.validate()?;
        if self.batch.parallel == 0 {
            return Err(EvalError::Config("batch.parallel must be at least 1".into()));
        }
        if self.batch.port_stride < 2 {
            return Err(EvalError::Config(format!(
                "batch.port_stride must be at least 2, got {}",
                self.batch.port_stride
            )));
        }
        if self.worker.coordinator_command.is_empty() || self.worker.agent_command.is_empty() {
            return Err(EvalError::Config(
                "worker.coordinator_command and worker.agent_command must both be set".into(),
            ));
        }
        Ok(())
    }
}

/// 从 config 目录加载配置，环境变量 BEE_EVAL__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BEE_EVAL__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BEE_EVAL")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.session.max_steps, 30);
        assert_eq!(cfg.session.max_reminders, 3);
        assert_eq!(cfg.compression.max_messages, 20);
        assert_eq!(cfg.compression.recent_window, 12);
        assert_eq!(cfg.batch.base_port, 9001);
        assert_eq!(cfg.worker.grace_period_secs, 5);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eval.toml");
        std::fs::write(
            &path,
            "[session]\nmax_steps = 12\n\n[batch]\nparallel = 4\nbase_port = 10001\n",
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.session.max_steps, 12);
        assert_eq!(cfg.session.max_reminders, 3);
        assert_eq!(cfg.batch.parallel, 4);
        assert_eq!(cfg.batch.base_port, 10001);
        assert_eq!(cfg.compression.max_messages, 20);
    }

    #[test]
    fn test_validate_rejects_window_too_large() {
        let mut cfg = AppConfig::default();
        cfg.compression.recent_window = 18;
        assert!(matches!(cfg.validate(), Err(EvalError::Config(_))));
    }

    #[test]
    fn test_validate_batch() {
        let mut cfg = AppConfig::default();
        assert!(cfg.validate_batch().is_err(), "agent command missing");
        cfg.worker.agent_command = vec!["agent".into(), "--port".into(), "{port}".into()];
        assert!(cfg.validate_batch().is_ok());
        cfg.batch.port_stride = 1;
        assert!(cfg.validate_batch().is_err());
    }
}
