//! Bee Eval - 工具调用型 agent 评测命令行
//!
//! - `run`: 单个任务，进程内编排
//! - `coordinator`: 协调器 HTTP 服务（批量模式的 worker 进程）
//! - `batch`: 并行跑一批任务并导出报告
//! - `analyze`: 分析轨迹文件

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use bee_eval::agent::HttpPolicyAgent;
use bee_eval::config::{load_config, AppConfig};
use bee_eval::core::{Orchestrator, OrchestratorConfig, ShutdownManager};
use bee_eval::environment::HttpEnvironmentProvider;
use bee_eval::evaluator::summary::render_summary;
use bee_eval::evaluator::{
    allocate_ports, analyze_file, render_report, BatchScheduler, ExportFormat, ProcessTaskRunner, TaskSource,
    WorkerSettings,
};
use bee_eval::observability;
use bee_eval::server::{serve, CoordinatorState};

#[derive(Parser)]
#[command(name = "bee-eval")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Evaluation harness for tool-calling agents", long_about = None)]
struct Cli {
    /// Extra config file layered over config/default.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single task in-process against an agent endpoint
    Run {
        #[arg(long)]
        task_id: String,

        #[arg(long)]
        agent_url: String,

        /// Print the result as JSON instead of a report
        #[arg(long)]
        json: bool,
    },

    /// Serve the coordinator HTTP API (GET /health, POST /evaluate)
    Coordinator {
        #[arg(long)]
        port: u16,

        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// Evaluate many tasks with parallel worker processes
    Batch {
        /// Comma-separated task ids
        #[arg(long, conflicts_with_all = ["task_file", "split"])]
        task_ids: Option<String>,

        /// File with one task id per line
        #[arg(long, conflicts_with = "split")]
        task_file: Option<PathBuf>,

        /// Named split served by the environment
        #[arg(long)]
        split: Option<String>,

        /// Only run the first N tasks
        #[arg(long)]
        limit: Option<usize>,

        /// Number of worker slots
        #[arg(short, long)]
        parallel: Option<usize>,

        #[arg(long)]
        base_port: Option<u16>,

        #[arg(short, long)]
        output: Option<PathBuf>,

        /// json or csv
        #[arg(short, long)]
        format: Option<String>,
    },

    /// Print trajectory metrics for a trace file
    Analyze {
        trace: PathBuf,

        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init();
    let cli = Cli::parse();

    let config_file = cli.config.clone();
    let mut cfg = match load_config(config_file.clone()) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("Failed to load config ({}), using defaults", e);
            AppConfig::default()
        }
    };

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    match cli.command {
        Commands::Run {
            task_id,
            agent_url,
            json,
        } => {
            cfg.validate()?;
            let mut orchestrator = build_orchestrator(&cfg)?.with_cancel(shutdown.token());
            let agent = HttpPolicyAgent::new(agent_url, cfg.session.request_timeout());
            let outcome = orchestrator.run_task(&task_id, &agent).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome.result)?);
            } else {
                println!("Task:    {}", outcome.result.task_id);
                println!("Status:  {:?}", outcome.status);
                println!("Success: {}", outcome.result.success);
                println!("Steps:   {}", outcome.result.steps);
                if let Some(err) = &outcome.result.error {
                    println!("Error:   {err}");
                }
                if let Some(metrics) = &outcome.result.trajectory {
                    println!("\n{}", render_report(metrics));
                }
                if let Some(path) = &outcome.trace_path {
                    println!("Trace:   {}", path.display());
                }
            }
        }
        Commands::Coordinator { port, host } => {
            cfg.validate()?;
            let orchestrator = build_orchestrator(&cfg)?.with_cancel(shutdown.token());
            let state = Arc::new(CoordinatorState::new(orchestrator));
            serve(&host, port, state, shutdown.token()).await?;
        }
        Commands::Batch {
            task_ids,
            task_file,
            split,
            limit,
            parallel,
            base_port,
            output,
            format,
        } => {
            if let Some(p) = parallel {
                cfg.batch.parallel = p;
            }
            if let Some(port) = base_port {
                cfg.batch.base_port = port;
            }
            if let Some(path) = output {
                cfg.batch.output = path;
            }
            if let Some(f) = format {
                cfg.batch.format = f;
            }
            cfg.validate_batch()?;

            let source = match (task_ids, task_file, split) {
                (Some(ids), _, _) => TaskSource::Ids(TaskSource::parse_id_list(&ids)),
                (None, Some(path), _) => TaskSource::File(path),
                (None, None, Some(name)) => TaskSource::Split(name),
                (None, None, None) => bail!("one of --task-ids, --task-file or --split is required"),
            };
            let environment = HttpEnvironmentProvider::new(
                cfg.environment.url.clone(),
                cfg.environment.experiment_name.clone(),
                cfg.session.request_timeout(),
            );
            let tasks = source.resolve(&environment, limit).await?;
            if tasks.is_empty() {
                tracing::warn!("no tasks to run; writing an empty report");
            }

            let format: ExportFormat = cfg.batch.format.parse()?;
            let ports = allocate_ports(cfg.batch.base_port, cfg.batch.port_stride, cfg.batch.parallel)?;
            let runner = Arc::new(ProcessTaskRunner::new(WorkerSettings::from_app(&cfg, config_file.as_deref())));
            let scheduler = BatchScheduler::new(runner, ports, shutdown.token())
                .with_sink(cfg.batch.output.clone(), format);
            let report = scheduler.run(tasks).await;

            println!("{}", render_summary(&report));
            println!("Results written to {}", cfg.batch.output.display());
        }
        Commands::Analyze { trace, json } => {
            let metrics = analyze_file(&trace).with_context(|| format!("analyze {}", trace.display()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&metrics)?);
            } else {
                println!("{}", render_report(&metrics));
            }
        }
    }

    Ok(())
}

fn build_orchestrator(cfg: &AppConfig) -> Result<Orchestrator> {
    let provider = Arc::new(HttpEnvironmentProvider::new(
        cfg.environment.url.clone(),
        cfg.environment.experiment_name.clone(),
        cfg.session.request_timeout(),
    ));
    let orchestrator = Orchestrator::new(OrchestratorConfig::from_app(cfg), provider)?;
    Ok(orchestrator)
}
