//! 评测结果：轨迹分析、结果汇总、批量调度与 worker 进程

pub mod analyzer;
pub mod batch;
pub mod summary;
pub mod worker;

pub use analyzer::{analyze, analyze_file, render_report, TrajectoryMetrics};
pub use batch::{BatchScheduler, TaskRunner, TaskSource};
pub use summary::{BatchReport, BatchSummary, EvaluationResult, ExportFormat};
pub use worker::{allocate_ports, PortPair, ProcessTaskRunner, WorkerSettings};
