//! Bee Eval - 工具调用型 agent 的评测框架
//!
//! 模块划分：
//! - **agent**: 被测策略 agent 的抽象（HTTP JSON-RPC 客户端 / 脚本化 mock）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 交互编排器、会话仓库、错误与协议提醒、优雅关闭
//! - **environment**: 任务环境抽象、操作目录、调用渲染与评分解析
//! - **evaluator**: 轨迹分析、结果汇总导出、批量调度与 worker 进程
//! - **memory**: 对话日志与压缩
//! - **protocol**: 动作格式、解析与提示词
//! - **server**: 协调器 HTTP 服务
//! - **tools**: 工具发现网关与操作执行器
//! - **trace**: 工具调用轨迹（JSONL）

pub mod agent;
pub mod config;
pub mod core;
pub mod environment;
pub mod evaluator;
pub mod memory;
pub mod observability;
pub mod protocol;
pub mod server;
pub mod tools;
pub mod trace;

pub use crate::core::{EvalError, Orchestrator, OrchestratorConfig, SessionOutcome};
pub use evaluator::{BatchReport, BatchScheduler, EvaluationResult};
