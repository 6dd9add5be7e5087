//! 核心编排层：错误与恢复、会话仓库、关闭信号、交互编排器

pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod session;
pub mod shutdown;

pub use error::{EvalError, RecoveryAction};
pub use orchestrator::{Orchestrator, OrchestratorConfig, SessionOutcome};
pub use recovery::{RecoveryEngine, ReminderBudget, ReminderState};
pub use session::{Session, SessionArena, SessionStatus};
pub use shutdown::{ShutdownManager, ShutdownReason};
