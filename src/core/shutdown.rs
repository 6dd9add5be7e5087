//! 优雅关闭处理
//!
//! Ctrl+C / SIGTERM 触发同一个 CancellationToken：
//! - 进程内会话的 agent / 环境往返立即结束，会话记为 interrupted
//! - 批量调度器不再领取新任务，已完成的任务结果照常落盘
//! - 协调器 HTTP 服务停止接收新连接

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// 触发关闭的信号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
}

impl ShutdownReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShutdownReason::Interrupt => "SIGINT",
            ShutdownReason::Terminate => "SIGTERM",
        }
    }
}

/// 关闭信号管理器
#[derive(Clone, Default)]
pub struct ShutdownManager {
    shutdown_token: CancellationToken,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取关闭 token（用于取消正在进行的等待）
    pub fn token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// 只有第一次调用会记录日志；返回本次是否真正触发了关闭
    pub fn shutdown(&self, reason: ShutdownReason) -> bool {
        if self.shutdown_token.is_cancelled() {
            tracing::debug!(signal = reason.as_str(), "shutdown already in progress");
            return false;
        }
        tracing::info!(signal = reason.as_str(), "shutdown requested, stopping in-flight work");
        self.shutdown_token.cancel();
        true
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                manager.shutdown(ShutdownReason::Interrupt);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    manager.shutdown(ShutdownReason::Terminate);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_cancels_token() {
        let manager = ShutdownManager::new();
        let token = manager.token();
        assert!(!token.is_cancelled());
        assert!(manager.shutdown(ShutdownReason::Interrupt));
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_second_signal_is_ignored() {
        let manager = ShutdownManager::new();
        assert!(manager.shutdown(ShutdownReason::Terminate));
        assert!(!manager.shutdown(ShutdownReason::Interrupt));
        assert!(manager.token().is_cancelled());
    }

    #[test]
    fn test_reason_names() {
        assert_eq!(ShutdownReason::Interrupt.as_str(), "SIGINT");
        assert_eq!(ShutdownReason::Terminate.as_str(), "SIGTERM");
    }
}
