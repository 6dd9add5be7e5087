//! 被评测 agent 的客户端抽象
//!
//! 协调器每轮把（压缩后的）完整日志连同会话 context id 发给 agent，取回一条文本回复。

use async_trait::async_trait;

use crate::memory::Message;

#[async_trait]
pub trait PolicyAgent: Send + Sync {
    /// 发送日志并等待下一条回复
    async fn respond(&self, context_id: &str, messages: &[Message]) -> Result<String, String>;

    /// 用于日志的名字
    fn name(&self) -> &str {
        "policy-agent"
    }
}
