//! 记忆层：会话日志条目与有界上下文压缩

pub mod compressor;
pub mod conversation;

pub use compressor::{extract_milestones, ConversationCompressor, SUMMARY_HEADER};
pub use conversation::{Message, Role};
