//! agent 协议层：动作解析、动作 Schema、会话文本

pub mod action;
pub mod prompt;
pub mod schema;

pub use action::{extract_action_blocks, parse_action, Action};
pub use prompt::PROTOCOL_REMINDER;
pub use schema::action_schema_json;
