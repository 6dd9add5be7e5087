//! 被评测 agent：客户端抽象、HTTP（JSON-RPC）实现、脚本化 Mock

pub mod http;
pub mod mock;
pub mod traits;

pub use http::HttpPolicyAgent;
pub use mock::ScriptedAgent;
pub use traits::PolicyAgent;
