//! 工具层：操作发现网关与操作执行器

pub mod discovery;
pub mod executor;

pub use discovery::{DiscoveryGateway, MetaOperation, Summary, META_DOMAIN};
pub use executor::{CallRecord, OperationExecutor};
