//! # Lab存储模块
//!
//! 负责应用状态文档的持久化、单写者读改写、快照备份和附件上传。

pub mod snapshot;
pub mod storage;
pub mod upload;

pub use snapshot::*;
pub use storage::*;
pub use upload::*;
