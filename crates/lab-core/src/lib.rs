//! # Lab Core
//!
//! 矫治器实验室系统的核心模块，提供应用状态文档、领域数据结构、错误定义和编号工具。

pub mod error;
pub mod models;
pub mod utils;

pub use error::{LabError, Result};
pub use models::*;
