//! # 隐形矫治器实验室
//!
//! 从口扫接收到牙套交付的病例与生产工作流

pub use lab_core as core;
pub use lab_storage as storage;
pub use lab_workflow as workflow;

pub use lab_workflow::{LabWorkflowEngine, WorkflowSettings};
