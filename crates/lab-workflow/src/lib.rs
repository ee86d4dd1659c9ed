//! # 实验室工作流模块
//!
//! 隐形矫治病例从口扫到交付的完整生产流程：
//! - 口扫接收：附件清单校验，审核通过的扫描转换为病例
//! - 病例生命周期：阶段推进、牙套状态、交付批次与患者佩戴登记、返工
//! - 生产订单流水线：订单状态、计划补货与提前生产订单
//! - 替换牙套库：按合同牙套数维护的不良与余量台账

pub mod audit;
pub mod case_lifecycle;
pub mod engine;
pub mod lab_orders;
pub mod registry;
pub mod replacement_bank;
pub mod scan_intake;
pub mod state_machine;

#[cfg(test)]
mod test_support;

// 重新导出主要类型
pub use audit::AuditLog;
pub use case_lifecycle::{CaseLifecycle, GenerateLabOrder, NewDeliveryLot, NewInstallation, ReworkRequest};
pub use engine::{LabWorkflowEngine, WorkflowSettings, WorkflowSystemOverview};
pub use lab_orders::{promoted_status, AdvanceQuantities, LabOrderPipeline, NewLabItem};
pub use registry::Registry;
pub use replacement_bank::{ReplacementBank, ReplacementBankSummary};
pub use scan_intake::{
    missing_required_files, AttachmentSource, NewAttachment, NewCaseFromScan, NewScan, ScanIntake,
};
pub use state_machine::{CaseEvent, CaseStateMachine, LabStatusMachine, TrayStateMachine, TrayTransition};
