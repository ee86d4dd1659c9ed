//! 错误定义模块

use thiserror::Error;

/// 实验室系统统一错误类型
#[derive(Error, Debug)]
pub enum LabError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("存储错误: {0}")]
    Storage(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("扫描 {0} 尚未审核通过")]
    ScanNotApproved(String),

    #[error("扫描 {0} 已关联到病例")]
    ScanAlreadyLinked(String),

    #[error("缺少必需文件: {}", .0.join(", "))]
    MissingRequiredFiles(Vec<String>),

    #[error("矫治器产品的牙套总数必须大于0")]
    NoTraysPlanned,

    #[error("病例 {0} 没有可用的生产订单")]
    NoProductionOrder(String),

    #[error("病例 {0} 尚未向牙医交付任何批次")]
    NoDentistDelivery(String),

    #[error("牙套 {tray} 状态不能从 {from} 回退到 {to}")]
    TrayRegression { tray: u32, from: String, to: String },

    #[error("无效状态转换: 从 {from} 到 {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("前置条件不满足: {0}")]
    Precondition(String),
}

impl LabError {
    /// 是否为业务前置条件失败（面向用户的可预期错误）
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            LabError::ScanNotApproved(_)
                | LabError::ScanAlreadyLinked(_)
                | LabError::MissingRequiredFiles(_)
                | LabError::NoTraysPlanned
                | LabError::NoProductionOrder(_)
                | LabError::NoDentistDelivery(_)
                | LabError::TrayRegression { .. }
                | LabError::InvalidStateTransition { .. }
                | LabError::Precondition(_)
        )
    }

    pub fn validation(message: impl Into<String>) -> Self {
        LabError::Validation(message.into())
    }

    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        LabError::NotFound(format!("{} {}", what, id))
    }
}

/// 实验室系统统一结果类型
pub type Result<T> = std::result::Result<T, LabError>;
