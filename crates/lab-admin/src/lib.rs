//! # Lab管理模块
//!
//! 提供配置加载、日志初始化、快照备份，以及按配置组装工作流引擎

pub mod config;
pub mod logging;

use anyhow::{Context, Result};
use lab_core::Actor;
use lab_storage::{AttachmentUploader, LocalDirUploader, SnapshotInfo, SnapshotManager};
use lab_workflow::LabWorkflowEngine;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use config::{ConfigManager, LabConfig, LoggingConfig};
pub use logging::init_tracing;

/// 系统管理器
///
/// 持有配置、工作流引擎和快照管理器
#[derive(Debug)]
pub struct LabAdmin {
    /// 配置管理器
    config_manager: Arc<ConfigManager>,
    /// 工作流引擎
    engine: LabWorkflowEngine,
    /// 快照管理器
    snapshots: SnapshotManager,
}

impl LabAdmin {
    /// 加载配置并创建系统管理器
    pub async fn new(config_path: Option<&str>) -> Result<Self> {
        let config_manager = Arc::new(ConfigManager::new(config_path)?);
        Self::from_manager(config_manager).await
    }

    /// 使用已加载的配置管理器
    pub async fn from_manager(config_manager: Arc<ConfigManager>) -> Result<Self> {
        let config = config_manager.get_config().await;
        let store = config.store_backend()?.open();
        let uploader: Option<Arc<dyn AttachmentUploader>> = if config.uploads.enabled {
            Some(Arc::new(LocalDirUploader::new(
                &config.uploads.dir,
                config.uploads.public_base_url.clone(),
            )))
        } else {
            None
        };
        let engine = LabWorkflowEngine::with_options(store, config.workflow_settings(), Actor::system(), uploader);
        let snapshots = SnapshotManager::new(&config.snapshot.dir, config.snapshot.retention);

        tracing::info!(
            "Lab administration ready (store backend: {}, uploads: {})",
            config.store.backend,
            config.uploads.enabled
        );
        Ok(Self {
            config_manager,
            engine,
            snapshots,
        })
    }

    /// 获取配置管理器
    pub fn config_manager(&self) -> &Arc<ConfigManager> {
        &self.config_manager
    }

    /// 获取工作流引擎
    pub fn engine(&self) -> &LabWorkflowEngine {
        &self.engine
    }

    /// 为当前状态文档创建快照
    pub async fn create_snapshot(&self) -> Result<SnapshotInfo> {
        let document = self.engine.store().snapshot().await?;
        self.snapshots
            .create(&document)
            .await
            .context("Failed to create snapshot")
    }

    /// 从快照恢复并整体替换状态文档
    pub async fn restore_snapshot(&self, file_path: &Path) -> Result<()> {
        let document = self
            .snapshots
            .restore(file_path)
            .await
            .with_context(|| format!("Failed to restore snapshot {}", file_path.display()))?;
        self.engine.store().replace(document).await?;
        tracing::info!("State document replaced from {}", file_path.display());
        Ok(())
    }

    pub async fn list_snapshots(&self) -> Result<Vec<PathBuf>> {
        Ok(self.snapshots.list().await?)
    }
}
