//! 配置管理
//!
//! 默认值、配置文件和 `LAB_` 前缀环境变量三层合并，加载后统一校验

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use lab_storage::StoreBackend;
use lab_workflow::WorkflowSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

/// 配置管理器
#[derive(Debug)]
pub struct ConfigManager {
    /// 配置数据
    config: Arc<RwLock<LabConfig>>,
    /// 配置文件路径，未指定时只用默认值和环境变量
    config_path: Option<String>,
    /// 配置验证器
    validator: ConfigValidator,
}

/// 实验室系统完整配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabConfig {
    /// 状态存储
    pub store: StoreConfig,
    /// 工作流参数
    pub workflow: WorkflowConfig,
    /// 快照
    pub snapshot: SnapshotConfig,
    /// 附件上传
    pub uploads: UploadConfig,
    /// 日志
    pub logging: LoggingConfig,
}

/// 状态存储配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// `memory` 或 `json_file`
    pub backend: String,
    /// JSON文件路径
    pub path: Option<String>,
}

/// 工作流配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub default_change_every_days: u32,
    pub replenishment_lead_days: u32,
}

/// 快照配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub dir: String,
    /// 保留的快照数量
    pub retention: usize,
}

/// 附件上传配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub enabled: bool,
    pub dir: String,
    pub public_base_url: Option<String>,
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别或完整的过滤表达式
    pub level: String,
    /// `pretty` 或 `compact`
    pub format: String,
}

/// 配置验证器
#[derive(Debug)]
pub struct ConfigValidator {
    /// 验证规则
    validation_rules: Vec<ValidationRule>,
}

/// 验证规则
#[derive(Debug)]
struct ValidationRule {
    /// 字段路径
    field_path: &'static str,
    /// 验证函数
    validator: fn(&LabConfig) -> Result<()>,
}

impl ConfigManager {
    /// 创建新的配置管理器
    pub fn new(config_path: Option<&str>) -> Result<Self> {
        let config = Self::load_config(config_path)?;
        let validator = ConfigValidator::new();
        validator.validate(&config)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path: config_path.map(str::to_string),
            validator,
        })
    }

    /// 默认值 < 配置文件 < 环境变量
    fn load_config(config_path: Option<&str>) -> Result<LabConfig> {
        let mut builder = Config::builder()
            .add_source(Config::try_from(&LabConfig::default()).context("Failed to build default configuration")?);
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix("LAB")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration sources")?;

        let config: LabConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        match config_path {
            Some(path) => info!("Configuration loaded from: {}", path),
            None => info!("Configuration loaded from defaults and environment"),
        }
        Ok(config)
    }

    /// 获取配置
    pub async fn get_config(&self) -> LabConfig {
        let config = self.config.read().await;
        config.clone()
    }

    /// 更新配置并写回文件
    pub async fn update_config(&self, new_config: LabConfig) -> Result<()> {
        self.validator.validate(&new_config)?;

        {
            let mut config = self.config.write().await;
            *config = new_config;
        }

        self.save_config().await?;
        info!("Configuration updated successfully");
        Ok(())
    }

    async fn save_config(&self) -> Result<()> {
        let Some(path) = &self.config_path else {
            return Ok(());
        };
        let config_str = self.get_config().await.to_toml()?;
        tokio::fs::write(path, config_str)
            .await
            .context("Failed to write configuration file")?;

        info!("Configuration saved to: {}", path);
        Ok(())
    }

    /// 重新加载配置
    pub async fn reload_config(&self) -> Result<()> {
        let new_config = Self::load_config(self.config_path.as_deref())?;
        self.update_config(new_config).await
    }

    /// 按点分路径读取配置值，例如 `workflow.replenishment_lead_days`
    pub async fn get_value<T>(&self, path: &str) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let config = self.config.read().await;
        let config_json = serde_json::to_value(&*config).context("Failed to serialize config to JSON")?;

        let mut current = &config_json;
        for part in path.split('.') {
            current = current
                .get(part)
                .ok_or_else(|| anyhow::anyhow!("Configuration path not found: {}", path))?;
        }

        serde_json::from_value(current.clone()).context("Failed to deserialize configuration value")
    }

    /// 验证配置
    pub async fn validate_config(&self) -> Result<()> {
        let config = self.config.read().await;
        self.validator.validate(&config)
    }
}

impl LabConfig {
    /// 从指定文件加载，叠加环境变量
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_string_lossy().to_string();
        ConfigManager::load_config(Some(&path))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    pub fn store_backend(&self) -> Result<StoreBackend> {
        StoreBackend::parse(&self.store.backend, self.store.path.as_deref())
            .map_err(|e| anyhow::anyhow!("{}", e))
    }

    pub fn workflow_settings(&self) -> WorkflowSettings {
        WorkflowSettings {
            default_change_every_days: self.workflow.default_change_every_days,
            replenishment_lead_days: self.workflow.replenishment_lead_days,
        }
    }
}

impl ConfigValidator {
    /// 创建新的配置验证器
    pub fn new() -> Self {
        let validation_rules = vec![
            ValidationRule {
                field_path: "store.backend",
                validator: |config| config.store_backend().map(|_| ()),
            },
            ValidationRule {
                field_path: "workflow.default_change_every_days",
                validator: |config| {
                    if config.workflow.default_change_every_days == 0 {
                        Err(anyhow::anyhow!("Change interval cannot be 0"))
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "snapshot.retention",
                validator: |config| {
                    if config.snapshot.retention == 0 {
                        Err(anyhow::anyhow!("Snapshot retention cannot be 0"))
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "uploads.dir",
                validator: |config| {
                    if config.uploads.enabled && config.uploads.dir.trim().is_empty() {
                        Err(anyhow::anyhow!("Upload directory is required when uploads are enabled"))
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "logging.format",
                validator: |config| match config.logging.format.as_str() {
                    "pretty" | "compact" => Ok(()),
                    other => Err(anyhow::anyhow!("Unknown log format: {}", other)),
                },
            },
        ];

        Self { validation_rules }
    }

    /// 验证配置
    pub fn validate(&self, config: &LabConfig) -> Result<()> {
        for rule in &self.validation_rules {
            if let Err(e) = (rule.validator)(config) {
                error!("Configuration validation failed for {}: {}", rule.field_path, e);
                return Err(anyhow::anyhow!("Invalid {}: {}", rule.field_path, e));
            }
        }
        Ok(())
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            workflow: WorkflowConfig::default(),
            snapshot: SnapshotConfig::default(),
            uploads: UploadConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: "json_file".to_string(),
            path: Some("./data/lab.json".to_string()),
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        let settings = WorkflowSettings::default();
        Self {
            default_change_every_days: settings.default_change_every_days,
            replenishment_lead_days: settings.replenishment_lead_days,
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            dir: "./data/snapshots".to_string(),
            retention: 10,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: "./data/uploads".to_string(),
            public_base_url: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = LabConfig::default();
        assert!(ConfigValidator::new().validate(&config).is_ok());
        assert_eq!(config.workflow_settings(), WorkflowSettings::default());
        assert_eq!(
            config.store_backend().unwrap(),
            StoreBackend::JsonFile("./data/lab.json".into())
        );
    }

    #[test]
    fn test_validator_rejects_bad_values() {
        let validator = ConfigValidator::new();

        let mut config = LabConfig::default();
        config.workflow.default_change_every_days = 0;
        assert!(validator.validate(&config).is_err());

        let mut config = LabConfig::default();
        config.store.backend = "sqlite".to_string();
        assert!(validator.validate(&config).is_err());

        let mut config = LabConfig::default();
        config.store.path = None;
        assert!(validator.validate(&config).is_err());

        let mut config = LabConfig::default();
        config.logging.format = "json".to_string();
        assert!(validator.validate(&config).is_err());
    }

    #[test]
    fn test_load_from_file_with_partial_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lab.toml");
        std::fs::write(
            &path,
            "[store]\nbackend = \"memory\"\n\n[workflow]\nreplenishment_lead_days = 5\n",
        )
        .unwrap();

        let config = LabConfig::from_file(&path).unwrap();
        assert_eq!(config.store.backend, "memory");
        assert_eq!(config.workflow.replenishment_lead_days, 5);
        assert_eq!(config.workflow.default_change_every_days, 15);
        assert_eq!(config.snapshot.retention, 10);
    }

    #[test]
    fn test_to_toml_round_trip() {
        let config = LabConfig::default();
        let text = config.to_toml().unwrap();
        assert!(text.contains("[workflow]"));

        let parsed: LabConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[tokio::test]
    async fn test_manager_get_value_and_update() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lab.toml");
        std::fs::write(&path, "[store]\nbackend = \"memory\"\n").unwrap();
        let path_str = path.to_string_lossy().to_string();

        let manager = ConfigManager::new(Some(&path_str)).unwrap();
        let lead: u32 = manager.get_value("workflow.replenishment_lead_days").await.unwrap();
        assert_eq!(lead, 0);
        assert!(manager.get_value::<u32>("workflow.missing").await.is_err());

        let mut updated = manager.get_config().await;
        updated.workflow.replenishment_lead_days = 3;
        manager.update_config(updated).await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("replenishment_lead_days = 3"));

        let mut invalid = manager.get_config().await;
        invalid.snapshot.retention = 0;
        assert!(manager.update_config(invalid).await.is_err());
        assert_eq!(manager.get_config().await.snapshot.retention, 10);
    }
}
