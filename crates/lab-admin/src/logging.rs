//! 日志初始化

use crate::config::LoggingConfig;
use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

/// 按配置安装全局 tracing 订阅者
///
/// `RUST_LOG` 存在时优先于配置中的级别。重复安装返回错误。
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives),
        _ => EnvFilter::try_new(&config.level),
    }
    .with_context(|| format!("Invalid log filter: {}", config.level))?;

    let installed = match config.format.as_str() {
        "pretty" => tracing_subscriber::fmt().with_env_filter(filter).pretty().try_init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .with_target(false)
            .try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_filter() {
        let config = LoggingConfig {
            level: "lab_workflow=loud".to_string(),
            format: "compact".to_string(),
        };
        if std::env::var("RUST_LOG").is_err() {
            assert!(init_tracing(&config).is_err());
        }
    }
}
