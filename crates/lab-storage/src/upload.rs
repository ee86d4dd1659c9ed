//! 附件上传

use async_trait::async_trait;
use lab_core::{LabError, Result};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// 附件上传接口，返回可访问的远程地址
#[async_trait]
pub trait AttachmentUploader: Send + Sync {
    async fn upload(&self, file_name: &str, data: &[u8]) -> Result<String>;
}

/// 上传到本地目录
#[derive(Debug, Clone)]
pub struct LocalDirUploader {
    base_path: PathBuf,
    /// 对外访问前缀，缺省时返回 `file://` 地址
    public_base_url: Option<String>,
}

impl LocalDirUploader {
    pub fn new(base_path: impl Into<PathBuf>, public_base_url: Option<String>) -> Self {
        Self {
            base_path: base_path.into(),
            public_base_url,
        }
    }
}

#[async_trait]
impl AttachmentUploader for LocalDirUploader {
    async fn upload(&self, file_name: &str, data: &[u8]) -> Result<String> {
        // 每次上传放在独立目录下，同名文件互不覆盖
        let relative = format!("{}/{}", Uuid::new_v4(), sanitize_file_name(file_name)?);
        let full_path = self.base_path.join(&relative);
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full_path, data).await?;
        debug!("Stored attachment {} ({} bytes)", full_path.display(), data.len());

        Ok(match &self.public_base_url {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), relative),
            None => format!("file://{}", full_path.display()),
        })
    }
}

/// 只保留文件名部分，拒绝空名称
fn sanitize_file_name(file_name: &str) -> Result<String> {
    let name = Path::new(file_name.trim())
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if name.is_empty() {
        return Err(LabError::validation("attachment file name is empty"));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_to_public_url() {
        let dir = tempfile::tempdir().unwrap();
        let uploader = LocalDirUploader::new(dir.path(), Some("https://files.lab/".to_string()));

        let url = uploader.upload("../../arcada.stl", b"solid").await.unwrap();
        let relative = url.strip_prefix("https://files.lab/").unwrap();
        assert!(relative.ends_with("/arcada.stl"));
        assert!(!relative.contains(".."));
        assert!(dir.path().join(relative).exists());
    }

    #[tokio::test]
    async fn test_upload_same_name_keeps_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let uploader = LocalDirUploader::new(dir.path(), Some("https://files.lab".to_string()));

        let first = uploader.upload("frontal.jpg", b"primeira").await.unwrap();
        let second = uploader.upload("frontal.jpg", b"segunda").await.unwrap();
        assert_ne!(first, second);

        let read = |url: &str| {
            let relative = url.strip_prefix("https://files.lab/").unwrap();
            std::fs::read(dir.path().join(relative)).unwrap()
        };
        assert_eq!(read(&first), b"primeira");
        assert_eq!(read(&second), b"segunda");
    }

    #[tokio::test]
    async fn test_upload_to_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let uploader = LocalDirUploader::new(dir.path(), None);

        let url = uploader.upload("oclusal.jpg", b"x").await.unwrap();
        let path = url.strip_prefix("file://").unwrap();
        assert!(path.ends_with("oclusal.jpg"));
        assert_eq!(std::fs::read(path).unwrap(), b"x");
    }

    #[tokio::test]
    async fn test_upload_rejects_empty_name() {
        let dir = tempfile::tempdir().unwrap();
        let uploader = LocalDirUploader::new(dir.path(), None);
        assert!(uploader.upload("  ", b"x").await.is_err());
    }
}
