//! 文档快照备份与恢复

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use lab_core::{Document, LabError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const SNAPSHOT_PREFIX: &str = "snapshot-";
const SNAPSHOT_SUFFIX: &str = ".json.gz";

/// 快照信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub file_path: PathBuf,
    pub checksum: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// 快照管理器
#[derive(Debug, Clone)]
pub struct SnapshotManager {
    dir: PathBuf,
    /// 保留的快照数量
    retention: usize,
}

impl SnapshotManager {
    pub fn new(dir: impl Into<PathBuf>, retention: usize) -> Self {
        Self {
            dir: dir.into(),
            retention: retention.max(1),
        }
    }

    /// 写入压缩快照及其校验和
    pub async fn create(&self, document: &Document) -> Result<SnapshotInfo> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let json = serde_json::to_vec(document)?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json)?;
        let compressed = encoder.finish()?;
        let checksum = calculate_hash(&compressed);

        let created_at = Utc::now();
        let file_name = format!(
            "{}{}{}",
            SNAPSHOT_PREFIX,
            created_at.format("%Y%m%dT%H%M%S%.3fZ"),
            SNAPSHOT_SUFFIX
        );
        let file_path = self.dir.join(file_name);
        tokio::fs::write(&file_path, &compressed).await?;
        tokio::fs::write(checksum_path(&file_path), &checksum).await?;

        info!(
            "Snapshot written: {} ({} bytes)",
            file_path.display(),
            compressed.len()
        );

        self.prune().await?;

        Ok(SnapshotInfo {
            file_path,
            checksum,
            size: compressed.len() as u64,
            created_at,
        })
    }

    /// 校验并恢复快照
    pub async fn restore(&self, file_path: &Path) -> Result<Document> {
        let compressed = tokio::fs::read(file_path).await?;
        let expected = tokio::fs::read_to_string(checksum_path(file_path)).await?;
        let actual = calculate_hash(&compressed);
        if expected.trim() != actual {
            return Err(LabError::Storage(format!(
                "snapshot checksum mismatch for {}",
                file_path.display()
            )));
        }

        let mut json = Vec::new();
        GzDecoder::new(compressed.as_slice()).read_to_end(&mut json)?;
        let document = serde_json::from_slice(&json)?;
        info!("Snapshot restored from {}", file_path.display());
        Ok(document)
    }

    /// 按时间升序列出快照文件
    pub async fn list(&self) -> Result<Vec<PathBuf>> {
        let mut snapshots = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(snapshots),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(SNAPSHOT_PREFIX) && name.ends_with(SNAPSHOT_SUFFIX) {
                snapshots.push(entry.path());
            }
        }
        // 文件名中的时间戳可直接按字典序排序
        snapshots.sort();
        Ok(snapshots)
    }

    /// 清理超出保留数量的旧快照
    async fn prune(&self) -> Result<()> {
        let snapshots = self.list().await?;
        if snapshots.len() <= self.retention {
            return Ok(());
        }
        let expired = snapshots.len() - self.retention;
        for path in snapshots.into_iter().take(expired) {
            info!("Removing expired snapshot: {}", path.display());
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!("Failed to delete snapshot {}: {}", path.display(), e);
            }
            let _ = tokio::fs::remove_file(checksum_path(&path)).await;
        }
        Ok(())
    }
}

fn checksum_path(file_path: &Path) -> PathBuf {
    let mut name = file_path.as_os_str().to_owned();
    name.push(".sha256");
    PathBuf::from(name)
}

/// 计算SHA-256哈希值
fn calculate_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
