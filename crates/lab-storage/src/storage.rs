//! 应用状态文档存储
//!
//! 存储后端只提供整份文档的读取和替换；[`StateStore`] 在其上用一把互斥锁
//! 串行化所有读改写，闭包失败时不写回，文档保持原样。

use async_trait::async_trait;
use lab_core::{Document, LabError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// 文档存储后端
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// 读取当前文档
    async fn load(&self) -> Result<Document>;

    /// 整体替换文档
    async fn save(&self, document: &Document) -> Result<()>;
}

/// 内存存储
#[derive(Debug, Default)]
pub struct MemoryStore {
    document: RwLock<Document>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(document: Document) -> Self {
        Self {
            document: RwLock::new(document),
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn load(&self) -> Result<Document> {
        Ok(self.document.read().await.clone())
    }

    async fn save(&self, document: &Document) -> Result<()> {
        *self.document.write().await = document.clone();
        Ok(())
    }
}

/// JSON文件存储
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DocumentStore for JsonFileStore {
    async fn load(&self) -> Result<Document> {
        match tokio::fs::read(&self.path).await {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Document file {} not found, starting empty", self.path.display());
                Ok(Document::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, document: &Document) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        // 先写临时文件再重命名，避免留下半份文档
        let data = serde_json::to_vec_pretty(document)?;
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, data).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

/// 单写者状态存储句柄
#[derive(Clone)]
pub struct StateStore {
    backend: Arc<dyn DocumentStore>,
    write_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore").finish_non_exhaustive()
    }
}

impl StateStore {
    pub fn new(backend: Arc<dyn DocumentStore>) -> Self {
        Self {
            backend,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// 基于内存后端的存储
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// 基于JSON文件的存储
    pub fn json_file(path: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(JsonFileStore::new(path)))
    }

    /// 在一致的文档视图上执行只读查询
    pub async fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Document) -> T + Send,
        T: Send,
    {
        let _guard = self.write_lock.lock().await;
        let document = self.backend.load().await?;
        Ok(f(&document))
    }

    /// 读改写：闭包返回 `Err` 时不保存
    pub async fn mutate<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Document) -> Result<T> + Send,
        T: Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut document = self.backend.load().await?;
        let value = f(&mut document)?;
        self.backend.save(&document).await?;
        Ok(value)
    }

    /// 当前文档的完整副本
    pub async fn snapshot(&self) -> Result<Document> {
        self.read(|document| document.clone()).await
    }

    /// 用给定文档整体替换
    pub async fn replace(&self, document: Document) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.backend.save(&document).await?;
        info!(
            "Document replaced ({} cases, {} lab items)",
            document.cases.len(),
            document.lab_items.len()
        );
        Ok(())
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// 存储后端类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    JsonFile(PathBuf),
}

impl StoreBackend {
    pub fn parse(kind: &str, path: Option<&str>) -> Result<Self> {
        match kind {
            "memory" => Ok(StoreBackend::Memory),
            "json_file" => path
                .map(|p| StoreBackend::JsonFile(PathBuf::from(p)))
                .ok_or_else(|| LabError::Config("json_file backend requires a path".to_string())),
            other => Err(LabError::Config(format!("unknown store backend: {}", other))),
        }
    }

    pub fn open(&self) -> StateStore {
        match self {
            StoreBackend::Memory => StateStore::in_memory(),
            StoreBackend::JsonFile(path) => StateStore::json_file(path.clone()),
        }
    }
}
