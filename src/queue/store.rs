use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::models::QueuedDeletion;
use crate::core::error::{PipelineError, Result};


/// Snapshot persistence for the offline queue. The queue saves the whole item
/// list after every mutation and loads it once at startup.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn load(&self) -> Result<Vec<QueuedDeletion>>;

    async fn save(&self, items: &[QueuedDeletion]) -> Result<()>;
}


#[derive(Default)]
pub struct MemoryStore {
    items: Mutex<Vec<QueuedDeletion>>,
    saves: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }


    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn load(&self) -> Result<Vec<QueuedDeletion>> {
        Ok(self.items.lock().clone())
    }

    async fn save(&self, items: &[QueuedDeletion]) -> Result<()> {
        *self.items.lock() = items.to_vec();
        *self.saves.lock() += 1;
        Ok(())
    }
}


/// JSON file written via temp-file-and-rename so a crash mid-write leaves the
/// previous snapshot intact.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        info!("FileStore using {}", path.display());
        Self { path }
    }


    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "offline-queue.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl PersistentStore for FileStore {
    async fn load(&self) -> Result<Vec<QueuedDeletion>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No queue file at {}, starting empty", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&raw).map_err(|e| {
            PipelineError::Storage(format!("corrupt queue file {}: {}", self.path.display(), e))
        })
    }

    async fn save(&self, items: &[QueuedDeletion]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_vec_pretty(items)?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, json).await?;
        tokio::fs::rename(&temp, &self.path).await?;

        debug!("Persisted {} queued deletions to {}", items.len(), self.path.display());
        Ok(())
    }
}
