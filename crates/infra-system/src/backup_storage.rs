// Filesystem backup storage
// Artifacts live under `<root>/<serial>/<backup_id>`.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

use devkeep_core::error::{AppError, Result};
use devkeep_core::port::BackupStorage;

pub struct FsBackupStorage {
    root: PathBuf,
}

impl FsBackupStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Paths handed to `remove` must stay inside the storage root
    fn contained(&self, path: &Path) -> Result<()> {
        let escapes = path
            .components()
            .any(|c| matches!(c, Component::ParentDir));
        if escapes || !path.starts_with(&self.root) || path == self.root {
            return Err(AppError::Validation(format!(
                "path outside backup storage: {}",
                path.display()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl BackupStorage for FsBackupStorage {
    fn backup_path(&self, serial: &str, backup_id: &str) -> PathBuf {
        self.root.join(serial).join(backup_id)
    }

    async fn prepare(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path).await?;
        debug!(path = %path.display(), "Backup directory prepared");
        Ok(())
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        self.contained(path)?;

        let metadata = match tokio::fs::symlink_metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let result = if metadata.is_dir() {
            tokio::fs::remove_dir_all(path).await
        } else {
            tokio::fs::remove_file(path).await
        };
        match result {
            Ok(()) => {
                info!(path = %path.display(), "Backup artifact removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_device(&self, serial: &str) -> Result<()> {
        self.remove(&self.root.join(serial)).await
    }
}
