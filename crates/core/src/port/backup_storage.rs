// Backup Storage Port
// Location and lifecycle of backup artifacts

use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

#[async_trait]
pub trait BackupStorage: Send + Sync {
    /// Artifact location for a backup
    fn backup_path(&self, serial: &str, backup_id: &str) -> PathBuf;

    /// Create the artifact directory (and parents)
    async fn prepare(&self, path: &Path) -> Result<()>;

    /// Delete an artifact. Missing artifacts are not an error.
    async fn remove(&self, path: &Path) -> Result<()>;

    /// Delete every artifact of a device
    async fn remove_device(&self, serial: &str) -> Result<()>;
}

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Records calls without touching the filesystem
    #[derive(Default)]
    pub struct RecordingBackupStorage {
        prepared: Mutex<Vec<PathBuf>>,
        removed: Mutex<Vec<PathBuf>>,
        removed_devices: Mutex<Vec<String>>,
        fail_prepare: AtomicBool,
        fail_remove: AtomicBool,
    }

    impl RecordingBackupStorage {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn prepared(&self) -> Vec<PathBuf> {
            self.prepared.lock().unwrap().clone()
        }

        pub fn removed(&self) -> Vec<PathBuf> {
            self.removed.lock().unwrap().clone()
        }

        pub fn removed_devices(&self) -> Vec<String> {
            self.removed_devices.lock().unwrap().clone()
        }

        pub fn set_fail_prepare(&self, fail: bool) {
            self.fail_prepare.store(fail, Ordering::SeqCst);
        }

        pub fn set_fail_remove(&self, fail: bool) {
            self.fail_remove.store(fail, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl BackupStorage for RecordingBackupStorage {
        fn backup_path(&self, serial: &str, backup_id: &str) -> PathBuf {
            PathBuf::from("/backups").join(serial).join(backup_id)
        }

        async fn prepare(&self, path: &Path) -> Result<()> {
            if self.fail_prepare.load(Ordering::SeqCst) {
                return Err(AppError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "injected prepare failure",
                )));
            }
            self.prepared.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }

        async fn remove(&self, path: &Path) -> Result<()> {
            if self.fail_remove.load(Ordering::SeqCst) {
                return Err(AppError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "injected remove failure",
                )));
            }
            self.removed.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }

        async fn remove_device(&self, serial: &str) -> Result<()> {
            self.removed_devices.lock().unwrap().push(serial.to_string());
            Ok(())
        }
    }
}
