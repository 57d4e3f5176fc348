// Device records - serialized read-modify-write over the DeviceStore port
//
// Every component that mutates a device record goes through one shared
// DeviceRecords instance so updates to the same serial never interleave.

use crate::application::keyed_locks::KeyedLocks;
use crate::domain::DeviceRecord;
use crate::error::Result;
use crate::port::DeviceStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct DeviceRecords {
    store: Arc<dyn DeviceStore>,
    locks: KeyedLocks,
}

impl DeviceRecords {
    pub fn new(store: Arc<dyn DeviceStore>) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
        }
    }

    pub async fn read(&self, serial: &str) -> Result<DeviceRecord> {
        self.store.read(serial).await
    }

    /// Apply `f` to the record and write it back.
    ///
    /// Nothing is written when `f` returns an error.
    pub async fn update<R, F>(&self, serial: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut DeviceRecord) -> Result<R>,
    {
        let _guard = self.locks.acquire(serial).await;
        let mut record = self.store.read(serial).await?;
        let out = f(&mut record)?;
        self.store.write(&record).await?;
        Ok(out)
    }

    pub async fn known_serials(&self) -> Result<Vec<String>> {
        self.store.known_serials().await
    }

    pub async fn remove(&self, serial: &str) -> Result<bool> {
        let _guard = self.locks.acquire(serial).await;
        self.store.remove(serial).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BackupRecord;
    use crate::error::AppError;
    use crate::port::device_store::mocks::InMemoryDeviceStore;
    use chrono::Utc;

    #[tokio::test]
    async fn test_concurrent_updates_are_not_lost() {
        let store = Arc::new(InMemoryDeviceStore::new());
        let records = DeviceRecords::new(store.clone());

        let mut handles = Vec::new();
        for i in 0..20 {
            let records = records.clone();
            handles.push(tokio::spawn(async move {
                records
                    .update("ABC123", |r| {
                        r.backups.push(BackupRecord::succeeded(
                            format!("b{}", i),
                            Utc::now(),
                            true,
                            "/x",
                            "t",
                        ));
                        Ok(())
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.get("ABC123").unwrap().backups.len(), 20);
    }

    #[tokio::test]
    async fn test_failed_closure_writes_nothing() {
        let store = Arc::new(InMemoryDeviceStore::new());
        let records = DeviceRecords::new(store.clone());

        let result: Result<()> = records
            .update("ABC123", |_| Err(AppError::NotFound("backup".into())))
            .await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert_eq!(store.write_count(), 0);
    }
}
