// Device Service - device-level use cases spanning cache, schedules and storage

use crate::application::device_cache::DeviceCache;
use crate::application::records::DeviceRecords;
use crate::application::schedule::ScheduleManager;
use crate::domain::DeviceSnapshot;
use crate::error::Result;
use crate::port::BackupStorage;
use std::sync::Arc;
use tracing::info;

pub struct DeviceService {
    cache: Arc<DeviceCache>,
    schedules: Arc<ScheduleManager>,
    records: DeviceRecords,
    storage: Arc<dyn BackupStorage>,
}

impl DeviceService {
    pub fn new(
        cache: Arc<DeviceCache>,
        schedules: Arc<ScheduleManager>,
        records: DeviceRecords,
        storage: Arc<dyn BackupStorage>,
    ) -> Self {
        Self {
            cache,
            schedules,
            records,
            storage,
        }
    }

    /// Connected devices plus known disconnected ones
    pub async fn list_devices(&self) -> Vec<DeviceSnapshot> {
        self.cache.list_devices().await
    }

    pub async fn get_device(&self, serial: &str) -> Option<DeviceSnapshot> {
        self.cache.get_device_info(serial).await
    }

    /// Remove every trace of a device: cache entry, schedule, artifacts, record.
    ///
    /// Returns false if the device had no persisted record.
    pub async fn forget_device(&self, serial: &str) -> Result<bool> {
        // Evict first so a concurrent refresh cannot re-create the record
        self.cache.forget(serial).await;
        self.schedules.remove_schedule(serial).await;
        self.storage.remove_device(serial).await?;
        let existed = self.records.remove(serial).await?;

        info!(serial = %serial, existed = existed, "Device forgotten");
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::device_cache::DeviceCacheConfig;
    use crate::application::orchestrator::{OrchestratorConfig, TaskOrchestrator};
    use crate::application::schedule::ScheduleConfig;
    use crate::domain::ConnectionType;
    use crate::port::backup_storage::mocks::RecordingBackupStorage;
    use crate::port::device_protocol::mocks::MockDeviceTransport;
    use crate::port::device_store::mocks::InMemoryDeviceStore;
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use crate::port::time_provider::SystemTimeProvider;
    use crate::port::transfer_executor::mocks::ScriptedTransferExecutor;
    use crate::port::TimeProvider;

    #[tokio::test]
    async fn test_forget_device_removes_everything() {
        let store = Arc::new(InMemoryDeviceStore::new());
        let records = DeviceRecords::new(store.clone());
        let time: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
        let transport = MockDeviceTransport::new();
        transport.add_device("ABC123", "Alice's Phone", ConnectionType::Usb);
        let storage = Arc::new(RecordingBackupStorage::new());

        let cache = Arc::new(DeviceCache::new(
            Arc::new(transport.clone()),
            records.clone(),
            time.clone(),
            DeviceCacheConfig::default(),
        ));
        let orchestrator = TaskOrchestrator::new(
            records.clone(),
            Arc::new(ScriptedTransferExecutor::new()),
            storage.clone(),
            time.clone(),
            Arc::new(SequentialIdProvider::new()),
            OrchestratorConfig::default(),
        );
        let schedules = Arc::new(ScheduleManager::new(
            orchestrator,
            cache.clone(),
            records.clone(),
            time,
            ScheduleConfig::default(),
        ));
        let service = DeviceService::new(cache.clone(), schedules.clone(), records, storage.clone());

        assert!(service.get_device("ABC123").await.unwrap().available);
        assert!(schedules.set_schedule("ABC123", "0 2 * * *", 3).await);

        assert!(service.forget_device("ABC123").await.unwrap());

        assert!(store.get("ABC123").is_none());
        assert_eq!(storage.removed_devices(), vec!["ABC123".to_string()]);
        assert!(schedules.next_fire_time("ABC123").await.is_none());
        assert!(service.get_device("ABC123").await.is_none());
        assert!(service.list_devices().await.is_empty());

        assert!(!service.forget_device("ABC123").await.unwrap());
    }
}
