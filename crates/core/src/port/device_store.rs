// Device Store Port (Persistence Store collaborator)
// Durable per-device records keyed by serial

use crate::domain::DeviceRecord;
use crate::error::Result;
use async_trait::async_trait;

/// Device record persistence
///
/// The application layer performs read-modify-write on whole records;
/// implementations only need per-record atomicity.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Read the record for a serial
    ///
    /// Unknown serials yield `DeviceRecord::empty(serial)`.
    async fn read(&self, serial: &str) -> Result<DeviceRecord>;

    /// Insert or replace the record keyed by `record.serial`
    async fn write(&self, record: &DeviceRecord) -> Result<()>;

    /// Every serial with a persisted record
    async fn known_serials(&self) -> Result<Vec<String>>;

    /// Delete the record. Returns true if a record existed.
    async fn remove(&self, serial: &str) -> Result<bool>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::{BTreeMap, HashSet};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// In-memory store with failure injection
    #[derive(Default)]
    pub struct InMemoryDeviceStore {
        records: Arc<Mutex<BTreeMap<String, DeviceRecord>>>,
        fail_reads: AtomicBool,
        fail_writes: AtomicBool,
        write_count: AtomicUsize,
        write_delay: Mutex<Option<Duration>>,
        unreadable: Mutex<HashSet<String>>,
    }

    impl InMemoryDeviceStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Seed a record directly (bypasses failure injection)
        pub fn insert(&self, record: DeviceRecord) {
            self.records
                .lock()
                .unwrap()
                .insert(record.serial.clone(), record);
        }

        pub fn get(&self, serial: &str) -> Option<DeviceRecord> {
            self.records.lock().unwrap().get(serial).cloned()
        }

        pub fn set_fail_reads(&self, fail: bool) {
            self.fail_reads.store(fail, Ordering::SeqCst);
        }

        pub fn set_fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }

        /// Fail reads of one serial only
        pub fn fail_reads_for(&self, serial: &str) {
            self.unreadable.lock().unwrap().insert(serial.to_string());
        }

        /// Make every write sleep before it lands
        pub fn set_write_delay(&self, delay: Duration) {
            *self.write_delay.lock().unwrap() = Some(delay);
        }

        pub fn write_count(&self) -> usize {
            self.write_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DeviceStore for InMemoryDeviceStore {
        async fn read(&self, serial: &str) -> Result<DeviceRecord> {
            if self.fail_reads.load(Ordering::SeqCst)
                || self.unreadable.lock().unwrap().contains(serial)
            {
                return Err(AppError::Persistence("injected read failure".to_string()));
            }
            Ok(self
                .get(serial)
                .unwrap_or_else(|| DeviceRecord::empty(serial)))
        }

        async fn write(&self, record: &DeviceRecord) -> Result<()> {
            let delay = *self.write_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(AppError::Persistence("injected write failure".to_string()));
            }
            self.write_count.fetch_add(1, Ordering::SeqCst);
            self.insert(record.clone());
            Ok(())
        }

        async fn known_serials(&self) -> Result<Vec<String>> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(AppError::Persistence("injected read failure".to_string()));
            }
            Ok(self.records.lock().unwrap().keys().cloned().collect())
        }

        async fn remove(&self, serial: &str) -> Result<bool> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(AppError::Persistence("injected write failure".to_string()));
            }
            Ok(self.records.lock().unwrap().remove(serial).is_some())
        }
    }
}
