// SQLite DeviceStore Implementation
// One row per serial; the device record is stored as a JSON document.

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use devkeep_core::domain::DeviceRecord;
use devkeep_core::error::Result;
use devkeep_core::port::{DeviceStore, TimeProvider};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;

pub struct SqliteDeviceStore {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteDeviceStore {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }
}

#[async_trait]
impl DeviceStore for SqliteDeviceStore {
    async fn read(&self, serial: &str) -> Result<DeviceRecord> {
        let document: Option<String> =
            sqlx::query_scalar("SELECT record FROM devices WHERE serial = ?")
                .bind(serial)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        match document {
            Some(document) => {
                let mut record: DeviceRecord = serde_json::from_str(&document)?;
                record.serial = serial.to_string();
                Ok(record)
            }
            None => Ok(DeviceRecord::empty(serial)),
        }
    }

    async fn write(&self, record: &DeviceRecord) -> Result<()> {
        let document = serde_json::to_string(record)?;
        sqlx::query(
            r#"
            INSERT INTO devices (serial, record, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(serial) DO UPDATE SET
                record = excluded.record,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.serial)
        .bind(document)
        .bind(self.time_provider.now_millis())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        debug!(serial = %record.serial, backups = record.backups.len(), "Device record written");
        Ok(())
    }

    async fn known_serials(&self) -> Result<Vec<String>> {
        sqlx::query_scalar("SELECT serial FROM devices ORDER BY serial")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn remove(&self, serial: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM devices WHERE serial = ?")
            .bind(serial)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use chrono::{TimeZone, Utc};
    use devkeep_core::domain::{BackupRecord, ConnectionType, Schedule};
    use devkeep_core::port::time_provider::SystemTimeProvider;

    async fn setup() -> SqliteDeviceStore {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteDeviceStore::new(pool, Arc::new(SystemTimeProvider))
    }

    #[tokio::test]
    async fn test_unknown_serial_reads_empty_record() {
        let store = setup().await;
        let record = store.read("ABC123").await.unwrap();
        assert_eq!(record, DeviceRecord::empty("ABC123"));
        assert!(store.known_serials().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_then_read_full_record() {
        let store = setup().await;
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 2, 0, 0).unwrap();

        let mut record = DeviceRecord::empty("ABC123");
        record.name = Some("Alice's Phone".to_string());
        record.connection_type = Some(ConnectionType::Wifi);
        record.last_seen = Some(at);
        record.backups.push(BackupRecord::succeeded(
            "2024-03-01_020000",
            at,
            true,
            "/backups/ABC123/2024-03-01_020000",
            "task-1",
        ));
        record.schedule = Some(Schedule::new("0 2 * * *", 3, at, Some(at), None));

        store.write(&record).await.unwrap();
        assert_eq!(store.read("ABC123").await.unwrap(), record);
    }

    #[tokio::test]
    async fn test_write_replaces_existing_record() {
        let store = setup().await;
        let mut record = DeviceRecord::empty("ABC123");
        store.write(&record).await.unwrap();

        record.name = Some("Renamed".to_string());
        store.write(&record).await.unwrap();

        assert_eq!(store.read("ABC123").await.unwrap().name.as_deref(), Some("Renamed"));
        assert_eq!(store.known_serials().await.unwrap(), vec!["ABC123".to_string()]);
    }

    #[tokio::test]
    async fn test_known_serials_and_remove() {
        let store = setup().await;
        store.write(&DeviceRecord::empty("ZZZ999")).await.unwrap();
        store.write(&DeviceRecord::empty("ABC123")).await.unwrap();

        assert_eq!(
            store.known_serials().await.unwrap(),
            vec!["ABC123".to_string(), "ZZZ999".to_string()]
        );

        assert!(store.remove("ABC123").await.unwrap());
        assert!(!store.remove("ABC123").await.unwrap());
        assert_eq!(store.known_serials().await.unwrap(), vec!["ZZZ999".to_string()]);
    }

    #[tokio::test]
    async fn test_corrupt_document_is_serialization_error() {
        let store = setup().await;
        sqlx::query("INSERT INTO devices (serial, record, updated_at) VALUES ('BAD', '{not json', 0)")
            .execute(&store.pool)
            .await
            .unwrap();

        let err = store.read("BAD").await.unwrap_err();
        assert!(matches!(err, devkeep_core::AppError::Serialization(_)));
    }
}
