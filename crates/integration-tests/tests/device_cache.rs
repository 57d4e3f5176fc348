//! Device Cache Integration Tests
//!
//! Enumeration through the mock transport, metadata mirrored into SQLite,
//! disconnected devices served from their persisted record, and forgetting.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{scripted, sqlite_records, stack_with};
use devkeep_core::domain::ConnectionType;
use devkeep_core::port::time_provider::mocks::ManualTimeProvider;
use devkeep_core::port::TimeProvider;

async fn manual_stack() -> (common::Stack, Arc<ManualTimeProvider>) {
    let time = Arc::new(ManualTimeProvider::new(Utc::now()));
    let time_provider: Arc<dyn TimeProvider> = time.clone();
    let records = sqlite_records(time_provider.clone()).await;
    (stack_with(scripted(), records, time_provider), time)
}

/// Connected devices are persisted; after unplugging they remain listed as unavailable
#[tokio::test]
async fn test_disconnected_device_served_from_record() {
    let (s, time) = manual_stack().await;
    s.transport.add_device("ABC123", "Alice's Phone", ConnectionType::Usb);
    s.transport.add_device("XYZ789", "Bob's iPad", ConnectionType::Wifi);

    let devices = s.devices.list_devices().await;
    assert_eq!(devices.len(), 2);
    assert!(devices.iter().all(|d| d.available));

    let record = s.records.read("XYZ789").await.unwrap();
    assert_eq!(record.name.as_deref(), Some("Bob's iPad"));
    assert_eq!(record.connection_type, Some(ConnectionType::Wifi));

    s.transport.remove_device("XYZ789");
    time.advance(Duration::seconds(31));

    let devices = s.devices.list_devices().await;
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].serial, "ABC123");
    assert!(devices[0].available);
    assert_eq!(devices[1].serial, "XYZ789");
    assert!(!devices[1].available);
    assert_eq!(devices[1].name, "Bob's iPad");

    assert!(s.cache.is_available("ABC123").await);
    assert!(!s.cache.is_available("XYZ789").await);
    assert!(s.devices.get_device("NEVER-SEEN").await.is_none());
}

/// Snapshots within the refresh interval are served without re-enumerating
#[tokio::test]
async fn test_refresh_interval_bounds_enumeration() {
    let (s, time) = manual_stack().await;
    s.transport.add_device("ABC123", "Alice's Phone", ConnectionType::Usb);

    s.cache.get_connected_devices().await;
    s.cache.get_connected_devices().await;
    assert_eq!(s.transport.enumerate_count(), 1);

    time.advance(Duration::seconds(31));
    s.cache.get_connected_devices().await;
    assert_eq!(s.transport.enumerate_count(), 2);
    assert_eq!(s.transport.connect_count(), 1);
}

/// Enumeration failure tears down the connection; the next refresh reconnects
#[tokio::test]
async fn test_transport_failure_recovers() {
    let (s, time) = manual_stack().await;
    s.transport.add_device("ABC123", "Alice's Phone", ConnectionType::Usb);
    assert_eq!(s.cache.get_connected_devices().await.len(), 1);

    s.transport.set_fail_enumeration(true);
    time.advance(Duration::seconds(31));
    // Previous snapshot stays in place
    assert_eq!(s.cache.get_connected_devices().await.len(), 1);
    assert_eq!(s.transport.close_count(), 1);

    s.transport.set_fail_enumeration(false);
    assert_eq!(s.cache.get_connected_devices().await.len(), 1);
    assert_eq!(s.transport.connect_count(), 2);
}

/// Forgetting removes the record, schedule and artifacts and hides the device
#[tokio::test]
async fn test_forget_device() {
    let (s, time) = manual_stack().await;
    s.transport.add_device("ABC123", "Alice's Phone", ConnectionType::Usb);

    assert!(s.schedules.set_schedule("ABC123", "0 2 * * *", 3).await);
    let artifacts = s.backup_root.path().join("ABC123").join("2024-03-01_020000");
    std::fs::create_dir_all(&artifacts).unwrap();

    assert!(s.devices.forget_device("ABC123").await.unwrap());

    assert!(!s.backup_root.path().join("ABC123").exists());
    assert!(s.schedules.next_fire_time("ABC123").await.is_none());
    assert!(s.schedules.get_schedule("ABC123").await.unwrap().is_none());
    assert!(s.records.known_serials().await.unwrap().is_empty());

    // Still plugged in, but hidden until a refresh interval has passed
    assert!(s.cache.get_connected_devices().await.is_empty());
    time.advance(Duration::seconds(31));
    assert_eq!(s.cache.get_connected_devices().await.len(), 1);

    s.schedules.shutdown().await;
}
