//! Device Cache - freshness-bounded view of reachable devices.
//!
//! Enumeration goes through the blocking `DeviceConnection` port on a
//! blocking thread, bounded by a timeout and without holding the snapshot
//! lock. The cache owns the only connection handle and tears it down
//! whenever enumeration fails or times out; the next refresh reconnects.

use crate::application::constants::{DEFAULT_DEVICE_REFRESH_INTERVAL, DEFAULT_ENUMERATION_TIMEOUT};
use crate::application::records::DeviceRecords;
use crate::domain::DeviceSnapshot;
use crate::port::{DeviceConnection, DeviceInfo, DeviceTransport, ProtocolError, RawDevice, TimeProvider};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct DeviceCacheConfig {
    /// Minimum age of the snapshot before a refresh re-enumerates
    pub refresh_interval: Duration,
    /// Enumeration running longer than this counts as a failure
    pub enumeration_timeout: Duration,
}

impl Default for DeviceCacheConfig {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_DEVICE_REFRESH_INTERVAL,
            enumeration_timeout: DEFAULT_ENUMERATION_TIMEOUT,
        }
    }
}

#[derive(Default)]
struct CacheState {
    devices: HashMap<String, DeviceSnapshot>,
    last_refresh: Option<DateTime<Utc>>,
    connection: Option<Arc<dyn DeviceConnection>>,
    /// Forgotten serials, hidden from enumeration for one refresh interval
    forgotten: HashMap<String, DateTime<Utc>>,
}

pub struct DeviceCache {
    transport: Arc<dyn DeviceTransport>,
    records: DeviceRecords,
    time_provider: Arc<dyn TimeProvider>,
    refresh_interval: chrono::Duration,
    enumeration_timeout: Duration,
    state: Mutex<CacheState>,
    refresh_lock: Mutex<()>,
}

impl DeviceCache {
    pub fn new(
        transport: Arc<dyn DeviceTransport>,
        records: DeviceRecords,
        time_provider: Arc<dyn TimeProvider>,
        config: DeviceCacheConfig,
    ) -> Self {
        let refresh_interval = chrono::Duration::from_std(config.refresh_interval)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        Self {
            transport,
            records,
            time_provider,
            refresh_interval,
            enumeration_timeout: config.enumeration_timeout,
            state: Mutex::new(CacheState::default()),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Re-enumerate devices unless the snapshot is fresh and non-empty.
    ///
    /// Failures are logged and leave the previous snapshot in place. Only one
    /// refresh runs at a time; a caller arriving while one is in flight
    /// returns immediately and sees the current snapshot.
    pub async fn refresh(&self) {
        let Ok(_refreshing) = self.refresh_lock.try_lock() else {
            debug!("Device refresh already in flight, serving current snapshot");
            return;
        };
        let now = self.time_provider.now();

        let connection = {
            let state = self.state.lock().await;
            if let Some(last) = state.last_refresh {
                if now - last < self.refresh_interval && !state.devices.is_empty() {
                    return;
                }
            }
            state.connection.clone()
        };

        let connection = match connection {
            Some(connection) => connection,
            None => match self.connect().await {
                Ok(connection) => {
                    self.state.lock().await.connection = Some(Arc::clone(&connection));
                    connection
                }
                Err(e) => {
                    warn!(error = %e, "Device transport connect failed");
                    return;
                }
            },
        };

        // The state lock is not held here, readers keep being served
        let enumeration = {
            let connection = Arc::clone(&connection);
            timeout(
                self.enumeration_timeout,
                tokio::task::spawn_blocking(move || enumerate(connection.as_ref())),
            )
            .await
        };
        let found = match enumeration {
            Ok(Ok(Ok(found))) => found,
            Ok(Ok(Err(e))) => {
                warn!(error = %e, "Device enumeration failed, tearing down transport connection");
                self.teardown().await;
                return;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Device enumeration task aborted, tearing down transport connection");
                self.teardown().await;
                return;
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.enumeration_timeout.as_secs_f64(),
                    "Device enumeration timed out, tearing down transport connection"
                );
                self.teardown().await;
                return;
            }
        };

        let mut devices = {
            let mut state = self.state.lock().await;
            let interval = self.refresh_interval;
            state.forgotten.retain(|_, at| now - *at < interval);

            let mut devices = HashMap::new();
            for (device, info) in found {
                if state.forgotten.contains_key(&device.serial) {
                    debug!(serial = %device.serial, "Skipping recently forgotten device");
                    continue;
                }
                let snapshot = DeviceSnapshot {
                    serial: device.serial.clone(),
                    name: info.name,
                    model: info.model,
                    os_version: info.os_version,
                    connection_type: Some(device.connection),
                    available: true,
                    last_seen: Some(now),
                };
                devices.insert(device.serial, snapshot);
            }
            devices
        };

        for snapshot in devices.values() {
            let mirrored = self
                .records
                .update(&snapshot.serial, |record| {
                    record.observe(snapshot, now);
                    Ok(())
                })
                .await;
            if let Err(e) = mirrored {
                warn!(serial = %snapshot.serial, error = %e, "Failed to persist device metadata");
            }
        }

        let mut state = self.state.lock().await;
        // A forget may have landed while metadata was being mirrored
        devices.retain(|serial, _| !state.forgotten.contains_key(serial));
        debug!(count = devices.len(), "Device cache refreshed");
        state.devices = devices;
        state.last_refresh = Some(now);
    }

    /// Currently reachable devices, ordered by serial
    pub async fn get_connected_devices(&self) -> Vec<DeviceSnapshot> {
        self.refresh().await;
        let state = self.state.lock().await;
        let mut devices: Vec<DeviceSnapshot> = state.devices.values().cloned().collect();
        devices.sort_by(|a, b| a.serial.cmp(&b.serial));
        devices
    }

    /// Live snapshot, or the last-known metadata with `available = false`.
    ///
    /// None when the device is neither connected nor known.
    pub async fn get_device_info(&self, serial: &str) -> Option<DeviceSnapshot> {
        self.refresh().await;
        if let Some(snapshot) = self.state.lock().await.devices.get(serial) {
            return Some(snapshot.clone());
        }

        match self.records.read(serial).await {
            Ok(record) => record.last_known_snapshot(),
            Err(e) => {
                warn!(serial = %serial, error = %e, "Failed to read device record");
                None
            }
        }
    }

    pub async fn is_available(&self, serial: &str) -> bool {
        self.get_device_info(serial)
            .await
            .map(|d| d.available)
            .unwrap_or(false)
    }

    /// Connected devices followed by known but disconnected ones
    pub async fn list_devices(&self) -> Vec<DeviceSnapshot> {
        let mut devices = self.get_connected_devices().await;
        let serials = match self.records.known_serials().await {
            Ok(serials) => serials,
            Err(e) => {
                warn!(error = %e, "Failed to list known devices");
                return devices;
            }
        };

        let mut disconnected = Vec::new();
        for serial in serials {
            if devices.iter().any(|d| d.serial == serial) {
                continue;
            }
            match self.records.read(&serial).await {
                Ok(record) => disconnected.extend(record.last_known_snapshot()),
                Err(e) => warn!(serial = %serial, error = %e, "Failed to read device record"),
            }
        }
        disconnected.sort_by(|a, b| a.serial.cmp(&b.serial));
        devices.extend(disconnected);
        devices
    }

    /// Drop a device from the cache immediately, regardless of freshness
    pub async fn forget(&self, serial: &str) {
        let mut state = self.state.lock().await;
        state.devices.remove(serial);
        state.forgotten.insert(serial.to_string(), self.time_provider.now());
        info!(serial = %serial, "Device evicted from cache");
    }

    /// Close the transport connection and clear cached state (idempotent)
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        Self::close_connection(&mut state);
        state.devices.clear();
        state.forgotten.clear();
        debug!("Device cache shut down");
    }

    async fn teardown(&self) {
        Self::close_connection(&mut *self.state.lock().await);
    }

    async fn connect(&self) -> Result<Arc<dyn DeviceConnection>, ProtocolError> {
        let transport = Arc::clone(&self.transport);
        tokio::task::spawn_blocking(move || transport.connect())
            .await
            .map_err(|e| ProtocolError::Unavailable(e.to_string()))?
    }

    fn close_connection(state: &mut CacheState) {
        if let Some(connection) = state.connection.take() {
            connection.close();
        }
        state.last_refresh = None;
    }
}

/// List devices, keep one entry per serial (USB over WiFi) and fetch metadata.
/// A device whose metadata cannot be read is dropped.
fn enumerate(connection: &dyn DeviceConnection) -> Result<Vec<(RawDevice, DeviceInfo)>, ProtocolError> {
    let mut preferred: Vec<RawDevice> = Vec::new();
    for device in connection.list_devices()? {
        match preferred.iter_mut().find(|d| d.serial == device.serial) {
            Some(existing) => {
                if device.connection.outranks(existing.connection) {
                    *existing = device;
                }
            }
            None => preferred.push(device),
        }
    }

    let mut found = Vec::with_capacity(preferred.len());
    for device in preferred {
        match connection.device_info(&device) {
            Ok(info) => found.push((device, info)),
            Err(e) => warn!(serial = %device.serial, error = %e, "Dropping device with unreadable metadata"),
        }
    }
    Ok(found)
}
