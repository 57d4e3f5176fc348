// Device Domain Model
//
// DeviceSnapshot: cached view of a reachable device (owned by the Device Cache)
// DeviceRecord: durable per-device record (owned by the Persistence Store)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::backup::BackupRecord;
use crate::domain::schedule::Schedule;

const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Usb,
    Wifi,
}

impl ConnectionType {
    /// USB strictly takes precedence over WiFi for the same serial
    pub fn outranks(self, other: ConnectionType) -> bool {
        self == ConnectionType::Usb && other == ConnectionType::Wifi
    }
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionType::Usb => write!(f, "usb"),
            ConnectionType::Wifi => write!(f, "wifi"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSnapshot {
    pub serial: String,
    pub name: String,
    pub model: String,
    pub os_version: String,
    pub connection_type: Option<ConnectionType>,
    pub available: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Durable per-device record.
///
/// Reads of an unknown serial yield `DeviceRecord::empty` (no backups,
/// no schedule, never seen).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub serial: String,

    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub os_version: Option<String>,
    #[serde(default)]
    pub connection_type: Option<ConnectionType>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,

    #[serde(default)]
    pub backups: Vec<BackupRecord>,
    #[serde(default)]
    pub schedule: Option<Schedule>,
}

impl DeviceRecord {
    pub fn empty(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            name: None,
            model: None,
            os_version: None,
            connection_type: None,
            last_seen: None,
            backups: Vec::new(),
            schedule: None,
        }
    }

    pub fn has_full_backup(&self) -> bool {
        self.backups.iter().any(BackupRecord::is_successful_full)
    }

    pub fn find_backup(&self, backup_id: &str) -> Option<&BackupRecord> {
        self.backups.iter().find(|b| b.id == backup_id)
    }

    pub fn find_backup_mut(&mut self, backup_id: &str) -> Option<&mut BackupRecord> {
        self.backups.iter_mut().find(|b| b.id == backup_id)
    }

    /// Remove a backup record, returning it if present
    pub fn remove_backup(&mut self, backup_id: &str) -> Option<BackupRecord> {
        let index = self.backups.iter().position(|b| b.id == backup_id)?;
        Some(self.backups.remove(index))
    }

    /// Mirror the descriptive fields of a live snapshot
    pub fn observe(&mut self, snapshot: &DeviceSnapshot, now: DateTime<Utc>) {
        self.name = Some(snapshot.name.clone());
        self.model = Some(snapshot.model.clone());
        self.os_version = Some(snapshot.os_version.clone());
        self.connection_type = snapshot.connection_type;
        self.last_seen = Some(now);
    }

    /// Last-known descriptive fields as an unavailable snapshot.
    ///
    /// None when the device was never observed.
    pub fn last_known_snapshot(&self) -> Option<DeviceSnapshot> {
        let name = self.name.clone()?;
        Some(DeviceSnapshot {
            serial: self.serial.clone(),
            name,
            model: self.model.clone().unwrap_or_else(|| UNKNOWN.to_string()),
            os_version: self.os_version.clone().unwrap_or_else(|| UNKNOWN.to_string()),
            connection_type: self.connection_type,
            available: false,
            last_seen: self.last_seen,
        })
    }
}
