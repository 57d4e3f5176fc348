// Device Protocol Port
// Enumeration and metadata of reachable devices (blocking calls)
//
// Callers run these on a blocking thread (`tokio::task::spawn_blocking`).

use crate::domain::ConnectionType;
use std::sync::Arc;
use thiserror::Error;

/// Device transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Device transport unavailable: {0}")]
    Unavailable(String),

    #[error("Device enumeration failed: {0}")]
    Enumeration(String),

    #[error("Device info failed for {serial}: {reason}")]
    Info { serial: String, reason: String },

    #[error("Connection closed")]
    ConnectionClosed,
}

/// A device as reported by enumeration (one entry per transport)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDevice {
    pub serial: String,
    pub connection: ConnectionType,
}

/// Descriptive device metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub model: String,
    pub os_version: String,
}

/// Opens connections to the device enumeration layer
pub trait DeviceTransport: Send + Sync {
    fn connect(&self) -> Result<Arc<dyn DeviceConnection>, ProtocolError>;
}

/// A live connection handle, owned by the Device Cache
pub trait DeviceConnection: Send + Sync {
    /// Every reachable device; a serial visible over USB and WiFi appears twice
    fn list_devices(&self) -> Result<Vec<RawDevice>, ProtocolError>;

    fn device_info(&self, device: &RawDevice) -> Result<DeviceInfo, ProtocolError>;

    /// Release the handle
    fn close(&self);
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct MockState {
        devices: Mutex<Vec<(RawDevice, DeviceInfo)>>,
        failing_info: Mutex<HashSet<String>>,
        info_delay: Mutex<Option<Duration>>,
        fail_connect: AtomicBool,
        fail_enumeration: AtomicBool,
        connect_count: AtomicUsize,
        enumerate_count: AtomicUsize,
        close_count: AtomicUsize,
    }

    /// Scriptable transport with call counters
    #[derive(Default, Clone)]
    pub struct MockDeviceTransport {
        state: Arc<MockState>,
    }

    impl MockDeviceTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make a device visible over one transport
        pub fn add_device(&self, serial: &str, name: &str, connection: ConnectionType) {
            let device = RawDevice {
                serial: serial.to_string(),
                connection,
            };
            let info = DeviceInfo {
                name: name.to_string(),
                model: "iPhone14,2".to_string(),
                os_version: "17.4".to_string(),
            };
            self.state.devices.lock().unwrap().push((device, info));
        }

        /// Remove a device from every transport
        pub fn remove_device(&self, serial: &str) {
            self.state
                .devices
                .lock()
                .unwrap()
                .retain(|(d, _)| d.serial != serial);
        }

        pub fn set_fail_connect(&self, fail: bool) {
            self.state.fail_connect.store(fail, Ordering::SeqCst);
        }

        pub fn set_fail_enumeration(&self, fail: bool) {
            self.state.fail_enumeration.store(fail, Ordering::SeqCst);
        }

        pub fn fail_info_for(&self, serial: &str) {
            self.state
                .failing_info
                .lock()
                .unwrap()
                .insert(serial.to_string());
        }

        /// Make every metadata read block for `delay`, like a hung tool
        pub fn set_info_delay(&self, delay: Duration) {
            *self.state.info_delay.lock().unwrap() = Some(delay);
        }

        pub fn connect_count(&self) -> usize {
            self.state.connect_count.load(Ordering::SeqCst)
        }

        pub fn enumerate_count(&self) -> usize {
            self.state.enumerate_count.load(Ordering::SeqCst)
        }

        pub fn close_count(&self) -> usize {
            self.state.close_count.load(Ordering::SeqCst)
        }
    }

    impl DeviceTransport for MockDeviceTransport {
        fn connect(&self) -> Result<Arc<dyn DeviceConnection>, ProtocolError> {
            self.state.connect_count.fetch_add(1, Ordering::SeqCst);
            if self.state.fail_connect.load(Ordering::SeqCst) {
                return Err(ProtocolError::Unavailable("mock connect failure".to_string()));
            }
            Ok(Arc::new(MockConnection {
                state: Arc::clone(&self.state),
                closed: AtomicBool::new(false),
            }))
        }
    }

    struct MockConnection {
        state: Arc<MockState>,
        closed: AtomicBool,
    }

    impl DeviceConnection for MockConnection {
        fn list_devices(&self) -> Result<Vec<RawDevice>, ProtocolError> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(ProtocolError::ConnectionClosed);
            }
            self.state.enumerate_count.fetch_add(1, Ordering::SeqCst);
            if self.state.fail_enumeration.load(Ordering::SeqCst) {
                return Err(ProtocolError::Enumeration("mock enumeration failure".to_string()));
            }
            Ok(self
                .state
                .devices
                .lock()
                .unwrap()
                .iter()
                .map(|(d, _)| d.clone())
                .collect())
        }

        fn device_info(&self, device: &RawDevice) -> Result<DeviceInfo, ProtocolError> {
            let delay = *self.state.info_delay.lock().unwrap();
            if let Some(delay) = delay {
                std::thread::sleep(delay);
            }
            if self.state.failing_info.lock().unwrap().contains(&device.serial) {
                return Err(ProtocolError::Info {
                    serial: device.serial.clone(),
                    reason: "mock info failure".to_string(),
                });
            }
            self.state
                .devices
                .lock()
                .unwrap()
                .iter()
                .find(|(d, _)| d == device)
                .map(|(_, info)| info.clone())
                .ok_or_else(|| ProtocolError::Info {
                    serial: device.serial.clone(),
                    reason: "not connected".to_string(),
                })
        }

        fn close(&self) {
            if !self.closed.swap(true, Ordering::SeqCst) {
                self.state.close_count.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}
