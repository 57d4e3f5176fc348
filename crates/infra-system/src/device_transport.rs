// Command-line device transport
// Enumerates devices and reads their metadata through the libimobiledevice
// tools (`idevice_id`, `ideviceinfo`). All calls block and are run by the
// device cache on a blocking thread. Every tool run is bounded by a timeout
// and killed when it expires.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use devkeep_core::application::constants::{DEFAULT_DEVICE_TOOL_TIMEOUT, UNKNOWN_DEVICE_NAME};
use devkeep_core::domain::ConnectionType;
use devkeep_core::port::{DeviceConnection, DeviceInfo, DeviceTransport, ProtocolError, RawDevice};

/// How often a running tool is checked for exit
const TOOL_POLL_INTERVAL: Duration = Duration::from_millis(20);

pub struct CommandDeviceTransport {
    id_tool: String,
    info_tool: String,
    tool_timeout: Duration,
}

impl CommandDeviceTransport {
    /// # Arguments
    /// * `id_tool` - Device listing tool, a name on PATH or a path
    /// * `info_tool` - Device metadata tool, a name on PATH or a path
    pub fn new(id_tool: impl Into<String>, info_tool: impl Into<String>) -> Self {
        Self {
            id_tool: id_tool.into(),
            info_tool: info_tool.into(),
            tool_timeout: DEFAULT_DEVICE_TOOL_TIMEOUT,
        }
    }

    /// Limit on a single tool run; a tool still running after it is killed
    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }
}

impl DeviceTransport for CommandDeviceTransport {
    fn connect(&self) -> Result<Arc<dyn DeviceConnection>, ProtocolError> {
        let resolve = |tool: &str| {
            which::which(tool)
                .map_err(|e| ProtocolError::Unavailable(format!("{}: {}", tool, e)))
        };
        let id_tool = resolve(&self.id_tool)?;
        let info_tool = resolve(&self.info_tool)?;

        debug!(id_tool = %id_tool.display(), info_tool = %info_tool.display(), "Device tools resolved");

        Ok(Arc::new(CommandConnection {
            id_tool,
            info_tool,
            tool_timeout: self.tool_timeout,
            closed: AtomicBool::new(false),
        }))
    }
}

struct CommandConnection {
    id_tool: PathBuf,
    info_tool: PathBuf,
    tool_timeout: Duration,
    closed: AtomicBool,
}

impl CommandConnection {
    fn ensure_open(&self) -> Result<(), ProtocolError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ProtocolError::ConnectionClosed);
        }
        Ok(())
    }

    fn list(&self, flag: &str) -> Result<Vec<String>, String> {
        let output = run(&self.id_tool, &[flag], self.tool_timeout)?;
        if !output.status.success() {
            return Err(failure_reason(&output));
        }
        Ok(parse_device_list(&String::from_utf8_lossy(&output.stdout)))
    }
}

impl DeviceConnection for CommandConnection {
    fn list_devices(&self) -> Result<Vec<RawDevice>, ProtocolError> {
        self.ensure_open()?;

        let usb = self.list("-l").map_err(ProtocolError::Enumeration)?;

        // Older tool builds have no network listing
        let network = self.list("-n").unwrap_or_else(|reason| {
            warn!(error = %reason, "Network device listing failed, continuing with USB only");
            Vec::new()
        });

        let devices = usb
            .into_iter()
            .map(|serial| RawDevice {
                serial,
                connection: ConnectionType::Usb,
            })
            .chain(network.into_iter().map(|serial| RawDevice {
                serial,
                connection: ConnectionType::Wifi,
            }))
            .collect();
        Ok(devices)
    }

    fn device_info(&self, device: &RawDevice) -> Result<DeviceInfo, ProtocolError> {
        self.ensure_open()?;

        let mut args = vec!["-u", device.serial.as_str()];
        if device.connection == ConnectionType::Wifi {
            args.push("-n");
        }

        let info_error = |reason: String| ProtocolError::Info {
            serial: device.serial.clone(),
            reason,
        };
        let output = run(&self.info_tool, &args, self.tool_timeout).map_err(info_error)?;
        if !output.status.success() {
            return Err(info_error(failure_reason(&output)));
        }
        Ok(parse_device_info(&String::from_utf8_lossy(&output.stdout)))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn run(tool: &Path, args: &[&str], timeout: Duration) -> Result<Output, String> {
    let mut child = Command::new(tool)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("{}: {}", tool.display(), e))?;

    // Drained on their own threads so a chatty tool never blocks on a full pipe
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                warn!(tool = %tool.display(), args = ?args, "Device tool timed out and was killed");
                return Err(format!(
                    "{} timed out after {:.1}s",
                    tool.display(),
                    timeout.as_secs_f64()
                ));
            }
            Ok(None) => thread::sleep(TOOL_POLL_INTERVAL),
            Err(e) => return Err(format!("{}: {}", tool.display(), e)),
        }
    };

    Ok(Output {
        status,
        stdout: stdout.join().unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
    })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

fn failure_reason(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .map(str::to_string)
        .unwrap_or_else(|| match output.status.code() {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".to_string(),
        })
}

/// One serial per non-empty line
pub fn parse_device_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.split_whitespace().next().unwrap_or(line).to_string())
        .collect()
}

/// `Key: Value` lines; missing keys fall back to "Unknown"
pub fn parse_device_info(stdout: &str) -> DeviceInfo {
    let mut info = DeviceInfo {
        name: UNKNOWN_DEVICE_NAME.to_string(),
        model: UNKNOWN_DEVICE_NAME.to_string(),
        os_version: UNKNOWN_DEVICE_NAME.to_string(),
    };
    for line in stdout.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match key.trim() {
            "DeviceName" => info.name = value.to_string(),
            "ProductType" => info.model = value.to_string(),
            "ProductVersion" => info.os_version = value.to_string(),
            _ => {}
        }
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_list() {
        let serials = parse_device_list("00008030-001A\n\n  00008101-002B (Network)\n");
        assert_eq!(serials, vec!["00008030-001A", "00008101-002B"]);
        assert!(parse_device_list("").is_empty());
    }

    #[test]
    fn test_parse_device_info() {
        let info = parse_device_info(
            "ActivationState: Activated\nDeviceName: Jin's iPhone\nProductType: iPhone14,2\nProductVersion: 17.4.1\n",
        );
        assert_eq!(info.name, "Jin's iPhone");
        assert_eq!(info.model, "iPhone14,2");
        assert_eq!(info.os_version, "17.4.1");
    }

    #[test]
    fn test_parse_device_info_defaults_to_unknown() {
        let info = parse_device_info("DeviceName:\nSomethingElse: 1\n");
        assert_eq!(info.name, UNKNOWN_DEVICE_NAME);
        assert_eq!(info.model, UNKNOWN_DEVICE_NAME);
        assert_eq!(info.os_version, UNKNOWN_DEVICE_NAME);
    }

    #[test]
    fn test_missing_tool_is_unavailable() {
        let transport = CommandDeviceTransport::new("devkeep-no-such-tool", "ideviceinfo");
        let result = transport.connect();
        assert!(matches!(result, Err(ProtocolError::Unavailable(_))));
    }

    #[cfg(unix)]
    mod fake_tools {
        use super::*;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;
        use tempfile::TempDir;

        fn write_script(dir: &Path, name: &str, body: &str) -> String {
            let path = dir.join(name);
            fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            path.display().to_string()
        }

        fn transport(dir: &TempDir, id_body: &str, info_body: &str) -> CommandDeviceTransport {
            let id_tool = write_script(dir.path(), "fake_id", id_body);
            let info_tool = write_script(dir.path(), "fake_info", info_body);
            CommandDeviceTransport::new(id_tool, info_tool)
        }

        const ID_TOOL: &str = r#"case "$1" in
  -l) echo USB1 ;;
  -n) echo USB1; echo NET2 ;;
esac"#;

        const INFO_TOOL: &str = r#"if [ "$2" = "NET2" ] && [ "$3" != "-n" ]; then exit 1; fi
echo "DeviceName: Device $2"
echo "ProductType: iPad13,4"
echo "ProductVersion: 17.0""#;

        #[test]
        fn test_enumerates_usb_and_network_devices() {
            let dir = TempDir::new().unwrap();
            let connection = transport(&dir, ID_TOOL, INFO_TOOL).connect().unwrap();

            let devices = connection.list_devices().unwrap();
            assert_eq!(
                devices,
                vec![
                    RawDevice { serial: "USB1".to_string(), connection: ConnectionType::Usb },
                    RawDevice { serial: "USB1".to_string(), connection: ConnectionType::Wifi },
                    RawDevice { serial: "NET2".to_string(), connection: ConnectionType::Wifi },
                ]
            );

            let info = connection.device_info(&devices[2]).unwrap();
            assert_eq!(info.name, "Device NET2");
            assert_eq!(info.model, "iPad13,4");
        }

        #[test]
        fn test_network_listing_failure_keeps_usb_devices() {
            let dir = TempDir::new().unwrap();
            let id_tool = r#"if [ "$1" = "-n" ]; then echo "unknown option" >&2; exit 2; fi
echo USB1"#;
            let connection = transport(&dir, id_tool, INFO_TOOL).connect().unwrap();

            let devices = connection.list_devices().unwrap();
            assert_eq!(devices.len(), 1);
            assert_eq!(devices[0].connection, ConnectionType::Usb);
        }

        #[test]
        fn test_usb_listing_failure_is_enumeration_error() {
            let dir = TempDir::new().unwrap();
            let connection = transport(&dir, "echo 'usbmuxd not running' >&2; exit 1", INFO_TOOL)
                .connect()
                .unwrap();

            assert_eq!(
                connection.list_devices(),
                Err(ProtocolError::Enumeration("usbmuxd not running".to_string()))
            );
        }

        #[test]
        fn test_info_failure_names_the_device() {
            let dir = TempDir::new().unwrap();
            let connection = transport(&dir, ID_TOOL, "echo 'pairing required' >&2; exit 1")
                .connect()
                .unwrap();

            let device = RawDevice { serial: "USB1".to_string(), connection: ConnectionType::Usb };
            assert_eq!(
                connection.device_info(&device),
                Err(ProtocolError::Info {
                    serial: "USB1".to_string(),
                    reason: "pairing required".to_string(),
                })
            );
        }

        #[test]
        fn test_hung_info_tool_is_killed_after_timeout() {
            let dir = TempDir::new().unwrap();
            let connection = transport(&dir, ID_TOOL, "exec sleep 30")
                .with_tool_timeout(Duration::from_millis(300))
                .connect()
                .unwrap();

            let device = RawDevice { serial: "NET2".to_string(), connection: ConnectionType::Wifi };
            let started = Instant::now();
            let result = connection.device_info(&device);

            assert!(started.elapsed() < Duration::from_secs(5));
            match result {
                Err(ProtocolError::Info { serial, reason }) => {
                    assert_eq!(serial, "NET2");
                    assert!(reason.contains("timed out"), "{}", reason);
                }
                other => panic!("expected a timed out info read, got {:?}", other),
            }
        }

        #[test]
        fn test_large_tool_output_is_read_in_full() {
            let dir = TempDir::new().unwrap();
            let id_tool = r#"if [ "$1" = "-l" ]; then head -c 200000 /dev/zero | tr '\0' ' '; echo USB1; fi"#;
            let connection = transport(&dir, id_tool, INFO_TOOL).connect().unwrap();

            let devices = connection.list_devices().unwrap();
            assert_eq!(devices.len(), 1);
            assert_eq!(devices[0].serial, "USB1");
        }

        #[test]
        fn test_closed_connection_rejects_calls() {
            let dir = TempDir::new().unwrap();
            let connection = transport(&dir, ID_TOOL, INFO_TOOL).connect().unwrap();
            connection.close();
            assert_eq!(connection.list_devices(), Err(ProtocolError::ConnectionClosed));
        }
    }
}
