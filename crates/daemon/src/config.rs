// Daemon configuration from DEVKEEP_* environment variables

use anyhow::{anyhow, Result};
use devkeep_core::application::CronTimezone;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_DB_PATH: &str = "~/.devkeep/devices.db";
const DEFAULT_BACKUP_DIR: &str = "~/.devkeep/backups";
const DEFAULT_RPC_HOST: &str = "127.0.0.1";
const DEFAULT_RPC_PORT: u16 = 9540;
const DEFAULT_DEVICE_REFRESH_SECS: u64 = 30;
const DEFAULT_MISFIRE_GRACE_SECS: u64 = 3600;
const DEFAULT_DEVICE_TOOL_TIMEOUT_SECS: u64 = 10;
const DEFAULT_ENUMERATION_TIMEOUT_SECS: u64 = 30;
const DEFAULT_TRANSFER_TOOL: &str = "idevicebackup2";
const DEFAULT_DEVICE_ID_TOOL: &str = "idevice_id";
const DEFAULT_DEVICE_INFO_TOOL: &str = "ideviceinfo";
const DEFAULT_RATE_LIMIT_BURST: u32 = 200;
const DEFAULT_RATE_LIMIT_RATE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}', expected 'pretty' or 'json'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub db_path: PathBuf,
    pub backup_dir: PathBuf,
    pub rpc_host: String,
    pub rpc_port: u16,
    pub log_format: LogFormat,
    pub log_dir: Option<PathBuf>,
    pub device_refresh_interval: Duration,
    pub device_tool_timeout: Duration,
    pub enumeration_timeout: Duration,
    pub misfire_grace: Duration,
    pub cron_timezone: CronTimezone,
    pub serialize_device_tasks: bool,
    pub transfer_tool: String,
    pub device_id_tool: String,
    pub device_info_tool: String,
    pub rate_limit_burst: u32,
    pub rate_limit_rate: u32,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the config from any variable source; unset or empty variables
    /// take their defaults, unparseable ones are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let path = |name: &str, default: &str| {
            PathBuf::from(shellexpand::tilde(&var(name).unwrap_or_else(|| default.to_string())).into_owned())
        };

        Ok(Self {
            db_path: path("DEVKEEP_DB_PATH", DEFAULT_DB_PATH),
            backup_dir: path("DEVKEEP_BACKUP_DIR", DEFAULT_BACKUP_DIR),
            rpc_host: var("DEVKEEP_RPC_HOST").unwrap_or_else(|| DEFAULT_RPC_HOST.to_string()),
            rpc_port: parse(&var, "DEVKEEP_RPC_PORT", DEFAULT_RPC_PORT)?,
            log_format: parse(&var, "DEVKEEP_LOG_FORMAT", LogFormat::Pretty)?,
            log_dir: var("DEVKEEP_LOG_DIR")
                .map(|dir| PathBuf::from(shellexpand::tilde(&dir).into_owned())),
            device_refresh_interval: Duration::from_secs(parse(
                &var,
                "DEVKEEP_DEVICE_REFRESH_SECS",
                DEFAULT_DEVICE_REFRESH_SECS,
            )?),
            device_tool_timeout: Duration::from_secs(parse(
                &var,
                "DEVKEEP_DEVICE_TOOL_TIMEOUT_SECS",
                DEFAULT_DEVICE_TOOL_TIMEOUT_SECS,
            )?),
            enumeration_timeout: Duration::from_secs(parse(
                &var,
                "DEVKEEP_ENUMERATION_TIMEOUT_SECS",
                DEFAULT_ENUMERATION_TIMEOUT_SECS,
            )?),
            misfire_grace: Duration::from_secs(parse(
                &var,
                "DEVKEEP_MISFIRE_GRACE_SECS",
                DEFAULT_MISFIRE_GRACE_SECS,
            )?),
            cron_timezone: parse(&var, "DEVKEEP_CRON_TIMEZONE", CronTimezone::Local)?,
            serialize_device_tasks: parse(&var, "DEVKEEP_SERIALIZE_DEVICE_TASKS", true)?,
            transfer_tool: var("DEVKEEP_TRANSFER_TOOL")
                .unwrap_or_else(|| DEFAULT_TRANSFER_TOOL.to_string()),
            device_id_tool: var("DEVKEEP_DEVICE_ID_TOOL")
                .unwrap_or_else(|| DEFAULT_DEVICE_ID_TOOL.to_string()),
            device_info_tool: var("DEVKEEP_DEVICE_INFO_TOOL")
                .unwrap_or_else(|| DEFAULT_DEVICE_INFO_TOOL.to_string()),
            rate_limit_burst: parse(&var, "DEVKEEP_RATE_LIMIT_BURST", DEFAULT_RATE_LIMIT_BURST)?,
            rate_limit_rate: parse(&var, "DEVKEEP_RATE_LIMIT_RATE", DEFAULT_RATE_LIMIT_RATE)?,
        })
    }

    pub fn database_url(&self) -> String {
        format!("sqlite://{}", self.db_path.display())
    }
}

fn parse<T, V>(var: &V, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    V: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e: T::Err| anyhow!("invalid {}={:?}: {}", name, value, e)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<DaemonConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        DaemonConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert!(config.db_path.ends_with(".devkeep/devices.db"));
        assert!(config.backup_dir.ends_with(".devkeep/backups"));
        assert!(!config.db_path.starts_with("~"));
        assert_eq!(config.rpc_host, "127.0.0.1");
        assert_eq!(config.rpc_port, 9540);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.log_dir.is_none());
        assert_eq!(config.device_refresh_interval, Duration::from_secs(30));
        assert_eq!(config.device_tool_timeout, Duration::from_secs(10));
        assert_eq!(config.enumeration_timeout, Duration::from_secs(30));
        assert_eq!(config.misfire_grace, Duration::from_secs(3600));
        assert_eq!(config.cron_timezone, CronTimezone::Local);
        assert!(config.serialize_device_tasks);
        assert_eq!(config.transfer_tool, "idevicebackup2");
        assert_eq!(config.device_id_tool, "idevice_id");
        assert_eq!(config.device_info_tool, "ideviceinfo");
        assert_eq!(config.rate_limit_burst, 200);
        assert_eq!(config.rate_limit_rate, 100);
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("DEVKEEP_DB_PATH", "/var/lib/devkeep/devices.db"),
            ("DEVKEEP_RPC_PORT", "9999"),
            ("DEVKEEP_LOG_FORMAT", "JSON"),
            ("DEVKEEP_LOG_DIR", "/var/log/devkeep"),
            ("DEVKEEP_CRON_TIMEZONE", "utc"),
            ("DEVKEEP_SERIALIZE_DEVICE_TASKS", "false"),
            ("DEVKEEP_MISFIRE_GRACE_SECS", "60"),
            ("DEVKEEP_DEVICE_TOOL_TIMEOUT_SECS", "5"),
            ("DEVKEEP_RPC_HOST", ""),
        ])
        .unwrap();

        assert_eq!(config.database_url(), "sqlite:///var/lib/devkeep/devices.db");
        assert_eq!(config.rpc_port, 9999);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/devkeep")));
        assert_eq!(config.cron_timezone, CronTimezone::Utc);
        assert!(!config.serialize_device_tasks);
        assert_eq!(config.misfire_grace, Duration::from_secs(60));
        assert_eq!(config.device_tool_timeout, Duration::from_secs(5));
        // Empty means unset
        assert_eq!(config.rpc_host, "127.0.0.1");
    }

    #[test]
    fn test_invalid_values_are_errors() {
        let err = config(&[("DEVKEEP_RPC_PORT", "not-a-port")]).unwrap_err();
        assert!(err.to_string().contains("DEVKEEP_RPC_PORT"));

        assert!(config(&[("DEVKEEP_CRON_TIMEZONE", "mars")]).is_err());
        assert!(config(&[("DEVKEEP_LOG_FORMAT", "xml")]).is_err());
    }
}
