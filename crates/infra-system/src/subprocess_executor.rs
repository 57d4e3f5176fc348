// Subprocess transfer executor
// Runs the backup/restore tool as an isolated child process with an
// environment allowlist and streams percentage progress from its stdout.

use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use devkeep_core::application::constants::PROGRESS_CHANNEL_CAPACITY;
use devkeep_core::domain::TaskKind;
use devkeep_core::port::transfer_executor::{
    ExecutionError, TransferExecutor, TransferHandle, TransferOutcome, TransferRequest,
};

/// Environment variables passed through to the transfer tool by default
pub const DEFAULT_ENV_ALLOWLIST: [&str; 4] = ["PATH", "HOME", "USER", "LANG"];

/// Program and argument templates for the transfer tool.
///
/// Placeholders (whole arguments only): `{serial}`, `{dest}`, and `{full}`,
/// which expands to `--full` for full backups and is dropped otherwise.
#[derive(Debug, Clone)]
pub struct TransferCommand {
    pub program: String,
    pub backup_args: Vec<String>,
    pub restore_args: Vec<String>,
}

impl TransferCommand {
    /// libimobiledevice's `idevicebackup2` argument layout
    pub fn idevicebackup2(program: impl Into<String>) -> Self {
        let args = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            program: program.into(),
            backup_args: args(&["-u", "{serial}", "backup", "{full}", "{dest}"]),
            restore_args: args(&["-u", "{serial}", "restore", "--system", "{dest}"]),
        }
    }

    fn render(&self, request: &TransferRequest) -> Vec<String> {
        let template = match request.kind {
            TaskKind::Backup => &self.backup_args,
            TaskKind::Restore => &self.restore_args,
        };
        template
            .iter()
            .filter_map(|arg| match arg.as_str() {
                "{serial}" => Some(request.serial.clone()),
                "{dest}" => Some(request.destination.display().to_string()),
                "{full}" if request.full => Some("--full".to_string()),
                "{full}" => None,
                other => Some(other.to_string()),
            })
            .collect()
    }
}

pub struct SubprocessTransferExecutor {
    command: TransferCommand,
    env_allowlist: Vec<String>,
}

impl SubprocessTransferExecutor {
    /// Create a new subprocess executor
    ///
    /// # Arguments
    /// * `command` - Transfer tool and its argument templates
    /// * `env_allowlist` - Environment variables the child may inherit
    pub fn new(command: TransferCommand, env_allowlist: Vec<String>) -> Self {
        Self {
            command,
            env_allowlist,
        }
    }

    /// Filter environment variables to allowlist only
    fn filter_env<I>(&self, env: I) -> HashMap<String, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        env.into_iter()
            .filter(|(k, _)| self.env_allowlist.contains(k))
            .collect()
    }
}

#[async_trait]
impl TransferExecutor for SubprocessTransferExecutor {
    async fn spawn(&self, request: TransferRequest) -> Result<TransferHandle, ExecutionError> {
        let args = self.command.render(&request);

        info!(
            program = %self.command.program,
            args = ?args,
            serial = %request.serial,
            kind = %request.kind,
            "Starting transfer subprocess"
        );

        // kill_on_drop(false): cancellation is advisory, the unit runs to completion
        let mut child = Command::new(&self.command.program)
            .args(&args)
            .env_clear()
            .envs(self.filter_env(std::env::vars()))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false)
            .spawn()
            .map_err(|e| {
                ExecutionError::SpawnFailed(format!("{}: {}", self.command.program, e))
            })?;

        let pid = child.id();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecutionError::IoError("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExecutionError::IoError("stderr not captured".to_string()))?;

        let (progress_tx, progress_rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        let (outcome_tx, outcome_rx) = oneshot::channel();

        tokio::spawn(async move {
            let last_error_line = tokio::spawn(async move {
                let mut last = None;
                let read = read_records(stderr, |record, complete| {
                    let record = record.trim();
                    if complete && !record.is_empty() {
                        last = Some(record.to_string());
                    }
                })
                .await;
                if let Err(e) = read {
                    debug!(pid = ?pid, error = %e, "Transfer stderr read ended early");
                }
                last
            });

            let mut last_sent = None;
            let read = read_records(stdout, |record, _| {
                if let Some(progress) = parse_progress(record) {
                    if last_sent != Some(progress) {
                        // A full channel drops the value; later reports supersede it
                        let _ = progress_tx.try_send(progress);
                        last_sent = Some(progress);
                    }
                }
            })
            .await;
            if let Err(e) = read {
                debug!(pid = ?pid, error = %e, "Transfer stdout read ended early");
            }

            let status = child.wait().await;
            let last_error_line = last_error_line.await.ok().flatten();

            let outcome = match status {
                Ok(status) if status.success() => {
                    let _ = progress_tx.try_send(100);
                    TransferOutcome::Succeeded
                }
                Ok(status) => TransferOutcome::Failed(last_error_line.unwrap_or_else(|| {
                    match status.code() {
                        Some(code) => format!("exit status {}", code),
                        None => "terminated by signal".to_string(),
                    }
                })),
                Err(e) => TransferOutcome::Failed(format!("failed to wait for transfer: {}", e)),
            };

            match &outcome {
                TransferOutcome::Succeeded => info!(pid = ?pid, "Transfer subprocess succeeded"),
                TransferOutcome::Failed(reason) => {
                    warn!(pid = ?pid, error = %reason, "Transfer subprocess failed")
                }
            }
            if outcome_tx.send(outcome).is_err() {
                debug!(pid = ?pid, "Transfer outcome dropped, monitor is gone");
            }
        });

        Ok(TransferHandle {
            progress: progress_rx,
            outcome: outcome_rx,
            pid,
        })
    }
}

/// Longest record kept before it is handed over unterminated
const MAX_RECORD_LEN: usize = 4096;

/// Feed `reader` to `on_record` one record at a time until EOF.
///
/// Records end at `\n` or `\r`, so carriage-return progress bars are seen
/// on every redraw. After each read the unterminated tail is also passed,
/// with `complete = false`. Invalid UTF-8 is replaced. The reader is dropped
/// on return, so the pipe never stays full behind a stopped reader.
async fn read_records<R, F>(reader: R, mut on_record: F) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    F: FnMut(&str, bool),
{
    let mut reader = BufReader::new(reader);
    let mut record: Vec<u8> = Vec::new();
    loop {
        let chunk = reader.fill_buf().await?;
        if chunk.is_empty() {
            break;
        }
        let consumed = chunk.len();
        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                if !record.is_empty() {
                    on_record(&String::from_utf8_lossy(&record), true);
                    record.clear();
                }
            } else {
                record.push(byte);
                if record.len() >= MAX_RECORD_LEN {
                    on_record(&String::from_utf8_lossy(&record), true);
                    record.clear();
                }
            }
        }
        reader.consume(consumed);
        if !record.is_empty() {
            on_record(&String::from_utf8_lossy(&record), false);
        }
    }
    if !record.is_empty() {
        on_record(&String::from_utf8_lossy(&record), true);
    }
    Ok(())
}

/// Last percentage (`45%`, `45.5%`) in a line of tool output, clamped to 0..=100
pub fn parse_progress(line: &str) -> Option<u8> {
    let bytes = line.as_bytes();
    let mut found = None;
    for (index, _) in line.match_indices('%') {
        let start = bytes[..index]
            .iter()
            .rposition(|b| !(b.is_ascii_digit() || *b == b'.'))
            .map_or(0, |p| p + 1);
        if let Ok(value) = line[start..index].parse::<f64>() {
            found = Some(value.clamp(0.0, 100.0) as u8);
        }
    }
    found
}
