// Transfer Executor Port
// Runs a backup/restore transfer inside an isolated execution unit
// (subprocess or equivalent) and streams progress back.

use crate::domain::TaskKind;
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// What the execution unit should do
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub kind: TaskKind,
    pub serial: String,
    /// Backup directory to write to (backup) or read from (restore)
    pub destination: PathBuf,
    /// Ignored for restores
    pub full: bool,
}

/// Terminal result reported by the execution unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Succeeded,
    Failed(String),
}

/// Handle to a running execution unit.
///
/// The unit pushes any number of progress values followed by exactly one
/// outcome. A closed outcome channel means the unit died without reporting.
#[derive(Debug)]
pub struct TransferHandle {
    pub progress: mpsc::Receiver<u8>,
    pub outcome: oneshot::Receiver<TransferOutcome>,
    pub pid: Option<u32>,
}

/// Execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("IO error: {0}")]
    IoError(String),
}

/// Transfer Executor trait
///
/// Implementations:
/// - SubprocessTransferExecutor: runs the transfer tool as a child process
#[async_trait]
pub trait TransferExecutor: Send + Sync {
    /// Start the execution unit and return immediately
    ///
    /// # Errors
    /// - ExecutionError::SpawnFailed if the unit cannot be started
    async fn spawn(&self, request: TransferRequest) -> Result<TransferHandle, ExecutionError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Behavior of one scripted execution unit
    #[derive(Debug, Clone)]
    pub struct TransferScript {
        /// Progress values pushed in order
        pub progress: Vec<u8>,
        /// Delay before each progress value
        pub step_delay: Duration,
        /// Wait for a notification before reporting the outcome
        pub gate: Option<Arc<Notify>>,
        /// None simulates a crash (channels dropped without a result)
        pub outcome: Option<TransferOutcome>,
    }

    impl TransferScript {
        pub fn success() -> Self {
            Self {
                progress: vec![25, 50, 75],
                step_delay: Duration::from_millis(10),
                gate: None,
                outcome: Some(TransferOutcome::Succeeded),
            }
        }

        pub fn failure(message: impl Into<String>) -> Self {
            Self {
                outcome: Some(TransferOutcome::Failed(message.into())),
                ..Self::success()
            }
        }

        pub fn crash() -> Self {
            Self {
                outcome: None,
                ..Self::success()
            }
        }

        pub fn gated(mut self, gate: Arc<Notify>) -> Self {
            self.gate = Some(gate);
            self
        }

        pub fn with_progress(mut self, progress: Vec<u8>) -> Self {
            self.progress = progress;
            self
        }
    }

    /// Executor that plays queued scripts (falls back to `TransferScript::success`)
    #[derive(Default)]
    pub struct ScriptedTransferExecutor {
        scripts: Mutex<VecDeque<TransferScript>>,
        requests: Mutex<Vec<TransferRequest>>,
        spawn_error: Mutex<Option<String>>,
        running: Arc<AtomicUsize>,
        max_concurrent: Arc<AtomicUsize>,
    }

    impl ScriptedTransferExecutor {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_script(&self, script: TransferScript) {
            self.scripts.lock().unwrap().push_back(script);
        }

        pub fn fail_spawns(&self, message: impl Into<String>) {
            *self.spawn_error.lock().unwrap() = Some(message.into());
        }

        pub fn requests(&self) -> Vec<TransferRequest> {
            self.requests.lock().unwrap().clone()
        }

        /// Highest number of units observed running at once
        pub fn max_concurrent(&self) -> usize {
            self.max_concurrent.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TransferExecutor for ScriptedTransferExecutor {
        async fn spawn(&self, request: TransferRequest) -> Result<TransferHandle, ExecutionError> {
            if let Some(message) = self.spawn_error.lock().unwrap().clone() {
                return Err(ExecutionError::SpawnFailed(message));
            }
            self.requests.lock().unwrap().push(request);

            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(TransferScript::success);

            let (progress_tx, progress_rx) = mpsc::channel(64);
            let (outcome_tx, outcome_rx) = oneshot::channel();
            let running = Arc::clone(&self.running);
            let max_concurrent = Arc::clone(&self.max_concurrent);

            tokio::spawn(async move {
                let now_running = running.fetch_add(1, Ordering::SeqCst) + 1;
                max_concurrent.fetch_max(now_running, Ordering::SeqCst);

                for value in script.progress {
                    tokio::time::sleep(script.step_delay).await;
                    let _ = progress_tx.send(value).await;
                }
                if let Some(gate) = script.gate {
                    gate.notified().await;
                }

                running.fetch_sub(1, Ordering::SeqCst);
                if let Some(outcome) = script.outcome {
                    let _ = outcome_tx.send(outcome);
                }
            });

            Ok(TransferHandle {
                progress: progress_rx,
                outcome: outcome_rx,
                pid: None,
            })
        }
    }
}
