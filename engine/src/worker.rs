//! The contract between the orchestrator and an analysis engine.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::{RequestId, TaggedResult};

#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkerError {
    #[error("Engine is not installed")]
    NotInstalled,
    #[error("Failed to spawn engine: {0}")]
    Spawn(String),
    #[error("Engine did not become ready: {0}")]
    Handshake(String),
    #[error("Engine is not running")]
    NotRunning,
    #[error("Failed to send command: {0}")]
    Send(String),
}

/// Tunables applied to a running engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerOptions {
    pub threads: u32,
    pub hash_mb: u32,
    /// MultiPV.
    pub line_count: u8,
    /// Use the neural-network evaluation where the engine offers it.
    pub use_acceleration: bool,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            threads: 1,
            hash_mb: 16,
            line_count: 1,
            use_acceleration: true,
        }
    }
}

/// A single, supervised analysis process.
///
/// At most one request is outstanding at a time. Every result published on
/// [`EngineWorker::results`] carries the [`RequestId`] it was issued under;
/// consumers compare that tag against their own before using it.
#[async_trait]
pub trait EngineWorker: Send + Sync + 'static {
    fn is_installed(&self) -> bool;

    /// Start the process if it is not already running.
    async fn initialize(&self) -> Result<(), WorkerError>;

    /// Kill the current process (if any) and start a fresh one with the last
    /// applied options.
    async fn restart(&self) -> Result<(), WorkerError>;

    /// Abort the running search. A no-op when idle or not running.
    async fn stop(&self);

    /// Terminate the process.
    async fn shutdown(&self);

    async fn configure(&self, options: WorkerOptions) -> Result<(), WorkerError>;

    /// Clear engine-internal state (hash, history) before an unrelated search.
    async fn new_game(&self) -> Result<(), WorkerError>;

    /// Depth-limited search.
    async fn analyze(&self, request: RequestId, fen: &str, depth: u8) -> Result<(), WorkerError>;

    /// Search for a fixed amount of time.
    async fn analyze_with_time(
        &self,
        request: RequestId,
        fen: &str,
        budget: Duration,
    ) -> Result<(), WorkerError>;

    /// Wait for the current search to finish. Returns false on timeout or if
    /// the process died while waiting.
    async fn wait_for_completion(&self, timeout: Duration) -> bool;

    /// Whether the process is alive and answering.
    fn ready(&self) -> watch::Receiver<bool>;

    /// Latest search output, tagged with its request.
    fn results(&self) -> watch::Receiver<Option<TaggedResult>>;

    fn is_ready(&self) -> bool {
        *self.ready().borrow()
    }
}
