//! Boundary to the external duplicate-detection engine.
//!
//! The controller only sees the [`Engine`] capability: five async commands that each
//! resolve or reject on their own, plus a push-event subscription. [`ProcessEngine`]
//! drives a detector executable; tests swap in `fake::FakeEngine`.

#[cfg(test)]
pub(crate) mod fake;
mod process;
mod wire;

pub use process::{ProcessEngine, ProcessEngineConfig};

use crate::model::{EngineEvent, EventKind, ExecutionParameters};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Where subscribed push events are delivered.
pub type EventSink = mpsc::UnboundedSender<EngineEvent>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode parameters: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("an execution is already running")]
    AlreadyRunning,

    #[error("no execution running")]
    NotRunning,

    #[error("{0}")]
    Unsupported(String),

    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait Engine: Send + Sync {
    /// Ask the user for a directory. `Ok(None)` means the picker was dismissed.
    async fn select_directory(&self) -> Result<Option<PathBuf>, EngineError>;

    /// Launch a run. The returned string is a human-readable acknowledgement.
    async fn start_execution(&self, params: ExecutionParameters) -> Result<String, EngineError>;

    /// Deliver a cancel signal. Success only means the signal was sent.
    async fn cancel_execution(&self) -> Result<String, EngineError>;

    async fn open_results_artifact(&self) -> Result<(), EngineError>;

    async fn results_artifact_exists(&self) -> Result<bool, EngineError>;

    /// Register `sink` for events of `kind`. Every call adds a listener.
    fn subscribe(&self, kind: EventKind, sink: EventSink);

    /// Wait up to `grace` for the current job to exit on its own, then stop it.
    /// Returns whether the job exited within the grace period (or none was running).
    async fn shutdown(&self, grace: Duration) -> bool;
}
