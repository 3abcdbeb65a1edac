use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::OffsetDateTime;

/// Parameters sent to the engine for one run.
///
/// Field names are the engine's wire contract; do not rename them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionParameters {
    pub source_dir: PathBuf,
    /// Empty means single-folder mode.
    #[serde(default)]
    pub target_dir: PathBuf,
    #[serde(default)]
    pub use_cache: bool,
    #[serde(default)]
    pub cache_dir: PathBuf,
    #[serde(default)]
    pub results_path: PathBuf,
    #[serde(default)]
    pub paranoid_mode: bool,
    /// 0 = all cores, resolved by the engine.
    #[serde(default)]
    pub cpu_count: u32,
    #[serde(default, rename = "bufferSizeKB")]
    pub buffer_size_kb: u32,
    #[serde(default)]
    pub keep_logs: bool,
    // Reserved; this layer always sends false.
    #[serde(default)]
    pub dual_folder_mode_enabled: bool,
}

impl ExecutionParameters {
    pub fn is_single_folder(&self) -> bool {
        self.target_dir.as_os_str().is_empty()
    }
}

/// Lifecycle of one run as seen by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Starting,
    Running,
    Cancelling,
    Completed,
    Failed,
}

impl RunState {
    /// A run has been started and has not reached a terminal state yet.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            RunState::Starting | RunState::Running | RunState::Cancelling
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }

    pub fn label(self) -> &'static str {
        match self {
            RunState::Idle => "Idle",
            RunState::Starting => "Starting",
            RunState::Running => "Running",
            RunState::Cancelling => "Cancelling",
            RunState::Completed => "Completed",
            RunState::Failed => "Failed",
        }
    }
}

/// Last progress reported for the current run. `percent` is stored raw.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub title: String,
    pub percent: f64,
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self {
            title: "Ready to run.".into(),
            percent: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    /// Engine `detailedLog` output.
    Detail,
    /// Messages produced by the controller itself (acknowledgements, cancel status).
    Notice,
    Error,
    /// Binding/transport failures.
    Fatal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub seq: u64,
    pub timestamp: OffsetDateTime,
    pub kind: LogKind,
    pub message: String,
}

/// Push events emitted by the engine, independent of command resolutions.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    ProgressUpdate {
        title: String,
        percent: Option<f64>,
    },
    DetailedLog(String),
    ErrorUpdate(String),
    ExecutionFinished {
        artifact: Option<PathBuf>,
    },
}

/// Subscription keys for the engine's push events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ProgressUpdate,
    DetailedLog,
    ErrorUpdate,
    ExecutionFinished,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::ProgressUpdate,
        EventKind::DetailedLog,
        EventKind::ErrorUpdate,
        EventKind::ExecutionFinished,
    ];

    /// Wire name of the event.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::ProgressUpdate => "progressUpdate",
            EventKind::DetailedLog => "detailedLog",
            EventKind::ErrorUpdate => "errorUpdate",
            EventKind::ExecutionFinished => "executionFinished",
        }
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl EngineEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            EngineEvent::ProgressUpdate { .. } => EventKind::ProgressUpdate,
            EngineEvent::DetailedLog(_) => EventKind::DetailedLog,
            EngineEvent::ErrorUpdate(_) => EventKind::ErrorUpdate,
            EngineEvent::ExecutionFinished { .. } => EventKind::ExecutionFinished,
        }
    }

    /// Progress at or above 100% counts as completion.
    pub fn is_completion(&self) -> bool {
        match self {
            EngineEvent::ProgressUpdate {
                percent: Some(p), ..
            } => *p >= 100.0,
            EngineEvent::ExecutionFinished { .. } => true,
            _ => false,
        }
    }
}
