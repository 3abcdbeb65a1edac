//! Scriptable engine double for controller tests.

use super::{Engine, EngineError, EventSink};
use crate::model::{EngineEvent, EventKind, ExecutionParameters};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    SelectDirectory,
    Start(ExecutionParameters),
    Cancel,
    OpenResults,
    ResultsExists,
    Shutdown,
}

#[derive(Default)]
struct Script {
    calls: Vec<Call>,
    subscriptions: Vec<(EventKind, EventSink)>,
    start_error: Option<String>,
    cancel_error: Option<String>,
    open_error: Option<String>,
    exists: Option<bool>,
    picked: Option<PathBuf>,
}

/// Records every command and answers from a script. Cloning shares the script.
#[derive(Clone, Default)]
pub(crate) struct FakeEngine {
    inner: Arc<Mutex<Script>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut Script) -> R) -> R {
        let mut guard = self.inner.lock().unwrap();
        f(&mut guard)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.with(|s| s.calls.clone())
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.with(|s| s.calls.iter().filter(|c| pred(c)).count())
    }

    pub fn subscriptions(&self) -> Vec<EventKind> {
        self.with(|s| s.subscriptions.iter().map(|(k, _)| *k).collect())
    }

    pub fn fail_start(&self, msg: &str) {
        self.with(|s| s.start_error = Some(msg.into()));
    }

    pub fn fail_cancel(&self, msg: &str) {
        self.with(|s| s.cancel_error = Some(msg.into()));
    }

    pub fn fail_open(&self, msg: &str) {
        self.with(|s| s.open_error = Some(msg.into()));
    }

    /// `None` makes the existence check itself fail.
    pub fn set_exists(&self, exists: Option<bool>) {
        self.with(|s| s.exists = exists);
    }

    pub fn set_picked(&self, path: Option<PathBuf>) {
        self.with(|s| s.picked = path);
    }

    /// Deliver `ev` to every sink subscribed for its kind, like the real engine would.
    pub fn emit(&self, ev: EngineEvent) {
        self.with(|s| {
            for (kind, sink) in &s.subscriptions {
                if *kind == ev.kind() {
                    let _ = sink.send(ev.clone());
                }
            }
        });
    }
}

#[async_trait]
impl Engine for FakeEngine {
    async fn select_directory(&self) -> Result<Option<PathBuf>, EngineError> {
        self.with(|s| {
            s.calls.push(Call::SelectDirectory);
            Ok(s.picked.clone())
        })
    }

    async fn start_execution(&self, params: ExecutionParameters) -> Result<String, EngineError> {
        self.with(|s| {
            s.calls.push(Call::Start(params));
            match &s.start_error {
                Some(msg) => Err(EngineError::Other(msg.clone())),
                None => Ok("Execution started".into()),
            }
        })
    }

    async fn cancel_execution(&self) -> Result<String, EngineError> {
        self.with(|s| {
            s.calls.push(Call::Cancel);
            match &s.cancel_error {
                Some(msg) => Err(EngineError::Other(msg.clone())),
                None => Ok("Cancellation signal sent".into()),
            }
        })
    }

    async fn open_results_artifact(&self) -> Result<(), EngineError> {
        self.with(|s| {
            s.calls.push(Call::OpenResults);
            match &s.open_error {
                Some(msg) => Err(EngineError::Other(msg.clone())),
                None => Ok(()),
            }
        })
    }

    async fn results_artifact_exists(&self) -> Result<bool, EngineError> {
        self.with(|s| {
            s.calls.push(Call::ResultsExists);
            s.exists
                .ok_or_else(|| EngineError::Other("existence check failed".into()))
        })
    }

    async fn shutdown(&self, _grace: Duration) -> bool {
        self.with(|s| s.calls.push(Call::Shutdown));
        true
    }

    fn subscribe(&self, kind: EventKind, sink: EventSink) {
        self.with(|s| s.subscriptions.push((kind, sink)));
    }
}
