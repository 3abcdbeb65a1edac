//! Run lifecycle controller.
//!
//! Owns the run state, progress, log buffer and control enablement for one session.
//! Two inputs drive it, in whatever order they happen to arrive: push events from the
//! engine ([`Controller::handle_event`]) and resolutions of commands it issued
//! ([`Controller::handle_resolution`]). Both are applied on the session task only.

use super::collector::{collect, FormField, FormState};
use super::events::EventSubscription;
use super::results_gate;
use crate::engine::{Engine, EngineError};
use crate::log_buffer::LogBuffer;
use crate::model::{EngineEvent, ExecutionParameters, LogKind, ProgressSnapshot, RunState};
use crate::projector::{self, View};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;

/// Which actions the front end may offer right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controls {
    pub start: bool,
    pub cancel: bool,
    pub results: bool,
}

impl Default for Controls {
    fn default() -> Self {
        Self {
            start: true,
            cancel: false,
            results: false,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StartError {
    #[error("a source directory is required")]
    MissingSource,
    #[error("cannot start while {}", .0.label())]
    Busy(RunState),
}

/// Outcome of a command issued to the engine. `run` ties it to the run that issued it.
#[derive(Debug)]
pub(crate) enum Resolution {
    Started {
        run: u64,
        result: Result<String, EngineError>,
    },
    Cancelled {
        run: u64,
        result: Result<String, EngineError>,
    },
    ResultsChecked {
        run: u64,
        result: Result<bool, EngineError>,
    },
    Opened(Result<(), EngineError>),
    DirectoryPicked {
        field: FormField,
        result: Result<Option<PathBuf>, EngineError>,
    },
}

pub struct Controller {
    engine: Arc<dyn Engine>,
    events: EventSubscription,
    state: RunState,
    progress: ProgressSnapshot,
    logs: LogBuffer,
    controls: Controls,
    run: u64,
    artifact: Option<PathBuf>,
    pending: FuturesUnordered<BoxFuture<'static, Resolution>>,
    pub form: FormState,
}

impl Controller {
    /// Build the session controller. The receiver carries the engine's push events and
    /// must be fed back through [`Controller::handle_event`].
    pub fn new(engine: Arc<dyn Engine>, form: FormState) -> (Self, UnboundedReceiver<EngineEvent>) {
        let (events, rx) = EventSubscription::new();
        let ctrl = Self {
            engine,
            events,
            state: RunState::Idle,
            progress: ProgressSnapshot::default(),
            logs: LogBuffer::default(),
            controls: Controls::default(),
            run: 0,
            artifact: None,
            pending: FuturesUnordered::new(),
            form,
        };
        (ctrl, rx)
    }

    /// Attach event listeners and ask whether a results artifact already exists.
    pub fn bootstrap(&mut self) {
        self.attach_listeners();
        self.refresh_results();
    }

    pub fn attach_listeners(&mut self) -> bool {
        self.events.attach(self.engine.as_ref())
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn progress(&self) -> &ProgressSnapshot {
        &self.progress
    }

    pub fn logs(&self) -> &LogBuffer {
        &self.logs
    }

    pub fn logs_mut(&mut self) -> &mut LogBuffer {
        &mut self.logs
    }

    pub fn controls(&self) -> Controls {
        self.controls
    }

    /// Artifact reported by the last `executionFinished` event, if any.
    pub fn artifact(&self) -> Option<&PathBuf> {
        self.artifact.as_ref()
    }

    pub fn engine(&self) -> Arc<dyn Engine> {
        self.engine.clone()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn view(&self, tick: u64) -> View {
        projector::project(self.state, &self.progress, self.controls, tick)
    }

    /// Collect the form and start a run from it.
    pub fn start_from_form(&mut self) -> Result<u64, StartError> {
        let params = collect(&self.form);
        self.start(params)
    }

    /// Start a run. Rejected locally, without contacting the engine, when the source
    /// directory is empty or the start action is disabled.
    pub fn start(&mut self, params: ExecutionParameters) -> Result<u64, StartError> {
        if params.source_dir.as_os_str().is_empty() {
            tracing::warn!("start rejected: no source directory");
            return Err(StartError::MissingSource);
        }
        if !self.controls.start {
            tracing::debug!(state = self.state.label(), "start rejected: busy");
            return Err(StartError::Busy(self.state));
        }

        self.run += 1;
        let run = self.run;
        self.logs.clear();
        self.progress = ProgressSnapshot {
            title: "Starting up...".into(),
            percent: 0.0,
        };
        self.artifact = None;
        self.state = RunState::Starting;
        self.controls = Controls {
            start: false,
            cancel: true,
            results: false,
        };
        tracing::info!(
            run,
            source = %params.source_dir.display(),
            target = %params.target_dir.display(),
            single_folder = params.is_single_folder(),
            "starting execution"
        );

        let engine = self.engine.clone();
        self.pending.push(
            async move {
                let result = engine.start_execution(params).await;
                Resolution::Started { run, result }
            }
            .boxed(),
        );
        Ok(run)
    }

    /// Request cancellation of the current run. The cancel action is disabled before the
    /// request is even issued, so a repeated call cannot send a second signal.
    pub fn cancel(&mut self) -> bool {
        if !matches!(self.state, RunState::Starting | RunState::Running) {
            tracing::debug!(state = self.state.label(), "cancel ignored");
            return false;
        }
        self.state = RunState::Cancelling;
        self.controls.cancel = false;
        self.progress.title = "Cancelling…".into();
        tracing::info!(run = self.run, "cancelling execution");

        let run = self.run;
        let engine = self.engine.clone();
        self.pending.push(
            async move {
                let result = engine.cancel_execution().await;
                Resolution::Cancelled { run, result }
            }
            .boxed(),
        );
        true
    }

    /// Ask the engine to open the results artifact. Does nothing while the action is disabled.
    pub fn open_results(&mut self) -> bool {
        if !self.controls.results {
            return false;
        }
        let engine = self.engine.clone();
        self.pending.push(
            async move { Resolution::Opened(engine.open_results_artifact().await) }.boxed(),
        );
        true
    }

    /// Ask the engine for a directory and store the answer in `field`.
    pub fn select_directory(&mut self, field: FormField) {
        let engine = self.engine.clone();
        self.pending.push(
            async move {
                let result = engine.select_directory().await;
                Resolution::DirectoryPicked { field, result }
            }
            .boxed(),
        );
    }

    pub fn refresh_results(&mut self) {
        self.pending
            .push(results_gate::refresh(self.engine.clone(), self.run));
    }

    /// Wait for the next issued command to resolve. Never completes while nothing is pending.
    pub(crate) async fn next_resolution(&mut self) -> Resolution {
        match self.pending.next().await {
            Some(res) => res,
            None => futures::future::pending().await,
        }
    }

    pub fn handle_event(&mut self, ev: EngineEvent) {
        match ev {
            EngineEvent::ProgressUpdate { title, percent } => self.on_progress(title, percent),
            EngineEvent::DetailedLog(message) => {
                self.logs.push(LogKind::Detail, message);
                self.mark_running();
            }
            EngineEvent::ErrorUpdate(message) => self.on_error(message),
            EngineEvent::ExecutionFinished { artifact } => {
                if !self.state.is_active() {
                    tracing::debug!(state = self.state.label(), "finished signal ignored");
                    return;
                }
                self.complete(artifact);
            }
        }
    }

    pub(crate) fn handle_resolution(&mut self, res: Resolution) {
        match res {
            Resolution::Started { run, result } => {
                if run != self.run {
                    tracing::debug!(run, current = self.run, "stale start resolution");
                    return;
                }
                match result {
                    Ok(ack) => self.logs.push(LogKind::Notice, ack),
                    Err(e) => self.on_binding_error(e),
                }
            }
            Resolution::Cancelled { run, result } => {
                if run != self.run {
                    return;
                }
                match result {
                    Ok(ack) => {
                        if self.state == RunState::Cancelling {
                            self.progress.title = ack;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "cancel signal not delivered");
                        self.logs
                            .push(LogKind::Error, format!("Failed to cancel execution: {e}"));
                        // Cancel stays disabled; start comes back so the user is never stuck.
                        self.controls.start = true;
                    }
                }
            }
            Resolution::ResultsChecked { run, result } => {
                let exists = results_gate::verdict(result);
                if run != self.run || self.state.is_active() {
                    tracing::debug!(run, current = self.run, "stale results check");
                    return;
                }
                self.controls.results = exists;
            }
            Resolution::Opened(Ok(())) => {}
            Resolution::Opened(Err(e)) => {
                tracing::warn!(error = %e, "open results failed");
                self.logs
                    .push(LogKind::Error, format!("Failed to open results file: {e}"));
            }
            Resolution::DirectoryPicked { field, result } => match result {
                Ok(Some(path)) => self.form.set_path(field, &path),
                Ok(None) => {}
                Err(e) => tracing::debug!(error = %e, "directory selection failed"),
            },
        }
    }

    fn mark_running(&mut self) {
        if self.state == RunState::Starting {
            self.state = RunState::Running;
            tracing::debug!(run = self.run, "execution running");
        }
    }

    fn on_progress(&mut self, title: String, percent: Option<f64>) {
        if !self.state.is_active() {
            tracing::debug!(state = self.state.label(), "progress outside a run ignored");
            return;
        }
        if !title.is_empty() && self.state != RunState::Cancelling {
            self.progress.title = title;
        }
        if let Some(p) = percent {
            self.progress.percent = p;
        }
        self.mark_running();

        if percent.is_some_and(|p| p >= 100.0) {
            self.complete(None);
        }
    }

    fn on_error(&mut self, message: String) {
        self.logs.push(LogKind::Error, message.clone());
        if !self.state.is_active() {
            tracing::debug!(state = self.state.label(), "error outside a run ignored");
            return;
        }
        tracing::warn!(run = self.run, %message, "execution failed");
        self.fail("Error: Process Failed");
    }

    fn on_binding_error(&mut self, e: EngineError) {
        tracing::warn!(run = self.run, error = %e, "start request failed");
        self.logs.push(LogKind::Fatal, format!("binding error: {e}"));
        if self.state.is_active() {
            self.fail("FATAL BINDING ERROR");
        } else {
            self.controls.start = true;
            self.controls.cancel = false;
        }
    }

    fn complete(&mut self, artifact: Option<PathBuf>) {
        self.state = RunState::Completed;
        self.progress.title = "Process Complete.".into();
        self.progress.percent = 100.0;
        if artifact.is_some() {
            self.artifact = artifact;
        }
        self.controls.start = true;
        self.controls.cancel = false;
        tracing::info!(run = self.run, "execution completed");
        self.refresh_results();
    }

    fn fail(&mut self, title: &str) {
        self.state = RunState::Failed;
        self.progress.title = title.into();
        self.progress.percent = 100.0;
        self.controls = Controls {
            start: true,
            cancel: false,
            results: false,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::{Call, FakeEngine};
    use crate::projector::BarVariant;

    fn params(source: &str) -> ExecutionParameters {
        collect(&FormState {
            source_dir: source.into(),
            ..Default::default()
        })
    }

    fn controller(engine: &FakeEngine) -> (Controller, UnboundedReceiver<EngineEvent>) {
        Controller::new(Arc::new(engine.clone()), FormState::default())
    }

    /// Resolve everything currently pending, in completion order.
    async fn settle(ctrl: &mut Controller) {
        while ctrl.has_pending() {
            let res = ctrl.next_resolution().await;
            ctrl.handle_resolution(res);
        }
    }

    fn progress(title: &str, percent: f64) -> EngineEvent {
        EngineEvent::ProgressUpdate {
            title: title.into(),
            percent: Some(percent),
        }
    }

    #[tokio::test]
    async fn empty_source_never_reaches_engine() {
        let engine = FakeEngine::new();
        let (mut ctrl, _rx) = controller(&engine);

        assert_eq!(ctrl.start(params("")), Err(StartError::MissingSource));
        settle(&mut ctrl).await;

        assert_eq!(ctrl.state(), RunState::Idle);
        assert!(engine.calls().is_empty());
        assert!(ctrl.controls().start);
    }

    #[tokio::test]
    async fn scenario_progress_to_completion() {
        let engine = FakeEngine::new();
        engine.set_exists(Some(true));
        let (mut ctrl, _rx) = controller(&engine);

        ctrl.start(params("/a")).unwrap();
        assert_eq!(ctrl.state(), RunState::Starting);
        assert_eq!(
            ctrl.controls(),
            Controls {
                start: false,
                cancel: true,
                results: false
            }
        );
        settle(&mut ctrl).await;

        match &engine.calls()[0] {
            Call::Start(sent) => {
                assert_eq!(sent.source_dir, PathBuf::from("/a"));
                assert!(sent.target_dir.as_os_str().is_empty());
                assert!(!sent.dual_folder_mode_enabled);
            }
            other => panic!("unexpected call {other:?}"),
        }

        ctrl.handle_event(progress("Scanning", 50.0));
        assert_eq!(ctrl.state(), RunState::Running);
        assert_eq!(ctrl.view(0).bar.width, 50.0);

        ctrl.handle_event(progress("Done", 100.0));
        assert_eq!(ctrl.state(), RunState::Completed);
        assert!(ctrl.controls().start);
        assert!(!ctrl.controls().cancel);
        settle(&mut ctrl).await;
        assert_eq!(engine.count(|c| *c == Call::ResultsExists), 1);
        assert!(ctrl.controls().results);

        let logs_before = ctrl.logs().len();
        ctrl.handle_event(EngineEvent::ExecutionFinished {
            artifact: Some("/tmp/results.csv".into()),
        });
        assert!(!ctrl.has_pending());
        assert_eq!(ctrl.state(), RunState::Completed);
        assert_eq!(ctrl.logs().len(), logs_before);
        assert_eq!(engine.count(|c| *c == Call::ResultsExists), 1);
    }

    #[tokio::test]
    async fn completion_side_effects_run_once() {
        let engine = FakeEngine::new();
        engine.set_exists(Some(true));
        let (mut ctrl, _rx) = controller(&engine);
        ctrl.start(params("/a")).unwrap();

        ctrl.handle_event(progress("Done", 100.0));
        ctrl.handle_event(progress("Done", 100.0));
        settle(&mut ctrl).await;

        assert_eq!(engine.count(|c| *c == Call::ResultsExists), 1);
        assert_eq!(ctrl.state(), RunState::Completed);
    }

    #[tokio::test]
    async fn finished_event_alone_completes() {
        let engine = FakeEngine::new();
        engine.set_exists(Some(false));
        let (mut ctrl, _rx) = controller(&engine);
        ctrl.start(params("/a")).unwrap();
        ctrl.handle_event(progress("Hashing", 40.0));

        ctrl.handle_event(EngineEvent::ExecutionFinished {
            artifact: Some("/tmp/r.csv".into()),
        });
        assert_eq!(ctrl.state(), RunState::Completed);
        assert_eq!(ctrl.artifact(), Some(&PathBuf::from("/tmp/r.csv")));

        // A late 100% progress after the finished signal changes nothing.
        ctrl.handle_event(progress("Done", 100.0));
        settle(&mut ctrl).await;
        assert_eq!(engine.count(|c| *c == Call::ResultsExists), 1);
        assert!(!ctrl.controls().results);
    }

    #[tokio::test]
    async fn scenario_cancel_then_abort() {
        let engine = FakeEngine::new();
        let (mut ctrl, _rx) = controller(&engine);
        ctrl.start(params("/a")).unwrap();

        assert!(ctrl.cancel());
        // Disabled before any resolution has been processed.
        assert!(!ctrl.controls().cancel);
        assert_eq!(ctrl.state(), RunState::Cancelling);

        assert!(!ctrl.cancel());
        settle(&mut ctrl).await;
        assert_eq!(engine.count(|c| *c == Call::Cancel), 1);
        // The acknowledgement only updates the title.
        assert_eq!(ctrl.state(), RunState::Cancelling);
        assert_eq!(ctrl.progress().title, "Cancellation signal sent");

        ctrl.handle_event(EngineEvent::ErrorUpdate("aborted".into()));
        assert_eq!(ctrl.state(), RunState::Failed);
        assert!(ctrl.controls().start);
        assert!(!ctrl.controls().cancel);
        assert!(!ctrl.controls().results);
        let view = ctrl.view(0);
        assert_eq!(view.bar.variant, BarVariant::Error);
        assert_eq!(view.bar.width, 100.0);
    }

    #[tokio::test]
    async fn cancel_requires_active_run() {
        let engine = FakeEngine::new();
        let (mut ctrl, _rx) = controller(&engine);
        assert!(!ctrl.cancel());
        settle(&mut ctrl).await;
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn binding_error_fails_the_run() {
        let engine = FakeEngine::new();
        engine.fail_start("channel closed");
        let (mut ctrl, _rx) = controller(&engine);
        ctrl.start(params("/a")).unwrap();
        settle(&mut ctrl).await;

        assert_eq!(ctrl.state(), RunState::Failed);
        assert_eq!(ctrl.progress().title, "FATAL BINDING ERROR");
        assert!(ctrl.controls().start);
        assert!(!ctrl.controls().cancel);
        let fatal: Vec<_> = ctrl
            .logs()
            .entries()
            .filter(|e| e.kind == LogKind::Fatal)
            .collect();
        assert_eq!(fatal.len(), 1);
        assert!(fatal[0].message.starts_with("binding error:"));
    }

    #[tokio::test]
    async fn ack_after_events_only_logs() {
        let engine = FakeEngine::new();
        engine.set_exists(Some(false));
        let (mut ctrl, _rx) = controller(&engine);
        ctrl.start(params("/a")).unwrap();

        // Events overtake the start acknowledgement.
        ctrl.handle_event(EngineEvent::DetailedLog("reading".into()));
        assert_eq!(ctrl.state(), RunState::Running);
        ctrl.handle_event(progress("Done", 100.0));
        settle(&mut ctrl).await;

        assert_eq!(ctrl.state(), RunState::Completed);
        let kinds: Vec<LogKind> = ctrl.logs().entries().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![LogKind::Detail, LogKind::Notice]);
    }

    #[tokio::test]
    async fn stale_binding_error_is_ignored() {
        let engine = FakeEngine::new();
        engine.fail_start("transport reset");
        let (mut ctrl, _rx) = controller(&engine);

        ctrl.start(params("/a")).unwrap();
        let first = ctrl.next_resolution().await;
        // First run finishes through events before its start call is processed.
        ctrl.handle_event(progress("Done", 100.0));
        settle(&mut ctrl).await;
        ctrl.start(params("/b")).unwrap();

        ctrl.handle_resolution(first);
        assert_eq!(ctrl.state(), RunState::Starting);
        assert!(ctrl.controls().cancel);
    }

    #[tokio::test]
    async fn stale_results_check_cannot_enable_results_mid_run() {
        let engine = FakeEngine::new();
        engine.set_exists(Some(true));
        let (mut ctrl, _rx) = controller(&engine);
        ctrl.bootstrap();
        let check = ctrl.next_resolution().await;

        ctrl.start(params("/a")).unwrap();
        ctrl.handle_resolution(check);
        assert!(!ctrl.controls().results);
    }

    #[tokio::test]
    async fn bootstrap_attaches_and_checks_results() {
        let engine = FakeEngine::new();
        engine.set_exists(None);
        let (mut ctrl, mut rx) = controller(&engine);

        ctrl.bootstrap();
        assert!(!ctrl.attach_listeners());
        settle(&mut ctrl).await;

        assert_eq!(engine.subscriptions().len(), 4);
        // A failing check stays silent and leaves the action disabled.
        assert!(!ctrl.controls().results);
        assert!(ctrl.logs().is_empty());

        ctrl.start(params("/a")).unwrap();
        engine.emit(progress("Hashing", 10.0));
        let ev = rx.recv().await.unwrap();
        ctrl.handle_event(ev);
        assert_eq!(ctrl.progress().percent, 10.0);
    }

    #[tokio::test]
    async fn cancel_delivery_failure_restores_start_only() {
        let engine = FakeEngine::new();
        engine.fail_cancel("signal lost");
        let (mut ctrl, _rx) = controller(&engine);
        ctrl.start(params("/a")).unwrap();
        ctrl.handle_event(progress("Hashing", 20.0));

        ctrl.cancel();
        settle(&mut ctrl).await;

        assert!(ctrl.controls().start);
        assert!(!ctrl.controls().cancel);
        assert!(ctrl
            .logs()
            .entries()
            .any(|e| e.kind == LogKind::Error && e.message.contains("signal lost")));
    }

    #[tokio::test]
    async fn start_resets_previous_run() {
        let engine = FakeEngine::new();
        let (mut ctrl, _rx) = controller(&engine);
        ctrl.start(params("/a")).unwrap();
        for i in 0..150 {
            ctrl.handle_event(EngineEvent::DetailedLog(format!("line {i}")));
        }
        assert_eq!(ctrl.logs().len(), 100);
        ctrl.handle_event(EngineEvent::ErrorUpdate("disk gone".into()));
        assert_eq!(ctrl.start(params("")), Err(StartError::MissingSource));

        ctrl.start(params("/a")).unwrap();
        assert!(ctrl.logs().is_empty());
        assert_eq!(ctrl.progress().percent, 0.0);
        assert_eq!(ctrl.view(0).bar.variant, BarVariant::Normal);
    }

    #[tokio::test]
    async fn start_while_running_is_busy() {
        let engine = FakeEngine::new();
        let (mut ctrl, _rx) = controller(&engine);
        ctrl.start(params("/a")).unwrap();
        assert_eq!(
            ctrl.start(params("/a")),
            Err(StartError::Busy(RunState::Starting))
        );
    }

    #[tokio::test]
    async fn non_monotonic_progress_is_displayed_as_received() {
        let engine = FakeEngine::new();
        let (mut ctrl, _rx) = controller(&engine);
        ctrl.start(params("/a")).unwrap();

        ctrl.handle_event(progress("Hashing", 70.0));
        ctrl.handle_event(progress("Finding", 30.0));
        assert_eq!(ctrl.view(0).bar.width, 30.0);
        ctrl.handle_event(progress("Odd", -12.0));
        assert_eq!(ctrl.view(0).bar.width, 0.0);
        assert_eq!(ctrl.state(), RunState::Running);
    }

    #[tokio::test]
    async fn open_results_and_pick_directory() {
        let engine = FakeEngine::new();
        engine.set_exists(Some(true));
        engine.fail_open("no handler");
        engine.set_picked(Some("/home/me/pics".into()));
        let (mut ctrl, _rx) = controller(&engine);

        assert!(!ctrl.open_results());
        ctrl.bootstrap();
        settle(&mut ctrl).await;
        assert!(ctrl.open_results());
        ctrl.select_directory(FormField::SourceDir);
        settle(&mut ctrl).await;

        assert_eq!(ctrl.form.source_dir, "/home/me/pics");
        assert_eq!(ctrl.state(), RunState::Idle);
        assert!(ctrl
            .logs()
            .entries()
            .any(|e| e.message.starts_with("Failed to open results file")));
    }

    #[tokio::test]
    async fn events_while_idle_do_not_change_state() {
        let engine = FakeEngine::new();
        let (mut ctrl, _rx) = controller(&engine);
        ctrl.handle_event(EngineEvent::ErrorUpdate("leftover".into()));
        ctrl.handle_event(progress("Done", 100.0));
        assert_eq!(ctrl.state(), RunState::Idle);
        assert!(!ctrl.has_pending());
    }
}
