//! Engine implementation that drives the detector as a child process.
//!
//! Parameters go in as one JSON object on stdin; events come back as JSON lines on
//! stdout. Stderr is forwarded as detailed log output.

use super::wire::parse_line;
use super::{Engine, EngineError, EventSink};
use crate::model::{EngineEvent, EventKind, ExecutionParameters};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{oneshot, watch};

#[derive(Debug, Clone)]
pub struct ProcessEngineConfig {
    /// Detector executable.
    pub program: String,
    pub args: Vec<String>,
    /// Directory picker command line, e.g. `zenity --file-selection --directory`.
    pub picker: Option<Vec<String>>,
    /// Results artifact checked before any run has been started.
    pub default_results_path: PathBuf,
}

/// Fan-out of engine events to subscribed sinks.
#[derive(Clone, Default)]
struct Dispatcher {
    sinks: Arc<Mutex<HashMap<EventKind, Vec<EventSink>>>>,
}

impl Dispatcher {
    fn add(&self, kind: EventKind, sink: EventSink) {
        lock(&self.sinks).entry(kind).or_default().push(sink);
    }

    fn emit(&self, ev: EngineEvent) {
        let mut sinks = lock(&self.sinks);
        if let Some(list) = sinks.get_mut(&ev.kind()) {
            list.retain(|s| !s.is_closed());
            for sink in list.iter() {
                let _ = sink.send(ev.clone());
            }
        }
    }
}

/// Handle for the currently (or most recently) running child.
struct Job {
    cancel_tx: Option<oneshot::Sender<()>>,
    /// Flips to true once the child has exited and its output is drained.
    done: watch::Receiver<bool>,
}

impl Job {
    fn is_live(&self) -> bool {
        !*self.done.borrow()
    }
}

pub struct ProcessEngine {
    cfg: ProcessEngineConfig,
    dispatcher: Dispatcher,
    job: Mutex<Option<Job>>,
    results_path: Mutex<PathBuf>,
}

impl ProcessEngine {
    pub fn new(cfg: ProcessEngineConfig) -> Self {
        let results_path = cfg.default_results_path.clone();
        Self {
            cfg,
            dispatcher: Dispatcher::default(),
            job: Mutex::new(None),
            results_path: Mutex::new(results_path),
        }
    }

    fn current_results_path(&self) -> PathBuf {
        lock(&self.results_path).clone()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Forward every line of `reader` to the dispatcher until EOF.
async fn forward_lines<R>(reader: R, dispatcher: Dispatcher, decode: bool)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let ev = if decode {
                    parse_line(&line)
                } else if line.trim().is_empty() {
                    None
                } else {
                    Some(EngineEvent::DetailedLog(line))
                };
                if let Some(ev) = ev {
                    if ev.is_completion() {
                        tracing::debug!(event = ev.kind().as_str(), "engine reported completion");
                    }
                    dispatcher.emit(ev);
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "reading engine output failed");
                break;
            }
        }
    }
}

#[async_trait]
impl Engine for ProcessEngine {
    async fn select_directory(&self) -> Result<Option<PathBuf>, EngineError> {
        let Some((program, args)) = self.cfg.picker.as_ref().and_then(|p| p.split_first())
        else {
            return Ok(None);
        };
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| EngineError::Spawn {
                program: program.clone(),
                source,
            })?;
        // Pickers report a dismissed dialog through their exit status.
        if !output.status.success() {
            return Ok(None);
        }
        let picked = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!picked.is_empty()).then(|| PathBuf::from(picked)))
    }

    async fn start_execution(&self, params: ExecutionParameters) -> Result<String, EngineError> {
        if lock(&self.job).as_ref().is_some_and(Job::is_live) {
            return Err(EngineError::AlreadyRunning);
        }

        let mut payload = serde_json::to_vec(&params)?;
        payload.push(b'\n');

        let mut child = Command::new(&self.cfg.program)
            .args(&self.cfg.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EngineError::Spawn {
                program: self.cfg.program.clone(),
                source,
            })?;
        let pid = child.id().unwrap_or_default();
        tracing::info!(pid, program = %self.cfg.program, "engine started");

        if let Some(mut stdin) = child.stdin.take() {
            let written = match stdin.write_all(&payload).await {
                Ok(()) => stdin.shutdown().await,
                Err(e) => Err(e),
            };
            match written {
                Ok(()) => {}
                // An engine that never reads its parameters has already exited.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    tracing::debug!(pid, "engine closed stdin before reading parameters");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let results_path = params.results_path.clone();
        *lock(&self.results_path) = results_path.clone();

        let stdout_task = child
            .stdout
            .take()
            .map(|out| tokio::spawn(forward_lines(out, self.dispatcher.clone(), true)));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(forward_lines(err, self.dispatcher.clone(), false)));

        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let (done_tx, done) = watch::channel(false);
        *lock(&self.job) = Some(Job {
            cancel_tx: Some(cancel_tx),
            done,
        });

        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            let exited = tokio::select! {
                status = child.wait() => Some(status),
                _ = &mut cancel_rx => None,
            };
            let (status, cancelled) = match exited {
                Some(status) => (status, false),
                None => {
                    if let Err(e) = child.start_kill() {
                        tracing::warn!(error = %e, "failed to kill engine");
                    }
                    (child.wait().await, true)
                }
            };

            // Drain output first so the terminal event is the last one delivered.
            for task in [stdout_task, stderr_task].into_iter().flatten() {
                let _ = task.await;
            }
            done_tx.send_replace(true);

            let terminal = match status {
                Ok(_) if cancelled => EngineEvent::ErrorUpdate("execution aborted".into()),
                Ok(s) if s.success() => EngineEvent::ExecutionFinished {
                    artifact: Some(results_path),
                },
                Ok(s) => EngineEvent::ErrorUpdate(format!("engine exited with {s}")),
                Err(e) => EngineEvent::ErrorUpdate(format!("failed to wait for engine: {e}")),
            };
            tracing::info!(pid, cancelled, "engine exited");
            dispatcher.emit(terminal);
        });

        Ok(format!("Execution started (pid {pid})"))
    }

    async fn cancel_execution(&self) -> Result<String, EngineError> {
        let mut job = lock(&self.job);
        let Some(job) = job.as_mut().filter(|j| j.is_live()) else {
            return Err(EngineError::NotRunning);
        };
        match job.cancel_tx.take() {
            Some(tx) => {
                tx.send(()).map_err(|_| EngineError::NotRunning)?;
                Ok("Cancellation signal sent".into())
            }
            None => Ok("Cancellation already requested".into()),
        }
    }

    async fn open_results_artifact(&self) -> Result<(), EngineError> {
        let path = self.current_results_path();
        if !tokio::fs::try_exists(&path).await? {
            return Err(EngineError::Other(format!(
                "results file not found: {}",
                path.display()
            )));
        }

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", "start", ""]).arg(&path);
            c
        } else if cfg!(target_os = "macos") {
            let mut c = Command::new("open");
            c.arg(&path);
            c
        } else if cfg!(unix) {
            let mut c = Command::new("xdg-open");
            c.arg(&path);
            c
        } else {
            return Err(EngineError::Unsupported(format!(
                "unsupported operating system: {}",
                std::env::consts::OS
            )));
        };

        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| EngineError::Spawn {
                program: "file opener".into(),
                source,
            })?;
        Ok(())
    }

    async fn results_artifact_exists(&self) -> Result<bool, EngineError> {
        let path = self.current_results_path();
        if path.as_os_str().is_empty() {
            return Ok(false);
        }
        Ok(tokio::fs::try_exists(&path).await?)
    }

    fn subscribe(&self, kind: EventKind, sink: EventSink) {
        self.dispatcher.add(kind, sink);
    }

    async fn shutdown(&self, grace: Duration) -> bool {
        let done = lock(&self.job).as_ref().map(|j| j.done.clone());
        let Some(mut done) = done else {
            return true;
        };
        // A dropped sender means the waiter task is gone, so the child is too.
        let exited = tokio::time::timeout(grace, done.wait_for(|exited| *exited))
            .await
            .is_ok();
        if !exited {
            tracing::warn!(?grace, "engine still running after grace period; killing it");
            let cancel = lock(&self.job).as_mut().and_then(|j| j.cancel_tx.take());
            if let Some(tx) = cancel {
                let _ = tx.send(());
            }
        }
        exited
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn params(results: PathBuf) -> ExecutionParameters {
        ExecutionParameters {
            source_dir: "/data".into(),
            target_dir: PathBuf::new(),
            use_cache: false,
            cache_dir: std::env::temp_dir(),
            results_path: results,
            paranoid_mode: false,
            cpu_count: 0,
            buffer_size_kb: 0,
            keep_logs: false,
            dual_folder_mode_enabled: false,
        }
    }

    fn sh_engine(script: &str) -> ProcessEngine {
        ProcessEngine::new(ProcessEngineConfig {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            picker: None,
            default_results_path: PathBuf::new(),
        })
    }

    fn subscribe_all(engine: &ProcessEngine) -> mpsc::UnboundedReceiver<EngineEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        for kind in EventKind::ALL {
            engine.subscribe(kind, tx.clone());
        }
        rx
    }

    /// Collect events until the first terminal one.
    async fn collect_run(rx: &mut mpsc::UnboundedReceiver<EngineEvent>) -> Vec<EngineEvent> {
        let mut out = Vec::new();
        loop {
            let ev = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .expect("engine timed out")
                .expect("channel closed");
            let terminal = matches!(
                ev,
                EngineEvent::ErrorUpdate(_) | EngineEvent::ExecutionFinished { .. }
            );
            out.push(ev);
            if terminal {
                return out;
            }
        }
    }

    #[tokio::test]
    async fn streams_events_then_finishes() {
        let engine = sh_engine(
            r#"cat >/dev/null
echo '{"event":"progressUpdate","data":{"title":"Hashing","percent":50}}'
echo 'found 3 duplicates'
echo 'warning from stderr' >&2"#,
        );
        let mut rx = subscribe_all(&engine);

        let ack = engine
            .start_execution(params("/tmp/dude-test-results.csv".into()))
            .await
            .unwrap();
        assert!(ack.starts_with("Execution started"));

        let events = collect_run(&mut rx).await;
        assert!(events.contains(&EngineEvent::ProgressUpdate {
            title: "Hashing".into(),
            percent: Some(50.0),
        }));
        assert!(events.contains(&EngineEvent::DetailedLog("found 3 duplicates".into())));
        assert!(events.contains(&EngineEvent::DetailedLog("warning from stderr".into())));
        assert_eq!(
            events.last(),
            Some(&EngineEvent::ExecutionFinished {
                artifact: Some("/tmp/dude-test-results.csv".into())
            })
        );
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_error_event() {
        let engine = sh_engine("cat >/dev/null; exit 3");
        let mut rx = subscribe_all(&engine);
        engine.start_execution(params(PathBuf::new())).await.unwrap();

        let events = collect_run(&mut rx).await;
        match events.last() {
            Some(EngineEvent::ErrorUpdate(msg)) => assert!(msg.contains("exited"), "{msg}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_kills_the_child() {
        let engine = sh_engine("cat >/dev/null; exec sleep 30");
        let mut rx = subscribe_all(&engine);
        engine.start_execution(params(PathBuf::new())).await.unwrap();

        assert!(matches!(
            engine.start_execution(params(PathBuf::new())).await,
            Err(EngineError::AlreadyRunning)
        ));

        let ack = engine.cancel_execution().await.unwrap();
        assert_eq!(ack, "Cancellation signal sent");

        let events = collect_run(&mut rx).await;
        assert_eq!(
            events.last(),
            Some(&EngineEvent::ErrorUpdate("execution aborted".into()))
        );
    }

    #[tokio::test]
    async fn cancel_without_job_is_rejected() {
        let engine = sh_engine("true");
        assert!(matches!(
            engine.cancel_execution().await,
            Err(EngineError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn shutdown_waits_for_post_completion_work() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("flushed");
        let engine = ProcessEngine::new(ProcessEngineConfig {
            program: "sh".into(),
            args: vec![
                "-c".into(),
                r#"cat >/dev/null
echo '{"event":"progressUpdate","data":{"title":"Done","percent":100}}'
sleep 1
touch "$1""#
                    .into(),
                "sh".into(),
                marker.to_string_lossy().into_owned(),
            ],
            picker: None,
            default_results_path: PathBuf::new(),
        });
        let mut rx = subscribe_all(&engine);
        engine.start_execution(params(PathBuf::new())).await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(first.is_completion());
        assert!(!marker.exists());

        assert!(engine.shutdown(Duration::from_secs(10)).await);
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn shutdown_kills_after_grace() {
        let engine = sh_engine("cat >/dev/null; exec sleep 30");
        let mut rx = subscribe_all(&engine);
        engine.start_execution(params(PathBuf::new())).await.unwrap();

        assert!(!engine.shutdown(Duration::from_millis(200)).await);
        let events = collect_run(&mut rx).await;
        assert_eq!(
            events.last(),
            Some(&EngineEvent::ErrorUpdate("execution aborted".into()))
        );
    }

    #[tokio::test]
    async fn shutdown_without_job_is_immediate() {
        let engine = sh_engine("true");
        assert!(engine.shutdown(Duration::from_millis(1)).await);
    }

    #[tokio::test]
    async fn results_existence_follows_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        let engine = ProcessEngine::new(ProcessEngineConfig {
            program: "true".into(),
            args: Vec::new(),
            picker: None,
            default_results_path: path.clone(),
        });

        assert!(!engine.results_artifact_exists().await.unwrap());
        std::fs::write(&path, "File Name,Path\n").unwrap();
        assert!(engine.results_artifact_exists().await.unwrap());
    }

    #[tokio::test]
    async fn picker_output_and_dismissal() {
        let mut cfg = ProcessEngineConfig {
            program: "true".into(),
            args: Vec::new(),
            picker: None,
            default_results_path: PathBuf::new(),
        };
        assert_eq!(
            ProcessEngine::new(cfg.clone()).select_directory().await.unwrap(),
            None
        );

        cfg.picker = Some(vec!["echo".into(), "/home/me/photos".into()]);
        assert_eq!(
            ProcessEngine::new(cfg.clone()).select_directory().await.unwrap(),
            Some(PathBuf::from("/home/me/photos"))
        );

        cfg.picker = Some(vec!["false".into()]);
        assert_eq!(
            ProcessEngine::new(cfg).select_directory().await.unwrap(),
            None
        );
    }
}
