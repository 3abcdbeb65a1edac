use crate::engine::{Engine, ProcessEngine, ProcessEngineConfig};
use crate::model::{EngineEvent, RunState};
use crate::orchestrator::{default_results_path, Controller, FormState, Resolution};
use crate::projector;
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "dude-console",
    version,
    about = "Terminal front end for the dude duplicate detector"
)]
pub struct Cli {
    /// Detector executable to drive
    #[arg(long, default_value = "dude")]
    pub engine: String,

    /// Extra argument passed to the detector (repeatable)
    #[arg(long = "engine-arg", allow_hyphen_values = true)]
    pub engine_args: Vec<String>,

    /// Directory picker command, e.g. "zenity --file-selection --directory"
    #[arg(long)]
    pub picker: Option<String>,

    /// Directory to scan
    #[arg(long)]
    pub source: Option<PathBuf>,

    /// Second directory to compare against (single-folder mode when omitted)
    #[arg(long)]
    pub target: Option<PathBuf>,

    /// Hash cache location (defaults to the temp directory)
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Results file written by the detector (defaults to the temp directory)
    #[arg(long)]
    pub results: Option<PathBuf>,

    /// Do not use the hash cache
    #[arg(long)]
    pub no_cache: bool,

    /// Compare duplicates byte by byte
    #[arg(long)]
    pub paranoid: bool,

    /// Worker CPUs (0 = all)
    #[arg(long, default_value_t = 4)]
    pub cpus: u32,

    /// Read buffer size in KB
    #[arg(long, default_value_t = 1024)]
    pub buffer_kb: u32,

    /// Keep the detector's own logs
    #[arg(long)]
    pub keep_logs: bool,

    /// Run headless: start immediately, print progress and log lines, then exit
    #[arg(long)]
    pub text: bool,

    /// Log file (defaults to <cache dir>/dude-console/dude-console.log)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Log level filter; RUST_LOG takes precedence when set
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

pub async fn run(args: Cli) -> Result<()> {
    if !args.text {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(args).await;
        }
        #[cfg(not(feature = "tui"))]
        {
            // Fallback when built without TUI support.
            return run_text(args).await;
        }
    }

    run_text(args).await
}

fn path_text(p: Option<&PathBuf>) -> String {
    p.map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Build the initial form from CLI arguments.
pub fn build_form(args: &Cli) -> FormState {
    FormState {
        source_dir: path_text(args.source.as_ref()),
        target_dir: path_text(args.target.as_ref()),
        cache_dir: path_text(args.cache_dir.as_ref()),
        results_path: path_text(args.results.as_ref()),
        cpus: args.cpus.to_string(),
        buffer_kb: args.buffer_kb.to_string(),
        use_cache: !args.no_cache,
        paranoid_mode: args.paranoid,
        keep_logs: args.keep_logs,
    }
}

/// Build the process engine binding from CLI arguments.
pub fn build_engine_config(args: &Cli) -> ProcessEngineConfig {
    let picker = args
        .picker
        .as_deref()
        .map(|cmd| cmd.split_whitespace().map(String::from).collect::<Vec<_>>())
        .filter(|argv| !argv.is_empty());
    ProcessEngineConfig {
        program: args.engine.clone(),
        args: args.engine_args.clone(),
        picker,
        default_results_path: args.results.clone().unwrap_or_else(default_results_path),
    }
}

/// Build the session controller and its event receiver.
pub fn build_controller(args: &Cli) -> (Controller, mpsc::UnboundedReceiver<EngineEvent>) {
    let engine: Arc<dyn Engine> = Arc::new(ProcessEngine::new(build_engine_config(args)));
    Controller::new(engine, build_form(args))
}

/// How long a finished engine may keep running before it is killed.
pub(crate) const ENGINE_GRACE: Duration = Duration::from_secs(30);

enum Input {
    Event(EngineEvent),
    Resolved(Resolution),
    Interrupt,
}

/// How a headless run ended.
#[derive(Debug, PartialEq)]
enum Outcome {
    Completed { results: PathBuf, found: bool },
    Failed(String),
    Interrupted,
}

/// Prints log lines and progress changes that have not been printed yet.
struct Reporter {
    next_seq: u64,
    last_progress: (String, i64),
}

impl Reporter {
    fn new() -> Self {
        Self {
            next_seq: 0,
            last_progress: (String::new(), -1),
        }
    }

    fn report(&mut self, ctrl: &Controller, out: &mpsc::UnboundedSender<OutputLine>) {
        for entry in ctrl.logs().since(self.next_seq) {
            let _ = out.send(OutputLine::Stderr(projector::log_line(entry)));
            self.next_seq = entry.seq + 1;
        }

        let view = ctrl.view(0);
        let progress = (view.title, view.bar.width.floor() as i64);
        if progress != self.last_progress {
            let _ = out.send(OutputLine::Stderr(format!(
                "== {} [{}%] ==",
                progress.0, progress.1
            )));
            self.last_progress = progress;
        }
    }
}

async fn run_text(args: Cli) -> Result<()> {
    let (mut ctrl, mut events) = build_controller(&args);
    ctrl.bootstrap();
    ctrl.start_from_form().context("cannot start execution")?;

    let (int_tx, mut interrupts) = mpsc::unbounded_channel();
    let signals = tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if int_tx.send(()).is_err() {
                break;
            }
        }
    });

    let (out_tx, out_handle) = spawn_output_writer();
    let outcome = drive(&mut ctrl, &mut events, &mut interrupts, &out_tx, ENGINE_GRACE).await;
    signals.abort();
    drop(out_tx);
    let _ = out_handle.await;

    match outcome {
        Outcome::Completed { .. } => Ok(()),
        Outcome::Failed(title) => anyhow::bail!("execution did not complete: {title}"),
        Outcome::Interrupted => anyhow::bail!("interrupted"),
    }
}

/// Follow a started run until it ends and the engine process has exited.
///
/// The first interrupt cancels the run; a second one (or one with nothing to cancel)
/// stops following it and kills the engine.
async fn drive(
    ctrl: &mut Controller,
    events: &mut mpsc::UnboundedReceiver<EngineEvent>,
    interrupts: &mut mpsc::UnboundedReceiver<()>,
    out: &mpsc::UnboundedSender<OutputLine>,
    grace: Duration,
) -> Outcome {
    let mut reporter = Reporter::new();
    let mut interrupted = false;

    loop {
        let input = tokio::select! {
            Some(ev) = events.recv() => Input::Event(ev),
            res = ctrl.next_resolution() => Input::Resolved(res),
            Some(()) = interrupts.recv() => Input::Interrupt,
        };
        match input {
            Input::Event(ev) => ctrl.handle_event(ev),
            Input::Resolved(res) => ctrl.handle_resolution(res),
            Input::Interrupt => {
                if interrupted || !ctrl.cancel() {
                    reporter.report(ctrl, out);
                    ctrl.engine().shutdown(Duration::ZERO).await;
                    return Outcome::Interrupted;
                }
                interrupted = true;
                let _ = out.send(OutputLine::Stderr(
                    "Cancelling… (press Ctrl-C again to quit)".into(),
                ));
            }
        }
        reporter.report(ctrl, out);

        if ctrl.state().is_terminal() && !ctrl.has_pending() {
            break;
        }
    }

    // A run can complete on its last progress event while the detector is still
    // writing results.
    let engine = ctrl.engine();
    let mut shutdown = engine.shutdown(grace);
    loop {
        tokio::select! {
            exited = &mut shutdown => {
                if !exited {
                    let _ = out.send(OutputLine::Stderr(format!(
                        "Engine still running after {grace:?}; stopped it"
                    )));
                }
                break;
            }
            Some(ev) = events.recv() => {
                ctrl.handle_event(ev);
                reporter.report(ctrl, out);
            }
            Some(()) = interrupts.recv() => {
                drop(shutdown);
                engine.shutdown(Duration::ZERO).await;
                return Outcome::Interrupted;
            }
        }
    }
    while let Ok(ev) = events.try_recv() {
        ctrl.handle_event(ev);
    }

    if ctrl.state() == RunState::Completed {
        ctrl.refresh_results();
        while ctrl.has_pending() {
            let res = ctrl.next_resolution().await;
            ctrl.handle_resolution(res);
        }
    }
    reporter.report(ctrl, out);

    if ctrl.state() != RunState::Completed {
        return Outcome::Failed(ctrl.progress().title.clone());
    }
    let results = ctrl
        .artifact()
        .cloned()
        .unwrap_or_else(|| crate::orchestrator::collect(&ctrl.form).results_path);
    let found = ctrl.controls().results;
    let line = if found {
        format!("Results: {}", results.display())
    } else {
        format!("Results not found at {}", results.display())
    };
    let _ = out.send(OutputLine::Stdout(line));
    Outcome::Completed { results, found }
}
