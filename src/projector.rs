//! Pure mapping from controller state to what the front ends draw.

use crate::model::{LogEntry, LogKind, ProgressSnapshot, RunState};
use crate::orchestrator::Controls;
use time::macros::format_description;

const SPINNER_FRAMES: [char; 10] = ['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];

/// Labels are hidden on bars this narrow, as they would not fit.
const LABEL_MIN_PERCENT: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarVariant {
    Normal,
    Complete,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressBarView {
    /// Filled share of the bar, always within 0..=100.
    pub width: f64,
    pub label: String,
    pub variant: BarVariant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct View {
    pub title: String,
    pub state: RunState,
    pub start_enabled: bool,
    pub cancel_enabled: bool,
    pub results_enabled: bool,
    pub spinner: Option<char>,
    pub bar: ProgressBarView,
}

/// Clamp a reported percentage for display. NaN shows as an empty bar.
pub fn display_percent(raw: f64) -> f64 {
    if raw.is_nan() {
        0.0
    } else {
        raw.clamp(0.0, 100.0)
    }
}

fn bar_label(width: f64) -> String {
    if width <= LABEL_MIN_PERCENT {
        String::new()
    } else if width.fract() == 0.0 {
        format!("{width:.0}%")
    } else {
        format!("{width:.1}%")
    }
}

pub fn project(
    state: RunState,
    progress: &ProgressSnapshot,
    controls: Controls,
    tick: u64,
) -> View {
    let width = display_percent(progress.percent);
    let variant = match state {
        RunState::Failed => BarVariant::Error,
        RunState::Completed => BarVariant::Complete,
        _ => BarVariant::Normal,
    };
    let spinner = state
        .is_active()
        .then(|| SPINNER_FRAMES[(tick % SPINNER_FRAMES.len() as u64) as usize]);

    View {
        title: progress.title.clone(),
        state,
        start_enabled: controls.start,
        cancel_enabled: controls.cancel,
        results_enabled: controls.results,
        spinner,
        bar: ProgressBarView {
            width,
            label: bar_label(width),
            variant,
        },
    }
}

/// Render one log entry as `[HH:MM:SS] message`, with error kinds marked.
pub fn log_line(entry: &LogEntry) -> String {
    let stamp = entry
        .timestamp
        .format(format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_else(|_| "--:--:--".into());
    let marker = match entry.kind {
        LogKind::Detail | LogKind::Notice => "",
        LogKind::Error => "[ERROR] ",
        LogKind::Fatal => "[FATAL] ",
    };
    format!("[{stamp}] {marker}{}", entry.message)
}
