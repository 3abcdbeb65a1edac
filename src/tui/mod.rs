mod clipboard;
mod help;
mod state;

use crate::cli::{self, Cli};
use crate::model::{EngineEvent, LogKind};
use crate::orchestrator::{collect, Controller, FormField, Resolution, StartError};
use crate::projector::{self, BarVariant, View};
use anyhow::{Context, Result};
use crossterm::{
    event::{Event, EventStream, KeyEvent, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures::StreamExt;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph},
    Frame, Terminal,
};
use state::{action_for, Action, UiState};
use std::{io, time::Duration};
use tokio::sync::mpsc::UnboundedReceiver;

type Term = Terminal<CrosstermBackend<io::Stdout>>;

const TICK: Duration = Duration::from_millis(100);
/// How long a run cancelled on quit gets to report its end.
const QUIT_GRACE: Duration = Duration::from_secs(2);
const FORM_HEIGHT: u16 = FormField::ALL.len() as u16 + 2;
const STATUS_HEIGHT: u16 = 5;

enum Input {
    Event(EngineEvent),
    Resolved(Resolution),
    Key(KeyEvent),
    Resized,
    Tick,
    Closed,
}

struct Areas {
    form: Rect,
    status: Rect,
    log: Rect,
    footer: Rect,
}

fn areas(area: Rect) -> Areas {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(FORM_HEIGHT),
            Constraint::Length(STATUS_HEIGHT),
            Constraint::Min(3),
            Constraint::Length(1),
        ])
        .split(area);
    Areas {
        form: rows[0],
        status: rows[1],
        log: rows[2],
        footer: rows[3],
    }
}

pub async fn run(args: Cli) -> Result<()> {
    let (mut ctrl, mut events) = cli::build_controller(&args);
    ctrl.bootstrap();

    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let res = match Terminal::new(CrosstermBackend::new(stdout)).context("create terminal") {
        Ok(mut terminal) => {
            terminal.clear().ok();
            session(&mut terminal, &mut ctrl, &mut events).await
        }
        Err(e) => Err(e),
    };

    disable_raw_mode().ok();
    execute!(io::stdout(), LeaveAlternateScreen).ok();

    if ctrl.state().is_active() {
        wind_down(&mut ctrl, &mut events).await;
    }
    // A completed run's engine may still be writing its results.
    if !ctrl.engine().shutdown(cli::ENGINE_GRACE).await {
        tracing::warn!("engine did not exit after quit; killed it");
    }
    res
}

async fn session(
    terminal: &mut Term,
    ctrl: &mut Controller,
    events: &mut UnboundedReceiver<EngineEvent>,
) -> Result<()> {
    let mut ui = UiState::default();
    let mut keys = EventStream::new();
    let mut ticker = tokio::time::interval(TICK);
    let mut redraw = true;

    loop {
        if redraw {
            fit_log_viewport(terminal, ctrl);
            let view = ctrl.view(ui.tick);
            let shown: &Controller = ctrl;
            terminal
                .draw(|f| draw(f, &view, shown, &ui))
                .context("draw frame")?;
            redraw = false;
        }

        let input = tokio::select! {
            Some(ev) = events.recv() => Input::Event(ev),
            res = ctrl.next_resolution() => Input::Resolved(res),
            maybe = keys.next() => match maybe {
                Some(Ok(Event::Key(k))) if k.kind == KeyEventKind::Press => Input::Key(k),
                Some(Ok(Event::Resize(..))) => Input::Resized,
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e).context("read terminal input"),
                None => Input::Closed,
            },
            _ = ticker.tick() => Input::Tick,
        };

        match input {
            Input::Event(ev) => ctrl.handle_event(ev),
            Input::Resolved(res) => ctrl.handle_resolution(res),
            Input::Key(k) => {
                if apply_key(ctrl, &mut ui, k) {
                    return Ok(());
                }
                redraw = true;
            }
            Input::Resized => redraw = true,
            Input::Tick => {
                ui.tick = ui.tick.wrapping_add(1);
                redraw = true;
            }
            Input::Closed => return Ok(()),
        }
    }
}

/// Cancel an active run on quit and let it report its end, within a grace period.
async fn wind_down(ctrl: &mut Controller, events: &mut UnboundedReceiver<EngineEvent>) {
    ctrl.cancel();
    let settled = tokio::time::timeout(QUIT_GRACE, async {
        while ctrl.state().is_active() {
            tokio::select! {
                Some(ev) = events.recv() => ctrl.handle_event(ev),
                res = ctrl.next_resolution() => ctrl.handle_resolution(res),
            }
        }
    })
    .await;
    if settled.is_err() {
        tracing::warn!("run still active at exit");
    }
}

fn fit_log_viewport(terminal: &Term, ctrl: &mut Controller) {
    if let Ok(size) = terminal.size() {
        let log = areas(Rect::new(0, 0, size.width, size.height)).log;
        ctrl.logs_mut()
            .set_viewport(log.height.saturating_sub(2) as usize);
    }
}

/// Apply one key press. Returns true when the session should end.
fn apply_key(ctrl: &mut Controller, ui: &mut UiState, key: KeyEvent) -> bool {
    let field = ui.focused();
    let Some(action) = action_for(key, field) else {
        return false;
    };
    if ui.show_help && matches!(action, Action::Cancel | Action::Help) {
        ui.show_help = false;
        return false;
    }

    let page = ctrl.logs().viewport().max(1);
    match action {
        Action::Quit => return true,
        Action::Start => match ctrl.start_from_form() {
            Ok(_) => ui.info = "Execution requested".into(),
            Err(StartError::MissingSource) => {
                ui.info = "Enter a source directory first".into();
                ui.focus = 0;
            }
            Err(e) => ui.info = format!("Cannot start: {e}"),
        },
        Action::Cancel => {
            if !ctrl.cancel() {
                ui.info = "Nothing to cancel".into();
            }
        }
        Action::OpenResults => {
            if !ctrl.open_results() {
                ui.info = "No results to open yet".into();
            }
        }
        Action::CopyResultsPath => {
            let path = ctrl
                .artifact()
                .cloned()
                .unwrap_or_else(|| collect(&ctrl.form).results_path);
            ui.info = match clipboard::copy(&path.to_string_lossy()) {
                Ok(()) => format!("Copying to clipboard: {}", path.display()),
                Err(e) => format!("Clipboard copy failed: {e:#}"),
            };
        }
        Action::PickDirectory => {
            if field.accepts_path() {
                ctrl.select_directory(field);
            } else {
                ui.info = format!("{} does not take a directory", field.label());
            }
        }
        Action::FocusNext => ui.focus_next(),
        Action::FocusPrev => ui.focus_prev(),
        Action::Toggle => ctrl.form.toggle(field),
        Action::Insert(c) => {
            if let Some(text) = ctrl.form.text_mut(field) {
                text.push(c);
            }
        }
        Action::Backspace => {
            if let Some(text) = ctrl.form.text_mut(field) {
                text.pop();
            }
        }
        Action::LineUp => ctrl.logs_mut().scroll_up(1),
        Action::LineDown => ctrl.logs_mut().scroll_down(1),
        Action::ScrollUp => ctrl.logs_mut().scroll_up(page),
        Action::ScrollDown => ctrl.logs_mut().scroll_down(page),
        Action::ScrollTop => ctrl.logs_mut().scroll_to_top(),
        Action::ScrollBottom => ctrl.logs_mut().scroll_to_bottom(),
        Action::Help => ui.show_help = true,
    }
    false
}

fn draw(f: &mut Frame, view: &View, ctrl: &Controller, ui: &UiState) {
    let a = areas(f.area());
    draw_form(a.form, f, ctrl, ui);
    draw_status(a.status, f, view);
    draw_log(a.log, f, ctrl);
    draw_footer(a.footer, f, ui);

    if ui.show_help {
        let area = f.area();
        let w = area.width.min(60);
        let h = area.height.min(18);
        let popup = Rect::new(
            area.x + (area.width - w) / 2,
            area.y + (area.height - h) / 2,
            w,
            h,
        );
        help::draw_help(popup, f);
    }
}

fn draw_form(area: Rect, f: &mut Frame, ctrl: &Controller, ui: &UiState) {
    let locked = ctrl.state().is_active();
    let lines: Vec<Line> = FormField::ALL
        .iter()
        .enumerate()
        .map(|(i, field)| {
            let value = match ctrl.form.flag(*field) {
                Some(true) => "[x]".to_string(),
                Some(false) => "[ ]".to_string(),
                None => ctrl.form.text(*field).unwrap_or_default().to_string(),
            };
            let focused = i == ui.focus;
            let label_style = if focused {
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::Gray)
            };
            let mut spans = vec![
                Span::styled(format!("{:<20}", field.label()), label_style),
                Span::raw(value),
            ];
            if let Some(hint) = hint(*field).filter(|_| focused) {
                spans.push(Span::styled(hint, Style::default().fg(Color::DarkGray)));
            }
            Line::from(spans)
        })
        .collect();

    let title = if locked {
        "Configuration (applies to the next run)"
    } else {
        "Configuration"
    };
    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(p, area);
}

fn hint(field: FormField) -> Option<&'static str> {
    if field.accepts_path() {
        Some("  (Ctrl-P to pick)")
    } else if field.is_toggle() {
        Some("  (Space to toggle)")
    } else {
        None
    }
}

fn button(label: &str, enabled: bool) -> Span<'static> {
    let style = if enabled {
        Style::default().fg(Color::Black).bg(Color::Cyan)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    Span::styled(format!(" {label} "), style)
}

fn draw_status(area: Rect, f: &mut Frame, view: &View) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title(format!("Status: {}", view.state.label()));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(1),
        ])
        .split(inner);

    let mut title = Vec::new();
    if let Some(frame) = view.spinner {
        title.push(Span::styled(
            format!("{frame} "),
            Style::default().fg(Color::Cyan),
        ));
    }
    let title_style = match view.bar.variant {
        BarVariant::Error => Style::default().fg(Color::Red),
        _ => Style::default(),
    };
    title.push(Span::styled(view.title.clone(), title_style));
    f.render_widget(Paragraph::new(Line::from(title)), rows[0]);

    let color = match view.bar.variant {
        BarVariant::Normal => Color::Cyan,
        BarVariant::Complete => Color::Green,
        BarVariant::Error => Color::Red,
    };
    let gauge = Gauge::default()
        .gauge_style(Style::default().fg(color).bg(Color::Black))
        .ratio(view.bar.width / 100.0)
        .label(view.bar.label.clone());
    f.render_widget(gauge, rows[1]);

    let buttons = Line::from(vec![
        button("Start ^R", view.start_enabled),
        Span::raw("  "),
        button("Cancel Esc", view.cancel_enabled),
        Span::raw("  "),
        button("Open results ^O", view.results_enabled),
    ]);
    f.render_widget(Paragraph::new(buttons), rows[2]);
}

fn draw_log(area: Rect, f: &mut Frame, ctrl: &Controller) {
    let logs = ctrl.logs();
    let mut lines: Vec<Line> = logs
        .entries()
        .map(|entry| {
            let style = match entry.kind {
                LogKind::Detail => Style::default(),
                LogKind::Notice => Style::default().fg(Color::Cyan),
                LogKind::Error => Style::default().fg(Color::Red),
                LogKind::Fatal => Style::default()
                    .fg(Color::Red)
                    .add_modifier(Modifier::BOLD),
            };
            Line::from(Span::styled(projector::log_line(entry), style))
        })
        .collect();
    if logs.is_empty() {
        lines.push(Line::from(Span::styled(
            "No output yet.",
            Style::default().fg(Color::DarkGray),
        )));
    }

    let follow = if logs.is_at_bottom() { "" } else { " [scrolled]" };
    let title = format!("Log {}/{}{follow}", logs.len(), logs.capacity());
    let offset = u16::try_from(logs.scroll_offset()).unwrap_or(u16::MAX);
    let p = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title(title))
        .scroll((offset, 0));
    f.render_widget(p, area);
}

fn draw_footer(area: Rect, f: &mut Frame, ui: &UiState) {
    let line = Line::from(vec![
        Span::styled("Info: ", Style::default().fg(Color::Gray)),
        Span::raw(ui.info.clone()),
    ]);
    f.render_widget(Paragraph::new(line), area);
}
