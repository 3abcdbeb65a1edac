use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
    Frame,
};

const KEYS: [(&str, &str); 13] = [
    ("Tab / ↑↓", "Move between fields"),
    ("Space", "Toggle option"),
    ("Ctrl-P", "Pick directory for the field"),
    ("Ctrl-R / F5", "Start"),
    ("Esc / Ctrl-X", "Cancel the run"),
    ("Ctrl-O", "Open results"),
    ("Ctrl-Y", "Copy results path"),
    ("Shift-↑ / Shift-↓", "Scroll log by a line"),
    ("PgUp / PgDn", "Scroll log by a page"),
    ("Home", "Log top"),
    ("End", "Log bottom (follow)"),
    ("F1", "Toggle this help"),
    ("Ctrl-Q / Ctrl-C", "Quit (cancels a running job)"),
];

pub fn draw_help(area: Rect, f: &mut Frame) {
    let mut lines = vec![Line::from("Keybinds:")];
    for (keys, what) in KEYS {
        lines.push(Line::from(vec![
            Span::raw("  "),
            Span::styled(format!("{keys:<20}"), Style::default().fg(Color::Magenta)),
            Span::raw(what),
        ]));
    }
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "The log follows new output while you are near its bottom.",
        Style::default().fg(Color::Gray),
    )));

    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(Clear, area);
    f.render_widget(p, area);
}
