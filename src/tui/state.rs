use crate::orchestrator::FormField;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// What a key press asks the session to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Quit,
    Start,
    Cancel,
    OpenResults,
    CopyResultsPath,
    PickDirectory,
    FocusNext,
    FocusPrev,
    Toggle,
    Insert(char),
    Backspace,
    LineUp,
    LineDown,
    ScrollUp,
    ScrollDown,
    ScrollTop,
    ScrollBottom,
    Help,
}

/// UI-only state. Everything about the run itself lives in the controller.
pub struct UiState {
    pub focus: usize,
    pub show_help: bool,
    pub tick: u64,
    pub info: String,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            focus: 0,
            show_help: false,
            tick: 0,
            info: "F1 for help".into(),
        }
    }
}

impl UiState {
    pub fn focused(&self) -> FormField {
        FormField::ALL[self.focus % FormField::ALL.len()]
    }

    pub fn focus_next(&mut self) {
        self.focus = (self.focus + 1) % FormField::ALL.len();
    }

    pub fn focus_prev(&mut self) {
        self.focus = (self.focus + FormField::ALL.len() - 1) % FormField::ALL.len();
    }
}

/// Map a key press to an action, given the focused form field.
pub fn action_for(key: KeyEvent, focused: FormField) -> Option<Action> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let shift = key.modifiers.contains(KeyModifiers::SHIFT);
    let action = match key.code {
        KeyCode::Char('q') | KeyCode::Char('c') if ctrl => Action::Quit,
        KeyCode::Char('r') if ctrl => Action::Start,
        KeyCode::F(5) => Action::Start,
        KeyCode::Char('x') if ctrl => Action::Cancel,
        KeyCode::Esc => Action::Cancel,
        KeyCode::Char('o') if ctrl => Action::OpenResults,
        KeyCode::Char('y') if ctrl => Action::CopyResultsPath,
        KeyCode::Char('p') if ctrl => Action::PickDirectory,
        KeyCode::Up if shift => Action::LineUp,
        KeyCode::Down if shift => Action::LineDown,
        KeyCode::Tab | KeyCode::Down => Action::FocusNext,
        KeyCode::BackTab | KeyCode::Up => Action::FocusPrev,
        KeyCode::PageUp => Action::ScrollUp,
        KeyCode::PageDown => Action::ScrollDown,
        KeyCode::Home => Action::ScrollTop,
        KeyCode::End => Action::ScrollBottom,
        KeyCode::F(1) => Action::Help,
        KeyCode::Char(' ') | KeyCode::Enter if focused.is_toggle() => Action::Toggle,
        KeyCode::Backspace if !focused.is_toggle() => Action::Backspace,
        KeyCode::Char(c) if !ctrl && !focused.is_toggle() => {
            if focused.is_numeric() && !c.is_ascii_digit() {
                return None;
            }
            Action::Insert(c)
        }
        _ => return None,
    };
    Some(action)
}
