use anyhow::{anyhow, Result};
use std::sync::mpsc as std_mpsc;
use std::sync::OnceLock;
use std::time::Duration;

static CLIPBOARD: OnceLock<std_mpsc::Sender<String>> = OnceLock::new();

/// How long each clipboard owner is kept alive so X11/Wayland managers can read it.
const HOLD: Duration = Duration::from_secs(2);

/// Clipboard writes go through one background thread, one owner per request.
fn clipboard_thread() -> &'static std_mpsc::Sender<String> {
    CLIPBOARD.get_or_init(|| {
        let (tx, rx) = std_mpsc::channel::<String>();
        std::thread::spawn(move || {
            for text in rx {
                match arboard::Clipboard::new() {
                    Ok(mut clipboard) => match clipboard.set_text(text) {
                        Ok(()) => std::thread::sleep(HOLD),
                        Err(e) => tracing::warn!(error = %e, "clipboard write failed"),
                    },
                    Err(e) => tracing::warn!(error = %e, "clipboard unavailable"),
                }
            }
        });
        tx
    })
}

/// Queue `text` for the clipboard. Returns without waiting for the write.
pub fn copy(text: &str) -> Result<()> {
    clipboard_thread()
        .send(text.to_string())
        .map_err(|_| anyhow!("clipboard thread is gone"))
}
