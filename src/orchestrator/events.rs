//! Session-wide subscription to the engine's push events.

use crate::engine::{Engine, EventSink};
use crate::model::{EngineEvent, EventKind};
use tokio::sync::mpsc::{self, UnboundedReceiver};

/// Owns the session's event sender and remembers whether listeners are registered.
pub(crate) struct EventSubscription {
    sink: EventSink,
    attached: bool,
}

impl EventSubscription {
    pub fn new() -> (Self, UnboundedReceiver<EngineEvent>) {
        let (sink, rx) = mpsc::unbounded_channel();
        (
            Self {
                sink,
                attached: false,
            },
            rx,
        )
    }

    /// Register for all four event kinds. Repeated calls are no-ops; returns whether
    /// this call registered anything.
    pub fn attach(&mut self, engine: &dyn Engine) -> bool {
        if self.attached {
            return false;
        }
        for kind in EventKind::ALL {
            engine.subscribe(kind, self.sink.clone());
        }
        self.attached = true;
        tracing::debug!("engine event listeners attached");
        true
    }
}
