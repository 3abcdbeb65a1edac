//! Bounded log of engine output with scroll anchoring.
//!
//! The buffer keeps at most `capacity` entries and evicts the oldest first. It also
//! tracks the log view's scroll offset (in rows, one row per entry) so that a user who
//! scrolled up to read history is not yanked back to the bottom by new lines.

use crate::model::{LogEntry, LogKind};
use std::collections::VecDeque;
use time::OffsetDateTime;

pub const LOG_CAPACITY: usize = 100;

/// Distance from the bottom (in rows) that still counts as "at the bottom".
pub const ANCHOR_THRESHOLD: usize = 20;

#[derive(Debug, Clone)]
pub struct LogBuffer {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    next_seq: u64,
    scroll_offset: usize,
    viewport: usize,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(LOG_CAPACITY)
    }
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            next_seq: 0,
            scroll_offset: 0,
            viewport: 0,
        }
    }

    /// Build an entry stamped with local time and append it.
    pub fn push(&mut self, kind: LogKind, message: impl Into<String>) {
        let timestamp =
            OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        let entry = LogEntry {
            seq: self.next_seq,
            timestamp,
            kind,
            message: message.into(),
        };
        self.append(entry);
    }

    pub fn append(&mut self, entry: LogEntry) {
        // Anchor decision must be taken against the pre-append geometry.
        let follow = self.is_at_bottom();

        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.next_seq = self.next_seq.max(entry.seq + 1);
        self.entries.push_back(entry);

        if follow {
            self.scroll_offset = self.max_offset();
        }
    }

    /// Drop every entry and return the view to the top.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.scroll_offset = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// Entries with `seq >= from`, in arrival order.
    pub fn since(&self, from: u64) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().filter(move |e| e.seq >= from)
    }

    pub fn scroll_offset(&self) -> usize {
        self.scroll_offset
    }

    pub fn viewport(&self) -> usize {
        self.viewport
    }

    /// Set the number of visible rows. Does not move the offset except to keep it in range.
    pub fn set_viewport(&mut self, rows: usize) {
        self.viewport = rows;
        self.scroll_offset = self.scroll_offset.min(self.max_offset());
    }

    /// Offset at which the last entry sits on the last visible row.
    pub fn max_offset(&self) -> usize {
        self.entries.len().saturating_sub(self.viewport)
    }

    pub fn is_at_bottom(&self) -> bool {
        self.max_offset().saturating_sub(self.scroll_offset) <= ANCHOR_THRESHOLD
    }

    pub fn scroll_up(&mut self, rows: usize) {
        self.scroll_offset = self.scroll_offset.saturating_sub(rows);
    }

    pub fn scroll_down(&mut self, rows: usize) {
        self.scroll_offset = (self.scroll_offset + rows).min(self.max_offset());
    }

    pub fn scroll_to_top(&mut self) {
        self.scroll_offset = 0;
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll_offset = self.max_offset();
    }
}
