//! Linear undo/redo history of operation results.
//!
//! The history keeps a base image and a list of entries, each holding the
//! descriptor that produced it and the resulting image. A cursor marks
//! the current state: the base, or one of the entries. Undo and redo only
//! move the cursor; images are never recomputed. Recording a new entry
//! discards everything after the cursor first.
//!
//! ```text
//! base ── e1 ── e2 ── e3
//!               ^cursor     (undo → e1, redo → e3)
//! ```
//!
//! A [`HistoryPolicy`] bounds the number of entries and the bytes they
//! hold. When a bound is exceeded the oldest entries are evicted and the
//! last evicted image becomes the new base. The newest entry is never
//! evicted.

use std::collections::VecDeque;
use std::fmt::{self, Write as _};
use std::time::Duration;

use retouch_ops::{CancelToken, Descriptor, Handler, Image, OpError};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use web_time::Instant;

use crate::config::HistoryPolicy;

/// Where the cursor sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    /// Before the first entry: the base image is current.
    Base,
    /// At the entry with this index (0 = oldest kept entry).
    Entry(usize),
}

/// Direction of a history move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Towards the base.
    Undo,
    /// Towards the newest entry.
    Redo,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Undo => "undo",
            Self::Redo => "redo",
        })
    }
}

/// Errors from history operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum HistoryError {
    /// Nothing to undo (cursor at the base) or redo (cursor at the
    /// newest entry).
    #[error("nothing to {0}")]
    NoHistory(Direction),

    /// The operation failed; the history is unchanged.
    #[error(transparent)]
    Operation(#[from] OpError),
}

/// One recorded step.
#[derive(Debug, Clone)]
pub struct Entry {
    descriptor: Descriptor,
    image: Image,
    duration: Duration,
}

impl Entry {
    /// Descriptor that produced this entry.
    #[must_use]
    pub const fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Result image.
    #[must_use]
    pub const fn image(&self) -> &Image {
        &self.image
    }

    /// Time the operation took.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        self.duration
    }
}

/// Linear history with a cursor. See the [module docs](self).
#[derive(Debug, Clone)]
pub struct History {
    base: Image,
    entries: VecDeque<Entry>,
    /// Number of entries applied; 0 means the base is current.
    applied: usize,
    policy: HistoryPolicy,
    total_bytes: usize,
    evicted: usize,
}

impl History {
    /// Empty history on top of `base`.
    #[must_use]
    pub const fn new(base: Image, policy: HistoryPolicy) -> Self {
        Self {
            base,
            entries: VecDeque::new(),
            applied: 0,
            policy,
            total_bytes: 0,
            evicted: 0,
        }
    }

    /// Run `descriptor` on the current image and record the result.
    ///
    /// Atomic: on failure nothing changes, including the redo tail.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Operation`] if validation or the kernel
    /// fails.
    #[instrument(skip_all, fields(op = %descriptor))]
    pub fn apply(
        &mut self,
        handler: &Handler,
        descriptor: &Descriptor,
        cancel: &CancelToken,
    ) -> Result<Image, HistoryError> {
        let start = Instant::now();
        let image = handler.run(descriptor, self.current(), cancel)?;
        Ok(self.record(descriptor.clone(), image, start.elapsed()))
    }

    /// Record a result computed elsewhere as a new entry after the
    /// cursor, discarding any redo entries. Returns the new current image.
    pub fn record(&mut self, descriptor: Descriptor, image: Image, duration: Duration) -> Image {
        self.truncate_redo();
        self.total_bytes += image.byte_size();
        debug!(op = %descriptor, ?duration, "recording history entry");
        self.entries.push_back(Entry {
            descriptor,
            image: image.clone(),
            duration,
        });
        self.applied = self.entries.len();
        self.evict();
        image
    }

    /// Replace the current entry with a new result for the same step,
    /// discarding any redo entries (they were computed from the old
    /// result). Returns the new current image.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::NoHistory`] if the cursor is at the base.
    pub fn replace_current(
        &mut self,
        descriptor: Descriptor,
        image: Image,
        duration: Duration,
    ) -> Result<Image, HistoryError> {
        if self.applied == 0 {
            return Err(HistoryError::NoHistory(Direction::Undo));
        }
        self.truncate_redo();
        let Some(entry) = self.entries.back_mut() else {
            return Err(HistoryError::NoHistory(Direction::Undo));
        };
        self.total_bytes = self.total_bytes - entry.image.byte_size() + image.byte_size();
        *entry = Entry {
            descriptor,
            image: image.clone(),
            duration,
        };
        self.evict();
        Ok(image)
    }

    /// Step back one entry.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::NoHistory`] if the cursor is at the base.
    pub fn undo(&mut self) -> Result<Image, HistoryError> {
        if self.applied == 0 {
            return Err(HistoryError::NoHistory(Direction::Undo));
        }
        self.applied -= 1;
        debug!(position = ?self.position(), "undo");
        Ok(self.current().clone())
    }

    /// Step forward one entry.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::NoHistory`] if the cursor is at the newest
    /// entry.
    pub fn redo(&mut self) -> Result<Image, HistoryError> {
        if self.applied == self.entries.len() {
            return Err(HistoryError::NoHistory(Direction::Redo));
        }
        self.applied += 1;
        debug!(position = ?self.position(), "redo");
        Ok(self.current().clone())
    }

    /// Discard every entry and start over from `base`.
    pub fn reset(&mut self, base: Image) {
        self.base = base;
        self.entries.clear();
        self.applied = 0;
        self.total_bytes = 0;
        self.evicted = 0;
    }

    /// The image at the cursor.
    #[must_use]
    pub fn current(&self) -> &Image {
        match self.applied.checked_sub(1) {
            Some(index) => &self.entries[index].image,
            None => &self.base,
        }
    }

    /// The entry at the cursor, if the cursor is not at the base.
    #[must_use]
    pub fn current_entry(&self) -> Option<&Entry> {
        self.applied.checked_sub(1).map(|index| &self.entries[index])
    }

    /// The image the current entry was computed from.
    #[must_use]
    pub fn previous_image(&self) -> Option<&Image> {
        match self.applied {
            0 => None,
            1 => Some(&self.base),
            n => Some(&self.entries[n - 2].image),
        }
    }

    /// Oldest image still reachable by undo.
    #[must_use]
    pub const fn base(&self) -> &Image {
        &self.base
    }

    /// Cursor position.
    #[must_use]
    pub const fn position(&self) -> Position {
        match self.applied {
            0 => Position::Base,
            n => Position::Entry(n - 1),
        }
    }

    /// Whether [`undo`](Self::undo) would succeed.
    #[must_use]
    pub const fn can_undo(&self) -> bool {
        self.applied > 0
    }

    /// Whether [`redo`](Self::redo) would succeed.
    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.applied < self.entries.len()
    }

    /// Number of entries kept, redo entries included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries are kept.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries from oldest to newest.
    pub fn entries(&self) -> impl ExactSizeIterator<Item = &Entry> {
        self.entries.iter()
    }

    /// Bytes of result images held by the entries (the base excluded).
    #[must_use]
    pub const fn memory_usage(&self) -> usize {
        self.total_bytes
    }

    /// Entries dropped by the policy since the last reset.
    #[must_use]
    pub const fn evicted(&self) -> usize {
        self.evicted
    }

    /// Bounds in force.
    #[must_use]
    pub const fn policy(&self) -> &HistoryPolicy {
        &self.policy
    }

    /// Serializable snapshot for reports.
    #[must_use]
    pub fn summary(&self) -> HistorySummary {
        HistorySummary {
            entries: self
                .entries
                .iter()
                .map(|entry| EntrySummary {
                    operation: entry.descriptor.to_string(),
                    descriptor: entry.descriptor.clone(),
                    duration_ms: entry.duration.as_secs_f64() * 1000.0,
                    bytes: entry.image.byte_size(),
                })
                .collect(),
            position: self.position(),
            evicted: self.evicted,
            memory_bytes: self.total_bytes,
        }
    }

    fn truncate_redo(&mut self) {
        for dropped in self.entries.drain(self.applied..) {
            self.total_bytes -= dropped.image.byte_size();
        }
    }

    /// Drop the oldest entries while a bound is exceeded.
    fn evict(&mut self) {
        while self.entries.len() > 1 && self.over_budget() {
            let Some(oldest) = self.entries.pop_front() else {
                break;
            };
            self.total_bytes -= oldest.image.byte_size();
            self.base = oldest.image;
            self.applied = self.applied.saturating_sub(1);
            self.evicted += 1;
            debug!(
                op = %oldest.descriptor,
                remaining = self.entries.len(),
                memory = self.total_bytes,
                "evicted oldest history entry"
            );
        }
    }

    fn over_budget(&self) -> bool {
        self.policy
            .max_entries
            .is_some_and(|max| self.entries.len() > max)
            || self
                .policy
                .max_bytes
                .is_some_and(|max| self.total_bytes > max)
    }
}

/// One line of a [`HistorySummary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySummary {
    /// Textual form of the descriptor.
    pub operation: String,
    /// The descriptor itself.
    pub descriptor: Descriptor,
    /// Run time in milliseconds.
    pub duration_ms: f64,
    /// Bytes held by the result image.
    pub bytes: usize,
}

/// Serializable view of a [`History`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySummary {
    /// Entries from oldest to newest.
    pub entries: Vec<EntrySummary>,
    /// Cursor position.
    pub position: Position,
    /// Entries dropped by the history policy.
    pub evicted: usize,
    /// Bytes held by entry images.
    pub memory_bytes: usize,
}

impl HistorySummary {
    /// Human-readable multi-line report. The current state is marked
    /// with `>`.
    #[must_use]
    pub fn report(&self) -> String {
        let mut out = String::new();
        let marker = |current: bool| if current { '>' } else { ' ' };
        let _ = write!(out, "{} base", marker(self.position == Position::Base));
        if self.evicted > 0 {
            let _ = write!(out, " ({} older step(s) evicted)", self.evicted);
        }
        out.push('\n');
        for (index, entry) in self.entries.iter().enumerate() {
            let _ = writeln!(
                out,
                "{} {}. {} ({:.1} ms)",
                marker(self.position == Position::Entry(index)),
                index + 1,
                entry.operation,
                entry.duration_ms,
            );
        }
        #[allow(clippy::cast_precision_loss)]
        let mib = self.memory_bytes as f64 / (1024.0 * 1024.0);
        let _ = write!(out, "{} step(s), {mib:.2} MiB held", self.entries.len());
        out
    }
}
