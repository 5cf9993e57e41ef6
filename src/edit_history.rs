//! Undo/redo history for the text of one source note being edited.
//!
//! `EditHistory` is the linear stack with a cursor. `EditSession` puts a
//! debounce in front of it: keystrokes schedule a snapshot that commits
//! only after the quiescence window, and closing the session cancels any
//! snapshot still pending so it cannot land in a discarded history.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config;

// ═══════════════════════════════════════════════════════════
// EditHistory: linear undo stack
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditHistory {
    stack: Vec<String>,
    cursor: usize,
}

impl EditHistory {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            stack: vec![content.into()],
            cursor: 0,
        }
    }

    /// Reset to a single snapshot.
    pub fn init(&mut self, content: impl Into<String>) {
        self.stack.clear();
        self.stack.push(content.into());
        self.cursor = 0;
    }

    /// Push a snapshot after the cursor, discarding the redo branch.
    /// Returns false when `content` equals the current snapshot.
    pub fn record(&mut self, content: impl Into<String>) -> bool {
        let content = content.into();
        if content == self.current() {
            return false;
        }
        self.stack.truncate(self.cursor + 1);
        self.stack.push(content);
        self.cursor = self.stack.len() - 1;
        true
    }

    pub fn undo(&mut self) -> &str {
        if self.cursor > 0 {
            self.cursor -= 1;
        }
        self.current()
    }

    pub fn redo(&mut self) -> &str {
        if self.cursor + 1 < self.stack.len() {
            self.cursor += 1;
        }
        self.current()
    }

    pub fn current(&self) -> &str {
        &self.stack[self.cursor]
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.stack.len()
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

// ═══════════════════════════════════════════════════════════
// EditSession: debounced recording for one open note
// ═══════════════════════════════════════════════════════════

struct PendingSnapshot {
    content: String,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// One "view/edit source" session.
///
/// Must be driven from within a tokio runtime for debouncing; without one,
/// edits are recorded immediately.
pub struct EditSession {
    note_id: String,
    history: Arc<Mutex<EditHistory>>,
    window: Duration,
    session: CancellationToken,
    pending: Option<PendingSnapshot>,
}

impl EditSession {
    pub fn open(note_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::with_window(note_id, content, config::DEFAULT_HISTORY_DEBOUNCE)
    }

    pub fn with_window(
        note_id: impl Into<String>,
        content: impl Into<String>,
        window: Duration,
    ) -> Self {
        let note_id = note_id.into();
        tracing::debug!(note_id = %note_id, window_ms = window.as_millis() as u64, "Edit session opened");
        Self {
            note_id,
            history: Arc::new(Mutex::new(EditHistory::new(content))),
            window,
            session: CancellationToken::new(),
            pending: None,
        }
    }

    pub fn note_id(&self) -> &str {
        &self.note_id
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_cancelled()
    }

    /// Schedule a snapshot of `content`, superseding any pending one.
    pub fn on_edit(&mut self, content: impl Into<String>) {
        if self.is_closed() {
            return;
        }
        let content = content.into();
        self.cancel_pending();

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            lock(&self.history).record(content);
            return;
        };

        let cancel = self.session.child_token();
        let task = {
            let cancel = cancel.clone();
            let history = Arc::clone(&self.history);
            let content = content.clone();
            let window = self.window;
            handle.spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(window) => {
                        // Check under the lock: flush()/close() may have raced the timer.
                        let mut history = lock(&history);
                        if !cancel.is_cancelled() {
                            history.record(content);
                        }
                    }
                }
            })
        };

        self.pending = Some(PendingSnapshot {
            content,
            cancel,
            task: Some(task),
        });
    }

    /// Commit the pending snapshot now. Returns true if one was still
    /// waiting on its timer.
    pub fn flush(&mut self) -> bool {
        let Some(mut pending) = self.pending.take() else {
            return false;
        };
        let waiting = pending.task.as_ref().is_some_and(|t| !t.is_finished());

        let mut history = lock(&self.history);
        pending.cancel.cancel();
        if let Some(task) = pending.task.take() {
            task.abort();
        }
        if waiting && !self.is_closed() {
            history.record(pending.content);
        }
        waiting
    }

    /// Flush, then step back. Returns the content to display.
    pub fn undo(&mut self) -> String {
        self.flush();
        lock(&self.history).undo().to_string()
    }

    /// Flush, then step forward. Returns the content to display.
    pub fn redo(&mut self) -> String {
        self.flush();
        lock(&self.history).redo().to_string()
    }

    pub fn can_undo(&self) -> bool {
        self.has_pending() || lock(&self.history).can_undo()
    }

    pub fn can_redo(&self) -> bool {
        !self.has_pending() && lock(&self.history).can_redo()
    }

    /// Snapshot of the committed history.
    pub fn history(&self) -> EditHistory {
        lock(&self.history).clone()
    }

    /// True while a scheduled snapshot has not yet committed.
    pub fn has_pending(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|p| p.task.as_ref().is_some_and(|t| !t.is_finished()))
    }

    /// Close the session. Pending snapshots are discarded.
    pub fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        self.session.cancel();
        if let Some(mut pending) = self.pending.take() {
            if let Some(task) = pending.task.take() {
                task.abort();
            }
            tracing::debug!(note_id = %self.note_id, "Pending history snapshot cancelled on close");
        }
    }

    fn cancel_pending(&mut self) {
        if let Some(mut pending) = self.pending.take() {
            pending.cancel.cancel();
            if let Some(task) = pending.task.take() {
                task.abort();
            }
        }
    }
}

impl Drop for EditSession {
    fn drop(&mut self) {
        self.close();
    }
}

// The history is never left half-updated, so a poisoned lock is still usable.
fn lock(history: &Mutex<EditHistory>) -> MutexGuard<'_, EditHistory> {
    history.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
