//! Best-effort notification sink (spec §6 "Notifier"). Never alters state.

use camino::Utf8PathBuf;

/// The content-merge outcome reported alongside an `update`/`merged`
/// notification (spec §8 scenario 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentState {
    /// The working file was left as-is; nothing from the server applied.
    Unchanged,
    /// A clean three-way merge was applied.
    Merged,
    /// The merge left conflict markers.
    Conflicted,
}

/// One event the editor reports as it drives. Never fatal; the notifier is
/// "best-effort" per spec §6.
#[derive(Debug, Clone)]
pub enum NotifyEvent {
    /// A new node was added.
    UpdateAdd { path: Utf8PathBuf },
    /// An existing file's content and/or properties were updated.
    UpdateUpdate {
        path: Utf8PathBuf,
        content_state: ContentState,
    },
    /// A node was deleted.
    UpdateDelete { path: Utf8PathBuf },
    /// An add was a no-op because the node already matched.
    Exists { path: Utf8PathBuf },
    /// The node was skipped without processing (spec §4.1).
    Skip { path: Utf8PathBuf },
    /// An unversioned obstruction blocked the update.
    UpdateObstruction { path: Utf8PathBuf },
    /// A tree conflict was recorded at this path.
    TreeConflict { path: Utf8PathBuf },
    /// A node missing from disk was removed from version control.
    MissingRemoved { path: Utf8PathBuf },
}

/// Receives notifications as the editor drives an update.
pub trait Notifier {
    /// Report one event. Must not fail or alter editor state.
    fn notify(&self, event: NotifyEvent);
}

/// A notifier that discards every event, for callers that don't care.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _event: NotifyEvent) {}
}

/// A notifier that records every event in order, used by tests and the CLI
/// demo driver to print a transcript.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    /// Events recorded so far, in notify order.
    pub events: std::sync::Mutex<Vec<NotifyEvent>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: NotifyEvent) {
        self.events.lock().unwrap().push(event);
    }
}
