//! The deferred log engine (spec §6 "Log engine", §9 "Deferred mutations vs
//! direct mutations").
//!
//! Each directory owns an append-only [`LogBuffer`] of [`LoggyCommand`]s.
//! Commands are idempotent and replayable: running the same `log.N` file
//! twice must leave the working copy in the same state as running it once
//! (spec §8 "Log replay is idempotent").

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::entries::EntryMod;

/// One fixed-vocabulary, idempotent, replayable mutation (spec §6 "Log
/// engine"). Every variant must tolerate being re-applied after a crash
/// mid-replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LoggyCommand {
    /// Apply a partial update to the named entry in `dir`.
    EntryModify {
        dir: Utf8PathBuf,
        name: String,
        fields: EntryMod,
    },
    /// Remove the named entry outright.
    DeleteEntry { dir: Utf8PathBuf, name: String },
    /// Copy `src` to `dst`, overwriting `dst`. Used to install new text
    /// bases into the working file (spec §4.5 action matrix).
    Copy { src: Utf8PathBuf, dst: Utf8PathBuf },
    /// Rename `src` to `dst`, used to install temp text-bases atomically.
    Move { src: Utf8PathBuf, dst: Utf8PathBuf },
    /// Mark a path read-only (text-bases are always read-only once
    /// installed).
    SetReadonly { path: Utf8PathBuf },
    /// Stamp a path's mtime to a recorded or current value.
    SetTimestamp {
        path: Utf8PathBuf,
        unix_seconds: i64,
    },
    /// Record the on-disk size of a path into its entry's
    /// `working_size` field.
    SetWorkingSize { dir: Utf8PathBuf, name: String },
    /// Clear a recorded lock token.
    DeleteLock { dir: Utf8PathBuf, name: String },
    /// Record a tree conflict description against an entry.
    AddTreeConflict {
        dir: Utf8PathBuf,
        name: String,
        description: String,
    },
    /// Merge a set of regular property changes into a node's working
    /// property set.
    MergeProps {
        path: Utf8PathBuf,
        changes: Vec<crate::props::PropChange>,
    },
}

/// An append-only, per-directory accumulator of [`LoggyCommand`]s. Only
/// atomic multi-command appends are permitted: never interleave partial
/// writes from two logical sub-transactions (spec §3 invariant).
#[derive(Debug, Clone, Default)]
pub struct LogBuffer {
    commands: Vec<LoggyCommand>,
}

impl LogBuffer {
    /// Whether no commands have been appended yet.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Append a whole batch of commands as one atomic unit. Callers must
    /// build up a complete sub-transaction (e.g. a file's full close-time
    /// command set) before calling this, per the invariant above.
    pub fn append_atomic(&mut self, commands: impl IntoIterator<Item = LoggyCommand>) {
        self.commands.extend(commands);
    }

    /// Drain and return every buffered command, leaving the buffer empty.
    pub fn take(&mut self) -> Vec<LoggyCommand> {
        std::mem::take(&mut self.commands)
    }

    /// The currently buffered commands, in append order.
    pub fn commands(&self) -> &[LoggyCommand] {
        &self.commands
    }
}

/// The log-engine contract (spec §6). A directory's buffer is flushed to a
/// numbered `log.N` file when a subtree is ready to commit; a separate
/// replay step executes the file and deletes it, so that a crash between
/// "log written" and "log executed" is always recoverable by re-running
/// the log on next startup.
pub trait LogEngine {
    /// Persist `commands` as the next-numbered log file for `dir`.
    fn write_log(
        &self,
        dir: &Utf8PathBuf,
        seqno: u32,
        commands: &[LoggyCommand],
    ) -> anyhow::Result<()>;

    /// Execute every `log.N` file present for `dir`, lowest-numbered first,
    /// deleting each as it completes.
    fn run_log(&self, dir: &Utf8PathBuf) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_atomic_preserves_order() {
        let mut buf = LogBuffer::default();
        buf.append_atomic([
            LoggyCommand::SetReadonly {
                path: "a".into(),
            },
            LoggyCommand::SetReadonly {
                path: "b".into(),
            },
        ]);
        assert_eq!(buf.commands().len(), 2);
        let taken = buf.take();
        assert!(buf.is_empty());
        assert_eq!(taken.len(), 2);
    }
}
