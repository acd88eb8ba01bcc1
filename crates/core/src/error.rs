//! Stable failure codes surfaced at the editor boundary (spec §6, §7).
//!
//! Semantic outcomes that are recoverable in place — `left_local_mod`,
//! `not_working_copy`, `node_unexpected_kind` — are never represented here;
//! they're downgraded to `Ok` variants or `None` at the call site that
//! observes them, per §7.

use camino::Utf8PathBuf;
use thiserror::Error;

/// A fatal failure that aborts the edit in progress.
#[derive(Debug, Error)]
pub enum EditorError {
    /// An add/open found an unversioned or foreign-repository obstruction.
    #[error("update obstructed at '{path}'")]
    ObstructedUpdate { path: Utf8PathBuf },

    /// The on-disk pristine text-base failed to read back.
    #[error("pristine text base for '{path}' is corrupt")]
    CorruptTextBase { path: Utf8PathBuf },

    /// The actual checksum of applied content didn't match what was
    /// expected.
    #[error("checksum mismatch for '{path}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: Utf8PathBuf,
        expected: String,
        actual: String,
    },

    /// The edit stream asked for something this editor doesn't implement.
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// An operation targeted a path with no versioned entry.
    #[error("'{path}' is not a versioned resource")]
    UnversionedResource { path: Utf8PathBuf },

    /// A `switch` request was malformed or targeted an incompatible URL.
    #[error("invalid switch: {0}")]
    InvalidSwitch(String),

    /// A copy-from locator request referenced a path/revision this editor
    /// could not resolve.
    #[error("copyfrom path '{path}' not found at revision {revision}")]
    CopyfromPathNotFound { path: String, revision: u64 },

    /// No entry exists at the given path.
    #[error("entry not found for '{path}'")]
    EntryNotFound { path: Utf8PathBuf },

    /// An entry was found with no recorded URL.
    #[error("entry for '{path}' has no URL")]
    EntryMissingUrl { path: Utf8PathBuf },

    /// The node is locked and the operation cannot proceed.
    #[error("'{path}' is locked")]
    Locked { path: Utf8PathBuf },

    /// The target path is not inside a working copy this editor manages.
    #[error("'{path}' is not a working copy")]
    NotWorkingCopy { path: Utf8PathBuf },

    /// An entry's recorded kind didn't match what the operation expected.
    #[error("'{path}' has unexpected node kind")]
    NodeUnexpectedKind { path: Utf8PathBuf },

    /// The caller's cancel callback requested the edit stop.
    #[error("operation cancelled")]
    Cancelled,
}
