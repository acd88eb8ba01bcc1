//! The data model (spec §3): [`EditContext`], [`DirContext`], [`FileContext`],
//! [`BumpNode`], [`HandlerContext`].
//!
//! `BumpNode` is deliberately a separate reference-counted tree from
//! `DirContext` (spec §9 "Parallel baton + bump structures"): a
//! `FileContext` keeps its directory's bump node alive via `Rc` past the
//! directory's own close, so postfix `apply_textdelta`/`close_file` calls
//! can still signal completion upward after the `DirContext` is gone.

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::Rc;

use camino::Utf8PathBuf;
use wceditor_admin::conflict_resolver::ConflictResolver;
use wceditor_admin::entries::{AdminStore, Depth};
use wceditor_admin::externals::ExternalsSink;
use wceditor_admin::fetch::FetchCallback;
use wceditor_admin::log::{LogBuffer, LogEngine};
use wceditor_admin::notify::Notifier;
use wceditor_admin::pristine::{Checksum, ChecksumStream, PristineStore};
use wceditor_admin::props::PropChange;
use wceditor_admin::translate::Translation;

use crate::config::EditorConfig;

/// The collaborators named in spec §6, bundled so the editor can be
/// constructed with one call. Each field is independently substitutable by
/// tests (e.g. an in-memory `AdminStore` double).
pub struct Collaborators {
    /// The administrative storage backend.
    pub admin: Rc<dyn AdminStore>,
    /// The deferred-mutation log engine.
    pub log: Rc<dyn LogEngine>,
    /// The pristine (text-base) store.
    pub pristine: Rc<dyn PristineStore>,
    /// The notification sink.
    pub notifier: Rc<dyn Notifier>,
    /// The repository fetch callback.
    pub fetch: Rc<dyn FetchCallback>,
    /// The interactive conflict resolver.
    pub resolver: Rc<dyn ConflictResolver>,
    /// The externals notification sink.
    pub externals: Rc<dyn ExternalsSink>,
    /// The keyword/EOL translation backend.
    pub translation: Rc<dyn Translation>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// The editor's top-level, edit-lifetime state (spec §3 `EditContext`).
/// Owns every `DirContext`/`FileContext`/`BumpNode` transitively through
/// the producer's call sequence; destroyed at `close_edit`.
#[derive(Debug)]
pub struct EditContext {
    /// The working copy's anchor directory (the directory actually opened
    /// by the producer; may differ from the edit's logical target).
    pub anchor: Utf8PathBuf,
    /// The filesystem root of the administrative area this edit writes
    /// into; ordinarily equal to `anchor` (spec glossary "Working copy
    /// root").
    pub wc_root: Utf8PathBuf,
    /// The target's name relative to `anchor`, empty if the anchor itself
    /// is the target.
    pub target: String,
    /// The revision this edit brings the working copy to.
    pub target_revision: Cell<u64>,
    /// Caller-supplied editor configuration.
    pub config: EditorConfig,
    /// Root URL of the repository being updated from.
    pub repos_root: String,
    /// UUID of the repository being updated from.
    pub repos_uuid: uuid::Uuid,
    /// The editor's collaborating services.
    pub collaborators: Collaborators,

    /// Subtree roots that will not receive a revision bump at `close_edit`.
    pub skipped_trees: RefCell<BTreeSet<Utf8PathBuf>>,
    /// Subtree roots inside a local deletion; still receive revision bumps.
    pub deleted_trees: RefCell<BTreeSet<Utf8PathBuf>>,
    /// Whether `open_root` has already been called this edit.
    pub root_opened: Cell<bool>,
    /// Whether the edit target itself was deleted during this edit.
    pub target_deleted: Cell<bool>,
}

impl EditContext {
    /// The absolute path of the edit's logical target.
    pub fn target_path(&self) -> Utf8PathBuf {
        if self.target.is_empty() {
            self.anchor.clone()
        } else {
            self.anchor.join(&self.target)
        }
    }

    /// True if `path` is at or under any recorded skipped-tree root, and not
    /// itself inside a local deletion (spec §4.1 "Skip propagation").
    pub fn is_skipped(&self, path: &Utf8PathBuf) -> bool {
        let skipped = self.skipped_trees.borrow();
        let deleted = self.deleted_trees.borrow();
        skipped
            .iter()
            .any(|root| path.starts_with(root) && !deleted.iter().any(|d| path.starts_with(d)))
    }

    /// Record `path` as the root of a skipped subtree.
    pub fn mark_skipped(&self, path: Utf8PathBuf) {
        self.skipped_trees.borrow_mut().insert(path);
    }

    /// Record `path` as the root of a locally deleted subtree.
    pub fn mark_deleted_tree(&self, path: Utf8PathBuf) {
        self.deleted_trees.borrow_mut().insert(path);
    }
}

/// A node in the completion-tracking tree (spec §3 `BumpRecord`, §4.7
/// "Completion cascade"). Lives independently of `DirContext` so it can
/// outlive the directory baton.
#[derive(Debug)]
pub struct BumpNode {
    /// The parent directory's bump node, if this isn't the edit root.
    pub parent: Option<Rc<BumpNode>>,
    /// Count of outstanding children (plus one for this node itself) that
    /// must complete before this node bumps its own revision.
    pub ref_count: Cell<u32>,
    /// The node's working-copy path.
    pub path: Utf8PathBuf,
    /// Whether this node's subtree was skipped.
    pub skipped: Cell<bool>,
}

impl BumpNode {
    /// Create the root bump node for an edit.
    pub fn new_root(path: Utf8PathBuf) -> Rc<Self> {
        Rc::new(Self {
            parent: None,
            ref_count: Cell::new(1),
            path,
            skipped: Cell::new(false),
        })
    }

    /// Create a child bump node, incrementing the parent's ref count.
    pub fn new_child(parent: &Rc<BumpNode>, path: Utf8PathBuf) -> Rc<Self> {
        parent.ref_count.set(parent.ref_count.get() + 1);
        Rc::new(Self {
            parent: Some(parent.clone()),
            ref_count: Cell::new(1),
            path,
            skipped: Cell::new(false),
        })
    }
}

/// A live directory baton (spec §3 `DirContext`). Created by
/// `open_root`/`open_directory`/`add_directory`; conceptually destroyed at
/// `close_directory`, though the Rust value simply goes out of scope once
/// every `Rc` clone (e.g. held by child `FileContext`s) is dropped.
#[derive(Debug)]
pub struct DirContext {
    /// The directory's working-copy path.
    pub path: Utf8PathBuf,
    /// The directory's name relative to its parent.
    pub basename: String,
    /// The directory's new URL after this edit.
    pub new_url: String,
    /// The directory's revision before this edit.
    pub old_revision: u64,
    /// The enclosing directory baton, `None` for the anchor.
    pub parent: Option<Rc<DirContext>>,
    /// Whether this directory was added (rather than opened) during the
    /// edit.
    pub added: bool,
    /// Whether an unversioned directory already occupied this path before
    /// the add.
    pub unversioned_existed: Cell<bool>,
    /// Whether an add_directory's `add_existed` case lacked copyfrom
    /// history.
    pub add_existed_without_history: Cell<bool>,
    /// Property changes accumulated since the last flush.
    pub prop_changes: RefCell<Vec<PropChange>>,
    /// The directory's deferred-mutation log, appended to as changes arrive.
    pub log_buffer: RefCell<LogBuffer>,
    /// The next sequence number for this directory's log file.
    pub log_seqno: Cell<u32>,
    /// The directory's ambient depth as inferred at open/add time.
    pub ambient_depth: Cell<Depth>,
    /// Whether the directory's entry was marked incomplete before this
    /// edit.
    pub was_incomplete: bool,
    /// This directory's node in the completion-tracking tree.
    pub bump: Rc<BumpNode>,
}

impl DirContext {
    /// The working-copy path of a child named `name`.
    pub fn child_path(&self, name: &str) -> Utf8PathBuf {
        self.path.join(name)
    }
}

/// A live file baton (spec §3 `FileContext`). Created by
/// `add_file`/`open_file`; destroyed at `close_file`.
#[derive(Debug)]
pub struct FileContext {
    /// The file's working-copy path.
    pub path: Utf8PathBuf,
    /// The file's name relative to its parent directory.
    pub basename: String,
    /// The file's new URL after this edit.
    pub new_url: String,
    /// The file's revision before this edit.
    pub old_revision: u64,
    /// Whether this file was added (rather than opened) during the edit.
    pub added: bool,
    /// Whether the add carried copyfrom history.
    pub added_with_history: bool,
    /// Whether this file's changes were skipped (e.g. tree-conflicted
    /// ancestor).
    pub skipped: Cell<bool>,
    /// Whether an unversioned file already occupied this path before the
    /// add.
    pub unversioned_existed: Cell<bool>,
    /// Whether an add's `add_existed` case applies.
    pub add_existed: Cell<bool>,
    /// Whether the file is locally scheduled for deletion.
    pub deleted_in_local_tree: Cell<bool>,
    /// Whether this file is inside a recorded tree conflict.
    pub tree_conflicted: Cell<bool>,

    /// Path of the newly received pristine, once `apply_textdelta` installs
    /// it (§4.4.2 step 7).
    pub incoming_text_base: RefCell<Option<Utf8PathBuf>>,
    /// Checksum of the newly received pristine.
    pub incoming_checksum: RefCell<Option<Checksum>>,

    /// Populated by the copy-from locator when `add_file` carries history
    /// and the working copy already has a usable local source (otherwise
    /// the fetched base is routed through `incoming_text_base` instead).
    pub copied_working_path: RefCell<Option<Utf8PathBuf>>,

    /// The incoming `svn:entry:committed-date` property value, used to
    /// stamp the working file's timestamp at close (§4.5 step 8).
    pub last_changed_date: RefCell<Option<String>>,

    /// The enclosing directory baton.
    pub parent: Rc<DirContext>,
    /// This file's node in the completion-tracking tree.
    pub bump: Rc<BumpNode>,
    /// Property changes accumulated since the last flush.
    pub prop_changes: RefCell<Vec<PropChange>>,
}

/// Streaming delta-apply state (spec §3 `HandlerContext`), created in
/// `apply_textdelta` and destroyed after the last window or on error.
#[derive(Debug)]
pub struct HandlerContext {
    /// The checksum the delta source was expected to match, if the
    /// producer supplied one.
    pub expected_source_checksum: Option<Checksum>,
    /// Running checksum of the delta's reconstructed target text.
    pub running_target: ChecksumStream,
    /// Path of the temporary file the target text is streamed into.
    pub work_path: Utf8PathBuf,
}
