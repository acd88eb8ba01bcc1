//! The entries database: `name -> entry attributes`, persisted per directory
//! (see spec §6 "Persisted state" / `.admin/entries`).

use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// What kind of node an entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// A regular file.
    File,
    /// A directory.
    Dir,
    /// Kind unknown, e.g. a bare stub created by `absent_*`.
    Unknown,
}

/// The scheduled change recorded against a working-copy entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Schedule {
    /// No pending local change.
    #[default]
    Normal,
    /// Scheduled for addition.
    Add,
    /// Scheduled for deletion.
    Delete,
    /// Scheduled for deletion-then-addition (copy-replace).
    Replace,
}

/// Ambient depth / requested depth lattice (spec §12, "depth upgrade table").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Depth {
    /// This node only, no children.
    Empty,
    /// This node and its immediate file children.
    Files,
    /// This node and its immediate children, recursing no further.
    Immediates,
    /// This node and its entire subtree.
    Infinity,
    /// This subtree is deliberately excluded from the working copy.
    Exclude,
}

impl Depth {
    /// Infer the ambient depth a freshly opened/added child directory should
    /// receive, given the edit's requested depth and the parent's ambient
    /// depth. `svn_depth_t` lattice: a child directory under a parent with
    /// `Immediates` or `Files` ambient depth is only ever populated to
    /// `Empty` unless the edit's requested depth says otherwise.
    pub fn infer_child_ambient(requested: Depth, parent_ambient: Depth) -> Depth {
        match (requested, parent_ambient) {
            (Depth::Infinity, _) => Depth::Infinity,
            (_, Depth::Infinity) => requested.min(Depth::Infinity),
            (requested, Depth::Immediates) => requested.min(Depth::Empty),
            (_, Depth::Files) => Depth::Empty,
            (_, Depth::Empty) => Depth::Empty,
            (requested, Depth::Exclude) => requested,
        }
    }
}

/// A copy-from source (URL + revision) recorded on an entry added with
/// history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyFrom {
    /// Source URL the copy was taken from.
    pub url: String,
    /// Source revision the copy was taken from.
    pub revision: u64,
}

/// One row of the entries database. Field names follow spec §6 directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    /// The entry's name within its parent directory (empty for "this dir").
    pub name: String,
    /// What kind of node this entry describes.
    pub kind: NodeKind,
    /// The revision this entry is at.
    pub revision: u64,
    /// The entry's repository URL.
    pub url: String,
    /// The repository root URL.
    pub repos_root: String,
    /// The repository's UUID.
    pub repos_uuid: uuid::Uuid,
    /// The scheduled local change, if any.
    pub schedule: Schedule,
    /// Whether this entry is part of a copied subtree.
    pub copied: bool,
    /// The copy-from source, if added with history.
    pub copyfrom: Option<CopyFrom>,
    /// Whether this entry is a deletion stub.
    pub deleted: bool,
    /// Whether this entry is an absence stub (server-side excluded node).
    pub absent: bool,
    /// Whether this directory's children are not yet fully known.
    pub incomplete: bool,
    /// The ambient depth, for directory entries.
    pub depth: Depth,
    /// Recorded text-base checksum, hex-encoded.
    pub checksum: Option<String>,
    /// Last-changed (committed) revision.
    pub cmt_rev: Option<u64>,
    /// Recorded working-file mtime, as a decimal unix-seconds string.
    pub text_time: Option<String>,
    /// Recorded working-file size in bytes.
    pub working_size: Option<u64>,
    /// Recorded lock token, if locked.
    pub lock_token: Option<String>,
    /// Recorded tree-conflict description, if this node is a victim.
    pub tree_conflict: Option<String>,
}

impl Entry {
    /// A minimal "this dir" placeholder entry for a freshly created directory.
    pub fn new_dir(name: impl Into<String>, url: impl Into<String>, repos_uuid: uuid::Uuid) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Dir,
            revision: 0,
            url: url.into(),
            repos_root: String::new(),
            repos_uuid,
            schedule: Schedule::Normal,
            copied: false,
            copyfrom: None,
            deleted: false,
            absent: false,
            incomplete: true,
            depth: Depth::Infinity,
            checksum: None,
            cmt_rev: None,
            text_time: None,
            working_size: None,
            lock_token: None,
            tree_conflict: None,
        }
    }
}

/// Bitmask of which `Entry` fields a `modify_entry` call should write; all
/// other fields are left untouched. Mirrors `svn_wc_entry_t`'s modify-flags
/// idiom so commands can describe a partial update without re-stating the
/// whole row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModifyFlags(u32);

macro_rules! flag_accessors {
    ($($name:ident => $bit:expr),* $(,)?) => {
        // Flag names are self-documenting bit positions; `missing_docs`
        // would otherwise demand a doc comment per generated constant.
        #[allow(missing_docs)]
        impl ModifyFlags {
            $(
                pub const $name: ModifyFlags = ModifyFlags(1 << $bit);
            )*

            /// Whether every bit set in `other` is also set in `self`.
            pub fn contains(self, other: ModifyFlags) -> bool {
                self.0 & other.0 == other.0
            }
        }

        impl std::ops::BitOr for ModifyFlags {
            type Output = ModifyFlags;
            fn bitor(self, rhs: ModifyFlags) -> ModifyFlags {
                ModifyFlags(self.0 | rhs.0)
            }
        }
    };
}

flag_accessors! {
    REVISION => 0,
    URL => 1,
    SCHEDULE => 2,
    COPIED => 3,
    COPYFROM => 4,
    DELETED => 5,
    ABSENT => 6,
    INCOMPLETE => 7,
    DEPTH => 8,
    CHECKSUM => 9,
    TEXT_TIME => 10,
    WORKING_SIZE => 11,
    LOCK_TOKEN => 12,
    TREE_CONFLICT => 13,
    KIND => 14,
    CMT_REV => 15,
}

/// A partial update to apply to one entry via `modify_entry`. Unset fields
/// are ignored even if `Some`-populated by a lazy caller, per `flags`.
#[derive(Debug, Clone, Default)]
pub struct EntryMod {
    /// Which fields below `apply` should actually write.
    pub flags: ModifyFlags,
    /// See [`Entry::revision`].
    pub revision: Option<u64>,
    /// See [`Entry::url`].
    pub url: Option<String>,
    /// See [`Entry::kind`].
    pub kind: Option<NodeKind>,
    /// See [`Entry::schedule`].
    pub schedule: Option<Schedule>,
    /// See [`Entry::copied`].
    pub copied: Option<bool>,
    /// See [`Entry::copyfrom`]. Outer `Some` applies; inner `None` clears.
    pub copyfrom: Option<Option<CopyFrom>>,
    /// See [`Entry::deleted`].
    pub deleted: Option<bool>,
    /// See [`Entry::absent`].
    pub absent: Option<bool>,
    /// See [`Entry::incomplete`].
    pub incomplete: Option<bool>,
    /// See [`Entry::depth`].
    pub depth: Option<Depth>,
    /// See [`Entry::checksum`]. Outer `Some` applies; inner `None` clears.
    pub checksum: Option<Option<String>>,
    /// See [`Entry::cmt_rev`]. Outer `Some` applies; inner `None` clears.
    pub cmt_rev: Option<Option<u64>>,
    /// See [`Entry::text_time`]. Outer `Some` applies; inner `None` clears.
    pub text_time: Option<Option<String>>,
    /// See [`Entry::working_size`]. Outer `Some` applies; inner `None` clears.
    pub working_size: Option<Option<u64>>,
    /// See [`Entry::lock_token`]. Outer `Some` applies; inner `None` clears.
    pub lock_token: Option<Option<String>>,
    /// See [`Entry::tree_conflict`]. Outer `Some` applies; inner `None` clears.
    pub tree_conflict: Option<Option<String>>,
}

impl EntryMod {
    /// Write every flagged field from `self` into `entry`, leaving unflagged
    /// fields untouched.
    pub fn apply(&self, entry: &mut Entry) {
        if self.flags.contains(ModifyFlags::REVISION) {
            if let Some(v) = self.revision {
                entry.revision = v;
            }
        }
        if self.flags.contains(ModifyFlags::URL) {
            if let Some(v) = &self.url {
                entry.url = v.clone();
            }
        }
        if self.flags.contains(ModifyFlags::KIND) {
            if let Some(v) = self.kind {
                entry.kind = v;
            }
        }
        if self.flags.contains(ModifyFlags::SCHEDULE) {
            if let Some(v) = self.schedule {
                entry.schedule = v;
            }
        }
        if self.flags.contains(ModifyFlags::COPIED) {
            if let Some(v) = self.copied {
                entry.copied = v;
            }
        }
        if self.flags.contains(ModifyFlags::COPYFROM) {
            if let Some(v) = self.copyfrom.clone() {
                entry.copyfrom = v;
            }
        }
        if self.flags.contains(ModifyFlags::DELETED) {
            if let Some(v) = self.deleted {
                entry.deleted = v;
            }
        }
        if self.flags.contains(ModifyFlags::ABSENT) {
            if let Some(v) = self.absent {
                entry.absent = v;
            }
        }
        if self.flags.contains(ModifyFlags::INCOMPLETE) {
            if let Some(v) = self.incomplete {
                entry.incomplete = v;
            }
        }
        if self.flags.contains(ModifyFlags::DEPTH) {
            if let Some(v) = self.depth {
                entry.depth = v;
            }
        }
        if self.flags.contains(ModifyFlags::CHECKSUM) {
            if let Some(v) = self.checksum.clone() {
                entry.checksum = v;
            }
        }
        if self.flags.contains(ModifyFlags::CMT_REV) {
            if let Some(v) = self.cmt_rev {
                entry.cmt_rev = v;
            }
        }
        if self.flags.contains(ModifyFlags::TEXT_TIME) {
            if let Some(v) = self.text_time.clone() {
                entry.text_time = v;
            }
        }
        if self.flags.contains(ModifyFlags::WORKING_SIZE) {
            if let Some(v) = self.working_size {
                entry.working_size = v;
            }
        }
        if self.flags.contains(ModifyFlags::LOCK_TOKEN) {
            if let Some(v) = self.lock_token.clone() {
                entry.lock_token = v;
            }
        }
        if self.flags.contains(ModifyFlags::TREE_CONFLICT) {
            if let Some(v) = self.tree_conflict.clone() {
                entry.tree_conflict = v;
            }
        }
    }
}

/// In-memory view of one directory's entries file: the "this dir" entry
/// plus every direct child.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntriesFile {
    /// The directory's own entry, if its admin area has been initialized.
    pub this_dir: Option<Entry>,
    /// Direct children, keyed by name.
    pub children: BTreeMap<String, Entry>,
}

/// The administrative storage contract (spec §6 "Admin store"). A
/// filesystem-backed implementation is provided in [`crate::fs_store`]; a
/// production RPC-driven or in-memory test double can implement this trait
/// directly.
pub trait AdminStore {
    /// Look up an entry by absolute path. Hidden (deleted/absent) entries
    /// are skipped unless `allow_hidden`; a `expected_kind` mismatch is
    /// treated as not-found.
    fn get_entry(
        &self,
        abspath: &Utf8PathBuf,
        allow_hidden: bool,
        expected_kind: Option<NodeKind>,
    ) -> anyhow::Result<Option<Entry>>;

    /// Apply a partial update to the named entry in `dir`, creating it if
    /// absent.
    fn modify_entry(
        &self,
        dir: &Utf8PathBuf,
        name: &str,
        fields: &EntryMod,
    ) -> anyhow::Result<()>;

    /// Remove an entry outright.
    fn remove_entry(&self, abspath: &Utf8PathBuf) -> anyhow::Result<()>;

    /// Read the full entries file for a directory.
    fn read_entries(&self, dir: &Utf8PathBuf) -> anyhow::Result<EntriesFile>;

    /// Initialize the administrative area for a freshly created directory.
    fn ensure_admin(
        &self,
        dir: &Utf8PathBuf,
        uuid: uuid::Uuid,
        url: &str,
        repos_root: &str,
        revision: u64,
        depth: Depth,
    ) -> anyhow::Result<()>;

    /// Record a directory's ambient depth.
    fn set_depth(&self, dir: &Utf8PathBuf, depth: Depth) -> anyhow::Result<()>;

    /// Record repository-cache ("wc-prop"/"dav-cache") values for a node.
    fn set_dav_cache(
        &self,
        abspath: &Utf8PathBuf,
        name: &str,
        values: BTreeMap<String, String>,
    ) -> anyhow::Result<()>;

    /// Read the three-way property set recorded against a node.
    fn load_props(&self, abspath: &Utf8PathBuf) -> anyhow::Result<crate::props::PropSet>;

    /// Persist a node's three-way property set.
    fn save_props(&self, abspath: &Utf8PathBuf, props: &crate::props::PropSet) -> anyhow::Result<()>;
}
