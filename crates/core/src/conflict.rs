//! Tree-conflict detection (spec §4.7.1).

use camino::Utf8PathBuf;
use wceditor_admin::entries::{AdminStore, NodeKind, Schedule};
use wceditor_admin::pristine::PristineStore;

/// What the incoming edit does at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomingAction {
    /// Content or property change on an existing node.
    Edit,
    /// A new node.
    Add,
    /// Removal of an existing node.
    Delete,
    /// Removal followed by addition (copy-replace).
    Replace,
}

/// What kind of node the incoming change concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomingKind {
    /// A file.
    File,
    /// A directory.
    Dir,
    /// No node (e.g. a delete of an unknown kind).
    None,
}

/// Why a node is in conflict, from the local side's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// The local node was edited.
    Edited,
    /// The local node was added.
    Added,
    /// The local node was deleted.
    Deleted,
    /// The local node was replaced.
    Replaced,
}

/// One side (local or incoming) of a tree conflict, as much as is known.
#[derive(Debug, Clone, Default)]
pub struct ConflictSide {
    /// The side's URL, if known.
    pub url: Option<String>,
    /// The side's revision, if known.
    pub revision: Option<u64>,
    /// The side's node kind, if known.
    pub kind: Option<NodeKind>,
}

/// A recorded tree conflict (spec §4.7.1).
#[derive(Debug, Clone)]
pub struct TreeConflict {
    /// Path of the conflicted node.
    pub path: Utf8PathBuf,
    /// Why this is a conflict.
    pub reason: ConflictReason,
    /// What the incoming edit was trying to do.
    pub incoming_action: IncomingAction,
    /// What kind of node the incoming edit concerns.
    pub incoming_kind: IncomingKind,
    /// The conflict's left (pre-edit) side.
    pub source_left: ConflictSide,
    /// The conflict's right (incoming) side.
    pub source_right: ConflictSide,
}

impl TreeConflict {
    /// A human-readable summary, persisted verbatim as the loggy
    /// add-tree-conflict command's `description` field (spec §6 persisted
    /// state: `tree-conflict-data`).
    pub fn to_description_string(&self) -> String {
        format!(
            "local {:?}, incoming {:?} {:?} -> reason {:?} (left={:?}@{:?}, right={:?}@{:?})",
            self.reason,
            self.incoming_action,
            self.incoming_kind,
            self.reason,
            self.source_left.url,
            self.source_left.revision,
            self.source_right.url,
            self.source_right.revision,
        )
    }
}

/// Local-side facts the caller has already gathered for the node under
/// test: its schedule, whether it (or, for directories, its subtree) is
/// locally modified, and whether every such modification is itself a
/// deletion (spec §4.7.1 "delete/replace on locally modified ... reason
/// edited (or deleted if all mods are deletes)").
#[derive(Debug, Clone, Copy)]
pub struct LocalState {
    /// The node's scheduled local change.
    pub schedule: Schedule,
    /// Whether the node (or its subtree) is locally modified.
    pub locally_modified: bool,
    /// Whether every local modification found is itself a deletion.
    pub all_mods_are_deletes: bool,
}

impl LocalState {
    fn is_deleted_or_replaced(&self) -> Option<ConflictReason> {
        match self.schedule {
            Schedule::Delete => Some(ConflictReason::Deleted),
            Schedule::Replace => Some(ConflictReason::Replaced),
            _ => None,
        }
    }
}

/// Run tree-conflict detection for `path` given the incoming change and the
/// gathered local state. `already_conflicted` suppresses re-detection for a
/// path already inside a recorded conflict's subtree. `is_file_external_retry`
/// suppresses the "add on locally existing entry" rule for file-external
/// re-adds (spec §4.7.1 "not a file-external retry").
pub fn detect(
    path: &Utf8PathBuf,
    incoming_action: IncomingAction,
    incoming_kind: IncomingKind,
    local_entry_exists: bool,
    local: LocalState,
    already_conflicted: bool,
    is_file_external_retry: bool,
    source_left: ConflictSide,
    source_right: ConflictSide,
) -> Option<TreeConflict> {
    if already_conflicted {
        return None;
    }

    let reason = match incoming_action {
        IncomingAction::Edit => local.is_deleted_or_replaced(),
        IncomingAction::Add => {
            if local_entry_exists && !is_file_external_retry {
                Some(ConflictReason::Added)
            } else {
                None
            }
        }
        IncomingAction::Delete | IncomingAction::Replace => {
            local.is_deleted_or_replaced().or_else(|| {
                if local.locally_modified {
                    Some(if local.all_mods_are_deletes {
                        ConflictReason::Deleted
                    } else {
                        ConflictReason::Edited
                    })
                } else {
                    None
                }
            })
        }
    };

    reason.map(|reason| TreeConflict {
        path: path.clone(),
        reason,
        incoming_action,
        incoming_kind,
        source_left,
        source_right,
    })
}

/// Recursively inspect a directory's subtree for local text/property
/// modifications, and whether every modification found is itself a
/// deletion (spec §4.7.1 "For directories on a delete/replace probe, a full
/// recursive walk checks text and property modifications").
pub fn subtree_has_local_mods(
    admin: &dyn AdminStore,
    pristine: &dyn PristineStore,
    dir: &Utf8PathBuf,
) -> anyhow::Result<(bool, bool)> {
    let entries = admin.read_entries(dir)?;
    let mut modified = false;
    let mut all_deletes = true;

    for (name, entry) in &entries.children {
        let child_path = dir.join(name);
        match entry.schedule {
            Schedule::Delete => {
                modified = true;
            }
            Schedule::Add | Schedule::Replace => {
                modified = true;
                all_deletes = false;
            }
            Schedule::Normal => {
                if entry.kind == NodeKind::File {
                    if file_is_modified(pristine, &child_path)? {
                        modified = true;
                        all_deletes = false;
                    }
                } else if entry.kind == NodeKind::Dir {
                    let (child_mod, child_all_deletes) =
                        subtree_has_local_mods(admin, pristine, &child_path)?;
                    if child_mod {
                        modified = true;
                        if !child_all_deletes {
                            all_deletes = false;
                        }
                    }
                }
            }
        }
    }

    Ok((modified, modified && all_deletes))
}

fn file_is_modified(pristine: &dyn PristineStore, path: &camino::Utf8PathBuf) -> anyhow::Result<bool> {
    let Ok(pristine_bytes) = pristine.get_pristine(path) else {
        return Ok(false);
    };
    match std::fs::read(path) {
        Ok(working_bytes) => Ok(working_bytes != pristine_bytes),
        Err(_) => Ok(false),
    }
}
