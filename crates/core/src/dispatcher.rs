//! The edit dispatcher (spec §4.1, §4.2, §4.3, §4.6, §4.7): the `Editor`
//! that a producer drives in strict depth-first pre-order.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use camino::Utf8PathBuf;
use wceditor_admin::entries::{AdminStore, Depth, EntryMod, ModifyFlags, NodeKind, Schedule};
use wceditor_admin::log::{LogBuffer, LoggyCommand};
use wceditor_admin::notify::NotifyEvent;
use wceditor_admin::props::{categorize, PropChange};

use crate::config::EditorConfig;
use crate::conflict::{self, ConflictSide, IncomingAction, IncomingKind, LocalState, TreeConflict};
use crate::context::{BumpNode, Collaborators, DirContext, EditContext, FileContext};
use crate::copyfrom::{self, CopyFromRequest};
use crate::error::EditorError;
use crate::file_ops::{self, CloseFileOutcome, TextDeltaHandler};
use crate::reschedule;

/// What `close_edit` found at the target: a genuine update, or the
/// filesystem equivalent of a checkout (spec §12 "fetch_absent_*
/// reconciliation at close_edit").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// The target already existed; this was an ordinary update.
    Updated,
    /// The target never existed on disk; this edit behaved like a checkout.
    CheckedOut,
}

/// The update editor (spec §3 `Editor`): the single entry point a producer
/// drives through the full call sequence from `open_root` to `close_edit`.
#[derive(Debug)]
pub struct Editor {
    /// The edit's shared, edit-lifetime state.
    pub ctx: Rc<EditContext>,
}

impl Editor {
    /// Construct an editor for an update (or, with `config.switch_url` set,
    /// a switch) against the working copy rooted at `anchor`.
    pub fn new(
        anchor: Utf8PathBuf,
        target: String,
        config: EditorConfig,
        repos_root: String,
        repos_uuid: uuid::Uuid,
        collaborators: Collaborators,
    ) -> anyhow::Result<Self> {
        if let Some(switch_url) = &config.switch_url {
            if !switch_url.starts_with(&repos_root) {
                return Err(EditorError::InvalidSwitch(format!(
                    "'{switch_url}' is not within repository root '{repos_root}'"
                ))
                .into());
            }
        }
        let ctx = EditContext {
            wc_root: anchor.clone(),
            anchor,
            target,
            target_revision: Cell::new(0),
            config,
            repos_root,
            repos_uuid,
            collaborators,
            skipped_trees: RefCell::new(Default::default()),
            deleted_trees: RefCell::new(Default::default()),
            root_opened: Cell::new(false),
            target_deleted: Cell::new(false),
        };
        Ok(Self { ctx: Rc::new(ctx) })
    }

    /// Record the revision this edit brings the working copy to.
    pub fn set_target_revision(&self, revision: u64) {
        self.ctx.target_revision.set(revision);
    }

    fn root_url(&self) -> anyhow::Result<String> {
        if let Some(switch) = &self.ctx.config.switch_url {
            return Ok(switch.clone());
        }
        if let Some(entry) = self.ctx.collaborators.admin.get_entry(&self.ctx.anchor, true, None)? {
            return Ok(entry.url);
        }
        Ok(self.ctx.repos_root.clone())
    }

    /// Open the edit's anchor directory (spec §4.1 `open_root`), the first
    /// call of every edit.
    #[fn_error_context::context("Opening root")]
    pub fn open_root(&self) -> anyhow::Result<Rc<DirContext>> {
        self.ctx.root_opened.set(true);
        let path = self.ctx.anchor.clone();
        let new_url = self.root_url()?;

        if self.ctx.target.is_empty() {
            let mut m = EntryMod::default();
            m.flags = ModifyFlags::REVISION | ModifyFlags::URL | ModifyFlags::INCOMPLETE;
            m.revision = Some(self.ctx.target_revision.get());
            m.url = Some(new_url.clone());
            m.incomplete = Some(true);
            self.ctx.collaborators.admin.modify_entry(&path, "", &m)?;
        }

        let existing = self.ctx.collaborators.admin.get_entry(&path, true, None)?;
        let bump = BumpNode::new_root(path.clone());
        tracing::debug!(%path, "root opened");

        Ok(Rc::new(DirContext {
            path,
            basename: String::new(),
            new_url,
            old_revision: existing.as_ref().map(|e| e.revision).unwrap_or(0),
            parent: None,
            added: false,
            unversioned_existed: Cell::new(false),
            add_existed_without_history: Cell::new(false),
            prop_changes: RefCell::new(Vec::new()),
            log_buffer: RefCell::new(LogBuffer::default()),
            log_seqno: Cell::new(0),
            ambient_depth: Cell::new(self.ctx.config.requested_depth),
            was_incomplete: existing.map(|e| e.incomplete).unwrap_or(true),
            bump,
        }))
    }

    fn flush_log(&self, dir: &Rc<DirContext>) -> anyhow::Result<()> {
        let mut buf = dir.log_buffer.borrow_mut();
        if buf.is_empty() {
            return Ok(());
        }
        let seqno = dir.log_seqno.get() + 1;
        dir.log_seqno.set(seqno);
        let commands = buf.take();
        self.ctx.collaborators.log.write_log(&dir.path, seqno, &commands)?;
        Ok(())
    }

    fn run_and_reset_log(&self, dir: &Rc<DirContext>) -> anyhow::Result<()> {
        self.flush_log(dir)?;
        self.ctx.collaborators.log.run_log(&dir.path)?;
        dir.log_seqno.set(0);
        Ok(())
    }

    /// Path-safety join + skip propagation (spec §4.1).
    fn resolve_child(&self, parent: &Rc<DirContext>, name: &str) -> anyhow::Result<Option<Utf8PathBuf>> {
        let path = wceditor_utils::join_child_safely(&parent.path, name).map_err(|_| {
            EditorError::ObstructedUpdate {
                path: parent.path.join(name),
            }
        })?;
        if self.ctx.is_skipped(&path) {
            return Ok(None);
        }
        Ok(Some(path))
    }

    /// Case (b) of the skip rule (spec §4.1): `path` itself, not merely an
    /// ancestor, is already a recorded tree-conflict victim from earlier in
    /// this edit. Skip it once, with notification (`resolve_child` handles
    /// the silent ancestor-skip case; this one is never silent).
    fn skip_already_conflicted(&self, path: &Utf8PathBuf) {
        self.ctx.mark_skipped(path.clone());
        self.ctx
            .collaborators
            .notifier
            .notify(NotifyEvent::Skip { path: path.clone() });
    }

    /// Delete `name` from `parent` (spec §4.1 `delete_entry`), running tree
    /// conflict detection first.
    #[fn_error_context::context("Deleting entry")]
    pub fn delete_entry(&self, name: &str, parent: &Rc<DirContext>) -> anyhow::Result<()> {
        let Some(path) = self.resolve_child(parent, name)? else {
            return Ok(());
        };
        let admin = &self.ctx.collaborators.admin;

        let Some(entry) = admin.get_entry(&path, true, None)? else {
            return Ok(());
        };
        if entry.depth == Depth::Exclude {
            admin.remove_entry(&path)?;
            return Ok(());
        }

        let subtree_mods = conflict::subtree_has_local_mods(admin.as_ref(), self.ctx.collaborators.pristine.as_ref(), &path)
            .unwrap_or((false, true));
        let local = LocalState {
            schedule: entry.schedule,
            locally_modified: entry.schedule != Schedule::Normal || subtree_mods.0,
            all_mods_are_deletes: entry.schedule == Schedule::Delete || subtree_mods.1,
        };

        let reason = conflict::detect(
            &path,
            IncomingAction::Delete,
            if entry.kind == NodeKind::Dir {
                IncomingKind::Dir
            } else {
                IncomingKind::File
            },
            true,
            local,
            entry.tree_conflict.is_some(),
            false,
            ConflictSide {
                url: Some(entry.url.clone()),
                revision: Some(entry.revision),
                kind: Some(entry.kind),
            },
            ConflictSide {
                url: Some(format!("{}/{name}", parent.new_url.trim_end_matches('/'))),
                revision: Some(self.ctx.target_revision.get()),
                kind: Some(NodeKind::Unknown),
            },
        );

        if let Some(conflict) = reason {
            self.record_conflict(parent, name, &conflict)?;
            match conflict.reason {
                crate::conflict::ConflictReason::Edited => {
                    self.run_and_reset_log(parent)?;
                    reschedule::reschedule_for_readd(
                        admin.as_ref(),
                        &path,
                        &entry.url,
                        &entry.url,
                        entry.revision,
                        true,
                    )?;
                    self.ctx.mark_skipped(path.clone());
                    return Ok(());
                }
                crate::conflict::ConflictReason::Replaced => {
                    self.run_and_reset_log(parent)?;
                    reschedule::reschedule_for_readd(
                        admin.as_ref(),
                        &path,
                        &entry.url,
                        &entry.url,
                        entry.revision,
                        false,
                    )?;
                    self.ctx.mark_skipped(path.clone());
                    return Ok(());
                }
                crate::conflict::ConflictReason::Deleted => {
                    // Fall through to normal deletion; the conflict marker
                    // was already recorded above.
                }
                crate::conflict::ConflictReason::Added => {}
            }
        }

        parent
            .log_buffer
            .borrow_mut()
            .append_atomic([LoggyCommand::DeleteEntry {
                dir: parent.path.clone(),
                name: name.to_string(),
            }]);

        if path == self.ctx.target_path() {
            let mut stub = EntryMod::default();
            stub.flags = ModifyFlags::REVISION | ModifyFlags::DELETED | ModifyFlags::KIND;
            stub.revision = Some(self.ctx.target_revision.get());
            stub.deleted = Some(true);
            stub.kind = Some(entry.kind);
            parent.log_buffer.borrow_mut().append_atomic([LoggyCommand::EntryModify {
                dir: parent.path.clone(),
                name: name.to_string(),
                fields: stub,
            }]);
            self.ctx.target_deleted.set(true);
        }

        if self.ctx.config.switch_url.is_some() && entry.kind == NodeKind::Dir {
            admin.remove_entry(&path)?;
        }

        self.run_and_reset_log(parent)?;
        self.ctx
            .collaborators
            .notifier
            .notify(NotifyEvent::UpdateDelete { path });
        Ok(())
    }

    fn record_conflict(&self, parent: &Rc<DirContext>, name: &str, conflict: &TreeConflict) -> anyhow::Result<()> {
        parent
            .log_buffer
            .borrow_mut()
            .append_atomic([LoggyCommand::AddTreeConflict {
                dir: parent.path.clone(),
                name: name.to_string(),
                description: conflict.to_description_string(),
            }]);
        self.ctx
            .collaborators
            .notifier
            .notify(NotifyEvent::TreeConflict {
                path: conflict.path.clone(),
            });
        Ok(())
    }

    /// Add a new directory named `name` under `parent` (spec §4.2
    /// `add_directory`). Returns `None` if the path was skipped.
    #[fn_error_context::context("Adding directory")]
    pub fn add_directory(
        &self,
        name: &str,
        parent: &Rc<DirContext>,
        copyfrom: Option<CopyFromRequest>,
    ) -> anyhow::Result<Option<Rc<DirContext>>> {
        if copyfrom.is_some() {
            return Err(EditorError::UnsupportedFeature(
                "copy-from within add_directory is not implemented".to_string(),
            )
            .into());
        }

        let Some(path) = self.resolve_child(parent, name)? else {
            return Ok(None);
        };
        self.flush_log(parent)?;

        let admin = &self.ctx.collaborators.admin;
        if path.exists() && admin.get_entry(&path, false, None)?.is_none() {
            if path.is_file() {
                return Err(EditorError::ObstructedUpdate { path }.into());
            }
            if !self.ctx.config.allow_unver_obstructions {
                return Err(EditorError::ObstructedUpdate { path }.into());
            }
        }

        let mut add_existed = false;
        if let Some(existing) = admin.get_entry(&path, true, Some(NodeKind::Dir))? {
            if existing.repos_uuid != self.ctx.repos_uuid {
                return Err(EditorError::ObstructedUpdate { path }.into());
            }
            if existing.schedule == Schedule::Add && existing.copyfrom.is_none() {
                add_existed = true;
            } else if existing.tree_conflict.is_some() {
                self.skip_already_conflicted(&path);
                return Ok(None);
            } else {
                return Err(EditorError::ObstructedUpdate { path }.into());
            }
        }

        if name == wceditor_utils::ADMIN_DIR_NAME {
            return Err(EditorError::ObstructedUpdate { path }.into());
        }

        let new_url = format!("{}/{name}", parent.new_url.trim_end_matches('/'));
        let ambient_depth = crate::depth::infer_child_ambient(self.ctx.config.requested_depth, parent.ambient_depth.get());

        admin.ensure_admin(
            &path,
            self.ctx.repos_uuid,
            &new_url,
            &self.ctx.repos_root,
            self.ctx.target_revision.get(),
            ambient_depth,
        )?;

        let mut m = EntryMod::default();
        m.flags = ModifyFlags::KIND | ModifyFlags::DELETED | ModifyFlags::ABSENT;
        m.kind = Some(NodeKind::Dir);
        m.deleted = Some(false);
        m.absent = Some(false);
        if add_existed {
            m.flags = m.flags | ModifyFlags::SCHEDULE | ModifyFlags::REVISION;
            m.schedule = Some(Schedule::Normal);
            m.revision = Some(self.ctx.target_revision.get());
        }
        if self.ctx.deleted_trees.borrow().iter().any(|d| path.starts_with(d)) {
            m.flags = m.flags | ModifyFlags::SCHEDULE;
            m.schedule = Some(Schedule::Delete);
        }
        admin.modify_entry(&parent.path, name, &m)?;

        self.ctx.collaborators.notifier.notify(if add_existed {
            NotifyEvent::Exists { path: path.clone() }
        } else {
            NotifyEvent::UpdateAdd { path: path.clone() }
        });

        let bump = BumpNode::new_child(&parent.bump, path.clone());
        Ok(Some(Rc::new(DirContext {
            path,
            basename: name.to_string(),
            new_url,
            old_revision: 0,
            parent: Some(parent.clone()),
            added: true,
            unversioned_existed: Cell::new(false),
            add_existed_without_history: Cell::new(add_existed),
            prop_changes: RefCell::new(Vec::new()),
            log_buffer: RefCell::new(LogBuffer::default()),
            log_seqno: Cell::new(0),
            ambient_depth: Cell::new(ambient_depth),
            was_incomplete: true,
            bump,
        })))
    }

    /// Open an existing directory named `name` under `parent` (spec §4.3
    /// `open_directory`), running tree conflict detection first. Returns
    /// `None` if the path was skipped.
    #[fn_error_context::context("Opening directory")]
    pub fn open_directory(
        &self,
        name: &str,
        parent: &Rc<DirContext>,
        base_revision: u64,
    ) -> anyhow::Result<Option<Rc<DirContext>>> {
        let Some(path) = self.resolve_child(parent, name)? else {
            return Ok(None);
        };
        self.flush_log(parent)?;

        let admin = &self.ctx.collaborators.admin;
        let existing = admin.get_entry(&path, true, None)?;
        if existing.as_ref().map(|e| e.tree_conflict.is_some()).unwrap_or(false) {
            self.skip_already_conflicted(&path);
            return Ok(None);
        }

        let (old_revision, was_incomplete, schedule) = existing
            .as_ref()
            .map(|e| (e.revision, e.incomplete, e.schedule))
            .unwrap_or((base_revision, true, Schedule::Normal));

        let local = LocalState {
            schedule,
            locally_modified: schedule != Schedule::Normal,
            all_mods_are_deletes: schedule == Schedule::Delete,
        };
        let conflict = conflict::detect(
            &path,
            IncomingAction::Edit,
            IncomingKind::Dir,
            existing.is_some(),
            local,
            false,
            false,
            ConflictSide::default(),
            ConflictSide::default(),
        );

        if let Some(conflict) = &conflict {
            self.record_conflict(parent, name, conflict)?;
            if matches!(
                conflict.reason,
                crate::conflict::ConflictReason::Deleted | crate::conflict::ConflictReason::Replaced
            ) {
                self.ctx.mark_deleted_tree(path.clone());
            }
        }

        let new_url = format!("{}/{name}", parent.new_url.trim_end_matches('/'));
        let mut m = EntryMod::default();
        m.flags = ModifyFlags::REVISION | ModifyFlags::URL | ModifyFlags::INCOMPLETE;
        m.revision = Some(self.ctx.target_revision.get());
        m.url = Some(new_url.clone());
        m.incomplete = Some(true);
        admin.modify_entry(&parent.path, name, &m)?;

        let bump = BumpNode::new_child(&parent.bump, path.clone());
        let ambient_depth =
            crate::depth::infer_child_ambient(self.ctx.config.requested_depth, parent.ambient_depth.get());
        Ok(Some(Rc::new(DirContext {
            path,
            basename: name.to_string(),
            new_url,
            old_revision,
            parent: Some(parent.clone()),
            added: false,
            unversioned_existed: Cell::new(false),
            add_existed_without_history: Cell::new(false),
            prop_changes: RefCell::new(Vec::new()),
            log_buffer: RefCell::new(LogBuffer::default()),
            log_seqno: Cell::new(0),
            ambient_depth: Cell::new(ambient_depth),
            was_incomplete,
            bump,
        })))
    }

    /// Queue a directory property change, flushed at `close_directory`.
    pub fn change_dir_prop(&self, dir: &Rc<DirContext>, change: PropChange) {
        dir.prop_changes.borrow_mut().push(change);
    }

    /// Record that `name` under `parent` is absent (spec §4.1
    /// `absent_file`): known to exist in the repository but withheld from
    /// this working copy.
    pub fn absent_file(&self, name: &str, parent: &Rc<DirContext>) -> anyhow::Result<()> {
        self.absent_node(name, parent, NodeKind::File)
    }

    /// Directory counterpart of [`Editor::absent_file`] (spec §4.1
    /// `absent_directory`).
    pub fn absent_directory(&self, name: &str, parent: &Rc<DirContext>) -> anyhow::Result<()> {
        self.absent_node(name, parent, NodeKind::Dir)
    }

    fn absent_node(&self, name: &str, parent: &Rc<DirContext>, kind: NodeKind) -> anyhow::Result<()> {
        let Some(path) = self.resolve_child(parent, name)? else {
            return Ok(());
        };
        if let Some(existing) = self.ctx.collaborators.admin.get_entry(&path, true, None)? {
            if existing.schedule == Schedule::Add {
                return Err(EditorError::ObstructedUpdate { path }.into());
            }
        }
        let mut m = EntryMod::default();
        m.flags = ModifyFlags::KIND | ModifyFlags::REVISION | ModifyFlags::ABSENT | ModifyFlags::DELETED;
        m.kind = Some(kind);
        m.revision = Some(self.ctx.target_revision.get());
        m.absent = Some(true);
        m.deleted = Some(false);
        self.ctx.collaborators.admin.modify_entry(&parent.path, name, &m)
    }

    /// Add a new file named `name` under `parent` (spec §4.4.1
    /// `add_file`), resolving copy-from history if present. Returns `None`
    /// if the path was skipped.
    #[fn_error_context::context("Adding file")]
    pub fn add_file(
        &self,
        name: &str,
        parent: &Rc<DirContext>,
        copyfrom: Option<CopyFromRequest>,
    ) -> anyhow::Result<Option<Rc<FileContext>>> {
        let Some(path) = self.resolve_child(parent, name)? else {
            return Ok(None);
        };

        let admin = self.ctx.collaborators.admin.as_ref();
        if path.exists() && admin.get_entry(&path, false, None)?.is_none() && !self.ctx.config.allow_unver_obstructions
        {
            return Err(EditorError::ObstructedUpdate { path }.into());
        }

        let mut add_existed = false;
        if let Some(existing) = admin.get_entry(&path, true, Some(NodeKind::File))? {
            if existing.repos_uuid != self.ctx.repos_uuid {
                return Err(EditorError::ObstructedUpdate { path }.into());
            }
            if existing.schedule == Schedule::Add && existing.copyfrom.is_none() {
                add_existed = true;
            } else if existing.tree_conflict.is_some() {
                self.skip_already_conflicted(&path);
                return Ok(None);
            } else {
                return Err(EditorError::ObstructedUpdate { path }.into());
            }
        }

        let new_url = format!("{}/{name}", parent.new_url.trim_end_matches('/'));
        let mut added_with_history = false;
        let mut copied_base_path = None;
        let mut copied_base_checksum = None;
        let mut copied_working_path = None;

        if let Some(request) = &copyfrom {
            let candidate = copyfrom::locate(
                admin,
                self.ctx.collaborators.pristine.as_ref(),
                &self.ctx.repos_root,
                self.ctx.repos_uuid,
                &parent.path,
                &parent.new_url,
                request,
            )?;
            if let Some(candidate) = candidate {
                let tmp = wceditor_admin::pristine::write_temp(
                    &self.ctx.wc_root,
                    &format!("{name}.copyfrom-base"),
                    &candidate.base_pristine,
                )?;
                copied_base_checksum = Some(wceditor_admin::pristine::Checksum::of(&candidate.base_pristine));
                copied_base_path = Some(tmp);
                if let Some(working) = &candidate.working_override {
                    copied_working_path = Some(wceditor_admin::pristine::write_temp(
                        &self.ctx.wc_root,
                        &format!("{name}.copyfrom-working"),
                        working,
                    )?);
                }
                added_with_history = true;
            } else {
                let mut sink = Vec::new();
                self.ctx
                    .collaborators
                    .fetch
                    .fetch(camino::Utf8Path::new(&request.copyfrom_path), request.copyfrom_rev, &mut sink)?;
                let tmp = wceditor_admin::pristine::write_temp(
                    &self.ctx.wc_root,
                    &format!("{name}.fetched-base"),
                    &sink,
                )?;
                copied_base_checksum = Some(wceditor_admin::pristine::Checksum::of(&sink));
                copied_base_path = Some(tmp);
                added_with_history = true;
            }
        }

        let bump = BumpNode::new_child(&parent.bump, path.clone());
        Ok(Some(Rc::new(FileContext {
            path,
            basename: name.to_string(),
            new_url,
            old_revision: 0,
            added: true,
            added_with_history,
            skipped: Cell::new(false),
            unversioned_existed: Cell::new(false),
            add_existed: Cell::new(add_existed),
            deleted_in_local_tree: Cell::new(false),
            tree_conflicted: Cell::new(false),
            incoming_text_base: RefCell::new(copied_base_path),
            incoming_checksum: RefCell::new(copied_base_checksum),
            copied_working_path: RefCell::new(copied_working_path),
            last_changed_date: RefCell::new(None),
            parent: parent.clone(),
            bump,
            prop_changes: RefCell::new(Vec::new()),
        })))
    }

    /// Open an existing file named `name` under `parent` (spec §4.4.1
    /// `open_file`). Returns `None` if the path was skipped.
    #[fn_error_context::context("Opening file")]
    pub fn open_file(
        &self,
        name: &str,
        parent: &Rc<DirContext>,
        base_revision: u64,
    ) -> anyhow::Result<Option<Rc<FileContext>>> {
        let Some(path) = self.resolve_child(parent, name)? else {
            return Ok(None);
        };
        let existing = self.ctx.collaborators.admin.get_entry(&path, true, None)?;
        if existing.as_ref().map(|e| e.tree_conflict.is_some()).unwrap_or(false) {
            self.skip_already_conflicted(&path);
            return Ok(None);
        }

        let new_url = format!("{}/{name}", parent.new_url.trim_end_matches('/'));
        let bump = BumpNode::new_child(&parent.bump, path.clone());
        Ok(Some(Rc::new(FileContext {
            path,
            basename: name.to_string(),
            new_url,
            old_revision: existing.as_ref().map(|e| e.revision).unwrap_or(base_revision),
            added: false,
            added_with_history: false,
            skipped: Cell::new(false),
            unversioned_existed: Cell::new(false),
            add_existed: Cell::new(false),
            deleted_in_local_tree: Cell::new(
                existing.as_ref().map(|e| e.schedule == Schedule::Delete).unwrap_or(false),
            ),
            tree_conflicted: Cell::new(false),
            incoming_text_base: RefCell::new(None),
            incoming_checksum: RefCell::new(None),
            copied_working_path: RefCell::new(None),
            last_changed_date: RefCell::new(None),
            parent: parent.clone(),
            bump,
            prop_changes: RefCell::new(Vec::new()),
        })))
    }

    /// Begin streaming a text delta for `file` (spec §4.4.2
    /// `apply_textdelta`), checking `base_checksum` against the source text
    /// base if supplied.
    pub fn apply_textdelta(
        &self,
        file: &Rc<FileContext>,
        base_checksum: Option<wceditor_admin::pristine::Checksum>,
    ) -> anyhow::Result<TextDeltaHandler> {
        file_ops::apply_textdelta(&self.ctx, file, base_checksum)
    }

    /// Feed one delta window's reconstructed bytes into `handler` (spec
    /// §4.4.2 `window_handler`).
    pub fn feed_window(&self, handler: &TextDeltaHandler, bytes: &[u8]) -> anyhow::Result<()> {
        file_ops::feed_window(handler, bytes)
    }

    /// Finish streaming `handler`'s delta, checking `actual_source_checksum`
    /// against what `apply_textdelta` expected (spec §4.4.2, final window).
    pub fn close_handler(
        &self,
        file: &Rc<FileContext>,
        handler: TextDeltaHandler,
        actual_source_checksum: Option<wceditor_admin::pristine::Checksum>,
    ) -> anyhow::Result<()> {
        file_ops::close_handler(file, handler, actual_source_checksum)
    }

    /// Close `file` (spec §4.5 `close_file`): merge the incoming text and
    /// properties, install the result, and bump completion tracking.
    #[fn_error_context::context("Closing file")]
    pub fn close_file(
        &self,
        dir: &Rc<DirContext>,
        file: Rc<FileContext>,
        expected_md5: Option<wceditor_admin::pristine::Checksum>,
    ) -> anyhow::Result<CloseFileOutcome> {
        let outcome = file_ops::close_file(&self.ctx, dir, &file, expected_md5)?;
        self.maybe_bump_dir_info(&file.bump)?;
        Ok(outcome)
    }

    /// Close `dir` (spec §4.6 `close_directory`): merge accumulated
    /// property changes, run its deferred log, and bump completion
    /// tracking.
    #[fn_error_context::context("Closing directory")]
    pub fn close_directory(&self, dir: Rc<DirContext>) -> anyhow::Result<()> {
        if dir.bump.skipped.get() {
            self.maybe_bump_dir_info(&dir.bump)?;
            return Ok(());
        }

        let (regular, entry_props, wc_cache) = categorize(&dir.prop_changes.borrow());
        let mut props = self.ctx.collaborators.admin.load_props(&dir.path)?;

        if dir.was_incomplete {
            for (name, _) in props.base.clone() {
                if !regular.iter().any(|c| c.name == name) {
                    props.base.remove(&name);
                }
            }
        }

        let mut externals_old = None;
        let mut externals_new = None;
        for change in &regular {
            if change.name == "svn:externals" {
                externals_old = props.working.get(&change.name).cloned();
                externals_new = change.value.clone();
            }
        }
        wceditor_admin::props::merge_regular_props(&mut props, &regular);
        self.ctx.collaborators.admin.save_props(&dir.path, &props)?;

        if externals_old.is_some() || externals_new.is_some() {
            self.ctx.collaborators.externals.changed(
                &dir.path,
                externals_old.as_deref(),
                externals_new.as_deref(),
                dir.ambient_depth.get(),
            );
        }

        if !wc_cache.is_empty() {
            let mut values = std::collections::BTreeMap::new();
            for change in &wc_cache {
                if let Some(v) = &change.value {
                    values.insert(change.name.clone(), String::from_utf8_lossy(v).to_string());
                }
            }
            self.ctx.collaborators.admin.set_dav_cache(&dir.path, "", values)?;
        }
        if !entry_props.is_empty() {
            let mut m = EntryMod::default();
            m.flags = ModifyFlags::REVISION;
            m.revision = Some(self.ctx.target_revision.get());
            self.ctx.collaborators.admin.modify_entry(&dir.path, "", &m)?;
        }

        self.run_and_reset_log(&dir)?;
        self.maybe_bump_dir_info(&dir.bump)?;

        let already_deleted_tree = self.ctx.deleted_trees.borrow().iter().any(|d| dir.path.starts_with(d));
        if !dir.added && !already_deleted_tree {
            self.ctx
                .collaborators
                .notifier
                .notify(NotifyEvent::UpdateUpdate {
                    path: dir.path.clone(),
                    content_state: wceditor_admin::notify::ContentState::Unchanged,
                });
        }
        Ok(())
    }

    fn maybe_bump_dir_info(&self, bump: &Rc<BumpNode>) -> anyhow::Result<()> {
        let count = bump.ref_count.get().saturating_sub(1);
        bump.ref_count.set(count);
        if count == 0 {
            if !bump.skipped.get() {
                self.complete_directory(&bump.path)?;
            }
            if let Some(parent) = &bump.parent {
                self.maybe_bump_dir_info(parent)?;
            }
        }
        Ok(())
    }

    /// `complete_directory` (spec §4.7).
    fn complete_directory(&self, path: &Utf8PathBuf) -> anyhow::Result<()> {
        let admin = self.ctx.collaborators.admin.as_ref();
        let entries = admin.read_entries(path)?;
        let target_revision = self.ctx.target_revision.get();

        for (name, entry) in &entries.children {
            let child_path = path.join(name);
            if entry.deleted {
                if entry.schedule == Schedule::Add {
                    let mut m = EntryMod::default();
                    m.flags = ModifyFlags::DELETED;
                    m.deleted = Some(false);
                    admin.modify_entry(path, name, &m)?;
                } else {
                    admin.remove_entry(&child_path)?;
                }
                continue;
            }
            if entry.absent && entry.revision != target_revision {
                admin.remove_entry(&child_path)?;
                continue;
            }
            if entry.kind == NodeKind::Dir
                && entry.schedule != Schedule::Add
                && !entry.absent
                && !child_path.exists()
            {
                admin.remove_entry(&child_path)?;
                self.ctx
                    .collaborators
                    .notifier
                    .notify(NotifyEvent::MissingRemoved { path: child_path });
            }
        }

        let mut m = EntryMod::default();
        m.flags = ModifyFlags::INCOMPLETE;
        m.incomplete = Some(false);
        admin.modify_entry(path, "", &m)?;
        Ok(())
    }

    /// Finish the edit (spec §4.7 `close_edit`): complete any
    /// never-closed anchor, then sweep the tree to bump every non-skipped
    /// path to the target revision.
    #[fn_error_context::context("Closing edit")]
    pub fn close_edit(&self) -> anyhow::Result<CompletionOutcome> {
        let target_path = self.ctx.target_path();
        let outcome = if !target_path.exists() && self.ctx.collaborators.admin.get_entry(&target_path, true, None)?.is_none() {
            CompletionOutcome::CheckedOut
        } else {
            CompletionOutcome::Updated
        };

        if !self.ctx.root_opened.get() {
            self.complete_directory(&self.ctx.anchor)?;
        }

        if !self.ctx.target_deleted.get() {
            self.update_cleanup_sweep()?;
        }

        Ok(outcome)
    }

    /// The update-cleanup sweep (spec §4.7 step 3): bump every non-skipped
    /// path's recorded revision to the target, rewriting URLs too on a
    /// switch.
    fn update_cleanup_sweep(&self) -> anyhow::Result<()> {
        let admin = self.ctx.collaborators.admin.as_ref();
        let target_revision = self.ctx.target_revision.get();
        let deleted_trees = self.ctx.deleted_trees.borrow().clone();
        self.ctx
            .skipped_trees
            .borrow_mut()
            .retain(|p| !deleted_trees.contains(p));

        self.sweep_dir(admin, &self.ctx.anchor, target_revision)
    }

    fn sweep_dir(&self, admin: &dyn AdminStore, dir: &Utf8PathBuf, target_revision: u64) -> anyhow::Result<()> {
        if self.ctx.is_skipped(dir) {
            return Ok(());
        }
        let entries = admin.read_entries(dir)?;
        for (name, entry) in &entries.children {
            let child_path = dir.join(name);
            if self.ctx.is_skipped(&child_path) {
                continue;
            }
            let mut m = EntryMod::default();
            m.flags = ModifyFlags::REVISION;
            m.revision = Some(target_revision);
            if let Some(switch) = &self.ctx.config.switch_url {
                m.flags = m.flags | ModifyFlags::URL;
                m.url = Some(format!("{}/{name}", switch.trim_end_matches('/')));
            }
            admin.modify_entry(dir, name, &m)?;
            if entry.kind == NodeKind::Dir {
                self.sweep_dir(admin, &child_path, target_revision)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wceditor_admin::fetch::UnavailableFetch;
    use wceditor_admin::conflict_resolver::PostponingResolver;
    use wceditor_admin::externals::NullExternalsSink;
    use wceditor_admin::fs_store::FsAdminStore;
    use wceditor_admin::log::LogEngine;
    use wceditor_admin::notify::RecordingNotifier;
    use wceditor_admin::pristine::{Checksum, FsPristineStore, PristineStore};
    use wceditor_admin::translate::IdentityTranslation;

    fn make_editor(wc_root: &Utf8PathBuf, target: &str) -> (Editor, Rc<RecordingNotifier>) {
        let admin_store = Rc::new(FsAdminStore::new(wc_root.clone()));
        let admin: Rc<dyn AdminStore> = admin_store.clone();
        let log: Rc<dyn LogEngine> = admin_store.clone();
        let notifier = Rc::new(RecordingNotifier::default());

        let collaborators = Collaborators {
            admin,
            log,
            pristine: Rc::new(FsPristineStore { wc_root: wc_root.clone() }),
            notifier: notifier.clone(),
            fetch: Rc::new(UnavailableFetch),
            resolver: Rc::new(PostponingResolver),
            externals: Rc::new(NullExternalsSink),
            translation: Rc::new(IdentityTranslation),
        };

        let editor = Editor::new(
            wc_root.clone(),
            target.to_string(),
            EditorConfig::default(),
            "file:///repo".to_string(),
            uuid::Uuid::nil(),
            collaborators,
        )
        .unwrap();
        editor.set_target_revision(1);
        (editor, notifier)
    }

    fn tmp_wc_root() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, root)
    }

    #[test]
    fn checkout_adds_directory_and_file_end_to_end() {
        let (_tmp, wc_root) = tmp_wc_root();
        let (editor, notifier) = make_editor(&wc_root, "");

        let root = editor.open_root().unwrap();
        let sub = editor.add_directory("sub", &root, None).unwrap().unwrap();
        let file = editor.add_file("a.txt", &sub, None).unwrap().unwrap();

        let handler = editor.apply_textdelta(&file, None).unwrap();
        editor.feed_window(&handler, b"hello world").unwrap();
        editor.close_handler(&file, handler, None).unwrap();

        let outcome = editor.close_file(&sub, file, None).unwrap();
        assert_eq!(outcome, CloseFileOutcome::Unchanged);

        editor.close_directory(sub).unwrap();
        editor.close_directory(root).unwrap();
        editor.close_edit().unwrap();

        assert_eq!(
            std::fs::read_to_string(wc_root.join("sub").join("a.txt")).unwrap(),
            "hello world"
        );

        let events = notifier.events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(
            e,
            NotifyEvent::UpdateAdd { path } if path.as_str().ends_with("sub")
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            NotifyEvent::UpdateAdd { path } if path.as_str().ends_with("a.txt")
        )));
    }

    #[test]
    fn delete_entry_on_locally_modified_subtree_reschedules_for_readd() {
        let (_tmp, wc_root) = tmp_wc_root();
        let (editor, notifier) = make_editor(&wc_root, "");
        let admin = editor.ctx.collaborators.admin.as_ref();

        admin
            .ensure_admin(&wc_root, uuid::Uuid::nil(), "file:///repo", "file:///repo", 0, Depth::Infinity)
            .unwrap();

        let conflictdir = wc_root.join("conflictdir");
        let mut reg = EntryMod::default();
        reg.flags = ModifyFlags::KIND | ModifyFlags::SCHEDULE | ModifyFlags::REVISION | ModifyFlags::URL;
        reg.kind = Some(NodeKind::Dir);
        reg.schedule = Some(Schedule::Normal);
        reg.revision = Some(0);
        reg.url = Some("file:///repo/conflictdir".to_string());
        admin.modify_entry(&wc_root, "conflictdir", &reg).unwrap();

        // A locally queued add inside the directory: an uncommitted local
        // modification the incoming delete must not silently discard.
        let mut child = EntryMod::default();
        child.flags = ModifyFlags::KIND | ModifyFlags::SCHEDULE;
        child.kind = Some(NodeKind::File);
        child.schedule = Some(Schedule::Add);
        admin.modify_entry(&conflictdir, "added_child.txt", &child).unwrap();

        let root = editor.open_root().unwrap();
        editor.delete_entry("conflictdir", &root).unwrap();

        let entry = admin.get_entry(&conflictdir, true, None).unwrap().unwrap();
        assert_eq!(entry.schedule, Schedule::Add);
        assert!(entry.copied);
        assert!(entry.copyfrom.is_some());

        let events = notifier.events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(e, NotifyEvent::TreeConflict { .. })));
        assert!(!events.iter().any(|e| matches!(e, NotifyEvent::UpdateDelete { .. })));
    }

    #[test]
    fn close_edit_reports_checked_out_when_target_child_never_materializes() {
        let (_tmp, wc_root) = tmp_wc_root();
        let (editor, _notifier) = make_editor(&wc_root, "newdir");

        let root = editor.open_root().unwrap();
        editor.close_directory(root).unwrap();
        let outcome = editor.close_edit().unwrap();
        assert_eq!(outcome, CompletionOutcome::CheckedOut);
    }

    #[test]
    fn close_edit_reports_updated_when_target_already_exists() {
        let (_tmp, wc_root) = tmp_wc_root();
        let (editor, _notifier) = make_editor(&wc_root, "");

        let root = editor.open_root().unwrap();
        editor.close_directory(root).unwrap();
        let outcome = editor.close_edit().unwrap();
        assert_eq!(outcome, CompletionOutcome::Updated);
    }

    #[test]
    fn close_file_performs_a_clean_three_way_merge() {
        let (_tmp, wc_root) = tmp_wc_root();
        let (editor, _notifier) = make_editor(&wc_root, "");
        let admin = editor.ctx.collaborators.admin.clone();

        admin
            .ensure_admin(&wc_root, uuid::Uuid::nil(), "file:///repo", "file:///repo", 0, Depth::Infinity)
            .unwrap();
        let mut reg = EntryMod::default();
        reg.flags = ModifyFlags::KIND | ModifyFlags::SCHEDULE | ModifyFlags::REVISION | ModifyFlags::URL;
        reg.kind = Some(NodeKind::File);
        reg.schedule = Some(Schedule::Normal);
        reg.revision = Some(0);
        reg.url = Some("file:///repo/file.txt".to_string());
        admin.modify_entry(&wc_root, "file.txt", &reg).unwrap();

        let file_path = wc_root.join("file.txt");
        let pristine = FsPristineStore { wc_root: wc_root.clone() };
        let base_path = pristine.text_base_path(&file_path, false);
        std::fs::create_dir_all(base_path.parent().unwrap()).unwrap();
        std::fs::write(&base_path, b"line1\nline2\nline3").unwrap();
        std::fs::write(&file_path, b"line1\nLOCAL\nline3").unwrap();

        let incoming = b"line1\nline2\nINCOMING";
        let new_base_path =
            wceditor_admin::pristine::write_temp(&wc_root, "file.txt.new-base", incoming).unwrap();

        let root_bump = BumpNode::new_root(wc_root.clone());
        let dir_ctx = Rc::new(DirContext {
            path: wc_root.clone(),
            basename: String::new(),
            new_url: "file:///repo".to_string(),
            old_revision: 0,
            parent: None,
            added: false,
            unversioned_existed: Cell::new(false),
            add_existed_without_history: Cell::new(false),
            prop_changes: RefCell::new(Vec::new()),
            log_buffer: RefCell::new(LogBuffer::default()),
            log_seqno: Cell::new(0),
            ambient_depth: Cell::new(Depth::Infinity),
            was_incomplete: false,
            bump: root_bump,
        });
        let file_bump = BumpNode::new_child(&dir_ctx.bump, file_path.clone());
        let file = Rc::new(FileContext {
            path: file_path.clone(),
            basename: "file.txt".to_string(),
            new_url: "file:///repo/file.txt".to_string(),
            old_revision: 0,
            added: false,
            added_with_history: false,
            skipped: Cell::new(false),
            unversioned_existed: Cell::new(false),
            add_existed: Cell::new(false),
            deleted_in_local_tree: Cell::new(false),
            tree_conflicted: Cell::new(false),
            incoming_text_base: RefCell::new(Some(new_base_path)),
            incoming_checksum: RefCell::new(Some(Checksum::of(incoming))),
            copied_working_path: RefCell::new(None),
            last_changed_date: RefCell::new(None),
            parent: dir_ctx.clone(),
            bump: file_bump,
            prop_changes: RefCell::new(Vec::new()),
        });

        let outcome = editor.close_file(&dir_ctx, file, None).unwrap();
        assert_eq!(outcome, CloseFileOutcome::Merged);
        assert_eq!(
            std::fs::read_to_string(&file_path).unwrap(),
            "line1\nLOCAL\nINCOMING\n"
        );
    }

    #[test]
    fn invalid_switch_url_outside_repository_root_is_rejected() {
        let (_tmp, wc_root) = tmp_wc_root();
        let admin_store = Rc::new(FsAdminStore::new(wc_root.clone()));
        let admin: Rc<dyn AdminStore> = admin_store.clone();
        let log: Rc<dyn LogEngine> = admin_store.clone();
        let collaborators = Collaborators {
            admin,
            log,
            pristine: Rc::new(FsPristineStore { wc_root: wc_root.clone() }),
            notifier: Rc::new(RecordingNotifier::default()),
            fetch: Rc::new(UnavailableFetch),
            resolver: Rc::new(PostponingResolver),
            externals: Rc::new(NullExternalsSink),
            translation: Rc::new(IdentityTranslation),
        };
        let mut config = EditorConfig::default();
        config.switch_url = Some("file:///other-repo/sub".to_string());

        let result = Editor::new(
            wc_root,
            String::new(),
            config,
            "file:///repo".to_string(),
            uuid::Uuid::nil(),
            collaborators,
        );
        assert!(result.is_err());
    }
}
