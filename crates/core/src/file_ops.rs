//! File add/open/apply-delta/close (spec §4.4, §4.4.2, §4.5).

use std::cell::RefCell;
use std::rc::Rc;

use wceditor_admin::entries::{EntryMod, ModifyFlags, NodeKind, Schedule};
use wceditor_admin::log::LoggyCommand;
use wceditor_admin::merge::{LineMerge, MergeOutcome, TextMerge};
use wceditor_admin::notify::{ContentState, NotifyEvent};
use wceditor_admin::pristine::{Checksum, ChecksumStream};
use wceditor_admin::props::{categorize, entry_prop, PropChange};

use crate::context::{DirContext, EditContext, FileContext, HandlerContext};
use crate::error::EditorError;

/// The handler returned by `apply_textdelta` (spec §4.4.2 step 7, §12
/// "window_handler short-circuit"). A skipped file gets [`Self::Null`]
/// rather than an `Option`, so callers never special-case it.
#[derive(Debug)]
pub enum TextDeltaHandler {
    /// No delta is being applied; the file was skipped.
    Null,
    /// An active delta stream, writing into a temporary pristine file.
    Active(RefCell<HandlerContext>),
}

/// Open a temp writable pristine and start the checksum-verifying handler
/// (spec §4.4.2 steps 1-6).
pub fn apply_textdelta(
    edit: &EditContext,
    file: &Rc<FileContext>,
    base_checksum: Option<Checksum>,
) -> anyhow::Result<TextDeltaHandler> {
    if file.skipped.get() {
        return Ok(TextDeltaHandler::Null);
    }

    let is_replace = matches!(current_schedule(edit, file)?, Some(Schedule::Replace));
    if let (Some(claimed), Some(current)) = (&base_checksum, current_pristine_checksum(edit, file)?) {
        // Skip check for replaced files (spec §4.4.2 step 4).
        if !is_replace && *claimed != current {
            return Err(EditorError::ChecksumMismatch {
                path: file.path.clone(),
                expected: claimed.to_hex(),
                actual: current.to_hex(),
            }
            .into());
        }
    }

    let (_f, work_path) = edit
        .collaborators
        .pristine
        .open_writable_base(&file.path, matches!(current_schedule(edit, file)?, Some(Schedule::Replace)))?;

    Ok(TextDeltaHandler::Active(RefCell::new(HandlerContext {
        expected_source_checksum: base_checksum,
        running_target: ChecksumStream::new(),
        work_path,
    })))
}

fn current_schedule(edit: &EditContext, file: &Rc<FileContext>) -> anyhow::Result<Option<Schedule>> {
    Ok(edit
        .collaborators
        .admin
        .get_entry(&file.path, true, None)?
        .map(|e| e.schedule))
}

fn current_pristine_checksum(edit: &EditContext, file: &Rc<FileContext>) -> anyhow::Result<Option<Checksum>> {
    Ok(edit
        .collaborators
        .admin
        .get_entry(&file.path, true, None)?
        .and_then(|e| e.checksum)
        .map(|hex| Checksum::from_hex(&hex)))
}

/// Feed one delta window's decoded bytes into the handler (spec §4.4.2
/// step 7). A no-op on [`TextDeltaHandler::Null`].
pub fn feed_window(handler: &TextDeltaHandler, bytes: &[u8]) -> anyhow::Result<()> {
    match handler {
        TextDeltaHandler::Null => Ok(()),
        TextDeltaHandler::Active(ctx) => {
            let mut ctx = ctx.borrow_mut();
            ctx.running_target.consume(bytes);
            use std::io::Write;
            let mut f = std::fs::OpenOptions::new().append(true).open(&ctx.work_path)?;
            f.write_all(bytes)?;
            Ok(())
        }
    }
}

/// Close the handler: verify the claimed source checksum, then install the
/// new pristine path/checksum into the `FileContext` (spec §4.4.2 step 7).
pub fn close_handler(
    file: &Rc<FileContext>,
    handler: TextDeltaHandler,
    actual_source_checksum: Option<Checksum>,
) -> anyhow::Result<()> {
    let TextDeltaHandler::Active(ctx) = handler else {
        return Ok(());
    };
    let ctx = ctx.into_inner();

    if let (Some(expected), Some(actual)) = (&ctx.expected_source_checksum, &actual_source_checksum) {
        if expected != actual {
            let _ = std::fs::remove_file(&ctx.work_path);
            return Err(EditorError::CorruptTextBase {
                path: file.path.clone(),
            }
            .into());
        }
    }

    let final_checksum = ctx.running_target.finish();
    *file.incoming_text_base.borrow_mut() = Some(ctx.work_path);
    *file.incoming_checksum.borrow_mut() = Some(final_checksum);
    Ok(())
}

/// What `close_file` did to the working file's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseFileOutcome {
    /// The working file was untouched (no incoming text, or it was already
    /// in sync).
    Unchanged,
    /// A clean three-way merge updated the working file.
    Merged,
    /// The three-way merge produced conflict markers.
    Conflicted,
}

impl From<CloseFileOutcome> for ContentState {
    fn from(value: CloseFileOutcome) -> Self {
        match value {
            CloseFileOutcome::Unchanged => ContentState::Unchanged,
            CloseFileOutcome::Merged => ContentState::Merged,
            CloseFileOutcome::Conflicted => ContentState::Conflicted,
        }
    }
}

/// `close_file` / `merge_file` (spec §4.5): the heart of file integration.
pub fn close_file(
    edit: &EditContext,
    dir: &Rc<DirContext>,
    file: &Rc<FileContext>,
    expected_md5: Option<Checksum>,
) -> anyhow::Result<CloseFileOutcome> {
    if let (Some(expected), Some(actual)) = (&expected_md5, &*file.incoming_checksum.borrow()) {
        if expected != actual {
            return Err(EditorError::ChecksumMismatch {
                path: file.path.clone(),
                expected: expected.to_hex(),
                actual: actual.to_hex(),
            }
            .into());
        }
    }

    let mut file_log = Vec::new();

    let mut entry_fields = EntryMod::default();
    entry_fields.flags = ModifyFlags::REVISION
        | ModifyFlags::URL
        | ModifyFlags::DELETED
        | ModifyFlags::ABSENT
        | ModifyFlags::KIND
        | ModifyFlags::TEXT_TIME
        | ModifyFlags::WORKING_SIZE;
    entry_fields.revision = Some(edit.target_revision.get());
    entry_fields.url = Some(file.new_url.clone());
    entry_fields.deleted = Some(false);
    entry_fields.absent = Some(false);
    entry_fields.kind = Some(NodeKind::File);
    // Undefined until step 8 recomputes them, matching `svn`'s "will be
    // computed if the file ends up unmodified" deferral.
    entry_fields.text_time = Some(None);
    entry_fields.working_size = Some(None);
    file_log.push(LoggyCommand::EntryModify {
        dir: dir.path.clone(),
        name: file.basename.clone(),
        fields: entry_fields,
    });

    let (regular, entry_props, wc_cache) = categorize(&file.prop_changes.borrow());
    let mut props = edit.collaborators.admin.load_props(&file.path)?;
    let prop_outcomes = wceditor_admin::props::merge_regular_props(&mut props, &regular);
    edit.collaborators.admin.save_props(&file.path, &props)?;

    for change in &entry_props {
        if change.name == entry_prop::LOCK_TOKEN && change.is_deletion() {
            file_log.push(LoggyCommand::DeleteLock {
                dir: dir.path.clone(),
                name: file.basename.clone(),
            });
        } else if change.name == entry_prop::LAST_CHANGED_DATE {
            if let Some(value) = &change.value {
                *file.last_changed_date.borrow_mut() = Some(String::from_utf8_lossy(value).to_string());
            }
        }
    }
    if !wc_cache.is_empty() {
        let mut values = std::collections::BTreeMap::new();
        for change in &wc_cache {
            if let Some(v) = &change.value {
                values.insert(change.name.clone(), String::from_utf8_lossy(v).to_string());
            }
        }
        edit.collaborators
            .admin
            .set_dav_cache(&file.path, &file.basename, values)?;
    }

    let new_base = file.incoming_text_base.borrow().clone();
    let schedule = edit
        .collaborators
        .admin
        .get_entry(&file.path, true, None)?
        .map(|e| e.schedule)
        .unwrap_or(Schedule::Normal);
    let working_exists = file.path.exists();
    let locally_modified = working_exists
        && edit
            .collaborators
            .pristine
            .get_pristine(&file.path)
            .map(|base| std::fs::read(&file.path).map(|w| w != base).unwrap_or(false))
            .unwrap_or(false);

    let mut outcome = CloseFileOutcome::Unchanged;

    if let Some(new_base_path) = &new_base {
        let dest = edit.collaborators.pristine.text_base_path(&file.path, false);
        let checksum = file
            .incoming_checksum
            .borrow()
            .clone()
            .unwrap_or_else(|| Checksum::of(&[]));

        file_log.push(LoggyCommand::Move {
            src: new_base_path.clone(),
            dst: dest.clone(),
        });
        file_log.push(LoggyCommand::SetReadonly { path: dest });

        let mut checksum_fields = EntryMod::default();
        checksum_fields.flags = ModifyFlags::CHECKSUM;
        checksum_fields.checksum = Some(Some(checksum.to_hex()));
        file_log.push(LoggyCommand::EntryModify {
            dir: dir.path.clone(),
            name: file.basename.clone(),
            fields: checksum_fields,
        });

        match schedule {
            Schedule::Replace => {
                // install new text-base only; working file untouched.
            }
            _ if file.deleted_in_local_tree.get() => {
                // install text-base only.
            }
            _ if !working_exists && !file.added_with_history => {
                file_log.push(LoggyCommand::Copy {
                    src: new_base_path.clone(),
                    dst: file.path.clone(),
                });
            }
            _ if file.unversioned_existed.get() || file.add_existed.get() => {
                // leave working file alone.
            }
            _ if !locally_modified => {
                file_log.push(LoggyCommand::Copy {
                    src: new_base_path.clone(),
                    dst: file.path.clone(),
                });
            }
            _ => {
                let old_base = edit
                    .collaborators
                    .pristine
                    .get_pristine(&file.path)
                    .unwrap_or_default();
                let new_bytes = std::fs::read(new_base_path).unwrap_or_default();
                let working_bytes = std::fs::read(&file.path).unwrap_or_default();
                match LineMerge.merge(&old_base, &new_bytes, &working_bytes)? {
                    MergeOutcome::Clean(merged) => {
                        std::fs::write(&file.path, merged)?;
                        outcome = CloseFileOutcome::Merged;
                    }
                    MergeOutcome::Conflicted { merged_with_markers } => {
                        std::fs::write(&file.path, merged_with_markers)?;
                        outcome = CloseFileOutcome::Conflicted;
                    }
                }
            }
        }
    } else if wceditor_admin::translate::needs_translation(&props.working) {
        let detranslated = edit
            .collaborators
            .translation
            .detranslate(&std::fs::read(&file.path).unwrap_or_default(), &props.working);
        let tmp = wceditor_admin::pristine::write_temp(
            &edit.wc_root,
            &format!("{}.retranslate", file.basename),
            &detranslated,
        )?;
        file_log.push(LoggyCommand::Move {
            src: tmp,
            dst: file.path.clone(),
        });
    }

    if prop_outcomes
        .iter()
        .any(|o| matches!(o, wceditor_admin::props::PropMergeOutcome::Conflicted { .. }))
        && outcome == CloseFileOutcome::Unchanged
    {
        outcome = CloseFileOutcome::Conflicted;
    }

    if file.deleted_in_local_tree.get() && schedule != Schedule::Replace {
        let mut redelete = EntryMod::default();
        redelete.flags = ModifyFlags::SCHEDULE;
        redelete.schedule = Some(Schedule::Delete);
        file_log.push(LoggyCommand::EntryModify {
            dir: dir.path.clone(),
            name: file.basename.clone(),
            fields: redelete,
        });
    } else {
        file_log.push(LoggyCommand::SetWorkingSize {
            dir: dir.path.clone(),
            name: file.basename.clone(),
        });
        let unix_seconds = file
            .last_changed_date
            .borrow()
            .as_deref()
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or_else(|| {
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or(0)
            });
        file_log.push(LoggyCommand::SetTimestamp {
            path: file.path.clone(),
            unix_seconds,
        });
    }

    dir.log_buffer.borrow_mut().append_atomic(file_log);
    edit.collaborators.notifier.notify(if file.added {
        NotifyEvent::UpdateAdd { path: file.path.clone() }
    } else {
        NotifyEvent::UpdateUpdate {
            path: file.path.clone(),
            content_state: outcome.into(),
        }
    });

    Ok(outcome)
}

/// Record a property change on a file context (spec §4.1
/// `change_file_prop`); a no-op on skipped contexts.
pub fn change_file_prop(file: &Rc<FileContext>, change: PropChange) {
    if file.skipped.get() {
        return;
    }
    file.prop_changes.borrow_mut().push(change);
}
