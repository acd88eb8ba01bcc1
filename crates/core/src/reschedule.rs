//! Rescheduling a locally modified subtree for re-add after a remote delete
//! hits it (spec §4.2.1). Mutates entries directly rather than through the
//! log: the walk spans multiple directories, and loggy semantics is scoped
//! to a single directory (spec §9 "Deferred mutations vs direct
//! mutations").

use camino::Utf8PathBuf;
use wceditor_admin::entries::{AdminStore, CopyFrom, EntryMod, ModifyFlags, NodeKind, Schedule};

/// Reschedule the subtree rooted at `path` for re-add, preserving local
/// content. `old_url`/`old_rev` become the copyfrom source when
/// `preserve_copyfrom` is set (the "edited" case preserves history; the
/// "replaced" case does not, per spec §4.2 steps 4-5).
pub fn reschedule_for_readd(
    admin: &dyn AdminStore,
    path: &Utf8PathBuf,
    new_url: &str,
    old_url: &str,
    old_rev: u64,
    preserve_copyfrom: bool,
) -> anyhow::Result<()> {
    let dir = path
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| path.clone());
    let name = path.file_name().unwrap_or_default().to_string();

    let mut root_mod = EntryMod::default();
    root_mod.flags = ModifyFlags::SCHEDULE | ModifyFlags::URL | ModifyFlags::DELETED;
    root_mod.schedule = Some(Schedule::Add);
    root_mod.url = Some(new_url.to_string());
    root_mod.deleted = Some(false);
    if preserve_copyfrom {
        root_mod.flags = root_mod.flags | ModifyFlags::COPIED | ModifyFlags::COPYFROM;
        root_mod.copied = Some(true);
        root_mod.copyfrom = Some(Some(CopyFrom {
            url: old_url.to_string(),
            revision: old_rev,
        }));
    }
    admin.modify_entry(&dir, &name, &root_mod)?;

    mark_descendants_copied(admin, path)
}

fn mark_descendants_copied(admin: &dyn AdminStore, dir: &Utf8PathBuf) -> anyhow::Result<()> {
    let entries = admin.read_entries(dir)?;
    for (name, entry) in &entries.children {
        if entry.schedule != Schedule::Normal {
            continue;
        }
        let mut m = EntryMod::default();
        m.flags = ModifyFlags::COPIED;
        m.copied = Some(true);
        admin.modify_entry(dir, name, &m)?;

        if entry.kind == NodeKind::Dir {
            let child_path = dir.join(name);
            let mut this_dir_mod = EntryMod::default();
            this_dir_mod.flags = ModifyFlags::COPIED;
            this_dir_mod.copied = Some(true);
            admin.modify_entry(&child_path, "", &this_dir_mod)?;
            mark_descendants_copied(admin, &child_path)?;
        }
    }
    Ok(())
}
