//! The copy-from locator (spec §4.4.1): given a remote copy-from source,
//! find a local node whose pristine content is known to be identical, so
//! `add_file(copyfrom=...)` can avoid a network fetch.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use wceditor_admin::entries::{AdminStore, Entry, NodeKind};
use wceditor_admin::pristine::PristineStore;

/// A remote copy-from source to resolve against local candidates.
#[derive(Debug, Clone)]
pub struct CopyFromRequest {
    /// Repository-relative source path.
    pub copyfrom_path: String,
    /// Source revision.
    pub copyfrom_rev: u64,
}

/// A local node whose content can stand in for a remote copy-from source.
#[derive(Debug, Clone)]
pub struct CopyFromCandidate {
    /// The candidate's base pristine bytes.
    pub base_pristine: Vec<u8>,
    /// Set if the candidate has local text modifications; the working text
    /// is snapshotted separately from its base pristine (spec §4.4 "also
    /// copy the working text into a separate temporary").
    pub working_override: Option<Vec<u8>>,
    /// The candidate's base regular properties.
    pub base_props: BTreeMap<String, Vec<u8>>,
    /// The candidate's working regular properties.
    pub working_props: BTreeMap<String, Vec<u8>>,
}

/// Number of path components that must be walked upward from `dest` to
/// reach the nearest common ancestor of `dest` and `source` (spec §4.4.1
/// step 2/3).
fn steps_to_common_ancestor(dest: &Utf8Path, source: &Utf8Path) -> usize {
    let dest_components: Vec<_> = dest.components().collect();
    let source_components: Vec<_> = source.components().collect();
    let common = dest_components
        .iter()
        .zip(source_components.iter())
        .take_while(|(a, b)| a == b)
        .count();
    dest_components.len() - common
}

/// Attempt to locate a local node matching `request`, rooted at `dest_dir`
/// (the destination directory's working-copy path, whose entry carries
/// `dest_url` and `repos_root`/`repos_uuid`). Returns `Ok(None)` on any
/// mismatch per step 7 ("never guess").
#[fn_error_context::context("Locating copy-from candidate")]
pub fn locate(
    admin: &dyn AdminStore,
    pristine: &dyn PristineStore,
    repos_root: &str,
    repos_uuid: uuid::Uuid,
    dest_dir: &Utf8PathBuf,
    dest_url: &str,
    request: &CopyFromRequest,
) -> anyhow::Result<Option<CopyFromCandidate>> {
    let Some(dest_relpath) = dest_url.strip_prefix(repos_root) else {
        return Ok(None);
    };
    let dest_relpath = Utf8Path::new(dest_relpath.trim_start_matches('/'));
    let source_relpath = Utf8Path::new(request.copyfrom_path.trim_start_matches('/'));

    let steps_up = steps_to_common_ancestor(dest_relpath, source_relpath);
    let mut ancestor_dir = dest_dir.clone();
    for _ in 0..steps_up {
        let Some(parent) = ancestor_dir.parent() else {
            return Ok(None);
        };
        ancestor_dir = parent.to_path_buf();
    }

    let Some(ancestor_entry) = admin.get_entry(&ancestor_dir, false, Some(NodeKind::Dir))? else {
        return Ok(None);
    };
    if ancestor_entry.repos_uuid != repos_uuid {
        return Ok(None);
    }
    let ancestor_relpath_len = dest_relpath.components().count() - steps_up;
    let ancestor_relpath: Utf8PathBuf = dest_relpath
        .components()
        .take(ancestor_relpath_len)
        .collect();
    let expected_ancestor_url = join_url(repos_root, ancestor_relpath.as_str());
    if ancestor_entry.url != expected_ancestor_url {
        return Ok(None);
    }

    let Some(tail) = source_relpath
        .strip_prefix(&ancestor_relpath)
        .ok()
        .map(|p| p.to_path_buf())
    else {
        return Ok(None);
    };

    let mut current_dir = ancestor_dir;
    let mut components: Vec<&str> = tail.as_str().split('/').filter(|c| !c.is_empty()).collect();
    let Some(file_name) = components.pop() else {
        return Ok(None);
    };
    for component in components {
        current_dir = current_dir.join(component);
    }

    let file_abspath = current_dir.join(file_name);
    let Some(file_entry) = admin.get_entry(&file_abspath, false, Some(NodeKind::File))? else {
        return Ok(None);
    };

    if !verify_candidate(&file_entry, repos_uuid, repos_root, &request.copyfrom_path, request.copyfrom_rev) {
        return Ok(None);
    }

    let base_pristine = match pristine.get_pristine(&file_abspath) {
        Ok(bytes) => bytes,
        Err(_) => return Ok(None),
    };
    let working_override = std::fs::read(&file_abspath)
        .ok()
        .filter(|working| working != &base_pristine);

    let props = admin.load_props(&file_abspath)?;
    Ok(Some(CopyFromCandidate {
        base_pristine,
        working_override,
        base_props: props.base,
        working_props: props.working,
    }))
}

fn verify_candidate(
    entry: &Entry,
    repos_uuid: uuid::Uuid,
    repos_root: &str,
    copyfrom_path: &str,
    copyfrom_rev: u64,
) -> bool {
    if entry.repos_uuid != repos_uuid {
        return false;
    }
    if entry.url != join_url(repos_root, copyfrom_path.trim_start_matches('/')) {
        return false;
    }
    let Some(cmt_rev) = entry.cmt_rev else {
        return false;
    };
    cmt_rev <= copyfrom_rev && copyfrom_rev <= entry.revision
}

fn join_url(repos_root: &str, relpath: &str) -> String {
    if relpath.is_empty() {
        repos_root.to_string()
    } else {
        format!("{}/{relpath}", repos_root.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_ancestor_steps_counts_divergence() {
        let a = Utf8Path::new("trunk/src/foo");
        let b = Utf8Path::new("trunk/src/bar");
        assert_eq!(steps_to_common_ancestor(a, b), 1);

        let c = Utf8Path::new("trunk/a/b/c");
        let d = Utf8Path::new("branches/x/b/c");
        assert_eq!(steps_to_common_ancestor(c, d), 4);
    }
}
