//! Path-safety helpers shared by the editor and its admin-store backends.

use camino::{Utf8Path, Utf8PathBuf};

/// The name of the administrative metadata directory. A path component
/// equal to this name is always rejected as a driven edit target.
pub const ADMIN_DIR_NAME: &str = ".wc-admin";

/// Join `name` onto `parent`, rejecting anything that would escape `parent`
/// on the local filesystem (e.g. `..`, an absolute path masquerading as a
/// relative component, or a name equal to the administrative directory).
///
/// This mirrors the update editor's requirement that every `add_*`/`open_*`
/// callback verify the child path is still rooted under its parent before
/// any mutation is attempted.
pub fn join_child_safely(parent: &Utf8Path, name: &str) -> anyhow::Result<Utf8PathBuf> {
    if name.is_empty() {
        anyhow::bail!("empty path component");
    }
    if name == ADMIN_DIR_NAME {
        anyhow::bail!("'{name}' collides with the administrative directory name");
    }
    let candidate = Utf8Path::new(name);
    if candidate.is_absolute() {
        anyhow::bail!("path component '{name}' must be relative");
    }
    for component in candidate.components() {
        match component {
            camino::Utf8Component::Normal(_) => {}
            other => anyhow::bail!("unsafe path component '{other}' in '{name}'"),
        }
    }

    let joined = parent.join(candidate);
    if !joined.starts_with(parent) {
        anyhow::bail!("path '{name}' escapes parent '{parent}'");
    }
    Ok(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_dotdot() {
        let parent = Utf8Path::new("/wc/dir");
        assert!(join_child_safely(parent, "../escape").is_err());
        assert!(join_child_safely(parent, "a/../../escape").is_err());
    }

    #[test]
    fn rejects_absolute() {
        let parent = Utf8Path::new("/wc/dir");
        assert!(join_child_safely(parent, "/etc/passwd").is_err());
    }

    #[test]
    fn rejects_admin_name() {
        let parent = Utf8Path::new("/wc/dir");
        assert!(join_child_safely(parent, ADMIN_DIR_NAME).is_err());
    }

    #[test]
    fn accepts_plain_name() {
        let parent = Utf8Path::new("/wc/dir");
        let joined = join_child_safely(parent, "child.txt").unwrap();
        assert_eq!(joined, Utf8Path::new("/wc/dir/child.txt"));
    }
}
