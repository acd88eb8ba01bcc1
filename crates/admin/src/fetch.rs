//! The repository fetch callback, used for `add_file(copyfrom=...)` when no
//! local copy-from candidate is found (spec §6 "Fetch callback", §4.4).

use std::collections::BTreeMap;
use std::io::Write;

use camino::Utf8Path;

/// Fetch the pristine bytes and base regular properties for `relpath` at
/// `revision` directly from the repository, writing the bytes into `sink`.
pub trait FetchCallback {
    fn fetch(
        &self,
        relpath: &Utf8Path,
        revision: u64,
        sink: &mut dyn Write,
    ) -> anyhow::Result<BTreeMap<String, Vec<u8>>>;
}

/// A fetch callback that always fails; useful as a default when the caller
/// knows copy-from-without-local-candidate cannot occur (e.g. tests that
/// only drive local copies).
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableFetch;

impl FetchCallback for UnavailableFetch {
    fn fetch(
        &self,
        relpath: &Utf8Path,
        _revision: u64,
        _sink: &mut dyn Write,
    ) -> anyhow::Result<BTreeMap<String, Vec<u8>>> {
        anyhow::bail!("no repository fetch callback configured for '{relpath}'")
    }
}
