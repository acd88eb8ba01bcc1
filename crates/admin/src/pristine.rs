//! Pristine (text-base) storage (spec §6 "Pristine store").

use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};

use crate::paths::{admin_tmp_dir, encode_relpath, text_base_path};

/// A checksum over pristine file content. The original computes MD5 for
/// wire compatibility; we do the same via the `md5` crate used elsewhere in
/// this corpus for content-addressed sync tools.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Checksum(pub [u8; 16]);

impl Checksum {
    /// Compute the checksum of `bytes`.
    pub fn of(bytes: &[u8]) -> Self {
        Checksum(md5::compute(bytes).0)
    }

    /// Render as lowercase hex.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Parse a checksum previously rendered via [`Self::to_hex`]. Returns a
    /// zeroed checksum on malformed input rather than erroring, since a
    /// corrupt stored checksum should surface as a mismatch downstream, not
    /// a panic here.
    pub fn from_hex(hex: &str) -> Self {
        let mut bytes = [0u8; 16];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let Some(pair) = hex.get(i * 2..i * 2 + 2) else {
                break;
            };
            *byte = u8::from_str_radix(pair, 16).unwrap_or(0);
        }
        Checksum(bytes)
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A running MD5 computation, used by the delta-apply handler to verify the
/// claimed source checksum without buffering the whole source in memory.
#[derive(Debug, Default)]
pub struct ChecksumStream {
    ctx: md5::Context,
}

impl ChecksumStream {
    /// Start a new running computation.
    pub fn new() -> Self {
        Self {
            ctx: md5::Context::new(),
        }
    }

    /// Feed more bytes into the running computation.
    pub fn consume(&mut self, bytes: &[u8]) {
        self.ctx.consume(bytes);
    }

    /// Finalize and return the checksum.
    pub fn finish(self) -> Checksum {
        Checksum(self.ctx.compute().0)
    }
}

/// The pristine/text-base contract (spec §6). A filesystem-backed
/// implementation lives in [`crate::fs_store`].
pub trait PristineStore {
    /// Read the current pristine bytes for a versioned file.
    fn get_pristine(&self, path: &Utf8Path) -> anyhow::Result<Vec<u8>>;

    /// Read the revert-base (pre-replace) pristine bytes, if any.
    fn get_revert(&self, path: &Utf8Path) -> anyhow::Result<Option<Vec<u8>>>;

    /// Open a writable temp file destined to become the new text-base for
    /// `path`, returning the stream and its temporary on-disk location.
    fn open_writable_base(
        &self,
        path: &Utf8Path,
        need_revert: bool,
    ) -> anyhow::Result<(std::fs::File, Utf8PathBuf)>;

    /// Compute the on-disk text-base path for `path` (or its `.svn-revert`
    /// variant).
    fn text_base_path(&self, path: &Utf8Path, revert: bool) -> Utf8PathBuf;
}

/// Filesystem-backed pristine store, rooted at a working copy's
/// administrative area.
#[derive(Debug, Clone)]
pub struct FsPristineStore {
    /// Root of the working copy this store manages.
    pub wc_root: Utf8PathBuf,
}

impl PristineStore for FsPristineStore {
    fn get_pristine(&self, path: &Utf8Path) -> anyhow::Result<Vec<u8>> {
        let base = self.text_base_path(path, false);
        Ok(std::fs::read(&base)?)
    }

    fn get_revert(&self, path: &Utf8Path) -> anyhow::Result<Option<Vec<u8>>> {
        let revert = self.text_base_path(path, true);
        if revert.exists() {
            Ok(Some(std::fs::read(&revert)?))
        } else {
            Ok(None)
        }
    }

    fn open_writable_base(
        &self,
        path: &Utf8Path,
        _need_revert: bool,
    ) -> anyhow::Result<(std::fs::File, Utf8PathBuf)> {
        let tmp_dir = admin_tmp_dir(&self.wc_root);
        std::fs::create_dir_all(&tmp_dir)?;
        let work_path = tmp_dir.join(format!("{}.tmp", encode_relpath(path)));
        let f = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&work_path)?;
        Ok((f, work_path))
    }

    fn text_base_path(&self, path: &Utf8Path, revert: bool) -> Utf8PathBuf {
        text_base_path(&self.wc_root, path, revert)
    }
}

/// Write `bytes` into a temp file under the admin tmp area, without
/// installing it; used for de-translated snapshots (spec §4.5 step 5).
pub fn write_temp(wc_root: &Utf8Path, name: &str, bytes: &[u8]) -> anyhow::Result<Utf8PathBuf> {
    let tmp_dir = admin_tmp_dir(wc_root);
    std::fs::create_dir_all(&tmp_dir)?;
    let path = tmp_dir.join(name);
    let mut f = std::fs::File::create(&path)?;
    f.write_all(bytes)?;
    Ok(path)
}
