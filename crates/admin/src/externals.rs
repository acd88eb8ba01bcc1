//! Receives `svn:externals`-style property changes (spec §6 "Externals
//! sink", §12 "Externals notification batching").

use camino::Utf8PathBuf;

use crate::entries::Depth;

/// Receives `svn:externals` value changes as directories close.
pub trait ExternalsSink {
    /// Called at most once per directory close, with the old and new
    /// `svn:externals` values (if the property changed at all).
    fn changed(
        &self,
        path: &Utf8PathBuf,
        old_value: Option<&[u8]>,
        new_value: Option<&[u8]>,
        ambient_depth: Depth,
    );
}

/// An externals sink that ignores every change, used when externals
/// handling is out of scope for a given driver (e.g. the CLI demo).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullExternalsSink;

impl ExternalsSink for NullExternalsSink {
    fn changed(
        &self,
        _path: &Utf8PathBuf,
        _old_value: Option<&[u8]>,
        _new_value: Option<&[u8]>,
        _ambient_depth: Depth,
    ) {
    }
}
