//! Editor inputs, supplied by the caller (CLI, or a future RPC layer) at
//! editor construction (spec §6 "Configuration").

use wceditor_admin::entries::Depth;

/// Caller-supplied configuration for one edit.
#[derive(Debug, Clone)]
pub struct EditorConfig {
    /// Stamp working files with the last-commit time instead of the time of
    /// the update.
    pub use_commit_times: bool,
    /// The depth requested for this edit.
    pub requested_depth: Depth,
    /// Whether `requested_depth` should be persisted as the new ambient
    /// depth rather than a one-shot override.
    pub depth_is_sticky: bool,
    /// Whether an unversioned file/directory may be silently absorbed by an
    /// add instead of raising an obstruction error.
    pub allow_unver_obstructions: bool,
    /// Path to an external `diff3`-compatible merge tool, if configured.
    pub diff3_cmd: Option<String>,
    /// File extensions exempted from keyword/EOL translation.
    pub preserved_extensions: Vec<String>,
    /// The new URL this edit switches the working copy to, if this is a
    /// `switch` rather than an `update`.
    pub switch_url: Option<String>,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            use_commit_times: false,
            requested_depth: Depth::Infinity,
            depth_is_sticky: false,
            allow_unver_obstructions: false,
            diff3_cmd: None,
            preserved_extensions: Vec::new(),
            switch_url: None,
        }
    }
}
