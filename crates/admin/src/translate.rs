//! Keyword expansion / EOL translation, driven by versioned properties
//! (spec §6 "Translation"). Full keyword/EOL semantics are out of scope;
//! this crate only needs to know *whether* translation applies so the
//! editor can decide when a de-translate/re-translate round-trip is
//! required (spec §4.5 action matrix, last row).

use std::collections::BTreeMap;

/// Well-known property names that trigger translation.
pub const EOL_STYLE_PROP: &str = "svn:eol-style";
/// Property name that triggers keyword expansion.
pub const KEYWORDS_PROP: &str = "svn:keywords";

/// Whether a node's current regular properties require translation on
/// checkout/update (keyword expansion and/or EOL conversion).
pub fn needs_translation(regular_props: &BTreeMap<String, Vec<u8>>) -> bool {
    regular_props.contains_key(EOL_STYLE_PROP) || regular_props.contains_key(KEYWORDS_PROP)
}

/// Converts working-file bytes to and from their repository "normal form".
pub trait Translation {
    /// Strip keyword expansion / EOL conversion, returning the "normal
    /// form" bytes suitable for comparison against the pristine.
    fn detranslate(&self, working_bytes: &[u8], props: &BTreeMap<String, Vec<u8>>) -> Vec<u8>;

    /// Apply keyword expansion / EOL conversion on top of normal-form
    /// bytes, producing what should land in the working file.
    fn translate(&self, normal_bytes: &[u8], props: &BTreeMap<String, Vec<u8>>) -> Vec<u8>;
}

/// Translation backend that performs no conversion; useful for working
/// copies that don't use `svn:eol-style`/`svn:keywords`, and for tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityTranslation;

impl Translation for IdentityTranslation {
    fn detranslate(&self, working_bytes: &[u8], _props: &BTreeMap<String, Vec<u8>>) -> Vec<u8> {
        working_bytes.to_vec()
    }

    fn translate(&self, normal_bytes: &[u8], _props: &BTreeMap<String, Vec<u8>>) -> Vec<u8> {
        normal_bytes.to_vec()
    }
}
