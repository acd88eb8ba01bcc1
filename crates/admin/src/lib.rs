//! Administrative storage layer for the working-copy update editor.
//!
//! This crate defines the storage contracts the dispatcher in
//! `wceditor-core` depends on ([`entries::AdminStore`],
//! [`pristine::PristineStore`], [`log::LogEngine`], [`notify::Notifier`],
//! [`fetch::FetchCallback`], [`conflict_resolver::ConflictResolver`],
//! [`externals::ExternalsSink`], [`translate::Translation`]) plus one
//! complete filesystem-backed implementation ([`fs_store::FsAdminStore`],
//! [`pristine::FsPristineStore`]) suitable for a real working copy on disk.

pub mod conflict_resolver;
pub mod entries;
pub mod externals;
pub mod fetch;
pub mod fs_store;
pub mod log;
pub mod merge;
pub mod notify;
pub mod paths;
pub mod pristine;
pub mod props;
pub mod translate;
