//! # State
//!
//! On-disk state: the staging workspace, the managed modules list and the
//! per-module files that steps read and rewrite.

pub mod metadata;
pub mod modules;
pub mod provision;
pub mod workspace;

pub use metadata::{normalize_os, normalize_win_version, ModuleMetadata, OsSupport};
pub use modules::read_managed_modules;
pub use workspace::Workspace;
