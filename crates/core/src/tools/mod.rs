//! # Tools
//!
//! Local operations on a module checkout. Nothing here talks to a hosting
//! platform; see `platform` for that.
//!
//! ## Modules
//!
//! - `git` - clone, branch, commit, push and the upstream diff gate
//! - `terminal` - synchronous and detached shell commands
//! - `pdk` - the code generation tool's subcommands
//! - `gemfile` - Gemfile edits and gem version bumps
//! - `acceptance` - local litmus acceptance runs

pub mod acceptance;
pub mod gemfile;
pub mod git;
pub mod pdk;
pub mod terminal;
