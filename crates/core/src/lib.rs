//! # Modsync Core
//!
//! Keeps a fleet of module repositories in step with a shared template.
//! Clones each module, runs the code generator against it, commits,
//! pushes and opens a pull request, one module at a time.
//!
//! ## Architecture
//!
//! - `config` - run-wide settings and credentials
//! - `platform/` - GitHub, GitLab, Jenkins and gem server clients
//! - `state/` - staging workspace, module list, metadata and provision files
//! - `tools/` - git, shell commands, the code generator, Gemfile edits
//! - `pipeline/` - step sequencing over a batch of modules
//!
//! ## Usage
//!
//! ```rust,ignore
//! use modsync_core::{Config, Credentials, Orchestrator, RunArgs, StepSet};
//!
//! let config = Config::load()?;
//! let modules = modsync_core::state::read_managed_modules(&config.managed_modules)?;
//! let steps = StepSet::parse(&["clone", "pdk_update", "create_commit"])?;
//! let mut orchestrator = Orchestrator::new(config, Credentials::from_env())?;
//! let report = orchestrator.run(&steps, RunArgs::default(), &modules).await?;
//! ```

pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod platform;
pub mod state;
pub mod tools;

pub use config::{Config, Credentials};
pub use error::{ErrorClass, Result, SyncError};
pub use models::GitPlatform;
pub use pipeline::{Orchestrator, RunArgs, RunReport, Step, StepSet};
