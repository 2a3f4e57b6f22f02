//! # Errors
//!
//! One error type for the whole run. Variants are grouped by how the
//! orchestrator reacts to them, see [`ErrorClass`].

use std::path::PathBuf;
use thiserror::Error;

/// How far a failure reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad configuration, credentials or arguments. Raised before any module is touched.
    Setup,
    /// Affects one step of one module. Logged and the batch continues.
    Transient,
    /// The external tool or a configuration input is broken for every module. Stops the batch.
    Systemic,
    /// A module's files are malformed. Stops processing of that module.
    Data,
}

/// Errors raised by modsync.
#[derive(Debug, Error)]
pub enum SyncError {
    // --- Setup ---
    /// A credential environment variable is not set
    #[error("{what} not set - use 'export {var}=\"<your {kind}>\"' to set")]
    MissingCredential {
        what: String,
        var: &'static str,
        kind: &'static str,
    },

    /// Platform identifier is not one we can talk to
    #[error("Unsupported Git hosting platform '{0}'. Supported platforms are: github, gitlab")]
    UnsupportedPlatform(String),

    /// Managed modules list missing, empty or not a list
    #[error("File '{0}' is empty/does not exist")]
    EmptyModuleList(PathBuf),

    /// Some repositories from the managed modules list do not exist
    #[error("Could not find the following repositories: {0:?}")]
    MissingRepositories(Vec<String>),

    /// Step argument precondition failed
    #[error("{0}")]
    MissingArgument(String),

    /// Configuration file could not be parsed
    #[error("Failed to parse config file {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    // --- Transient ---
    /// Local git failure (clone, push, branch)
    #[error("git: {0}")]
    Git(#[from] git2::Error),

    /// Hosting platform or CI API failure
    #[error("{platform} API error: {message}")]
    Platform { platform: String, message: String },

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // --- Systemic ---
    /// External tool exited non-zero
    #[error("`{command}` failed for {module} with exit status {status}")]
    ToolFailed {
        module: String,
        command: String,
        status: i32,
    },

    /// Requested label does not exist on the repository
    #[error("Label '{label}' not found in {repo}. Ensure label is valid")]
    InvalidLabel { repo: String, label: String },

    /// Pull request creation returned nothing
    #[error("PR creation for {0} has failed")]
    PullRequestFailed(String),

    // --- Data ---
    /// Metadata file missing, unparsable or missing a key
    #[error("metadata error in {path}: {message}")]
    Metadata { path: PathBuf, message: String },

    /// OS name not in the canonical table
    #[error("Could not normalize OS value: {0}")]
    UnknownOs(String),

    /// Windows release string did not match the version pattern
    #[error("Unable to determine Windows version from metadata.json: {0}")]
    WindowsVersion(String),

    /// Gemfile edit could not be applied or validated
    #[error("{0}")]
    Gemfile(String),
}

impl SyncError {
    /// Classify the error for the orchestrator's failure policy.
    pub fn class(&self) -> ErrorClass {
        match self {
            SyncError::MissingCredential { .. }
            | SyncError::UnsupportedPlatform(_)
            | SyncError::EmptyModuleList(_)
            | SyncError::MissingRepositories(_)
            | SyncError::MissingArgument(_)
            | SyncError::ConfigParse { .. } => ErrorClass::Setup,
            SyncError::Git(_) | SyncError::Platform { .. } | SyncError::Io(_) => {
                ErrorClass::Transient
            }
            SyncError::ToolFailed { .. }
            | SyncError::InvalidLabel { .. }
            | SyncError::PullRequestFailed(_) => ErrorClass::Systemic,
            SyncError::Metadata { .. }
            | SyncError::UnknownOs(_)
            | SyncError::WindowsVersion(_)
            | SyncError::Gemfile(_) => ErrorClass::Data,
        }
    }

    /// Shorthand for a platform error.
    pub fn platform(platform: &str, message: impl ToString) -> Self {
        SyncError::Platform {
            platform: platform.to_string(),
            message: message.to_string(),
        }
    }

    /// Shorthand for a metadata error.
    pub fn metadata(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        SyncError::Metadata {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::platform("http", err)
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
