//! # Configuration
//!
//! Run-wide settings, loaded once and passed by reference into every
//! component. Stored as TOML; every key is optional and falls back to the
//! built-in default.
//!
//! Lookup order for the file:
//! 1. `MODSYNC_CONFIG_PATH`
//! 2. `./modsync.toml`
//! 3. `$HOME/modsync.toml`

use crate::error::{Result, SyncError};
use crate::models::GitPlatform;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name searched for in the working and home directories
pub const CONFIG_FILE_NAME: &str = "modsync.toml";

/// Environment variable overriding the config file location
pub const CONFIG_PATH_ENV: &str = "MODSYNC_CONFIG_PATH";

/// Run-wide configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Namespace (user or group) shared by every managed module
    pub namespace: String,
    /// Staging directory modules are cloned into
    pub staging_dir: PathBuf,
    /// Staging directory gems are cloned into
    pub gem_staging_dir: PathBuf,
    /// Remote pushed to
    pub push_remote: String,
    /// Branch pull requests are opened against
    pub pr_target_branch: String,
    /// YAML list of module names
    pub managed_modules: PathBuf,
    /// Label added to every pull request; empty disables labelling
    pub default_label: String,
    /// `github` or `gitlab`
    pub git_platform: String,
    /// Base URI modules are cloned from (`https://github.com`, `git@github.com`, ...)
    pub git_base_uri: Option<String>,
    /// GitLab REST endpoint
    pub gitlab_api_endpoint: String,
    /// GitHub REST endpoint override (GitHub Enterprise)
    pub api_endpoint: Option<String>,
    /// Template repository used by the code generator
    pub templates_url: String,
    /// Prepended to `templates_ref`
    pub templates_prefix: Option<String>,
    /// Template ref used when the central template is authoritative
    pub templates_ref: String,
    /// When true a module's own template ref wins over `templates_ref`
    pub module_is_authoritative: bool,
    /// Prefix for every branch created by a run
    pub branch_prefix: String,
    /// Code generator binary; resolved from the well-known install path or PATH when unset
    pub tool_path: Option<PathBuf>,
    /// Jenkins server for the CI steps
    pub jenkins_server_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: "puppetlabs".to_string(),
            staging_dir: PathBuf::from("modules_pdksync"),
            gem_staging_dir: PathBuf::from("gems_pdksync"),
            push_remote: "origin".to_string(),
            pr_target_branch: "master".to_string(),
            managed_modules: PathBuf::from("managed_modules.yml"),
            default_label: "maintenance".to_string(),
            git_platform: "github".to_string(),
            git_base_uri: None,
            gitlab_api_endpoint: "https://gitlab.com/api/v4".to_string(),
            api_endpoint: None,
            templates_url: "https://github.com/puppetlabs/pdk-templates.git".to_string(),
            templates_prefix: None,
            templates_ref: "main".to_string(),
            module_is_authoritative: true,
            branch_prefix: "pdksync_".to_string(),
            tool_path: None,
            jenkins_server_url: None,
        }
    }
}

impl Config {
    /// Load from the first config file found, or defaults when there is none.
    pub fn load() -> Result<Self> {
        let custom = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        match locate_config_path(custom, dirs::home_dir()) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "Loading configuration");
                Self::from_file(&path)
            }
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a TOML file at `path`
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents).map_err(|e| match e {
            SyncError::ConfigParse { message, .. } => SyncError::ConfigParse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }

    /// Parse configuration from TOML text and validate it
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).map_err(|e| SyncError::ConfigParse {
            path: PathBuf::new(),
            message: e.to_string(),
        })?;
        config.platform()?;
        Ok(config)
    }

    /// Render the effective configuration
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_else(|e| format!("# unable to render: {}", e))
    }

    /// The hosting platform, validated
    pub fn platform(&self) -> Result<GitPlatform> {
        self.git_platform.parse()
    }

    /// Base URI for clone URLs
    pub fn base_uri(&self) -> String {
        match &self.git_base_uri {
            Some(uri) => uri.trim_end_matches('/').to_string(),
            None => match self.platform() {
                Ok(GitPlatform::Gitlab) => "https://gitlab.com".to_string(),
                _ => "https://github.com".to_string(),
            },
        }
    }

    /// Template ref with the configured prefix applied
    pub fn effective_templates_ref(&self) -> String {
        format!(
            "{}{}",
            self.templates_prefix.as_deref().unwrap_or_default(),
            self.templates_ref
        )
    }

    /// `namespace/module`
    pub fn full_name(&self, module: &str) -> String {
        format!("{}/{}", self.namespace, module)
    }
}

/// First existing config path: the custom path, then the working
/// directory, then the home directory.
pub fn locate_config_path(custom: Option<PathBuf>, home: Option<PathBuf>) -> Option<PathBuf> {
    let candidates = [
        custom,
        Some(PathBuf::from(CONFIG_FILE_NAME)),
        home.map(|h| h.join(CONFIG_FILE_NAME)),
    ];
    candidates.into_iter().flatten().find(|p| p.is_file())
}

/// Secrets read from the environment. Never stored in the config file.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub github_token: Option<String>,
    pub gitlab_token: Option<String>,
    pub jenkins_username: Option<String>,
    pub jenkins_password: Option<String>,
    pub gemfury_token: Option<String>,
}

impl Credentials {
    /// Read every credential variable
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            github_token: var("GITHUB_TOKEN"),
            gitlab_token: var("GITLAB_TOKEN"),
            jenkins_username: var("JENKINS_USERNAME"),
            jenkins_password: var("JENKINS_PASSWORD"),
            gemfury_token: var("GEMFURY_TOKEN"),
        }
    }

    /// Access token for the hosting platform
    pub fn git_token(&self, platform: GitPlatform) -> Result<String> {
        let token = match platform {
            GitPlatform::Github => self.github_token.clone(),
            GitPlatform::Gitlab => self.gitlab_token.clone(),
        };
        token.ok_or_else(|| SyncError::MissingCredential {
            what: format!(
                "Git platform access token for {}",
                platform.display_name()
            ),
            var: platform.token_var(),
            kind: "token",
        })
    }

    /// Jenkins username and password
    pub fn jenkins(&self) -> Result<(String, String)> {
        let username = self
            .jenkins_username
            .clone()
            .ok_or(SyncError::MissingCredential {
                what: "Jenkins username".to_string(),
                var: "JENKINS_USERNAME",
                kind: "username",
            })?;
        let password = self
            .jenkins_password
            .clone()
            .ok_or(SyncError::MissingCredential {
                what: "Jenkins password".to_string(),
                var: "JENKINS_PASSWORD",
                kind: "password",
            })?;
        Ok((username, password))
    }

    /// Gem server token
    pub fn gemfury(&self) -> Result<String> {
        self.gemfury_token
            .clone()
            .ok_or(SyncError::MissingCredential {
                what: "Gemfury access token".to_string(),
                var: "GEMFURY_TOKEN",
                kind: "token",
            })
    }
}
