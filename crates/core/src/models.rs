//! # Platform Models
//!
//! Hosting platform selection. The platform is picked once from
//! configuration and turned into a boxed [`SourcePlatform`] client; the rest
//! of the run never branches on it again.
//!
//! - GitHub - `GITHUB_TOKEN`
//! - GitLab - `GITLAB_TOKEN`, plus the REST endpoint from `gitlab_api_endpoint`

use crate::config::{Config, Credentials};
use crate::error::{Result, SyncError};
use crate::platform::{github::GithubClient, gitlab::GitlabClient, SourcePlatform};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported hosting platforms
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GitPlatform {
    #[default]
    Github,
    Gitlab,
}

impl GitPlatform {
    /// Get all supported platforms
    pub fn all() -> Vec<GitPlatform> {
        vec![GitPlatform::Github, GitPlatform::Gitlab]
    }

    /// Display name for messages
    pub fn display_name(&self) -> &'static str {
        match self {
            GitPlatform::Github => "Github",
            GitPlatform::Gitlab => "Gitlab",
        }
    }

    /// Environment variable holding the access token
    pub fn token_var(&self) -> &'static str {
        match self {
            GitPlatform::Github => "GITHUB_TOKEN",
            GitPlatform::Gitlab => "GITLAB_TOKEN",
        }
    }

    /// Create the platform client from configuration and credentials.
    ///
    /// Fails with a setup error when the token is missing.
    pub fn create_client(
        &self,
        config: &Config,
        credentials: &Credentials,
    ) -> Result<Box<dyn SourcePlatform>> {
        let token = credentials.git_token(*self)?;
        let client: Box<dyn SourcePlatform> = match self {
            GitPlatform::Github => Box::new(GithubClient::new(token, config.api_endpoint.clone())?),
            GitPlatform::Gitlab => Box::new(GitlabClient::new(
                token,
                config.gitlab_api_endpoint.clone(),
            )?),
        };
        tracing::debug!(platform = self.display_name(), "Platform client ready");
        Ok(client)
    }
}

impl FromStr for GitPlatform {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().trim_start_matches(':');
        GitPlatform::all()
            .into_iter()
            .find(|p| p.display_name().eq_ignore_ascii_case(name))
            .ok_or_else(|| SyncError::UnsupportedPlatform(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_platform() {
        assert_eq!("github".parse::<GitPlatform>().unwrap(), GitPlatform::Github);
        assert_eq!(":gitlab".parse::<GitPlatform>().unwrap(), GitPlatform::Gitlab);
        assert!("svn".parse::<GitPlatform>().is_err());
    }

    #[test]
    fn test_every_platform_parses_case_insensitively() {
        for platform in GitPlatform::all() {
            let upper = platform.display_name().to_uppercase();
            assert_eq!(upper.parse::<GitPlatform>().unwrap(), platform);
        }
    }

    #[test]
    fn test_display_names() {
        assert_eq!(GitPlatform::Github.display_name(), "Github");
        assert_eq!(GitPlatform::Gitlab.token_var(), "GITLAB_TOKEN");
        assert_eq!(GitPlatform::all().len(), 2);
    }

    #[test]
    fn test_create_client_requires_token() {
        let config = Config::default();
        let err = GitPlatform::Github
            .create_client(&config, &Credentials::default())
            .err()
            .unwrap();
        assert!(matches!(err, SyncError::MissingCredential { .. }));
    }

    #[test]
    fn test_create_client_with_token() {
        let config = Config::default();
        let creds = Credentials {
            gitlab_token: Some("t".into()),
            ..Default::default()
        };
        assert!(GitPlatform::Gitlab.create_client(&config, &creds).is_ok());
    }
}
