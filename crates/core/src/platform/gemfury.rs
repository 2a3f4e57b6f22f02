//! # Gemfury
//!
//! Uploads built gem packages to a private gem server so modules can be
//! tested against unreleased gem versions.

use super::ensure_success;
use crate::error::{Result, SyncError};
use reqwest::multipart::{Form, Part};
use std::path::{Path, PathBuf};

const DEFAULT_PUSH_URL: &str = "https://push.fury.io";

/// Gem source URL for `user`, authenticated with `token`
pub fn source_url(token: &str, user: &str) -> String {
    format!("https://{}@gem.fury.io/{}/", token, user)
}

/// Newest `*.gem` file in `dir` or `dir/pkg`
pub fn built_package(dir: &Path) -> Option<PathBuf> {
    [dir.to_path_buf(), dir.join("pkg")]
        .iter()
        .filter_map(|d| std::fs::read_dir(d).ok())
        .flatten()
        .flatten()
        .map(|entry| entry.path())
        .filter(|p| p.extension().map_or(false, |e| e == "gem"))
        .max_by_key(|p| {
            std::fs::metadata(p)
                .and_then(|m| m.modified())
                .ok()
        })
}

/// Push client for the gem server
pub struct GemfuryClient {
    http: reqwest::Client,
    push_url: String,
    token: String,
}

impl GemfuryClient {
    pub fn new(token: String, push_url: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("modsync")
            .build()
            .map_err(|e| SyncError::platform("gemfury", e))?;
        Ok(Self {
            http,
            push_url: push_url
                .unwrap_or_else(|| DEFAULT_PUSH_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            token,
        })
    }

    /// Upload `package` to `user`'s account.
    pub async fn upload(&self, user: &str, package: &Path) -> Result<()> {
        let file_name = package
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| SyncError::platform("gemfury", "package path has no file name"))?;
        let bytes = tokio::fs::read(package).await?;
        tracing::info!(package = %file_name, user = %user, "Uploading gem");

        let form = Form::new().part("package", Part::bytes(bytes).file_name(file_name));
        let response = self
            .http
            .post(format!("{}/{}/", self.push_url, user))
            .basic_auth(&self.token, Some(""))
            .multipart(form)
            .send()
            .await?;
        ensure_success("gemfury", response).await?;
        Ok(())
    }
}
