//! # Code Generation Tool
//!
//! Wraps the `pdk` subcommands the pipeline needs: update, convert,
//! validate and a version check. Every call is a shell command run in the
//! module directory; callers decide what a non-zero status means.

use super::terminal::{self, CommandOutput};
use crate::config::Config;
use crate::error::Result;
use crate::state::ModuleMetadata;
use std::path::{Path, PathBuf};

/// Packaged install location, preferred over `PATH`
pub const DEFAULT_TOOL_PATH: &str = "/opt/puppetlabs/pdk/bin/pdk";

/// The tool plus the template settings it is run with
#[derive(Debug, Clone)]
pub struct Pdk {
    path: String,
    templates_url: String,
    templates_ref: String,
    module_is_authoritative: bool,
}

impl Pdk {
    pub fn from_config(config: &Config) -> Self {
        Self {
            path: resolve_tool_path(config.tool_path.as_deref()),
            templates_url: config.templates_url.clone(),
            templates_ref: config.effective_templates_ref(),
            module_is_authoritative: config.module_is_authoritative,
        }
    }

    /// Executable in use
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Template ref `update` will use for the module in `module_dir`.
    ///
    /// When the central templates are authoritative the module's
    /// `template-url` is rewritten to point at them first.
    pub fn prepare_update(&self, module_dir: &Path) -> Result<String> {
        let mut metadata = ModuleMetadata::load(module_dir)?;
        let module_url = metadata.template_url().ok();
        let template_ref = select_template_ref(
            module_url.as_deref(),
            &self.templates_ref,
            self.module_is_authoritative,
        );

        if !self.module_is_authoritative {
            let url = metadata.rewrite_template_url(&self.templates_url, &template_ref);
            metadata.save()?;
            tracing::info!("Template URL rewritten to {}", url);
        }
        Ok(template_ref)
    }

    /// `pdk update --force --template-ref=<ref>`
    pub async fn update(&self, module_dir: &Path) -> Result<(String, CommandOutput)> {
        let template_ref = self.prepare_update(module_dir)?;
        let command = format!(
            "{} update --force --template-ref={}",
            self.path, template_ref
        );
        let output = terminal::run(module_dir, &command).await?;
        if !output.success() {
            tracing::error!("Unable to run `pdk update`: {}", output.stderr.trim_end());
        }
        Ok((template_ref, output))
    }

    /// `pdk convert --force --template-url=<url> --template-ref=<ref>`
    pub async fn convert(&self, module_dir: &Path) -> Result<CommandOutput> {
        let command = format!(
            "{} convert --force --template-url={} --template-ref={}",
            self.path, self.templates_url, self.templates_ref
        );
        terminal::run(module_dir, &command).await
    }

    /// `pdk validate -a`
    pub async fn validate(&self, module_dir: &Path) -> Result<CommandOutput> {
        terminal::run(module_dir, &format!("{} validate -a", self.path)).await
    }

    /// Compare the local tool version with `wanted`. Only ever warns.
    pub async fn check_version(&self, wanted: &str) -> bool {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let output = match terminal::run(&cwd, &format!("{} --version", self.path)).await {
            Ok(output) if output.success() => output,
            _ => {
                tracing::warn!("Unable to find pdk at '{}'.", self.path);
                return false;
            }
        };
        let local = output.stdout.trim();
        let up_to_date = version_at_least(local, wanted);
        if !up_to_date {
            tracing::warn!(
                "The current version of pdk is {} however you are using {}",
                wanted,
                local
            );
        }
        up_to_date
    }
}

/// The configured path, then the packaged install, then `pdk` on `PATH`.
pub fn resolve_tool_path(configured: Option<&Path>) -> String {
    if let Some(path) = configured {
        return path.to_string_lossy().into_owned();
    }
    if is_executable(Path::new(DEFAULT_TOOL_PATH)) {
        DEFAULT_TOOL_PATH.to_string()
    } else {
        tracing::warn!("Using pdk on PATH not '{}'", DEFAULT_TOOL_PATH);
        "pdk".to_string()
    }
}

/// The module's own ref (the `#fragment` of its template URL) when the
/// module is authoritative, otherwise the configured ref.
pub fn select_template_ref(
    module_template_url: Option<&str>,
    configured_ref: &str,
    module_is_authoritative: bool,
) -> String {
    if !module_is_authoritative {
        return configured_ref.to_string();
    }
    module_template_url
        .and_then(|url| url.split_once('#'))
        .map(|(_, fragment)| fragment)
        .filter(|fragment| !fragment.is_empty())
        .unwrap_or(configured_ref)
        .to_string()
}

/// Dotted numeric comparison; a leading `v` and any non-numeric suffix
/// per component are ignored.
pub fn version_at_least(local: &str, wanted: &str) -> bool {
    fn parts(v: &str) -> Vec<u64> {
        v.trim()
            .trim_start_matches('v')
            .split('.')
            .map(|p| {
                p.chars()
                    .take_while(char::is_ascii_digit)
                    .collect::<String>()
                    .parse()
                    .unwrap_or(0)
            })
            .collect()
    }
    let (mut local, mut wanted) = (parts(local), parts(wanted));
    let len = local.len().max(wanted.len());
    local.resize(len, 0);
    wanted.resize(len, 0);
    local >= wanted
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
