//! # Gemfile Surgery
//!
//! Text edits on a module's `Gemfile` for testing it against another
//! revision of a gem, plus the gem-side version bump used before
//! publishing a test build.
//!
//! Replacements are literal; finders are never interpreted as patterns.

use super::git;
use crate::error::{Result, SyncError};
use git2::Repository;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use walkdir::WalkDir;

pub const GEMFILE: &str = "Gemfile";

const VERSION_OPERATORS: &[char] = &['<', '>', '=', '~'];
const VERSION_CONSTANT: &str = r#"VERSION\s*=\s*['"]([^'"]+)['"]"#;

static VERSION_CONSTANT_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// Strip one pair of surrounding double quotes. `""` becomes empty.
pub fn unquote(value: &str) -> String {
    let trimmed = value.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(trimmed)
        .to_string()
}

/// A requested Gemfile edit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GemfileUpdate {
    pub gem_to_test: String,
    pub gem_line: Option<String>,
    pub gem_sha_finder: Option<String>,
    pub gem_sha_replacer: Option<String>,
    pub gem_version_finder: Option<String>,
    pub gem_version_replacer: Option<String>,
    pub gem_branch_finder: Option<String>,
    pub gem_branch_replacer: Option<String>,
}

impl GemfileUpdate {
    /// Gem name without surrounding quotes
    pub fn gem_name(&self) -> String {
        unquote(&self.gem_to_test)
    }

    /// Where to clone the gem from: the `git:` source on `gem_line` if it
    /// has one, otherwise the gem under the configured namespace.
    pub fn source_url(&self, base_uri: &str, namespace: &str) -> String {
        self.line()
            .and_then(|line| {
                line.split(',').find_map(|part| {
                    part.trim()
                        .strip_prefix("git:")
                        .map(|url| url.trim().trim_matches('\'').trim_matches('"').to_string())
                })
            })
            .unwrap_or_else(|| git::clone_url(base_uri, namespace, &self.gem_name()))
    }

    /// Check every replacer against the gem's own repository.
    pub fn validate_against(&self, refs: &GemRefs) -> Result<()> {
        let gem = self.gem_name();

        if let Some(line) = self.line() {
            for part in line.split(',').map(str::trim) {
                if let Some(branch) = part.strip_prefix("branch:") {
                    refs.validate_branch(&strip_quotes(branch), &gem)?;
                } else if let Some(sha) = part.strip_prefix("ref:") {
                    refs.validate_sha(&strip_quotes(sha), &gem)?;
                } else if part.starts_with(['\'', '"']) && part.contains(VERSION_OPERATORS) {
                    refs.validate_version(part, &gem)?;
                }
            }
        }
        if let Some(sha) = non_empty(&self.gem_sha_replacer) {
            refs.validate_sha(&sha, &gem)?;
        }
        if let Some(branch) = non_empty(&self.gem_branch_replacer) {
            refs.validate_branch(&branch, &gem)?;
        }
        if let Some(version) = non_empty(&self.gem_version_replacer) {
            refs.validate_version(&version, &gem)?;
        }
        Ok(())
    }

    /// Apply the edit to Gemfile contents.
    pub fn apply(&self, contents: &str) -> String {
        let mut contents = contents.to_string();

        if let Some(line) = self.line() {
            let gem = self.gem_name();
            let mut lines: Vec<&str> = contents.lines().filter(|l| !l.contains(&gem)).collect();
            let at = lines.len().min(1);
            lines.insert(at, &line);
            contents = lines.join("\n") + "\n";
        }

        if let (Some(finder), Some(replacer)) = (
            non_empty(&self.gem_sha_finder),
            non_empty(&self.gem_sha_replacer),
        ) {
            contents = contents.replace(
                &format!("ref: '{}'", finder),
                &format!("ref: '{}'", replacer),
            );
        }
        if let (Some(finder), Some(replacer)) = (
            non_empty(&self.gem_version_finder),
            non_empty(&self.gem_version_replacer),
        ) {
            contents = contents.replace(&finder, &replacer);
        }
        if let (Some(finder), Some(replacer)) = (
            non_empty(&self.gem_branch_finder),
            non_empty(&self.gem_branch_replacer),
        ) {
            contents = contents.replace(
                &format!("branch: '{}'", finder),
                &format!("branch: '{}'", replacer),
            );
        }
        contents
    }

    fn line(&self) -> Option<String> {
        non_empty(&self.gem_line)
    }
}

/// Refs, branch names and tags of a cloned gem
#[derive(Debug, Clone, Default)]
pub struct GemRefs {
    pub refs: Vec<String>,
    pub branches: Vec<String>,
    pub tags: Vec<String>,
}

impl GemRefs {
    pub fn from_repo(repo: &Repository) -> Result<Self> {
        Ok(Self {
            refs: git::ref_targets(repo)?,
            branches: git::branch_names(repo)?,
            tags: git::tag_names(repo)?,
        })
    }

    pub fn validate_sha(&self, sha: &str, gem: &str) -> Result<()> {
        if self.refs.iter().any(|r| r == sha) {
            tracing::info!("SHA {} valid.", sha);
            Ok(())
        } else {
            Err(SyncError::Gemfile(format!(
                "Couldn't find sha: {} in your repository: {}",
                sha, gem
            )))
        }
    }

    pub fn validate_branch(&self, branch: &str, gem: &str) -> Result<()> {
        let found = self
            .branches
            .iter()
            .any(|b| b == branch || b.ends_with(&format!("/{}", branch)));
        if found {
            tracing::info!("Branch {} valid.", branch);
            Ok(())
        } else {
            Err(SyncError::Gemfile(format!(
                "Couldn't find branch: {} in your repository: {}",
                branch, gem
            )))
        }
    }

    /// Every version in a constraint such as `'>= 2.0', '< 3'` must be a tag.
    pub fn validate_version(&self, constraint: &str, gem: &str) -> Result<()> {
        for version in constraint
            .split([',', '<', '>', '=', '~'])
            .map(strip_quotes)
            .filter(|v| !v.is_empty())
        {
            let found = self
                .tags
                .iter()
                .any(|t| *t == version || t.strip_prefix('v') == Some(version.as_str()));
            if !found {
                return Err(SyncError::Gemfile(format!(
                    "Couldn't find version: {} in your repository: {}",
                    version, gem
                )));
            }
            tracing::info!("Version {} valid.", version);
        }
        Ok(())
    }
}

/// Read, edit and write the module's Gemfile.
pub fn update_gemfile(module_dir: &Path, update: &GemfileUpdate) -> Result<()> {
    let path = module_dir.join(GEMFILE);
    let contents = read_gemfile(&path)?;
    std::fs::write(&path, update.apply(&contents))?;
    tracing::info!(gem = %update.gem_name(), "Gemfile updated");
    Ok(())
}

/// Point `gem_name`'s line at the private gem source and add the source
/// line as the third line when missing.
pub fn apply_multigem(contents: &str, gem_name: &str, source_url: &str) -> String {
    let gem_name = unquote(gem_name);
    let quoted_source = format!("\"{}\"", source_url);
    let source_line = format!("source {}", quoted_source);

    let mut lines: Vec<String> = contents
        .lines()
        .map(|line| {
            if !line.contains(&gem_name) {
                line.to_string()
            } else if line.contains(&quoted_source) {
                tracing::info!("GemFile Already updated");
                line.to_string()
            } else {
                format!("{} , :source => {}", line, quoted_source)
            }
        })
        .collect();

    if !lines.contains(&source_line) {
        let at = lines.len().min(2);
        lines.insert(at, source_line);
    }
    lines.join("\n") + "\n"
}

/// [`apply_multigem`] on the module's Gemfile
pub fn update_gemfile_multigem(module_dir: &Path, gem_name: &str, source_url: &str) -> Result<()> {
    let path = module_dir.join(GEMFILE);
    let contents = read_gemfile(&path)?;
    std::fs::write(&path, apply_multigem(&contents, gem_name, source_url))?;
    Ok(())
}

/// Next minor release: drop the last segment and increment the new last,
/// ignoring any prerelease segments (`0.4.0` -> `0.5`, `1.2` -> `2`).
pub fn bump_version(version: &str) -> Option<String> {
    let mut segments: Vec<u64> = version
        .trim()
        .split('.')
        .take_while(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
        .map(|s| s.parse().ok())
        .collect::<Option<_>>()?;
    if segments.is_empty() {
        return None;
    }
    if segments.len() > 1 {
        segments.pop();
    }
    if let Some(last) = segments.last_mut() {
        *last += 1;
    }
    Some(
        segments
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join("."),
    )
}

/// Bump `VERSION = '...'` in the gem's `lib/**/version.rb`.
///
/// Returns the file plus the old and new versions.
pub fn bump_gem_version(gem_dir: &Path) -> Result<(PathBuf, String, String)> {
    let version_file = WalkDir::new(gem_dir.join("lib"))
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .find(|p| p.file_name().map_or(false, |n| n == "version.rb"))
        .ok_or_else(|| {
            SyncError::Gemfile(format!("No version.rb found under {}", gem_dir.display()))
        })?;

    let contents = std::fs::read_to_string(&version_file)?;
    let pattern = VERSION_CONSTANT_RE
        .get_or_init(|| Regex::new(VERSION_CONSTANT).ok())
        .as_ref()
        .ok_or_else(|| SyncError::Gemfile(format!("Invalid pattern {}", VERSION_CONSTANT)))?;
    let current = pattern
        .captures(&contents)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| {
            SyncError::Gemfile(format!("No VERSION in {}", version_file.display()))
        })?;
    let bumped = bump_version(&current).ok_or_else(|| {
        SyncError::Gemfile(format!("Unable to bump gem version {}", current))
    })?;

    let updated = pattern.replace(&contents, format!("VERSION = '{}'", bumped).as_str());
    std::fs::write(&version_file, updated.as_ref())?;
    tracing::info!("Gem version bumped {} -> {}", current, bumped);
    Ok((version_file, current, bumped))
}

// --- Private helpers ---

fn read_gemfile(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        SyncError::Gemfile(format!("Couldn't find file: {} {}", path.display(), e))
    })
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().map(unquote).filter(|v| !v.is_empty())
}

fn strip_quotes(value: &str) -> String {
    value.trim().trim_matches(['\'', '"']).trim().to_string()
}
