//! # Module Metadata
//!
//! Read, transform and write a module's `metadata.json`. Key order is
//! preserved and writes are pretty-printed with a trailing newline.

use crate::error::{Result, SyncError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub const METADATA_FILE: &str = "metadata.json";

const TEMPLATE_REF: &str = "template-ref";
const TEMPLATE_URL: &str = "template-url";
const TOOL_VERSION: &str = "pdk-version";
const OS_SUPPORT: &str = "operatingsystem_support";
const OS: &str = "operatingsystem";
const OS_RELEASE: &str = "operatingsystemrelease";
const REQUIREMENTS: &str = "requirements";
const WIN_VERSION: &str = r"(?i:Server\s)?(?P<ver>\d+)(?:\s(?P<rel>[Rr]\d))?";

static WIN_VERSION_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// Case-insensitive substring patterns, first match wins.
const OS_TABLE: &[(&[&str], &str)] = &[
    (&["aix"], "AIX"),
    (&["cent"], "CentOS"),
    (&["darwin"], "Darwin"),
    (&["deb"], "Debian"),
    (&["fedora"], "Fedora"),
    (&["oracle"], "OracleLinux"),
    (&["osx"], "OSX"),
    (&["pan"], "PAN-OS"),
    (&["red"], "RedHat"),
    (&["sci"], "Scientific"),
    (&["suse", "sles"], "SLES"),
    (&["sol"], "Solaris"),
    (&["ubuntu"], "Ubuntu"),
    (&["win"], "Windows"),
    (&["rocky"], "Rocky"),
    (&["almalinux"], "AlmaLinux"),
];

/// Canonical name for a free-text OS string.
pub fn normalize_os(os: &str) -> Result<&'static str> {
    let lower = os.to_lowercase();
    OS_TABLE
        .iter()
        .find(|(patterns, _)| patterns.iter().any(|p| lower.contains(p)))
        .map(|(_, canonical)| *canonical)
        .ok_or_else(|| SyncError::UnknownOs(os.to_string()))
}

/// `"Server 2012 R2"` -> `"2012 R2"`, `"Server 2019"` -> `"2019"`.
pub fn normalize_win_version(version: &str) -> Result<String> {
    let pattern = WIN_VERSION_RE
        .get_or_init(|| Regex::new(WIN_VERSION).ok())
        .as_ref()
        .ok_or_else(|| SyncError::WindowsVersion(version.to_string()))?;

    let caps = pattern
        .captures(version)
        .ok_or_else(|| SyncError::WindowsVersion(version.to_string()))?;
    let mut normalized = caps["ver"].to_string();
    if let Some(rel) = caps.name("rel") {
        normalized.push(' ');
        normalized.push_str(&rel.as_str().to_uppercase());
    }
    Ok(normalized)
}

/// Numeric prefix of a version string, `0.0` when there is none.
fn leading_float(version: &str) -> f64 {
    let mut end = 0;
    let mut seen_dot = false;
    for (i, c) in version.char_indices() {
        if c.is_ascii_digit() {
            end = i + 1;
        } else if c == '.' && !seen_dot && end == i && i > 0 {
            seen_dot = true;
        } else {
            break;
        }
    }
    version[..end].parse().unwrap_or(0.0)
}

/// One supported OS with its releases
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsSupport {
    pub operatingsystem: String,
    #[serde(default)]
    pub operatingsystemrelease: Vec<String>,
}

/// A loaded `metadata.json`
#[derive(Debug, Clone)]
pub struct ModuleMetadata {
    path: PathBuf,
    doc: Map<String, Value>,
}

impl ModuleMetadata {
    /// Load `metadata.json` from a module directory.
    pub fn load(module_dir: &Path) -> Result<Self> {
        Self::from_file(module_dir.join(METADATA_FILE))
    }

    pub fn from_file(path: PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(&path)
            .map_err(|_| SyncError::metadata(&path, "Could not locate metadata.json"))?;
        match serde_json::from_str(&contents) {
            Ok(Value::Object(doc)) => Ok(Self { path, doc }),
            Ok(_) => Err(SyncError::metadata(&path, "expected a JSON object")),
            Err(e) => Err(SyncError::metadata(&path, e.to_string())),
        }
    }

    /// Write back in place, pretty-printed.
    pub fn save(&self) -> Result<()> {
        let mut json = serde_json::to_string_pretty(&self.doc)
            .map_err(|e| SyncError::metadata(&self.path, e.to_string()))?;
        json.push('\n');
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn document(&self) -> &Map<String, Value> {
        &self.doc
    }

    pub fn template_ref(&self) -> Result<String> {
        self.string_field(TEMPLATE_REF)
    }

    pub fn template_url(&self) -> Result<String> {
        self.string_field(TEMPLATE_URL)
    }

    pub fn tool_version(&self) -> Result<String> {
        self.string_field(TOOL_VERSION)
    }

    /// Point `template-url` at `url#ref`.
    pub fn rewrite_template_url(&mut self, url: &str, template_ref: &str) -> String {
        let base = url.split('#').next().unwrap_or(url);
        let merged = format!("{}#{}", base, template_ref);
        self.doc
            .insert(TEMPLATE_URL.to_string(), Value::String(merged.clone()));
        merged
    }

    /// Supported OS entries
    pub fn supported_platforms(&self) -> Result<Vec<OsSupport>> {
        let list = self
            .doc
            .get(OS_SUPPORT)
            .ok_or_else(|| self.missing(OS_SUPPORT))?;
        serde_json::from_value(list.clone())
            .map_err(|e| SyncError::metadata(&self.path, e.to_string()))
    }

    /// Canonicalise every OS name and the Windows release strings.
    pub fn normalize_os_list(&mut self) -> Result<()> {
        let path = self.path.clone();
        for entry in self.os_entries_mut()? {
            let current = entry[OS].as_str().unwrap_or_default().to_string();
            let canonical = normalize_os(&current)?;
            if canonical != current {
                tracing::info!("Corrected OS Name: '{}' -> '{}'", current, canonical);
                entry[OS] = Value::String(canonical.to_string());
            }
            if canonical != "Windows" {
                continue;
            }

            let releases = releases_of(entry, &path)?;
            let normalized = releases
                .iter()
                .map(|r| normalize_win_version(r))
                .collect::<Result<Vec<_>>>()?;
            if normalized != releases {
                tracing::info!("Corrected OS Versions: {:?} -> {:?}", releases, normalized);
                entry[OS_RELEASE] = Value::from(normalized);
            }
        }
        Ok(())
    }

    /// Add `version` to `os`, creating the OS entry when absent.
    pub fn add_platform(&mut self, os: &str, version: &str) -> Result<()> {
        let os = normalize_os(os)?;
        let path = self.path.clone();

        for entry in self.os_entries_mut()? {
            let existing = entry[OS].as_str().unwrap_or_default();
            if normalize_os(existing)? != os {
                continue;
            }
            tracing::info!("Adding {} version {} to existing entry", os, version);
            let mut releases = releases_of(entry, &path)?;
            if !releases.iter().any(|r| r == version) {
                releases.push(version.to_string());
            }
            releases.sort_by(|a, b| leading_float(a).total_cmp(&leading_float(b)));
            entry[OS_RELEASE] = Value::from(releases);
            return Ok(());
        }

        tracing::info!("Adding {} version {} to new entry", os, version);
        let mut entry = Map::new();
        entry.insert(OS.to_string(), Value::from(os));
        entry.insert(OS_RELEASE.to_string(), Value::from(vec![version]));
        self.os_list_mut()?.push(Value::Object(entry));
        Ok(())
    }

    /// Remove `version` from `os`. The OS entry stays even when its last
    /// release is removed.
    pub fn remove_platform(&mut self, os: &str, version: &str) -> Result<()> {
        let path = self.path.clone();
        for entry in self.os_entries_mut()? {
            let existing = entry[OS].as_str().unwrap_or_default();
            let canonical = normalize_os(existing)?;
            if !canonical.eq_ignore_ascii_case(os) {
                continue;
            }
            let mut releases = releases_of(entry, &path)?;
            if let Some(index) = releases.iter().position(|r| r == version) {
                tracing::info!("Removing {} {} from metadata.json", canonical, version);
                releases.remove(index);
                entry[OS_RELEASE] = Value::from(releases);
            }
        }
        Ok(())
    }

    /// Set `key = value` on every requirement named `name`, appending a new
    /// requirement when none matches.
    pub fn update_requirement(&mut self, name: &str, key: &str, value: &str) -> Result<()> {
        let path = self.path.clone();
        let requirements = self
            .doc
            .entry(REQUIREMENTS)
            .or_insert_with(|| Value::Array(Vec::new()))
            .as_array_mut()
            .ok_or_else(|| SyncError::metadata(&path, "'requirements' is not a list"))?;

        let mut updated = false;
        for requirement in requirements.iter_mut() {
            if requirement["name"] != name {
                continue;
            }
            if let Some(obj) = requirement.as_object_mut() {
                tracing::info!("Updating [{}] key [{}] to value [{}]", name, key, value);
                obj.insert(key.to_string(), Value::from(value));
                updated = true;
            }
        }

        if !updated {
            tracing::info!(
                "Adding new requirement [{}] with key [{}] of value [{}]",
                name,
                key,
                value
            );
            let mut requirement = Map::new();
            requirement.insert("name".to_string(), Value::from(name));
            requirement.insert(key.to_string(), Value::from(value));
            requirements.push(Value::Object(requirement));
        }
        Ok(())
    }

    // --- Private helpers ---

    fn string_field(&self, key: &str) -> Result<String> {
        self.doc
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| self.missing(key))
    }

    fn missing(&self, key: &str) -> SyncError {
        SyncError::metadata(&self.path, format!("missing '{}'", key))
    }

    fn os_list_mut(&mut self) -> Result<&mut Vec<Value>> {
        let path = self.path.clone();
        self.doc
            .get_mut(OS_SUPPORT)
            .and_then(Value::as_array_mut)
            .ok_or_else(|| SyncError::metadata(&path, format!("missing '{}'", OS_SUPPORT)))
    }

    fn os_entries_mut(&mut self) -> Result<impl Iterator<Item = &mut Value> + '_> {
        Ok(self.os_list_mut()?.iter_mut().filter(|e| e.is_object()))
    }
}

fn releases_of(entry: &Value, path: &Path) -> Result<Vec<String>> {
    match entry.get(OS_RELEASE) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| SyncError::metadata(path, format!("{}: {}", OS_RELEASE, e))),
    }
}
