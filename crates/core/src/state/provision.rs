//! # Provisioning
//!
//! Litmus `provision.yaml` editing and release-check image selection.

use super::metadata::{normalize_win_version, ModuleMetadata};
use crate::error::{Result, SyncError};
use serde_yaml_ng::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::Path;

pub const PROVISION_FILE: &str = "provision.yaml";

/// Test platforms per agent version: `{"7": {"ubuntu": ["18.04"], "win": ["2019"]}}`
pub type AgentPlatforms = BTreeMap<String, BTreeMap<String, Vec<String>>>;

/// Whether the module is tested with litmus
pub fn is_litmus_module(module_dir: &Path) -> bool {
    module_dir.join(PROVISION_FILE).is_file()
}

/// Set `key` in `provision.yaml` to `{provisioner, images}`.
///
/// Returns false when the file is absent or empty.
pub fn add_provision_list(
    module_dir: &Path,
    key: &str,
    provisioner: &str,
    images: &[String],
) -> Result<bool> {
    let path = module_dir.join(PROVISION_FILE);
    if !path.is_file() {
        return Ok(false);
    }
    tracing::info!("Updating {}", path.display());

    let contents = std::fs::read_to_string(&path)?;
    let mut doc: Mapping = match serde_yaml_ng::from_str::<Option<Mapping>>(&contents) {
        Ok(Some(doc)) => doc,
        Ok(None) => return Ok(false),
        Err(e) => return Err(SyncError::metadata(&path, e.to_string())),
    };

    let mut entry = Mapping::new();
    entry.insert("provisioner".into(), provisioner.into());
    entry.insert(
        "images".into(),
        Value::Sequence(images.iter().map(|i| i.as_str().into()).collect()),
    );
    doc.insert(key.into(), Value::Mapping(entry));

    let rendered =
        serde_yaml_ng::to_string(&doc).map_err(|e| SyncError::metadata(&path, e.to_string()))?;
    std::fs::write(&path, rendered)?;
    Ok(true)
}

/// Load the agent platform table from a YAML file.
pub fn load_agent_platforms(path: &Path) -> Result<AgentPlatforms> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| SyncError::metadata(path, e.to_string()))?;
    serde_yaml_ng::from_str(&contents).map_err(|e| SyncError::metadata(path, e.to_string()))
}

/// Images for every supported OS release that the agent version also supports.
pub fn release_check_images(
    metadata: &ModuleMetadata,
    platforms: &AgentPlatforms,
    agent_version: &str,
) -> Result<Vec<String>> {
    let available = platforms.get(agent_version).ok_or_else(|| {
        SyncError::metadata(
            metadata.path(),
            format!("No configuration for Puppet {} found", agent_version),
        )
    })?;

    let mut images: Vec<String> = Vec::new();
    for support in metadata.supported_platforms()? {
        // Image names use short forms for these two
        let os = match support.operatingsystem.to_lowercase().as_str() {
            "windows" => "win".to_string(),
            "oraclelinux" => "oracle".to_string(),
            other => other.to_string(),
        };
        if !available.keys().any(|k| k.starts_with(&os)) {
            tracing::warn!(
                "'{}' is a compatible platform but was not defined as test platform for Puppet {}",
                os,
                agent_version
            );
            continue;
        }
        let versions = available.get(&os).map(Vec::as_slice).unwrap_or_default();

        for release in &support.operatingsystemrelease {
            let image = if os == "win" {
                let win = normalize_win_version(release)?;
                versions
                    .contains(&win)
                    .then(|| format!("win-{}-x86_64", win))
            } else {
                versions
                    .contains(release)
                    .then(|| format!("{}-{}-x86_64", os, release.replace('.', "")))
            };
            if let Some(image) = image {
                tracing::debug!("'{} {}' supported by Puppet {}", os, release, agent_version);
                if !images.contains(&image) {
                    images.push(image);
                }
            }
        }
    }
    Ok(images)
}

/// Write `release_checks_<version>` into the module's `provision.yaml`.
pub fn generate_release_checks(
    module_dir: &Path,
    platforms: &AgentPlatforms,
    agent_version: &str,
) -> Result<Vec<String>> {
    tracing::info!(
        "Generating release checks provision.yaml key for Puppet version {}",
        agent_version
    );
    let metadata = ModuleMetadata::load(module_dir)?;
    let images = release_check_images(&metadata, platforms, agent_version)?;
    let key = format!("release_checks_{}", agent_version);
    if !add_provision_list(module_dir, &key, "abs", &images)? {
        tracing::warn!("{}/{} does not exist", module_dir.display(), PROVISION_FILE);
    }
    Ok(images)
}
