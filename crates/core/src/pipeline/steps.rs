//! # Steps and Arguments
//!
//! Step identifiers in their canonical order, and the typed argument
//! structs each step family needs. Arguments are validated once for the
//! requested step set before any module is touched.

use crate::error::{Result, SyncError};
use crate::tools::gemfile::{unquote, GemfileUpdate};
use crate::tools::terminal::RunMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// One unit of pipeline behaviour. Variant order is execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Clone,
    CloneGem,
    MultiGemTesting,
    PdkConvert,
    PdkValidate,
    RunACommand,
    GemFileUpdate,
    MultigemFileUpdate,
    NormalizeMetadata,
    AddPlatform,
    RemovePlatform,
    UpdateRequirements,
    ReleaseChecks,
    RunTestsLocally,
    FetchTestResultsLocally,
    PdkUpdate,
    UsePdkRef,
    UseGemRef,
    CreateCommit,
    Push,
    CreatePr,
    CleanBranches,
    RunTestsJenkins,
    TestResultsJenkins,
}

impl Step {
    /// Every step, in canonical order
    pub const ALL: [Step; 24] = [
        Step::Clone,
        Step::CloneGem,
        Step::MultiGemTesting,
        Step::PdkConvert,
        Step::PdkValidate,
        Step::RunACommand,
        Step::GemFileUpdate,
        Step::MultigemFileUpdate,
        Step::NormalizeMetadata,
        Step::AddPlatform,
        Step::RemovePlatform,
        Step::UpdateRequirements,
        Step::ReleaseChecks,
        Step::RunTestsLocally,
        Step::FetchTestResultsLocally,
        Step::PdkUpdate,
        Step::UsePdkRef,
        Step::UseGemRef,
        Step::CreateCommit,
        Step::Push,
        Step::CreatePr,
        Step::CleanBranches,
        Step::RunTestsJenkins,
        Step::TestResultsJenkins,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Clone => "clone",
            Step::CloneGem => "clone_gem",
            Step::MultiGemTesting => "multi_gem_testing",
            Step::PdkConvert => "pdk_convert",
            Step::PdkValidate => "pdk_validate",
            Step::RunACommand => "run_a_command",
            Step::GemFileUpdate => "gem_file_update",
            Step::MultigemFileUpdate => "multigem_file_update",
            Step::NormalizeMetadata => "normalize_metadata",
            Step::AddPlatform => "add_platform",
            Step::RemovePlatform => "remove_platform",
            Step::UpdateRequirements => "update_requirements",
            Step::ReleaseChecks => "release_checks",
            Step::RunTestsLocally => "run_tests_locally",
            Step::FetchTestResultsLocally => "fetch_test_results_locally",
            Step::PdkUpdate => "pdk_update",
            Step::UsePdkRef => "use_pdk_ref",
            Step::UseGemRef => "use_gem_ref",
            Step::CreateCommit => "create_commit",
            Step::Push => "push",
            Step::CreatePr => "create_pr",
            Step::CleanBranches => "clean_branches",
            Step::RunTestsJenkins => "run_tests_jenkins",
            Step::TestResultsJenkins => "test_results_jenkins",
        }
    }

    /// Steps that talk to the hosting platform
    pub fn needs_platform(&self) -> bool {
        matches!(self, Step::CreatePr | Step::CleanBranches)
    }

    /// Steps that work on the gem checkout rather than a module
    pub fn is_gem_step(&self) -> bool {
        matches!(self, Step::CloneGem | Step::MultiGemTesting)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Step {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().trim_start_matches(':');
        Step::ALL
            .iter()
            .copied()
            .find(|step| step.as_str() == wanted)
            .ok_or_else(|| SyncError::MissingArgument(format!("Unknown step '{}'", s.trim())))
    }
}

/// A requested subset of steps. Iteration is always canonical order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepSet(BTreeSet<Step>);

impl StepSet {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self(steps.into_iter().collect())
    }

    /// Parse step names in any order
    pub fn parse<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        names
            .iter()
            .map(|n| n.as_ref().parse())
            .collect::<Result<BTreeSet<_>>>()
            .map(Self)
    }

    pub fn contains(&self, step: Step) -> bool {
        self.0.contains(&step)
    }

    pub fn iter(&self) -> impl Iterator<Item = Step> + '_ {
        self.0.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn needs_platform(&self) -> bool {
        self.iter().any(|s| s.needs_platform())
    }

    /// Steps that run once per module
    pub fn module_steps(&self) -> impl Iterator<Item = Step> + '_ {
        self.iter().filter(|s| !s.is_gem_step())
    }

    /// Whether every requested step is a gem step
    pub fn only_gem_steps(&self) -> bool {
        !self.is_empty() && self.iter().all(|s| s.is_gem_step())
    }

    /// Whether a ref modifier will derive names from a ref
    pub fn derives_ref(&self) -> bool {
        self.contains(Step::UsePdkRef) || self.contains(Step::UseGemRef)
    }
}

impl fmt::Display for StepSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|s| s.as_str()).collect();
        f.write_str(&names.join(", "))
    }
}

// --- Per-step arguments ---

/// `create_commit`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitArgs {
    pub branch_name: Option<String>,
    pub commit_message: Option<String>,
}

impl CommitArgs {
    pub fn validate(&self) -> Result<()> {
        if present(&self.branch_name) && present(&self.commit_message) {
            Ok(())
        } else {
            Err(missing("Needs a branch_name and commit_message"))
        }
    }
}

/// `create_pr`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrArgs {
    pub pr_title: Option<String>,
    /// Overrides the configured default label; empty disables labelling
    pub label: Option<String>,
    /// Prepended to titles derived by `use_pdk_ref` / `use_gem_ref`
    pub additional_title: Option<String>,
}

impl PrArgs {
    pub fn validate(&self) -> Result<()> {
        if present(&self.pr_title) {
            Ok(())
        } else {
            Err(missing("Needs a pr_title"))
        }
    }
}

/// `run_a_command`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandArgs {
    pub command: Option<String>,
    pub mode: RunMode,
}

impl CommandArgs {
    pub fn validate(&self) -> Result<()> {
        if present(&self.command) {
            Ok(())
        } else {
            Err(missing("\"run_a_command\" requires an argument to run."))
        }
    }
}

/// `gem_file_update`
pub type GemfileArgs = GemfileUpdate;

fn validate_gemfile(args: &GemfileArgs) -> Result<()> {
    if args.gem_name().is_empty() {
        Err(missing("Needs a gem_to_test"))
    } else {
        Ok(())
    }
}

/// `run_tests_locally`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestArgs {
    pub provision_type: Option<String>,
    pub puppet_collection: Option<String>,
}

impl TestArgs {
    pub fn validate(&self) -> Result<()> {
        if present(&self.provision_type) {
            Ok(())
        } else {
            Err(missing("Needs a provision_type"))
        }
    }
}

/// `clean_branches`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanArgs {
    pub branch_name: Option<String>,
}

impl CleanArgs {
    /// Only branches carrying the run's prefix marker may be deleted.
    pub fn validate(&self, prefix: &str) -> Result<()> {
        let marker = prefix.trim_end_matches('_');
        match self.branch_name.as_deref() {
            Some(name) if !marker.is_empty() && name.contains(marker) => Ok(()),
            _ => Err(missing(format!(
                "Needs a branch_name, and the branch name contains the string {}",
                marker
            ))),
        }
    }
}

/// `add_platform` / `remove_platform`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformArgs {
    pub os: Option<String>,
    pub version: Option<String>,
}

impl PlatformArgs {
    pub fn validate(&self) -> Result<()> {
        if present(&self.os) && present(&self.version) {
            Ok(())
        } else {
            Err(missing("Needs an os and version"))
        }
    }
}

/// `update_requirements`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementArgs {
    pub name: Option<String>,
    pub key: Option<String>,
    pub value: Option<String>,
}

impl RequirementArgs {
    pub fn validate(&self) -> Result<()> {
        if present(&self.name) && present(&self.key) && present(&self.value) {
            Ok(())
        } else {
            Err(missing("Needs a name, key and value"))
        }
    }
}

/// `release_checks`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseCheckArgs {
    pub puppet_version: Option<String>,
    /// YAML map of test platforms per agent version
    pub platforms_file: Option<PathBuf>,
}

impl ReleaseCheckArgs {
    pub fn validate(&self) -> Result<()> {
        if present(&self.puppet_version) && self.platforms_file.is_some() {
            Ok(())
        } else {
            Err(missing("Needs a puppet_version and platforms_file"))
        }
    }
}

/// `run_tests_jenkins` / `test_results_jenkins`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JenkinsArgs {
    pub jenkins_server_url: Option<String>,
    pub github_branch: Option<String>,
    pub test_framework: Option<String>,
    /// Account the module is cloned from; defaults to the namespace
    pub github_user: Option<String>,
}

impl JenkinsArgs {
    /// Server URL falls back to the configured one.
    pub fn validate(&self, configured_server: Option<&str>, needs_branch: bool) -> Result<()> {
        let has_server = present(&self.jenkins_server_url)
            || configured_server.map_or(false, |s| !s.is_empty());
        if has_server && (!needs_branch || present(&self.github_branch)) {
            Ok(())
        } else {
            Err(missing("Needs a jenkins_server_url and github_branch"))
        }
    }
}

/// `clone_gem` / `multi_gem_testing` / `multigem_file_update`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiGemArgs {
    pub gem_name: Option<String>,
    pub gemfury_username: Option<String>,
    /// Build command run in the gem checkout
    pub build_command: Option<String>,
}

impl MultiGemArgs {
    pub fn validate(&self) -> Result<()> {
        if present(&self.gem_name) {
            Ok(())
        } else {
            Err(missing("Needs a gem_name"))
        }
    }

    /// Gem name without surrounding quotes
    pub fn name(&self) -> String {
        self.gem_name.as_deref().map(unquote).unwrap_or_default()
    }
}

/// Everything a run can be parameterised with
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunArgs {
    pub commit: CommitArgs,
    pub pr: PrArgs,
    pub command: CommandArgs,
    pub gemfile: GemfileArgs,
    pub tests: TestArgs,
    pub clean: CleanArgs,
    pub platform: PlatformArgs,
    pub requirement: RequirementArgs,
    pub release_checks: ReleaseCheckArgs,
    pub jenkins: JenkinsArgs,
    pub multigem: MultiGemArgs,
}

impl RunArgs {
    /// Build from `key=value` style pairs. Unknown keys are rejected.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Result<Self>
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut args = RunArgs::default();
        for (key, value) in pairs {
            args.set(key.as_ref(), value.into())?;
        }
        Ok(args)
    }

    /// Set one argument by name.
    pub fn set(&mut self, key: &str, value: String) -> Result<()> {
        let slot = match key.trim() {
            "branch_name" => {
                self.clean.branch_name = Some(value.clone());
                &mut self.commit.branch_name
            }
            "commit_message" => &mut self.commit.commit_message,
            "pr_title" => &mut self.pr.pr_title,
            "label" => &mut self.pr.label,
            "additional_title" => &mut self.pr.additional_title,
            "command" => &mut self.command.command,
            "option" | "mode" => {
                self.command.mode = if value.trim().eq_ignore_ascii_case("background") {
                    RunMode::Background
                } else {
                    RunMode::Synchronous
                };
                return Ok(());
            }
            "gem_to_test" => {
                self.gemfile.gem_to_test = value;
                return Ok(());
            }
            "gem_line" => &mut self.gemfile.gem_line,
            "gem_sha_finder" => &mut self.gemfile.gem_sha_finder,
            "gem_sha_replacer" => &mut self.gemfile.gem_sha_replacer,
            "gem_version_finder" => &mut self.gemfile.gem_version_finder,
            "gem_version_replacer" => &mut self.gemfile.gem_version_replacer,
            "gem_branch_finder" => &mut self.gemfile.gem_branch_finder,
            "gem_branch_replacer" => &mut self.gemfile.gem_branch_replacer,
            "provision_type" => &mut self.tests.provision_type,
            "puppet_collection" => &mut self.tests.puppet_collection,
            "os" => &mut self.platform.os,
            "version" => &mut self.platform.version,
            "name" => &mut self.requirement.name,
            "key" => &mut self.requirement.key,
            "value" => &mut self.requirement.value,
            "puppet_version" => &mut self.release_checks.puppet_version,
            "platforms_file" => {
                self.release_checks.platforms_file = Some(PathBuf::from(value));
                return Ok(());
            }
            "jenkins_server_url" => &mut self.jenkins.jenkins_server_url,
            "github_branch" => &mut self.jenkins.github_branch,
            "test_framework" => &mut self.jenkins.test_framework,
            "github_user" => &mut self.jenkins.github_user,
            "gem_name" => &mut self.multigem.gem_name,
            "gemfury_username" | "gemfury_user_name" => &mut self.multigem.gemfury_username,
            "build_command" | "build_gem" => &mut self.multigem.build_command,
            other => {
                return Err(SyncError::MissingArgument(format!(
                    "Unknown argument '{}'",
                    other
                )))
            }
        };
        *slot = Some(value);
        Ok(())
    }

    /// Check every requested step's preconditions.
    pub fn validate(
        &self,
        steps: &StepSet,
        branch_prefix: &str,
        jenkins_server: Option<&str>,
    ) -> Result<()> {
        for step in steps.iter() {
            let checked = match step {
                Step::RunACommand => self.command.validate(),
                Step::CreateCommit => self.commit.validate(),
                Step::CreatePr => self.pr.validate(),
                Step::CleanBranches => self.clean.validate(branch_prefix),
                Step::GemFileUpdate => validate_gemfile(&self.gemfile),
                Step::RunTestsLocally => self.tests.validate(),
                Step::AddPlatform | Step::RemovePlatform => self.platform.validate(),
                Step::UpdateRequirements => self.requirement.validate(),
                Step::ReleaseChecks => self.release_checks.validate(),
                Step::RunTestsJenkins => self.jenkins.validate(jenkins_server, true),
                Step::TestResultsJenkins => self.jenkins.validate(jenkins_server, false),
                Step::CloneGem | Step::MultiGemTesting | Step::MultigemFileUpdate => {
                    self.multigem.validate()
                }
                _ => Ok(()),
            };
            if let Err(e) = checked {
                tracing::error!(step = %step, "{}", e);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Ref used by `use_gem_ref`: the first non-empty sha, branch or
    /// version replacer.
    pub fn gem_ref(&self) -> String {
        [
            &self.gemfile.gem_sha_replacer,
            &self.gemfile.gem_branch_replacer,
            &self.gemfile.gem_version_replacer,
        ]
        .into_iter()
        .filter_map(|v| v.as_deref().map(unquote))
        .find(|v| !v.is_empty())
        .unwrap_or_default()
    }
}

/// Per-module values threaded between steps
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleArgs {
    pub branch_name: Option<String>,
    pub commit_message: Option<String>,
    pub pr_title: Option<String>,
    /// Template ref computed by `pdk_update` / `use_pdk_ref`
    pub template_ref: Option<String>,
}

impl ModuleArgs {
    pub fn from_run(args: &RunArgs) -> Self {
        Self {
            branch_name: args.commit.branch_name.clone(),
            commit_message: args.commit.commit_message.clone(),
            pr_title: args.pr.pr_title.clone(),
            template_ref: None,
        }
    }

    /// Substitute `{ref}` in the branch, message and title. A missing branch
    /// name becomes the ref itself; `additional_title` is prepended to the
    /// title.
    pub fn apply_ref(&mut self, reference: &str, additional_title: Option<&str>) {
        let fill = |v: &str| v.replace("{ref}", reference);
        self.branch_name = Some(
            self.branch_name
                .as_deref()
                .map(fill)
                .unwrap_or_else(|| reference.to_string()),
        );
        self.commit_message = Some(
            self.commit_message
                .as_deref()
                .map(fill)
                .unwrap_or_else(|| reference.to_string()),
        );
        let title = self
            .pr_title
            .as_deref()
            .map(fill)
            .unwrap_or_else(|| reference.to_string());
        self.pr_title = Some(match additional_title.filter(|t| !t.trim().is_empty()) {
            Some(extra) => format!("{} {}", extra.trim(), title),
            None => title,
        });
        self.template_ref = Some(reference.to_string());
    }
}

// --- Private helpers ---

fn present(value: &Option<String>) -> bool {
    value.as_deref().map_or(false, |v| !unquote(v).is_empty())
}

fn missing(message: impl Into<String>) -> SyncError {
    SyncError::MissingArgument(message.into())
}
