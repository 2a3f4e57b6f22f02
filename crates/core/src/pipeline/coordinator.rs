//! # Orchestrator
//!
//! Runs a requested step set over a batch of modules.
//!
//! Arguments are validated once before any module is touched. Each module
//! then goes through the requested steps in canonical order before the
//! next module starts. Failures follow the error classes:
//!
//! - clone failure or missing module directory: skip the module
//! - non-zero exit from convert, validate, run_a_command or update, or no
//!   pull request returned: stop the batch
//! - invalid pull request label: raised to the caller
//! - data errors: stop the module, continue the batch
//! - anything else: log, record the step as failed, continue

use super::events::{SyncEvent, SyncEventKind};
use super::report::{ModuleOutcome, RunOutcome, RunReport, StepStatus, TestRow};
use super::steps::{ModuleArgs, RunArgs, Step, StepSet};
use crate::config::{Config, Credentials};
use crate::error::{ErrorClass, Result, SyncError};
use crate::platform::gemfury::{self, GemfuryClient};
use crate::platform::jenkins::{JenkinsClient, JenkinsJob, JobState};
use crate::platform::{self, SourcePlatform};
use crate::state::workspace::{ensure_dir, reset_dir};
use crate::state::{provision, ModuleMetadata, Workspace};
use crate::tools::gemfile::{self, GemRefs, GemfileUpdate};
use crate::tools::pdk::Pdk;
use crate::tools::terminal::{self, CommandOutput, RunResult};
use crate::tools::{acceptance, git};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// Default command used to build a gem before upload
pub const DEFAULT_BUILD_COMMAND: &str = "bundle exec rake build";

/// What a single step did
#[derive(Debug)]
enum StepEffect {
    Done(Option<String>),
    /// Nothing to do; later steps still run
    Skipped(String),
    /// Logged failure; later steps still run
    Failed(String),
    /// Systemic failure; stop the batch
    Abort(String),
}

/// Whether the batch goes on after a module
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Abort,
}

/// Drives a batch through the pipeline
pub struct Orchestrator {
    config: Config,
    credentials: Credentials,
    workspace: Workspace,
    pdk: Pdk,
    platform: Option<Box<dyn SourcePlatform>>,
    jenkins: Option<JenkinsClient>,
    gemfury: Option<GemfuryClient>,
    /// Refs of the gem under test, cloned once per run
    gem_refs: Option<GemRefs>,
    event_tx: Option<mpsc::Sender<SyncEvent>>,
    events: Vec<SyncEvent>,
}

impl Orchestrator {
    /// Staging under `config.staging_dir`, home at the current directory.
    pub fn new(config: Config, credentials: Credentials) -> Result<Self> {
        let workspace = Workspace::new(&config.staging_dir)?;
        Ok(Self::with_workspace(config, credentials, workspace))
    }

    pub fn with_workspace(config: Config, credentials: Credentials, workspace: Workspace) -> Self {
        let pdk = Pdk::from_config(&config);
        Self {
            config,
            credentials,
            workspace,
            pdk,
            platform: None,
            jenkins: None,
            gemfury: None,
            gem_refs: None,
            event_tx: None,
            events: Vec::new(),
        }
    }

    /// Use `client` instead of building one from the configuration.
    pub fn with_platform(mut self, client: Box<dyn SourcePlatform>) -> Self {
        self.platform = Some(client);
        self
    }

    pub fn with_jenkins(mut self, client: JenkinsClient) -> Self {
        self.jenkins = Some(client);
        self
    }

    pub fn with_gemfury(mut self, client: GemfuryClient) -> Self {
        self.gemfury = Some(client);
        self
    }

    /// Forward every event to `tx` as well as keeping it.
    pub fn with_event_channel(mut self, tx: mpsc::Sender<SyncEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Events emitted so far
    pub fn events(&self) -> &[SyncEvent] {
        &self.events
    }

    /// Warn when the local code generator is older than `wanted`.
    pub async fn check_tool_version(&self, wanted: &str) -> bool {
        self.pdk.check_version(wanted).await
    }

    /// Check that every module exists on the hosting platform.
    pub async fn validate_modules(&mut self, modules: &[String]) -> Result<()> {
        self.ensure_platform()?;
        let client = self.platform()?;
        let checked = platform::validate_modules_exist(client, &self.config.namespace, modules).await;
        if let Err(e) = &checked {
            tracing::error!("{}", e);
        }
        checked
    }

    /// Run `steps` over `modules`.
    ///
    /// Returns `Err` for setup errors and invalid labels. A batch stopped
    /// by a systemic failure returns `Ok` with an aborted report.
    pub async fn run(
        &mut self,
        steps: &StepSet,
        args: RunArgs,
        modules: &[String],
    ) -> Result<RunReport> {
        args.validate(
            steps,
            &self.config.branch_prefix,
            self.config.jenkins_server_url.as_deref(),
        )?;
        if modules.is_empty() && steps.module_steps().next().is_some() {
            let err = SyncError::EmptyModuleList(self.config.managed_modules.clone());
            tracing::error!("{}", err);
            return Err(err);
        }
        if let Err(e) = self.prepare_clients(steps, &args) {
            tracing::error!("{}", e);
            return Err(e);
        }
        self.workspace.ensure_root()?;

        let mut report = RunReport::default();
        tracing::info!(steps = %steps, modules = modules.len(), "Starting run");
        self.emit(SyncEvent::new(SyncEventKind::RunStarted).with_detail(steps.to_string()))
            .await;

        let mut flow = Flow::Continue;
        if steps.iter().any(|s| s.is_gem_step()) {
            flow = self.process_gem(steps, &args, &mut report).await?;
        }

        if flow == Flow::Continue {
            for module in modules {
                self.workspace.restore_home()?;
                let mut outcome = ModuleOutcome::new(module);
                self.emit(SyncEvent::new(SyncEventKind::ModuleStarted).for_module(module))
                    .await;
                tracing::info!(module = %module, "Processing module");

                flow = self
                    .process_module(module, steps, &args, &mut outcome, &mut report)
                    .await?;

                let mut finished = SyncEvent::new(SyncEventKind::ModuleFinished).for_module(module);
                if let Some(reason) = &outcome.stopped {
                    finished = finished.with_detail(reason.clone());
                }
                self.emit(finished).await;
                report.modules.push(outcome);
                if flow == Flow::Abort {
                    break;
                }
            }
        }

        self.workspace.restore_home()?;
        report.finish();
        let done = match &report.outcome {
            RunOutcome::Completed => SyncEvent::new(SyncEventKind::RunCompleted),
            RunOutcome::Aborted { step, module, reason } => {
                tracing::error!(module = %module, step = %step, "Run aborted: {}", reason);
                SyncEvent::new(SyncEventKind::RunAborted)
                    .for_module(module)
                    .for_step(*step)
                    .with_detail(reason.clone())
            }
        };
        self.emit(done).await;
        Ok(report)
    }

    // --- Private helpers ---

    async fn emit(&mut self, mut event: SyncEvent) {
        event.sequence = self.events.len() as u64 + 1;
        self.events.push(event.clone());
        if let Some(tx) = &self.event_tx {
            if tx.send(event).await.is_err() {
                tracing::debug!("Event receiver closed, keeping events locally");
                self.event_tx = None;
            }
        }
    }

    /// Build the clients the requested steps need. Missing credentials fail here.
    fn prepare_clients(&mut self, steps: &StepSet, args: &RunArgs) -> Result<()> {
        if steps.needs_platform() {
            self.ensure_platform()?;
        }
        if (steps.contains(Step::RunTestsJenkins) || steps.contains(Step::TestResultsJenkins))
            && self.jenkins.is_none()
        {
            let server = args
                .jenkins
                .jenkins_server_url
                .clone()
                .or_else(|| self.config.jenkins_server_url.clone())
                .unwrap_or_default();
            let (username, password) = self.credentials.jenkins()?;
            self.jenkins = Some(JenkinsClient::new(&server, username, password)?);
        }
        if steps.contains(Step::MultigemFileUpdate) {
            self.credentials.gemfury()?;
        }
        if steps.contains(Step::MultiGemTesting) && self.gemfury.is_none() {
            self.gemfury = Some(GemfuryClient::new(self.credentials.gemfury()?, None)?);
        }
        Ok(())
    }

    fn ensure_platform(&mut self) -> Result<()> {
        if self.platform.is_none() {
            let client = self
                .config
                .platform()?
                .create_client(&self.config, &self.credentials)?;
            self.platform = Some(client);
        }
        Ok(())
    }

    fn platform(&self) -> Result<&dyn SourcePlatform> {
        self.platform
            .as_deref()
            .ok_or_else(|| SyncError::MissingArgument("No hosting platform client configured".into()))
    }

    fn jenkins(&self) -> Result<&JenkinsClient> {
        self.jenkins
            .as_ref()
            .ok_or_else(|| SyncError::MissingArgument("No Jenkins client configured".into()))
    }

    fn gem_dir(&self, gem: &str) -> PathBuf {
        self.workspace
            .home()
            .join(&self.config.gem_staging_dir)
            .join(gem)
    }

    fn gemfury_user<'a>(&'a self, args: &'a RunArgs) -> &'a str {
        args.multigem
            .gemfury_username
            .as_deref()
            .unwrap_or(&self.config.namespace)
    }

    /// Gem steps run once per batch, before any module.
    async fn process_gem(
        &mut self,
        steps: &StepSet,
        args: &RunArgs,
        report: &mut RunReport,
    ) -> Result<Flow> {
        let gem = args.multigem.name();
        let mut outcome = ModuleOutcome::new(&gem);
        let mut flow = Flow::Continue;

        for step in steps.iter().filter(|s| s.is_gem_step()) {
            let result = self.execute_gem_step(step, &gem, args).await;
            self.workspace.restore_home()?;
            let (next, keep_going) = self.settle(step, &gem, result, &mut outcome, report).await?;
            flow = next;
            if !keep_going {
                break;
            }
        }
        report.modules.push(outcome);
        Ok(flow)
    }

    async fn execute_gem_step(&mut self, step: Step, gem: &str, args: &RunArgs) -> Result<StepEffect> {
        let gem_dir = self.gem_dir(gem);
        match step {
            Step::CloneGem => {
                reset_dir(&gem_dir)?;
                if let Some(parent) = gem_dir.parent() {
                    ensure_dir(parent)?;
                }
                let url = git::clone_url(&self.config.base_uri(), &self.config.namespace, gem);
                tracing::info!(gem = %gem, "Cloning {} to {}", url, gem_dir.display());
                git::clone_repository(&url, &gem_dir)?;
                Ok(StepEffect::Done(Some(gem_dir.display().to_string())))
            }
            Step::MultiGemTesting => {
                if !gem_dir.is_dir() {
                    return Err(SyncError::Gemfile(format!(
                        "Gem {} has not been cloned to {}",
                        gem,
                        gem_dir.display()
                    )));
                }
                let (file, old, new) = gemfile::bump_gem_version(&gem_dir)?;
                tracing::info!(gem = %gem, file = %file.display(), "Bumped version {} -> {}", old, new);

                let build = args
                    .multigem
                    .build_command
                    .as_deref()
                    .unwrap_or(DEFAULT_BUILD_COMMAND);
                let output = terminal::run(&gem_dir, build).await?;
                if let StepEffect::Abort(reason) = tool_effect(gem, output) {
                    return Ok(StepEffect::Abort(reason));
                }

                let package = gemfury::built_package(&gem_dir).ok_or_else(|| {
                    SyncError::Gemfile(format!("No built package found for {}", gem))
                })?;
                let client = self
                    .gemfury
                    .as_ref()
                    .ok_or_else(|| SyncError::MissingArgument("No gem server client configured".into()))?;
                client.upload(self.gemfury_user(args), &package).await?;
                Ok(StepEffect::Done(Some(new)))
            }
            _ => Ok(StepEffect::Skipped(format!("{} is not a gem step", step))),
        }
    }

    async fn process_module(
        &mut self,
        module: &str,
        steps: &StepSet,
        args: &RunArgs,
        outcome: &mut ModuleOutcome,
        report: &mut RunReport,
    ) -> Result<Flow> {
        let module_dir = self.workspace.module_dir(module);
        let mut module_args = ModuleArgs::from_run(args);

        if steps.contains(Step::Clone) {
            let cloned = match self.clone_module(module) {
                Ok(cloned) => cloned,
                Err(e) => {
                    tracing::error!(module = %module, "Unable to prepare {}: {}", module_dir.display(), e);
                    false
                }
            };
            if !cloned {
                outcome.record(Step::Clone, StepStatus::Failed, None);
                outcome.stop("clone failed");
                self.emit(
                    SyncEvent::new(SyncEventKind::StepFailed)
                        .for_module(module)
                        .for_step(Step::Clone),
                )
                .await;
                return Ok(Flow::Continue);
            }
            outcome.record(Step::Clone, StepStatus::Completed, None);
            self.emit(
                SyncEvent::new(SyncEventKind::StepCompleted)
                    .for_module(module)
                    .for_step(Step::Clone),
            )
            .await;
        }

        if !module_dir.is_dir() {
            tracing::warn!(
                module = %module,
                "Module directory {} does not exist, skipping",
                module_dir.display()
            );
            outcome.stop("module directory missing");
            return Ok(Flow::Continue);
        }

        for step in steps.module_steps().filter(|s| *s != Step::Clone) {
            let result = self
                .execute(step, module, &module_dir, args, &mut module_args, report)
                .await;
            self.workspace.restore_home()?;
            let (flow, keep_going) = self.settle(step, module, result, outcome, report).await?;
            if !keep_going {
                return Ok(flow);
            }
        }
        Ok(Flow::Continue)
    }

    /// Record one step's result. Returns the batch flow and whether this
    /// module's remaining steps should run.
    async fn settle(
        &mut self,
        step: Step,
        module: &str,
        result: Result<StepEffect>,
        outcome: &mut ModuleOutcome,
        report: &mut RunReport,
    ) -> Result<(Flow, bool)> {
        let event = |kind| SyncEvent::new(kind).for_module(module).for_step(step);
        match result {
            Ok(StepEffect::Done(detail)) => {
                tracing::debug!(module = %module, step = %step, "Step completed");
                let mut ev = event(if step == Step::CreatePr {
                    SyncEventKind::PullRequestCreated
                } else {
                    SyncEventKind::StepCompleted
                });
                if let Some(d) = &detail {
                    ev = ev.with_detail(d.clone());
                }
                outcome.record(step, StepStatus::Completed, detail);
                self.emit(ev).await;
                Ok((Flow::Continue, true))
            }
            Ok(StepEffect::Skipped(reason)) => {
                tracing::info!(module = %module, step = %step, "Skipped: {}", reason);
                self.emit(event(SyncEventKind::StepSkipped).with_detail(reason.clone()))
                    .await;
                outcome.record(step, StepStatus::Skipped, Some(reason));
                Ok((Flow::Continue, true))
            }
            Ok(StepEffect::Failed(reason)) => {
                self.emit(event(SyncEventKind::StepFailed).with_detail(reason.clone()))
                    .await;
                outcome.record(step, StepStatus::Failed, Some(reason));
                Ok((Flow::Continue, true))
            }
            Ok(StepEffect::Abort(reason)) => {
                tracing::error!(module = %module, step = %step, "{}", reason);
                self.emit(event(SyncEventKind::StepFailed).with_detail(reason.clone()))
                    .await;
                outcome.record(step, StepStatus::Failed, Some(reason.clone()));
                outcome.stop(reason.clone());
                report.abort(step, module, reason);
                Ok((Flow::Abort, false))
            }
            Err(e) => {
                tracing::error!(module = %module, step = %step, "{}", e);
                let reason = e.to_string();
                self.emit(event(SyncEventKind::StepFailed).with_detail(reason.clone()))
                    .await;
                outcome.record(step, StepStatus::Failed, Some(reason.clone()));
                match e.class() {
                    ErrorClass::Transient => Ok((Flow::Continue, true)),
                    ErrorClass::Data => {
                        outcome.stop(reason);
                        Ok((Flow::Continue, false))
                    }
                    ErrorClass::Setup => Err(e),
                    ErrorClass::Systemic => {
                        if matches!(e, SyncError::InvalidLabel { .. }) {
                            return Err(e);
                        }
                        outcome.stop(reason.clone());
                        report.abort(step, module, reason);
                        Ok((Flow::Abort, false))
                    }
                }
            }
        }
    }

    /// Fresh clone into the module directory. `Ok(false)` when the clone failed.
    fn clone_module(&self, module: &str) -> Result<bool> {
        let dest = self.workspace.reset_module_dir(module)?;
        let repo = git::clone_module(
            &self.config.base_uri(),
            &self.config.namespace,
            module,
            &dest,
        );
        Ok(repo.is_some())
    }

    async fn execute(
        &mut self,
        step: Step,
        module: &str,
        dir: &Path,
        args: &RunArgs,
        module_args: &mut ModuleArgs,
        report: &mut RunReport,
    ) -> Result<StepEffect> {
        match step {
            Step::PdkConvert => Ok(tool_effect(module, self.pdk.convert(dir).await?)),
            Step::PdkValidate => Ok(tool_effect(module, self.pdk.validate(dir).await?)),
            Step::RunACommand => {
                let command = args.command.command.as_deref().unwrap_or_default();
                match terminal::run_command(dir, command, args.command.mode).await? {
                    RunResult::Completed(output) => Ok(tool_effect(module, output)),
                    RunResult::Detached(handle) => {
                        let detail = format!("pid {}", handle.pid);
                        report.background.push(handle);
                        Ok(StepEffect::Done(Some(detail)))
                    }
                }
            }
            Step::GemFileUpdate => {
                self.validate_gem_refs(&args.gemfile)?;
                gemfile::update_gemfile(dir, &args.gemfile)?;
                Ok(StepEffect::Done(None))
            }
            Step::MultigemFileUpdate => {
                let token = self.credentials.gemfury()?;
                let source = gemfury::source_url(&token, self.gemfury_user(args));
                gemfile::update_gemfile_multigem(dir, &args.multigem.name(), &source)?;
                Ok(StepEffect::Done(None))
            }
            Step::NormalizeMetadata => {
                let mut metadata = ModuleMetadata::load(dir)?;
                metadata.normalize_os_list()?;
                metadata.save()?;
                Ok(StepEffect::Done(None))
            }
            Step::AddPlatform | Step::RemovePlatform => {
                let os = args.platform.os.as_deref().unwrap_or_default();
                let version = args.platform.version.as_deref().unwrap_or_default();
                let mut metadata = ModuleMetadata::load(dir)?;
                if step == Step::AddPlatform {
                    metadata.add_platform(os, version)?;
                } else {
                    metadata.remove_platform(os, version)?;
                }
                metadata.save()?;
                Ok(StepEffect::Done(Some(format!("{} {}", os, version))))
            }
            Step::UpdateRequirements => {
                let req = &args.requirement;
                let mut metadata = ModuleMetadata::load(dir)?;
                metadata.update_requirement(
                    req.name.as_deref().unwrap_or_default(),
                    req.key.as_deref().unwrap_or_default(),
                    req.value.as_deref().unwrap_or_default(),
                )?;
                metadata.save()?;
                Ok(StepEffect::Done(None))
            }
            Step::ReleaseChecks => {
                let checks = &args.release_checks;
                let file = checks.platforms_file.as_deref().unwrap_or(Path::new(""));
                let platforms = provision::load_agent_platforms(&self.workspace.home().join(file))?;
                let images = provision::generate_release_checks(
                    dir,
                    &platforms,
                    checks.puppet_version.as_deref().unwrap_or_default(),
                )?;
                Ok(StepEffect::Done(Some(images.join(", "))))
            }
            Step::RunTestsLocally => {
                let tests = &args.tests;
                let started = acceptance::run_tests_locally(
                    dir,
                    module,
                    tests.provision_type.as_deref().unwrap_or_default(),
                    tests.puppet_collection.as_deref(),
                )?;
                match started {
                    Some(handle) => {
                        let detail = format!("pid {}", handle.pid);
                        report.background.push(handle);
                        Ok(StepEffect::Done(Some(detail)))
                    }
                    None => Ok(StepEffect::Skipped("not a litmus module".into())),
                }
            }
            Step::FetchTestResultsLocally => {
                let (status, output) = acceptance::fetch_test_results(dir, module);
                report.test_rows.push(TestRow {
                    module: module.to_string(),
                    status: status.to_string(),
                    detail: output.display().to_string(),
                });
                Ok(StepEffect::Done(Some(status.to_string())))
            }
            Step::PdkUpdate => {
                let (template_ref, output) = self.pdk.update(dir).await?;
                module_args.template_ref = Some(template_ref);
                Ok(tool_effect(module, output))
            }
            Step::UsePdkRef => {
                let reference = ModuleMetadata::load(dir)
                    .and_then(|m| m.template_ref())
                    .ok()
                    .or_else(|| module_args.template_ref.clone())
                    .unwrap_or_else(|| self.config.effective_templates_ref());
                module_args.apply_ref(&reference, args.pr.additional_title.as_deref());
                Ok(StepEffect::Done(Some(reference)))
            }
            Step::UseGemRef => {
                let reference = args.gem_ref();
                if reference.is_empty() {
                    return Ok(StepEffect::Skipped("no gem ref to derive names from".into()));
                }
                module_args.apply_ref(&reference, args.pr.additional_title.as_deref());
                Ok(StepEffect::Done(Some(reference)))
            }
            Step::CreateCommit => {
                let suffix = module_args.branch_name.as_deref().unwrap_or_default();
                let message = module_args.commit_message.as_deref().unwrap_or_default();
                let repo = git::open(dir)?;
                match git::create_commit(&repo, &self.config.branch_prefix, suffix, message)? {
                    Some(oid) => Ok(StepEffect::Done(Some(oid.to_string()))),
                    None => Ok(StepEffect::Skipped("no changes to commit".into())),
                }
            }
            Step::Push => {
                let remote = &self.config.push_remote;
                let upstream = format!("{}/{}", remote, self.config.pr_target_branch);
                let repo = git::open(dir)?;
                let branch = git::current_branch(&repo)?;
                if !git::diff_nonempty(&repo, &branch, &upstream)? {
                    return Ok(StepEffect::Skipped(format!("no diff against {}", upstream)));
                }
                git::push(&repo, remote, &branch)?;
                Ok(StepEffect::Done(Some(branch)))
            }
            Step::CreatePr => self.create_pr(module, dir, args, module_args, report).await,
            Step::CleanBranches => {
                let branch = args.clean.branch_name.as_deref().unwrap_or_default();
                let full_name = self.config.full_name(module);
                if platform::delete_branch(self.platform()?, &full_name, branch).await {
                    Ok(StepEffect::Done(Some(branch.to_string())))
                } else {
                    Ok(StepEffect::Failed(format!("unable to delete {}", branch)))
                }
            }
            Step::RunTestsJenkins => {
                if provision::is_litmus_module(dir) {
                    return Ok(StepEffect::Skipped(
                        "litmus module, use run_tests_locally".into(),
                    ));
                }
                let jenkins = &args.jenkins;
                let user = jenkins
                    .github_user
                    .as_deref()
                    .unwrap_or(&self.config.namespace);
                let job = self
                    .jenkins()?
                    .create_adhoc_job(
                        module,
                        jenkins.github_branch.as_deref().unwrap_or_default(),
                        user,
                    )
                    .await?;
                job.save(dir)?;
                Ok(StepEffect::Done(Some(format!("{} #{}", job.job_name, job.build_id))))
            }
            Step::TestResultsJenkins => {
                let job = JenkinsJob::load(dir)?;
                let results = self.jenkins()?.test_results(&job, dir).await?;
                let status = jenkins_status(results.state);
                report.test_rows.push(TestRow {
                    module: module.to_string(),
                    status: status.to_string(),
                    detail: results.results_file.display().to_string(),
                });
                Ok(StepEffect::Done(Some(status.to_string())))
            }
            Step::Clone | Step::CloneGem | Step::MultiGemTesting => {
                Ok(StepEffect::Skipped(format!("{} does not run per step", step)))
            }
        }
    }

    /// Validate replacers against the gem's repository, cloning it once.
    fn validate_gem_refs(&mut self, update: &GemfileUpdate) -> Result<()> {
        let has_replacers = update.gem_line.is_some()
            || update.gem_sha_replacer.is_some()
            || update.gem_version_replacer.is_some()
            || update.gem_branch_replacer.is_some();
        if !has_replacers {
            return Ok(());
        }
        if self.gem_refs.is_none() {
            let gem = update.gem_name();
            let dest = self.gem_dir(&gem);
            reset_dir(&dest)?;
            if let Some(parent) = dest.parent() {
                ensure_dir(parent)?;
            }
            let url = update.source_url(&self.config.base_uri(), &self.config.namespace);
            tracing::info!(gem = %gem, "Cloning {} to validate Gemfile changes", url);
            let repo = git::clone_repository(&url, &dest)?;
            self.gem_refs = Some(GemRefs::from_repo(&repo)?);
        }
        match &self.gem_refs {
            Some(refs) => update.validate_against(refs),
            None => Ok(()),
        }
    }

    async fn create_pr(
        &self,
        module: &str,
        dir: &Path,
        args: &RunArgs,
        module_args: &ModuleArgs,
        report: &mut RunReport,
    ) -> Result<StepEffect> {
        let client = self.platform()?;
        let full_name = self.config.full_name(module);

        let label = platform::effective_label(args.pr.label.as_deref(), &self.config.default_label);
        if let Some(label) = &label {
            if !platform::check_label_exists(client, &full_name, label).await {
                return Err(SyncError::InvalidLabel {
                    repo: full_name,
                    label: label.clone(),
                });
            }
        }

        let upstream = format!("{}/{}", self.config.push_remote, self.config.pr_target_branch);
        let branch = {
            let repo = git::open(dir)?;
            let branch = git::current_branch(&repo)?;
            if !git::diff_nonempty(&repo, &branch, &upstream)? {
                return Ok(StepEffect::Skipped(format!("no diff against {}", upstream)));
            }
            branch
        };

        let tool_version = ModuleMetadata::load(dir)
            .and_then(|m| m.tool_version())
            .unwrap_or_else(|_| "unknown".to_string());
        let template_ref = module_args
            .template_ref
            .clone()
            .unwrap_or_else(|| self.config.effective_templates_ref());
        let (title, body) =
            pull_request_text(module_args.pr_title.as_deref(), &tool_version, &template_ref);

        let pr = match client
            .create_pull_request(
                &full_name,
                &self.config.pr_target_branch,
                &branch,
                &title,
                &body,
            )
            .await
        {
            Ok(pr) => pr,
            Err(e) => {
                let err = SyncError::PullRequestFailed(full_name);
                return Ok(StepEffect::Abort(format!("{}. {}", err, e)));
            }
        };

        if let Some(label) = &label {
            platform::add_label(client, &full_name, pr.id, label).await;
        }
        tracing::info!(module = %module, url = %pr.url, "Pull request created");
        report.pull_requests.push(pr.url.clone());
        Ok(StepEffect::Done(Some(pr.url)))
    }
}

/// Map a tool's exit status onto a step effect. Non-zero stops the batch.
fn tool_effect(module: &str, output: CommandOutput) -> StepEffect {
    if output.success() {
        StepEffect::Done(None)
    } else {
        let err = SyncError::ToolFailed {
            module: module.to_string(),
            command: output.command,
            status: output.status,
        };
        StepEffect::Abort(err.to_string())
    }
}

/// Title and body for the pull request.
fn pull_request_text(pr_title: Option<&str>, tool_version: &str, template_ref: &str) -> (String, String) {
    match pr_title.filter(|t| !t.is_empty()) {
        Some(title) => (
            format!("pdksync - {}", title),
            format!("{}\npdk version: `{}` \n", title, tool_version),
        ),
        None => (
            format!("pdksync - Update using {}", tool_version),
            format!(
                "pdk version: `{}` \n pdk template ref: `{}`",
                tool_version, template_ref
            ),
        ),
    }
}

fn jenkins_status(state: JobState) -> &'static str {
    match state {
        JobState::Success => "SUCCESS",
        JobState::Failed => "FAILED",
        JobState::Aborted => "ABORTED",
        JobState::InProgress => "IN PROGRESS",
    }
}
