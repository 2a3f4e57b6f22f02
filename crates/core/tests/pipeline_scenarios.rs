//! End-to-end runs of the orchestrator against local bare repositories.

mod common;

use common::{
    orchestrator, orchestrator_with_credentials, seed_remote, test_config, write_tool,
    RecordingPlatform,
};
use git2::Repository;
use modsync_core::pipeline::{RunArgs, RunOutcome, Step, StepSet, StepStatus, SyncEventKind};
use modsync_core::{Credentials, SyncError};
use tempfile::TempDir;
use tokio::sync::mpsc;

const MODULE: &str = "puppetlabs-testing";

fn modules(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

fn steps(names: &[&str]) -> StepSet {
    StepSet::parse(names).unwrap()
}

/// Args for a full change-commit-push-PR cycle
fn change_args(command: &str) -> RunArgs {
    RunArgs::from_pairs([
        ("command", command),
        ("branch_name", "temp_branch"),
        ("commit_message", "kittens in mittens"),
        ("pr_title", "kittens in mittens"),
    ])
    .unwrap()
}

#[tokio::test]
async fn test_clone_creates_staging_and_module_dirs() {
    let tmp = TempDir::new().unwrap();
    seed_remote(tmp.path(), MODULE, &[("README.md", "hello\n")]);
    let config = test_config(tmp.path());
    let staging = config.staging_dir.clone();

    let mut orch = orchestrator(config, RecordingPlatform::default());
    let report = orch
        .run(&steps(&["clone"]), RunArgs::default(), &modules(&[MODULE]))
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert!(staging.is_dir());
    assert!(staging.join(MODULE).is_dir());
    assert!(staging.join(MODULE).join("README.md").is_file());
}

#[tokio::test]
async fn test_clone_twice_matches_fresh_clone() {
    let tmp = TempDir::new().unwrap();
    seed_remote(tmp.path(), MODULE, &[("README.md", "hello\n")]);
    let config = test_config(tmp.path());
    let module_dir = config.staging_dir.join(MODULE);

    let mut orch = orchestrator(config, RecordingPlatform::default());
    orch.run(&steps(&["clone"]), RunArgs::default(), &modules(&[MODULE]))
        .await
        .unwrap();
    std::fs::write(module_dir.join("leftover.txt"), "stale").unwrap();

    orch.run(&steps(&["clone"]), RunArgs::default(), &modules(&[MODULE]))
        .await
        .unwrap();

    let mut entries: Vec<String> = std::fs::read_dir(&module_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    entries.sort();
    assert_eq!(entries, vec![".git".to_string(), "README.md".to_string()]);
}

#[tokio::test]
async fn test_commit_scenario_records_message() {
    let tmp = TempDir::new().unwrap();
    seed_remote(tmp.path(), MODULE, &[("README.md", "hello\n")]);
    let config = test_config(tmp.path());
    let module_dir = config.staging_dir.join(MODULE);

    let mut orch = orchestrator(config, RecordingPlatform::default());
    orch.run(&steps(&["clone"]), RunArgs::default(), &modules(&[MODULE]))
        .await
        .unwrap();
    std::fs::write(module_dir.join("CHANGELOG.md"), "changed\n").unwrap();

    let args = RunArgs::from_pairs([
        ("branch_name", "temp_branch"),
        ("commit_message", "kittens in mittens"),
    ])
    .unwrap();
    let report = orch
        .run(&steps(&["create_commit"]), args, &modules(&[MODULE]))
        .await
        .unwrap();

    let outcome = report.module(MODULE).unwrap();
    assert_eq!(outcome.status_of(Step::CreateCommit), Some(StepStatus::Completed));
    let repo = Repository::open(&module_dir).unwrap();
    let head = repo.head().unwrap();
    assert_eq!(head.shorthand(), Some("pdksync_temp_branch"));
    let message = head.peel_to_commit().unwrap().message().unwrap().to_string();
    assert!(message.contains("kittens in mittens"));
}

#[tokio::test]
async fn test_missing_commit_arguments_fail_before_any_module() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let staging = config.staging_dir.clone();

    let mut orch = orchestrator(config, RecordingPlatform::default());
    let err = orch
        .run(&steps(&["create_commit"]), RunArgs::default(), &modules(&[MODULE]))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("Needs a branch_name and commit_message"));
    assert!(!staging.exists());
}

#[tokio::test]
async fn test_unchanged_module_gets_no_commit_push_or_pr() {
    let tmp = TempDir::new().unwrap();
    seed_remote(tmp.path(), MODULE, &[("README.md", "hello\n")]);
    let config = test_config(tmp.path());
    let module_dir = config.staging_dir.join(MODULE);
    let platform = RecordingPlatform::default();

    let mut orch = orchestrator(config, platform.clone());
    let report = orch
        .run(
            &steps(&["clone", "create_commit", "push", "create_pr"]),
            change_args("true"),
            &modules(&[MODULE]),
        )
        .await
        .unwrap();

    let outcome = report.module(MODULE).unwrap();
    assert_eq!(outcome.status_of(Step::CreateCommit), Some(StepStatus::Skipped));
    assert_eq!(outcome.status_of(Step::Push), Some(StepStatus::Skipped));
    assert_eq!(outcome.status_of(Step::CreatePr), Some(StepStatus::Skipped));
    assert!(platform.created().is_empty());
    assert!(report.pull_requests.is_empty());

    let repo = Repository::open(&module_dir).unwrap();
    let message = repo.head().unwrap().peel_to_commit().unwrap().message().unwrap().to_string();
    assert_eq!(message.trim(), "init");
}

#[tokio::test]
async fn test_full_cycle_opens_pull_request() {
    let tmp = TempDir::new().unwrap();
    seed_remote(tmp.path(), MODULE, &[("README.md", "hello\n")]);
    let config = test_config(tmp.path());
    let platform = RecordingPlatform::default();

    let mut orch = orchestrator(config, platform.clone());
    let report = orch
        .run(
            &steps(&["clone", "run_a_command", "create_commit", "push", "create_pr"]),
            change_args("echo new > NEW.md"),
            &modules(&[MODULE]),
        )
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    let created = platform.created();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].repo, format!("ns/{}", MODULE));
    assert_eq!(created[0].source, "pdksync_temp_branch");
    assert_eq!(created[0].target, "master");
    assert_eq!(created[0].title, "pdksync - kittens in mittens");
    assert_eq!(report.pull_requests.len(), 1);

    let remote = Repository::open_bare(tmp.path().join("ns").join(format!("{}.git", MODULE))).unwrap();
    assert!(remote
        .find_branch("pdksync_temp_branch", git2::BranchType::Local)
        .is_ok());
}

#[tokio::test]
async fn test_step_order_is_canonical() {
    let mut recorded = Vec::new();
    for order in [
        vec!["create_pr", "push", "create_commit", "run_a_command", "clone"],
        vec!["clone", "run_a_command", "create_commit", "push", "create_pr"],
    ] {
        let tmp = TempDir::new().unwrap();
        seed_remote(tmp.path(), MODULE, &[("README.md", "hello\n")]);
        let platform = RecordingPlatform::default();
        let mut orch = orchestrator(test_config(tmp.path()), platform.clone());
        let report = orch
            .run(&steps(&order), change_args("echo new > NEW.md"), &modules(&[MODULE]))
            .await
            .unwrap();

        let sequence: Vec<(Step, StepStatus)> = report
            .module(MODULE)
            .unwrap()
            .steps
            .iter()
            .map(|r| (r.step, r.status))
            .collect();
        recorded.push((sequence, platform.created().len()));
    }

    assert_eq!(recorded[0], recorded[1]);
    assert_eq!(recorded[0].1, 1);
    assert_eq!(
        recorded[0].0.iter().map(|(s, _)| *s).collect::<Vec<_>>(),
        vec![
            Step::Clone,
            Step::RunACommand,
            Step::CreateCommit,
            Step::Push,
            Step::CreatePr
        ]
    );
}

#[tokio::test]
async fn test_failed_clone_does_not_stop_later_modules() {
    let tmp = TempDir::new().unwrap();
    seed_remote(tmp.path(), "puppetlabs-present", &[("README.md", "hello\n")]);
    let platform = RecordingPlatform::default();

    let mut orch = orchestrator(test_config(tmp.path()), platform.clone());
    let report = orch
        .run(
            &steps(&["clone", "run_a_command", "create_commit", "push", "create_pr"]),
            change_args("echo new > NEW.md"),
            &modules(&["puppetlabs-missing", "puppetlabs-present"]),
        )
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    let missing = report.module("puppetlabs-missing").unwrap();
    assert_eq!(missing.status_of(Step::Clone), Some(StepStatus::Failed));
    assert!(missing.stopped.is_some());
    assert_eq!(missing.status_of(Step::RunACommand), None);

    let created = platform.created();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].repo, "ns/puppetlabs-present");
}

#[tokio::test]
async fn test_invalid_label_raises_before_pull_request() {
    let tmp = TempDir::new().unwrap();
    seed_remote(tmp.path(), MODULE, &[("README.md", "hello\n")]);
    let platform = RecordingPlatform::with_labels(&["maintenance", "bugfix"]);

    let mut args = change_args("echo new > NEW.md");
    args.set("label", "doot doot".into()).unwrap();
    let mut orch = orchestrator(test_config(tmp.path()), platform.clone());
    let err = orch
        .run(
            &steps(&["clone", "run_a_command", "create_commit", "push", "create_pr"]),
            args,
            &modules(&[MODULE]),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::InvalidLabel { ref label, .. } if label == "doot doot"));
    assert!(platform.created().is_empty());
}

#[tokio::test]
async fn test_valid_label_is_applied() {
    let tmp = TempDir::new().unwrap();
    seed_remote(tmp.path(), MODULE, &[("README.md", "hello\n")]);
    let platform = RecordingPlatform::with_labels(&["maintenance"]);
    let mut config = test_config(tmp.path());
    config.default_label = "maintenance".to_string();

    let mut orch = orchestrator(config, platform.clone());
    orch.run(
        &steps(&["clone", "run_a_command", "create_commit", "push", "create_pr"]),
        change_args("echo new > NEW.md"),
        &modules(&[MODULE]),
    )
    .await
    .unwrap();

    let labels = platform.labels_set();
    assert_eq!(labels.len(), 1);
    assert_eq!(labels[0].2, vec!["maintenance".to_string()]);
}

#[tokio::test]
async fn test_empty_label_disables_labelling() {
    let tmp = TempDir::new().unwrap();
    seed_remote(tmp.path(), MODULE, &[("README.md", "hello\n")]);
    let platform = RecordingPlatform::with_labels(&["maintenance"]);
    let mut config = test_config(tmp.path());
    config.default_label = "maintenance".to_string();

    let mut args = change_args("echo new > NEW.md");
    args.set("label", String::new()).unwrap();
    let mut orch = orchestrator(config, platform.clone());
    let report = orch
        .run(
            &steps(&["clone", "run_a_command", "create_commit", "push", "create_pr"]),
            args,
            &modules(&[MODULE]),
        )
        .await
        .unwrap();

    assert_eq!(report.pull_requests.len(), 1);
    assert_eq!(platform.labels_listed(), 0);
    assert!(platform.labels_set().is_empty());
}

#[tokio::test]
async fn test_failing_command_aborts_batch() {
    let tmp = TempDir::new().unwrap();
    seed_remote(tmp.path(), "puppetlabs-a", &[("README.md", "a\n")]);
    seed_remote(tmp.path(), "puppetlabs-b", &[("README.md", "b\n")]);

    let mut orch = orchestrator(test_config(tmp.path()), RecordingPlatform::default());
    let report = orch
        .run(
            &steps(&["clone", "run_a_command"]),
            RunArgs::from_pairs([("command", "exit 3")]).unwrap(),
            &modules(&["puppetlabs-a", "puppetlabs-b"]),
        )
        .await
        .unwrap();

    assert!(report.is_aborted());
    match &report.outcome {
        RunOutcome::Aborted { step, module, .. } => {
            assert_eq!(*step, Step::RunACommand);
            assert_eq!(module, "puppetlabs-a");
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(report.module("puppetlabs-b").is_none());
}

#[tokio::test]
async fn test_pull_request_failure_aborts_batch() {
    let tmp = TempDir::new().unwrap();
    seed_remote(tmp.path(), "puppetlabs-a", &[("README.md", "a\n")]);
    seed_remote(tmp.path(), "puppetlabs-b", &[("README.md", "b\n")]);
    let platform = RecordingPlatform {
        fail_pull_requests: true,
        ..Default::default()
    };

    let mut orch = orchestrator(test_config(tmp.path()), platform);
    let report = orch
        .run(
            &steps(&["clone", "run_a_command", "create_commit", "push", "create_pr"]),
            change_args("echo new > NEW.md"),
            &modules(&["puppetlabs-a", "puppetlabs-b"]),
        )
        .await
        .unwrap();

    assert!(report.is_aborted());
    assert_eq!(report.modules.len(), 1);
    assert!(report.pull_requests.is_empty());
}

#[tokio::test]
async fn test_metadata_steps_edit_cloned_module() {
    let tmp = TempDir::new().unwrap();
    let metadata = r#"{
  "name": "puppetlabs-testing",
  "operatingsystem_support": [
    { "operatingsystem": "windows", "operatingsystemrelease": ["Server 2012 R2"] },
    { "operatingsystem": "RedHat", "operatingsystemrelease": ["7"] }
  ]
}
"#;
    seed_remote(tmp.path(), MODULE, &[("metadata.json", metadata)]);
    let config = test_config(tmp.path());
    let module_dir = config.staging_dir.join(MODULE);

    let args = RunArgs::from_pairs([("os", "RedHat"), ("version", "8")]).unwrap();
    let mut orch = orchestrator(config, RecordingPlatform::default());
    let report = orch
        .run(
            &steps(&["normalize_metadata", "clone", "add_platform"]),
            args,
            &modules(&[MODULE]),
        )
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(module_dir.join("metadata.json")).unwrap())
            .unwrap();
    let support = written["operatingsystem_support"].as_array().unwrap();
    assert_eq!(support[0]["operatingsystem"], "Windows");
    assert_eq!(support[0]["operatingsystemrelease"][0], "2012 R2");
    assert_eq!(support[1]["operatingsystemrelease"], serde_json::json!(["7", "8"]));
}

#[tokio::test]
async fn test_missing_metadata_stops_only_that_module() {
    let tmp = TempDir::new().unwrap();
    seed_remote(tmp.path(), "puppetlabs-a", &[("README.md", "a\n")]);
    seed_remote(
        tmp.path(),
        "puppetlabs-b",
        &[("metadata.json", "{\"operatingsystem_support\": []}\n")],
    );

    let mut orch = orchestrator(test_config(tmp.path()), RecordingPlatform::default());
    let report = orch
        .run(
            &steps(&["clone", "normalize_metadata"]),
            RunArgs::default(),
            &modules(&["puppetlabs-a", "puppetlabs-b"]),
        )
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    let a = report.module("puppetlabs-a").unwrap();
    assert_eq!(a.status_of(Step::NormalizeMetadata), Some(StepStatus::Failed));
    let b = report.module("puppetlabs-b").unwrap();
    assert_eq!(b.status_of(Step::NormalizeMetadata), Some(StepStatus::Completed));
}

#[tokio::test]
async fn test_events_bracket_the_run() {
    let tmp = TempDir::new().unwrap();
    seed_remote(tmp.path(), MODULE, &[("README.md", "hello\n")]);
    let (tx, mut rx) = mpsc::channel(64);

    let mut orch = orchestrator(test_config(tmp.path()), RecordingPlatform::default())
        .with_event_channel(tx);
    orch.run(&steps(&["clone"]), RunArgs::default(), &modules(&[MODULE]))
        .await
        .unwrap();
    drop(orch);

    let mut kinds = Vec::new();
    while let Some(event) = rx.recv().await {
        kinds.push(event.kind);
    }
    assert_eq!(kinds.first(), Some(&SyncEventKind::RunStarted));
    assert_eq!(kinds.last(), Some(&SyncEventKind::RunCompleted));
    assert!(kinds.contains(&SyncEventKind::ModuleStarted));
    assert!(kinds.contains(&SyncEventKind::StepCompleted));
}

#[tokio::test]
async fn test_clean_branches_deletes_prefixed_branch() {
    let tmp = TempDir::new().unwrap();
    seed_remote(tmp.path(), MODULE, &[("README.md", "hello\n")]);
    let platform = RecordingPlatform::default();

    let mut orch = orchestrator(test_config(tmp.path()), platform.clone());
    let report = orch
        .run(
            &steps(&["clone", "clean_branches"]),
            RunArgs::from_pairs([("branch_name", "pdksync_old")]).unwrap(),
            &modules(&[MODULE]),
        )
        .await
        .unwrap();

    assert_eq!(
        report.module(MODULE).unwrap().status_of(Step::CleanBranches),
        Some(StepStatus::Completed)
    );
    let deleted = platform.record.lock().unwrap().deleted.clone();
    assert_eq!(deleted, vec![(format!("ns/{}", MODULE), "pdksync_old".to_string())]);
}

#[tokio::test]
async fn test_pdk_ref_names_branch_commit_and_title() {
    let tmp = TempDir::new().unwrap();
    let metadata = r#"{
  "name": "puppetlabs-testing",
  "pdk-version": "2.7.1",
  "template-url": "https://github.com/puppetlabs/pdk-templates#main",
  "template-ref": "2.7.1-0-g1234567"
}
"#;
    seed_remote(tmp.path(), MODULE, &[("metadata.json", metadata)]);
    let mut config = test_config(tmp.path());
    config.tool_path = Some(write_tool(tmp.path(), "pdk", r#"echo "$@" > PDK_ARGS.txt"#));
    let module_dir = config.staging_dir.join(MODULE);
    let platform = RecordingPlatform::default();
    let home = std::env::current_dir().unwrap();

    let args = RunArgs::from_pairs([
        ("branch_name", "{ref}"),
        ("commit_message", "pdksync_{ref}"),
        ("pr_title", "{ref}"),
        ("additional_title", "(CAT-1)"),
    ])
    .unwrap();
    let mut orch = orchestrator(config, platform.clone());
    let report = orch
        .run(
            &steps(&["clone", "pdk_update", "use_pdk_ref", "create_commit", "push", "create_pr"]),
            args,
            &modules(&[MODULE]),
        )
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    let tool_args = std::fs::read_to_string(module_dir.join("PDK_ARGS.txt")).unwrap();
    assert_eq!(tool_args.trim(), "update --force --template-ref=main");

    let repo = Repository::open(&module_dir).unwrap();
    let head = repo.head().unwrap();
    assert_eq!(head.shorthand(), Some("pdksync_2.7.1-0-g1234567"));
    let message = head.peel_to_commit().unwrap().message().unwrap().to_string();
    assert!(message.contains("pdksync_2.7.1-0-g1234567"));

    let created = platform.created();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].source, "pdksync_2.7.1-0-g1234567");
    assert_eq!(created[0].title, "pdksync - (CAT-1) 2.7.1-0-g1234567");
    assert!(created[0].body.contains("pdk version: `2.7.1`"));
    assert_eq!(std::env::current_dir().unwrap(), home);
}

#[tokio::test]
async fn test_gem_ref_updates_gemfile_and_names_branch() {
    let tmp = TempDir::new().unwrap();
    seed_remote(tmp.path(), "puppet_litmus", &[("README.md", "litmus\n")]);
    let gemfile = "source 'https://rubygems.org'\n\
gem 'puppet_litmus', git: 'https://github.com/puppetlabs/puppet_litmus', branch: 'main'\n";
    seed_remote(tmp.path(), MODULE, &[("Gemfile", gemfile)]);
    let config = test_config(tmp.path());
    let module_dir = config.staging_dir.join(MODULE);
    let gem_dir = config.gem_staging_dir.join("puppet_litmus");
    let platform = RecordingPlatform::default();

    let args = RunArgs::from_pairs([
        ("gem_to_test", "puppet_litmus"),
        ("gem_branch_finder", "main"),
        ("gem_branch_replacer", "master"),
        ("branch_name", "gem_testing{ref}"),
        ("commit_message", "Test against {ref}"),
        ("pr_title", "puppet_litmus {ref}"),
        ("additional_title", "[gem]"),
    ])
    .unwrap();
    let mut orch = orchestrator(config, platform.clone());
    let report = orch
        .run(
            &steps(&["clone", "gem_file_update", "use_gem_ref", "create_commit", "push", "create_pr"]),
            args,
            &modules(&[MODULE]),
        )
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert!(gem_dir.join(".git").is_dir());
    let written = std::fs::read_to_string(module_dir.join("Gemfile")).unwrap();
    assert!(written.contains("branch: 'master'"));
    assert!(!written.contains("branch: 'main'"));

    let created = platform.created();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].source, "pdksync_gem_testingmaster");
    assert_eq!(created[0].title, "pdksync - [gem] puppet_litmus master");
}

#[tokio::test]
async fn test_unknown_gem_branch_stops_only_that_module() {
    let tmp = TempDir::new().unwrap();
    seed_remote(tmp.path(), "puppet_litmus", &[("README.md", "litmus\n")]);
    seed_remote(tmp.path(), MODULE, &[("Gemfile", "gem 'puppet_litmus', branch: 'main'\n")]);

    let args = RunArgs::from_pairs([
        ("gem_to_test", "puppet_litmus"),
        ("gem_branch_finder", "main"),
        ("gem_branch_replacer", "no-such-branch"),
    ])
    .unwrap();
    let mut orch = orchestrator(test_config(tmp.path()), RecordingPlatform::default());
    let report = orch
        .run(&steps(&["clone", "gem_file_update"]), args, &modules(&[MODULE]))
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    let outcome = report.module(MODULE).unwrap();
    assert_eq!(outcome.status_of(Step::GemFileUpdate), Some(StepStatus::Failed));
    assert!(outcome.stopped.as_deref().unwrap().contains("no-such-branch"));
}

#[tokio::test]
async fn test_multigem_file_update_points_gem_at_private_source() {
    let tmp = TempDir::new().unwrap();
    let gemfile = "source 'https://rubygems.org'\ngem 'rake'\ngem 'puppet_litmus'\n";
    seed_remote(tmp.path(), MODULE, &[("Gemfile", gemfile)]);
    let config = test_config(tmp.path());
    let module_dir = config.staging_dir.join(MODULE);
    let credentials = Credentials {
        gemfury_token: Some("tok".into()),
        ..Default::default()
    };

    let args = RunArgs::from_pairs([("gem_name", "puppet_litmus"), ("gemfury_username", "fury")])
        .unwrap();
    let mut orch = orchestrator_with_credentials(config, RecordingPlatform::default(), credentials);
    let report = orch
        .run(&steps(&["clone", "multigem_file_update"]), args, &modules(&[MODULE]))
        .await
        .unwrap();

    assert_eq!(
        report.module(MODULE).unwrap().status_of(Step::MultigemFileUpdate),
        Some(StepStatus::Completed)
    );
    let written = std::fs::read_to_string(module_dir.join("Gemfile")).unwrap();
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(lines[2], "source \"https://tok@gem.fury.io/fury/\"");
    assert_eq!(
        lines[3],
        "gem 'puppet_litmus' , :source => \"https://tok@gem.fury.io/fury/\""
    );
}

#[tokio::test]
async fn test_multigem_file_update_needs_gem_server_token() {
    let tmp = TempDir::new().unwrap();
    let args = RunArgs::from_pairs([("gem_name", "puppet_litmus")]).unwrap();
    let mut orch = orchestrator(test_config(tmp.path()), RecordingPlatform::default());
    let err = orch
        .run(&steps(&["clone", "multigem_file_update"]), args, &modules(&[MODULE]))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::MissingCredential { var: "GEMFURY_TOKEN", .. }));
}

const RELEASE_METADATA: &str = r#"{
  "operatingsystem_support": [
    { "operatingsystem": "Ubuntu", "operatingsystemrelease": ["18.04", "20.04"] }
  ]
}
"#;

fn seed_litmus_module(base: &std::path::Path, module: &str) {
    seed_remote(
        base,
        module,
        &[("metadata.json", RELEASE_METADATA), ("provision.yaml", "default: {}\n")],
    );
}

#[tokio::test]
async fn test_release_checks_write_provision_key() {
    let tmp = TempDir::new().unwrap();
    seed_litmus_module(tmp.path(), MODULE);
    let platforms = tmp.path().join("platforms.yml");
    std::fs::write(&platforms, "'7':\n  ubuntu: ['18.04']\n").unwrap();
    let config = test_config(tmp.path());
    let module_dir = config.staging_dir.join(MODULE);

    let args = RunArgs::from_pairs([
        ("puppet_version", "7"),
        ("platforms_file", platforms.to_str().unwrap()),
    ])
    .unwrap();
    let mut orch = orchestrator(config, RecordingPlatform::default());
    let report = orch
        .run(&steps(&["clone", "release_checks"]), args, &modules(&[MODULE]))
        .await
        .unwrap();

    assert_eq!(
        report.module(MODULE).unwrap().status_of(Step::ReleaseChecks),
        Some(StepStatus::Completed)
    );
    let provision = std::fs::read_to_string(module_dir.join("provision.yaml")).unwrap();
    assert!(provision.contains("release_checks_7"));
    assert!(provision.contains("ubuntu-1804-x86_64"));
    assert!(!provision.contains("ubuntu-2004-x86_64"));
}

#[tokio::test]
async fn test_unknown_agent_version_does_not_abort_batch() {
    let tmp = TempDir::new().unwrap();
    seed_litmus_module(tmp.path(), "puppetlabs-a");
    seed_litmus_module(tmp.path(), "puppetlabs-b");
    let platforms = tmp.path().join("platforms.yml");
    std::fs::write(&platforms, "'7':\n  ubuntu: ['18.04']\n").unwrap();

    let args = RunArgs::from_pairs([
        ("puppet_version", "5"),
        ("platforms_file", platforms.to_str().unwrap()),
    ])
    .unwrap();
    let mut orch = orchestrator(test_config(tmp.path()), RecordingPlatform::default());
    let report = orch
        .run(
            &steps(&["clone", "release_checks"]),
            args,
            &modules(&["puppetlabs-a", "puppetlabs-b"]),
        )
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.modules.len(), 2);
    for name in ["puppetlabs-a", "puppetlabs-b"] {
        let outcome = report.module(name).unwrap();
        assert_eq!(outcome.status_of(Step::Clone), Some(StepStatus::Completed));
        assert_eq!(outcome.status_of(Step::ReleaseChecks), Some(StepStatus::Failed));
        assert!(outcome
            .stopped
            .as_deref()
            .unwrap()
            .contains("No configuration for Puppet 5 found"));
    }
}

#[tokio::test]
async fn test_local_tests_start_in_background_for_litmus_modules() {
    let tmp = TempDir::new().unwrap();
    seed_litmus_module(tmp.path(), "puppetlabs-litmus");
    seed_remote(tmp.path(), "puppetlabs-plain", &[("README.md", "plain\n")]);
    let config = test_config(tmp.path());
    let litmus_dir = config.staging_dir.join("puppetlabs-litmus");

    let mut orch = orchestrator(config, RecordingPlatform::default());
    let report = orch
        .run(
            &steps(&["clone", "run_tests_locally"]),
            RunArgs::from_pairs([("provision_type", "default")]).unwrap(),
            &modules(&["puppetlabs-litmus", "puppetlabs-plain"]),
        )
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.background.len(), 1);
    assert_eq!(report.background[0].dir, litmus_dir);
    let script = std::fs::read_to_string(litmus_dir.join("acc.sh")).unwrap();
    assert!(script.contains("litmus:provision_list[default]"));
    assert_eq!(
        report.module("puppetlabs-plain").unwrap().status_of(Step::RunTestsLocally),
        Some(StepStatus::Skipped)
    );
}

#[tokio::test]
async fn test_local_results_fill_test_table() {
    let tmp = TempDir::new().unwrap();
    seed_litmus_module(tmp.path(), MODULE);
    let config = test_config(tmp.path());
    let module_dir = config.staging_dir.join(MODULE);

    let mut orch = orchestrator(config, RecordingPlatform::default());
    orch.run(&steps(&["clone"]), RunArgs::default(), &modules(&[MODULE]))
        .await
        .unwrap();
    std::fs::write(
        module_dir.join("litmusacceptance.out"),
        "Finished in 3 minutes\n2 examples, 0 failures\nexit 0\n",
    )
    .unwrap();

    let report = orch
        .run(&steps(&["fetch_test_results_locally"]), RunArgs::default(), &modules(&[MODULE]))
        .await
        .unwrap();

    assert_eq!(report.test_rows.len(), 1);
    assert_eq!(report.test_rows[0].module, MODULE);
    assert_eq!(report.test_rows[0].status, "SUCCESS");
    assert!(report.render_test_table().contains("SUCCESS"));
}
