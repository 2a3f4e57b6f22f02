//! # Version Control
//!
//! Local git operations on a module clone: clone, branch, stage, commit,
//! push and the upstream diff gate. Everything goes through `git2`; network
//! operations authenticate with the ssh agent or the user's git credential
//! helper.

use crate::error::{Result, SyncError};
use git2::build::RepoBuilder;
use git2::{
    BranchType, Cred, CredentialType, FetchOptions, IndexAddOption, Oid, PushOptions,
    RemoteCallbacks, Repository, Signature, StatusOptions,
};
use std::cell::RefCell;
use std::path::Path;

/// Clone URL for `namespace/module` under `base_uri`.
///
/// SSH-style bases (`git@host`) join with `:`, everything else with `/`.
pub fn clone_url(base_uri: &str, namespace: &str, module: &str) -> String {
    let base = base_uri.trim_end_matches(['/', ':']);
    let sep = if base.starts_with("git@") { ':' } else { '/' };
    format!("{}{}{}/{}.git", base, sep, namespace, module)
}

/// Clone `url` into `dest`.
pub fn clone_repository(url: &str, dest: &Path) -> Result<Repository> {
    let mut fetch = FetchOptions::new();
    fetch.remote_callbacks(remote_callbacks());
    let repo = RepoBuilder::new().fetch_options(fetch).clone(url, dest)?;
    Ok(repo)
}

/// Clone a managed module. Returns `None` on any failure (auth, network,
/// missing repository) after logging it; callers skip the module.
pub fn clone_module(
    base_uri: &str,
    namespace: &str,
    module: &str,
    dest: &Path,
) -> Option<Repository> {
    let url = clone_url(base_uri, namespace, module);
    tracing::info!(module = %module, "Cloning {} to {}", url, dest.display());
    match clone_repository(&url, dest) {
        Ok(repo) => Some(repo),
        Err(e) => {
            tracing::error!(module = %module, "Cloning {} has failed. {}", module, e);
            None
        }
    }
}

/// Open an existing clone
pub fn open(path: &Path) -> Result<Repository> {
    Ok(Repository::open(path)?)
}

/// Create `prefix + suffix` from HEAD and switch to it.
///
/// An existing local branch of that name is checked out and reused.
pub fn checkout_new_branch(repo: &Repository, prefix: &str, suffix: &str) -> Result<String> {
    let name = format!("{}{}", prefix, suffix);

    let (branch, created) = match repo.find_branch(&name, BranchType::Local) {
        Ok(existing) => {
            tracing::warn!(branch = %name, "Branch already exists locally, reusing it");
            (existing, false)
        }
        Err(_) => {
            let head = repo.head()?.peel_to_commit()?;
            (repo.branch(&name, &head, false)?, true)
        }
    };

    let refname = branch
        .get()
        .name()
        .ok_or_else(|| git2::Error::from_str("branch name is not valid UTF-8"))?
        .to_string();

    // A fresh branch points at HEAD, so the tree is identical and local
    // modifications carry over untouched.
    if !created {
        let target = repo.revparse_single(&refname)?;
        let mut checkout = git2::build::CheckoutBuilder::new();
        checkout.safe();
        repo.checkout_tree(&target, Some(&mut checkout))?;
    }
    repo.set_head(&refname)?;

    tracing::info!(branch = %name, "Checked out branch");
    Ok(name)
}

/// Stage every change if the working tree has any. Returns whether anything was staged.
pub fn stage_all_if_dirty(repo: &Repository) -> Result<bool> {
    let mut opts = StatusOptions::new();
    opts.include_untracked(true)
        .recurse_untracked_dirs(true)
        .include_ignored(false);
    let dirty = !repo.statuses(Some(&mut opts))?.is_empty();

    if !dirty {
        tracing::info!("Nothing to commit.");
        return Ok(false);
    }

    let mut index = repo.index()?;
    index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
    index.update_all(["*"].iter(), None)?;
    index.write()?;
    tracing::info!("All files have been staged.");
    Ok(true)
}

/// Commit the index on top of HEAD.
pub fn commit(repo: &Repository, message: &str) -> Result<Oid> {
    let mut index = repo.index()?;
    let tree = repo.find_tree(index.write_tree()?)?;
    let signature = repo
        .signature()
        .or_else(|_| Signature::now("modsync", "modsync@localhost"))?;
    let parent = repo.head()?.peel_to_commit()?;
    let oid = repo.commit(
        Some("HEAD"),
        &signature,
        &signature,
        message,
        &tree,
        &[&parent],
    )?;
    tracing::info!(commit = %oid, "The following commit has been created: {}", message);
    Ok(oid)
}

/// Switch to the working branch and commit, but only when something changed.
pub fn create_commit(
    repo: &Repository,
    prefix: &str,
    branch_suffix: &str,
    message: &str,
) -> Result<Option<Oid>> {
    checkout_new_branch(repo, prefix, branch_suffix)?;
    if stage_all_if_dirty(repo)? {
        Ok(Some(commit(repo, message)?))
    } else {
        Ok(None)
    }
}

/// Short name of the checked-out branch
pub fn current_branch(repo: &Repository) -> Result<String> {
    let head = repo.head()?;
    head.shorthand()
        .map(str::to_string)
        .ok_or_else(|| SyncError::Git(git2::Error::from_str("HEAD is not a named branch")))
}

/// Message of the commit at HEAD
pub fn latest_commit_message(repo: &Repository) -> Result<String> {
    let commit = repo.head()?.peel_to_commit()?;
    Ok(commit.message().unwrap_or_default().to_string())
}

/// Push `branch` to `remote_name`.
pub fn push(repo: &Repository, remote_name: &str, branch: &str) -> Result<()> {
    let mut remote = repo.find_remote(remote_name)?;
    let rejected: RefCell<Option<String>> = RefCell::new(None);

    {
        let mut callbacks = remote_callbacks();
        callbacks.push_update_reference(|refname, status| {
            if let Some(message) = status {
                *rejected.borrow_mut() = Some(format!("{}: {}", refname, message));
            }
            Ok(())
        });
        let mut opts = PushOptions::new();
        opts.remote_callbacks(callbacks);

        let refspec = format!("refs/heads/{0}:refs/heads/{0}", branch);
        remote.push(&[refspec.as_str()], Some(&mut opts))?;
    }

    if let Some(reason) = rejected.into_inner() {
        return Err(SyncError::Git(git2::Error::from_str(&format!(
            "push rejected {}",
            reason
        ))));
    }
    tracing::info!(branch = %branch, remote = %remote_name, "Pushed");
    Ok(())
}

/// Whether local `branch` differs from `upstream` (e.g. `origin/master`).
///
/// Push and pull request creation are gated on this.
pub fn diff_nonempty(repo: &Repository, branch: &str, upstream: &str) -> Result<bool> {
    let local = repo
        .revparse_single(&format!("refs/heads/{}", branch))?
        .peel_to_tree()?;
    let upstream = repo.revparse_single(upstream)?.peel_to_tree()?;
    let diff = repo.diff_tree_to_tree(Some(&upstream), Some(&local), None)?;
    Ok(diff.deltas().len() > 0)
}

/// Object ids at the tip of every reference, like `git show-ref -s`.
pub fn ref_targets(repo: &Repository) -> Result<Vec<String>> {
    let mut targets = Vec::new();
    for reference in repo.references()? {
        let reference = reference?;
        if let Some(oid) = reference.target() {
            targets.push(oid.to_string());
        }
    }
    Ok(targets)
}

/// Local and remote-tracking branch names.
pub fn branch_names(repo: &Repository) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for branch in repo.branches(None)? {
        let (branch, _) = branch?;
        if let Some(name) = branch.name()? {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

/// Tag names
pub fn tag_names(repo: &Repository) -> Result<Vec<String>> {
    Ok(repo
        .tag_names(None)?
        .iter()
        .flatten()
        .map(str::to_string)
        .collect())
}

// --- Private helpers ---

fn remote_callbacks<'a>() -> RemoteCallbacks<'a> {
    let mut callbacks = RemoteCallbacks::new();
    let mut attempts = 0;
    callbacks.credentials(move |url, username, allowed| {
        attempts += 1;
        if attempts > 3 {
            return Err(git2::Error::from_str("authentication failed"));
        }
        if allowed.contains(CredentialType::SSH_KEY) {
            return Cred::ssh_key_from_agent(username.unwrap_or("git"));
        }
        if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
            let config = git2::Config::open_default()?;
            return Cred::credential_helper(&config, url, username);
        }
        Cred::default()
    });
    callbacks
}
