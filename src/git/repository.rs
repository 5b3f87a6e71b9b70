//! Git Repository Operations
//!
//! Core functions for managing the todo data repository: one commit per
//! file mutation, per-file history, status reporting and remote
//! fetch/merge/push.

use std::path::Path;

use chrono::{DateTime, Utc};
use git2::{
    Commit, Cred, DiffOptions, Error as GitError, FetchOptions, PushOptions, RemoteCallbacks,
    Repository, Signature,
};
use serde::{Deserialize, Serialize};

/// Git operation errors
#[derive(Debug, thiserror::Error)]
pub enum GitOperationError {
    #[error("Git error: {0}")]
    Git(#[from] GitError),
    #[error("Repository not initialized")]
    NotInitialized,
    #[error("No commits yet")]
    NoCommits,
    #[error("Remote not configured")]
    NoRemote,
}

pub type Result<T> = std::result::Result<T, GitOperationError>;

/// Information about a commit, as exposed over the REST surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfo {
    pub hash: String,
    pub message: String,
    pub date: DateTime<Utc>,
    pub author: String,
    pub email: String,
}

/// Repository status in the shape the status endpoint reports.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoStatus {
    pub current: Option<String>,
    pub tracking: Option<String>,
    pub ahead: usize,
    pub behind: usize,
    pub modified: Vec<String>,
    pub created: Vec<String>,
    pub deleted: Vec<String>,
    pub conflicted: Vec<String>,
    pub staged: Vec<String>,
}

/// Outcome of merging the fetched remote branch into the local one.
#[derive(Debug)]
pub enum MergeOutcome {
    UpToDate,
    FastForward,
    Merged,
    Conflicts(Vec<String>),
}

/// Check if a directory is a Git repository
pub fn is_git_repo(path: &Path) -> bool {
    Repository::open(path).is_ok()
}

/// Initialize a new Git repository in the given directory
pub fn init_repo(path: &Path) -> Result<Repository> {
    let repo = Repository::init(path)?;
    log::info!("Initialized Git repository at {:?}", path);
    Ok(repo)
}

/// Open an existing Git repository
pub fn open_repo(path: &Path) -> Result<Repository> {
    Repository::open(path).map_err(|e| {
        if e.code() == git2::ErrorCode::NotFound {
            GitOperationError::NotInitialized
        } else {
            GitOperationError::Git(e)
        }
    })
}

/// Set the repository-local git identity.
pub fn set_identity(path: &Path, name: &str, email: &str) -> Result<()> {
    let repo = open_repo(path)?;
    let mut config = repo.config()?;
    config.set_str("user.name", name)?;
    config.set_str("user.email", email)?;
    Ok(())
}

/// Convert a git2::Commit to CommitInfo
fn commit_to_info(commit: &Commit) -> CommitInfo {
    let timestamp = DateTime::from_timestamp(commit.time().seconds(), 0).unwrap_or_else(Utc::now);

    CommitInfo {
        hash: commit.id().to_string(),
        message: commit.message().unwrap_or("").trim().to_string(),
        date: timestamp,
        author: commit.author().name().unwrap_or("Unknown").to_string(),
        email: commit.author().email().unwrap_or("").to_string(),
    }
}

/// Commit whatever is currently staged in the index.
fn commit_index(repo: &Repository, message: &str, name: &str, email: &str) -> Result<CommitInfo> {
    let mut index = repo.index()?;
    let tree_id = index.write_tree()?;
    let tree = repo.find_tree(tree_id)?;

    let parent_commit = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let sig = Signature::now(name, email)?;

    let commit_id = if let Some(parent) = parent_commit {
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])?
    } else {
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[])?
    };

    let commit = repo.find_commit(commit_id)?;
    log::info!(
        "Created commit: {} - {}",
        &commit_id.to_string()[..7],
        message
    );
    Ok(commit_to_info(&commit))
}

/// Stage and commit a single file.
pub fn commit_file(
    path: &Path,
    file: &str,
    message: &str,
    name: &str,
    email: &str,
) -> Result<CommitInfo> {
    let repo = open_repo(path)?;
    let mut index = repo.index()?;
    index.add_path(Path::new(file))?;
    index.write()?;
    commit_index(&repo, message, name, email)
}

/// Remove a file from the index and commit the removal.
pub fn commit_removal(
    path: &Path,
    file: &str,
    message: &str,
    name: &str,
    email: &str,
) -> Result<CommitInfo> {
    let repo = open_repo(path)?;
    let mut index = repo.index()?;
    index.remove_path(Path::new(file))?;
    index.write()?;
    commit_index(&repo, message, name, email)
}

/// Record a rename in the index (old path removed, new path added) and
/// commit it. The caller is responsible for the filesystem rename.
pub fn commit_rename(
    path: &Path,
    old_file: &str,
    new_file: &str,
    message: &str,
    name: &str,
    email: &str,
) -> Result<CommitInfo> {
    let repo = open_repo(path)?;
    let mut index = repo.index()?;
    index.remove_path(Path::new(old_file))?;
    index.add_path(Path::new(new_file))?;
    index.write()?;
    commit_index(&repo, message, name, email)
}

/// Get the status of the repository in the wire shape.
pub fn get_status(path: &Path) -> Result<RepoStatus> {
    let repo = open_repo(path)?;

    let current = repo
        .head()
        .ok()
        .and_then(|h| h.shorthand().map(String::from));

    let tracking = current.as_deref().and_then(|branch| {
        let upstream_ref = format!("refs/remotes/origin/{}", branch);
        repo.find_reference(&upstream_ref)
            .ok()
            .map(|_| format!("origin/{}", branch))
    });

    let (ahead, behind) = get_ahead_behind(&repo).unwrap_or((0, 0));

    let mut status = RepoStatus {
        current,
        tracking,
        ahead,
        behind,
        ..Default::default()
    };

    let mut status_opts = git2::StatusOptions::new();
    status_opts.include_untracked(true);
    let statuses = repo.statuses(Some(&mut status_opts))?;
    for entry in statuses.iter() {
        let Some(file) = entry.path().map(String::from) else {
            continue;
        };
        let flags = entry.status();

        if flags.is_conflicted() {
            status.conflicted.push(file);
            continue;
        }
        if flags.is_index_new() || flags.is_index_modified() || flags.is_index_deleted() {
            status.staged.push(file.clone());
        }
        if flags.is_wt_modified() || flags.is_index_modified() {
            status.modified.push(file);
        } else if flags.is_wt_new() || flags.is_index_new() {
            status.created.push(file);
        } else if flags.is_wt_deleted() || flags.is_index_deleted() {
            status.deleted.push(file);
        }
    }

    Ok(status)
}

/// Get ahead/behind counts relative to upstream
fn get_ahead_behind(repo: &Repository) -> Result<(usize, usize)> {
    let head = repo.head()?;
    let local_oid = head.target().ok_or(GitOperationError::NoCommits)?;

    let branch_name = head.shorthand().unwrap_or("main");
    let upstream_ref = format!("refs/remotes/origin/{}", branch_name);

    match repo.find_reference(&upstream_ref) {
        Ok(upstream) => {
            let upstream_oid = upstream.target().ok_or(GitOperationError::NoCommits)?;
            let (ahead, behind) = repo.graph_ahead_behind(local_oid, upstream_oid)?;
            Ok((ahead, behind))
        }
        Err(_) => Ok((0, 0)),
    }
}

/// Get commit history for a file, newest first.
pub fn file_history(path: &Path, file: &str, limit: usize) -> Result<Vec<CommitInfo>> {
    let repo = open_repo(path)?;

    let mut revwalk = repo.revwalk()?;
    if revwalk.push_head().is_err() {
        // Empty repository: no history yet.
        return Ok(Vec::new());
    }
    revwalk.set_sorting(git2::Sort::TIME)?;

    let mut commits = Vec::new();
    for oid_result in revwalk {
        let oid = oid_result?;
        let commit = repo.find_commit(oid)?;

        if !commit_touches_file(&repo, &commit, file)? {
            continue;
        }

        commits.push(commit_to_info(&commit));
        if commits.len() >= limit {
            break;
        }
    }

    Ok(commits)
}

/// The most recent commit touching a file, if any.
pub fn last_commit_for(path: &Path, file: &str) -> Result<Option<CommitInfo>> {
    Ok(file_history(path, file, 1)?.into_iter().next())
}

/// Check if a commit touches a specific file
fn commit_touches_file(repo: &Repository, commit: &Commit, file: &str) -> Result<bool> {
    let tree = commit.tree()?;
    let parent_tree = commit.parent(0).ok().and_then(|p| p.tree().ok());

    let mut diff_opts = DiffOptions::new();
    diff_opts.pathspec(file);

    let diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), Some(&mut diff_opts))?;
    Ok(diff.deltas().count() > 0)
}

/// Ensure the named remote exists with the given URL, replacing a stale
/// one if the URL changed.
pub fn ensure_remote(path: &Path, remote_name: &str, url: &str) -> Result<()> {
    let repo = open_repo(path)?;
    let existing = match repo.find_remote(remote_name) {
        Ok(remote) => Some(remote.url() == Some(url)),
        Err(_) => None,
    };
    match existing {
        Some(true) => Ok(()),
        Some(false) => {
            repo.remote_set_url(remote_name, url)?;
            log::info!("Updated remote {} -> {}", remote_name, url);
            Ok(())
        }
        None => {
            repo.remote(remote_name, url)?;
            log::info!("Added remote {} -> {}", remote_name, url);
            Ok(())
        }
    }
}

fn remote_callbacks(ssh_key: Option<&Path>) -> RemoteCallbacks<'_> {
    let mut callbacks = RemoteCallbacks::new();
    if let Some(key) = ssh_key {
        let key = key.to_path_buf();
        callbacks.credentials(move |_url, username_from_url, _allowed_types| {
            Cred::ssh_key(username_from_url.unwrap_or("git"), None, &key, None)
        });
    } else {
        callbacks.credentials(|_url, username_from_url, _allowed_types| {
            Cred::default().or_else(|_| Cred::username(username_from_url.unwrap_or("git")))
        });
    }
    callbacks
}

/// Fetch all branches from the named remote.
pub fn fetch(path: &Path, remote_name: &str, ssh_key: Option<&Path>) -> Result<()> {
    let repo = open_repo(path)?;
    let mut remote = repo
        .find_remote(remote_name)
        .map_err(|_| GitOperationError::NoRemote)?;

    let mut fetch_opts = FetchOptions::new();
    fetch_opts.remote_callbacks(remote_callbacks(ssh_key));

    remote.fetch(
        &["refs/heads/*:refs/remotes/origin/*"],
        Some(&mut fetch_opts),
        None,
    )?;
    log::info!("Fetched from remote {}", remote_name);
    Ok(())
}

/// Push the current branch to the named remote.
pub fn push(path: &Path, remote_name: &str, ssh_key: Option<&Path>) -> Result<()> {
    let repo = open_repo(path)?;
    let mut remote = repo
        .find_remote(remote_name)
        .map_err(|_| GitOperationError::NoRemote)?;

    let head = repo.head()?;
    let branch_name = head.shorthand().unwrap_or("main");
    let refspec = format!("refs/heads/{}:refs/heads/{}", branch_name, branch_name);

    let mut push_opts = PushOptions::new();
    push_opts.remote_callbacks(remote_callbacks(ssh_key));

    remote.push(&[&refspec], Some(&mut push_opts))?;
    log::info!("Pushed {} to remote {}", branch_name, remote_name);
    Ok(())
}

/// Merge the fetched remote-tracking branch into the local branch.
/// Fast-forwards when possible; a conflicted merge is aborted and the
/// conflicting paths are reported instead.
pub fn merge_remote(path: &Path, name: &str, email: &str) -> Result<MergeOutcome> {
    let repo = open_repo(path)?;

    let head = repo.head()?;
    let branch_name = head.shorthand().unwrap_or("main").to_string();

    let remote_ref = format!("refs/remotes/origin/{}", branch_name);
    let remote_branch = match repo.find_reference(&remote_ref) {
        Ok(r) => r,
        // Nothing fetched for this branch yet.
        Err(_) => return Ok(MergeOutcome::UpToDate),
    };
    let remote_commit = remote_branch.peel_to_commit()?;
    let local_commit = head.peel_to_commit()?;

    let (_, behind) = repo.graph_ahead_behind(local_commit.id(), remote_commit.id())?;
    if behind == 0 {
        log::info!("Already up to date with origin/{}", branch_name);
        return Ok(MergeOutcome::UpToDate);
    }

    let annotated_commit = repo.find_annotated_commit(remote_commit.id())?;
    let (analysis, _) = repo.merge_analysis(&[&annotated_commit])?;

    if analysis.is_fast_forward() {
        let refname = format!("refs/heads/{}", branch_name);
        let mut reference = repo.find_reference(&refname)?;
        reference.set_target(remote_commit.id(), "Fast-forward pull")?;
        repo.set_head(&refname)?;
        repo.checkout_head(Some(git2::build::CheckoutBuilder::default().force()))?;
        log::info!("Fast-forwarded {} to origin", branch_name);
        return Ok(MergeOutcome::FastForward);
    }

    if analysis.is_normal() {
        repo.merge(&[&annotated_commit], None, None)?;

        let mut index = repo.index()?;
        if index.has_conflicts() {
            let conflicts = index
                .conflicts()?
                .filter_map(|c| c.ok())
                .filter_map(|c| c.our.or(c.their))
                .filter_map(|entry| String::from_utf8(entry.path).ok())
                .collect();
            repo.cleanup_state()?;
            log::warn!("Merge conflicts detected: {:?}", conflicts);
            return Ok(MergeOutcome::Conflicts(conflicts));
        }

        let sig = Signature::now(name, email)?;
        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;
        let message = format!("Merge remote-tracking branch 'origin/{}'", branch_name);
        repo.commit(
            Some("HEAD"),
            &sig,
            &sig,
            &message,
            &tree,
            &[&local_commit, &remote_commit],
        )?;
        repo.cleanup_state()?;
        log::info!("Merge commit created");
        return Ok(MergeOutcome::Merged);
    }

    Ok(MergeOutcome::UpToDate)
}
