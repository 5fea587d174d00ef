use crate::snap::util::{excerpt, run_with_deadline};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Duration;

const MAX_GIT_OUTPUT_CHARS: usize = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommitOutcome {
    NoChanges,
    Committed,
    Pushed,
}

impl CommitOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoChanges => "no-changes",
            Self::Committed => "committed",
            Self::Pushed => "pushed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommitRequest<'a> {
    pub repo_dir: &'a Path,
    pub data_dir: &'a Path,
    pub message: &'a str,
    pub push: bool,
    pub timeout_secs: u64,
}

fn resolve_git_bin() -> Result<PathBuf> {
    which::which("git").context("git binary not found on PATH")
}

fn run_git(bin: &Path, repo_dir: &Path, args: &[&str], timeout_secs: u64) -> Result<Output> {
    let mut cmd = Command::new(bin);
    cmd.arg("-C").arg(repo_dir).args(args);
    let out = run_with_deadline(&mut cmd, Duration::from_secs(timeout_secs))
        .with_context(|| format!("failed to run `git {}`", args.join(" ")))?;
    if out.status.success() {
        return Ok(out);
    }
    anyhow::bail!(
        "git {} failed\nstdout: {}\nstderr: {}",
        args.join(" "),
        excerpt(&out.stdout, MAX_GIT_OUTPUT_CHARS),
        excerpt(&out.stderr, MAX_GIT_OUTPUT_CHARS)
    )
}

/// Stage the data directory and commit it only when something is staged.
pub fn commit_and_push(req: &CommitRequest<'_>) -> Result<CommitOutcome> {
    let bin = resolve_git_bin()?;
    let data_arg = req.data_dir.display().to_string();

    run_git(&bin, req.repo_dir, &["add", "--all", "--", &data_arg], req.timeout_secs)?;
    let staged = run_git(
        &bin,
        req.repo_dir,
        &["diff", "--cached", "--name-only", "--", &data_arg],
        req.timeout_secs,
    )?;
    if String::from_utf8_lossy(&staged.stdout).trim().is_empty() {
        return Ok(CommitOutcome::NoChanges);
    }

    run_git(
        &bin,
        req.repo_dir,
        &["commit", "-m", req.message, "--", &data_arg],
        req.timeout_secs,
    )?;
    if !req.push {
        return Ok(CommitOutcome::Committed);
    }

    run_git(&bin, req.repo_dir, &["push"], req.timeout_secs)?;
    Ok(CommitOutcome::Pushed)
}
