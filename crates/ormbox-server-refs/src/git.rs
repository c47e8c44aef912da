// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::path::Path;
use std::time::Duration;

use ormbox_common_core::RefType;
use tokio::process::Command;
use tracing::{debug, trace, warn};

use crate::error::{RefError, Result};

/// Git operations over the bare mirror, driven through the git CLI.
///
/// The mirror is the only place with history; every checkout is a
/// worktree sharing its object store.
pub struct GitCli {
	fetch_timeout: Duration,
}

impl GitCli {
	pub fn new(fetch_timeout: Duration) -> Self {
		Self { fetch_timeout }
	}

	/// Ensures the bare mirror exists and is configured to mirror all
	/// heads and tags of `remote_url`.
	pub async fn ensure_mirror(&self, bare_path: &Path, remote_url: &str) -> Result<()> {
		if bare_path.join("HEAD").exists() {
			return Ok(());
		}

		if let Some(parent) = bare_path.parent() {
			std::fs::create_dir_all(parent)?;
		}

		let bare = path_str(bare_path);
		run_git(None, &["init", "--bare", &bare], self.fetch_timeout).await?;
		run_git(
			Some(bare_path),
			&["remote", "add", "origin", remote_url],
			self.fetch_timeout,
		)
		.await?;
		run_git(
			Some(bare_path),
			&[
				"config",
				"remote.origin.fetch",
				"+refs/heads/*:refs/heads/*",
			],
			self.fetch_timeout,
		)
		.await?;
		run_git(
			Some(bare_path),
			&[
				"config",
				"--add",
				"remote.origin.fetch",
				"+refs/tags/*:refs/tags/*",
			],
			self.fetch_timeout,
		)
		.await?;

		debug!(path = %bare_path.display(), url = %remote_url, "bare mirror initialized");
		Ok(())
	}

	/// Fetches the single refspec that covers `(ref_type, ref_id)`.
	/// Idempotent: re-fetching an unchanged ref is a no-op upstream.
	pub async fn fetch_ref(&self, bare_path: &Path, ref_type: RefType, ref_id: &str) -> Result<()> {
		let refspec = match ref_type {
			RefType::Pr => format!("+refs/pull/{ref_id}/head:refs/pull/{ref_id}/head"),
			RefType::Branch => format!("+refs/heads/{ref_id}:refs/heads/{ref_id}"),
			RefType::Tag => format!("+refs/tags/{ref_id}:refs/tags/{ref_id}"),
		};

		run_git(
			Some(bare_path),
			&["fetch", "origin", &refspec],
			self.fetch_timeout,
		)
		.await?;

		debug!(refspec = %refspec, "fetched ref into mirror");
		Ok(())
	}

	/// Resolves a ref name (or sha) to a full commit hash, dereferencing
	/// annotated tags.
	pub async fn rev_parse(&self, bare_path: &Path, rev: &str) -> Result<String> {
		let peeled = format!("{rev}^{{commit}}");
		run_git(Some(bare_path), &["rev-parse", &peeled], self.fetch_timeout).await
	}

	/// Creates a detached worktree for `sha` at `worktree_path`.
	///
	/// Idempotent against an existing path: two executions racing on the
	/// same revision both end up with the same tree. Returns whether the
	/// worktree already existed.
	pub async fn worktree_add(
		&self,
		bare_path: &Path,
		worktree_path: &Path,
		sha: &str,
	) -> Result<bool> {
		if worktree_path.exists() {
			trace!(path = %worktree_path.display(), "worktree already materialized");
			return Ok(true);
		}

		if let Some(parent) = worktree_path.parent() {
			std::fs::create_dir_all(parent)?;
		}

		let target = path_str(worktree_path);
		match run_git(
			Some(bare_path),
			&["worktree", "add", "--detach", &target, sha],
			self.fetch_timeout,
		)
		.await
		{
			Ok(_) => Ok(false),
			// Lost the race to another execution; the existing tree is
			// the same commit because the directory name is the sha.
			Err(RefError::CommandFailed { ref stderr, .. })
				if stderr.contains("already exists") && worktree_path.exists() =>
			{
				Ok(true)
			}
			Err(e) => Err(e),
		}
	}

	/// Removes one worktree. Must not raise: failures are logged and the
	/// directory is swept directly as a fallback.
	pub async fn worktree_remove(&self, bare_path: &Path, worktree_path: &Path) {
		let target = path_str(worktree_path);
		if let Err(e) = run_git(
			Some(bare_path),
			&["worktree", "remove", "--force", &target],
			self.fetch_timeout,
		)
		.await
		{
			warn!(path = %worktree_path.display(), error = %e, "git worktree remove failed, sweeping directory");
			if let Err(e) = std::fs::remove_dir_all(worktree_path) {
				if worktree_path.exists() {
					warn!(path = %worktree_path.display(), error = %e, "failed to sweep worktree directory");
				}
			}
		}
	}

	/// Drops administrative records for worktrees whose directories are
	/// gone.
	pub async fn worktree_prune(&self, bare_path: &Path) -> Result<()> {
		run_git(Some(bare_path), &["worktree", "prune"], self.fetch_timeout).await?;
		Ok(())
	}
}

fn path_str(path: &Path) -> String {
	path.to_string_lossy().into_owned()
}

/// Runs a git command and returns the trimmed stdout on success.
async fn run_git(dir: Option<&Path>, args: &[&str], timeout: Duration) -> Result<String> {
	let mut cmd = Command::new("git");
	if let Some(dir) = dir {
		cmd.arg("-C").arg(dir);
	}
	cmd.args(args);

	trace!(cmd = %format!("git {}", args.join(" ")), "running git command");

	let output = tokio::time::timeout(timeout, cmd.output())
		.await
		.map_err(|_| RefError::CommandTimeout {
			args: args.iter().map(|s| s.to_string()).collect(),
			secs: timeout.as_secs(),
		})?
		.map_err(|e| {
			if e.kind() == std::io::ErrorKind::NotFound {
				warn!("git not found in PATH");
				RefError::GitNotInstalled
			} else {
				RefError::Io(e)
			}
		})?;

	if output.status.success() {
		Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
	} else {
		let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
		Err(RefError::CommandFailed {
			args: args.iter().map(|s| s.to_string()).collect(),
			stderr,
		})
	}
}
