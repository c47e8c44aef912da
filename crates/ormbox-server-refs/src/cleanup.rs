// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{info, warn};

use crate::error::Result;
use crate::git::GitCli;

/// Outcome of one worktree considered during cleanup.
#[derive(Debug, Clone)]
pub struct WorktreeRemoval {
	pub path: PathBuf,
	pub reason: String,
}

#[derive(Debug, Default)]
pub struct CleanupReport {
	pub removed: Vec<WorktreeRemoval>,
	pub kept: usize,
	pub failed: Vec<WorktreeRemoval>,
}

/// Removes worktrees whose directories have not been touched for
/// `max_age`, then prunes stale bookkeeping in the mirror.
///
/// PR and branch worktrees sit two levels deep (`<safe_id>/<sha12>`); tag
/// worktrees one level (`<safe_name>`). Emptied `<safe_id>` parents are
/// swept so a later `get_cached` does not see a hollow ref directory.
pub async fn run_cleanup(
	git: &GitCli,
	bare_path: &Path,
	worktrees_root: &Path,
	max_age: Duration,
) -> Result<CleanupReport> {
	let mut report = CleanupReport::default();
	let cutoff = SystemTime::now()
		.checked_sub(max_age)
		.unwrap_or(SystemTime::UNIX_EPOCH);

	for kind in ["pr", "branch"] {
		let kind_dir = worktrees_root.join(kind);
		if !kind_dir.is_dir() {
			continue;
		}

		for ref_dir in subdirs(&kind_dir)? {
			for worktree in subdirs(&ref_dir)? {
				sweep_if_stale(git, bare_path, &worktree, cutoff, &mut report).await;
			}

			if subdirs(&ref_dir)?.is_empty() {
				if let Err(e) = std::fs::remove_dir(&ref_dir) {
					warn!(path = %ref_dir.display(), error = %e, "failed to remove empty ref directory");
				}
			}
		}
	}

	let tag_dir = worktrees_root.join("tag");
	if tag_dir.is_dir() {
		for worktree in subdirs(&tag_dir)? {
			sweep_if_stale(git, bare_path, &worktree, cutoff, &mut report).await;
		}
	}

	if bare_path.join("HEAD").exists() {
		if let Err(e) = git.worktree_prune(bare_path).await {
			warn!(error = %e, "worktree prune failed");
		}
	}

	Ok(report)
}

async fn sweep_if_stale(
	git: &GitCli,
	bare_path: &Path,
	worktree: &Path,
	cutoff: SystemTime,
	report: &mut CleanupReport,
) {
	let modified = match std::fs::metadata(worktree).and_then(|m| m.modified()) {
		Ok(modified) => modified,
		Err(e) => {
			report.failed.push(WorktreeRemoval {
				path: worktree.to_path_buf(),
				reason: format!("failed to stat: {e}"),
			});
			return;
		}
	};

	if modified > cutoff {
		report.kept += 1;
		return;
	}

	info!(path = %worktree.display(), "removing stale worktree");
	git.worktree_remove(bare_path, worktree).await;

	if worktree.exists() {
		report.failed.push(WorktreeRemoval {
			path: worktree.to_path_buf(),
			reason: "directory still present after removal".to_string(),
		});
	} else {
		report.removed.push(WorktreeRemoval {
			path: worktree.to_path_buf(),
			reason: "exceeded max age".to_string(),
		});
	}
}

fn subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
	let mut dirs = Vec::new();
	for entry in std::fs::read_dir(dir)? {
		let entry = entry?;
		if entry.file_type()?.is_dir() {
			dirs.push(entry.path());
		}
	}
	Ok(dirs)
}
