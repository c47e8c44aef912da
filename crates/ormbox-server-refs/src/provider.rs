// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ormbox_common_core::{sha12, RefType};
use ormbox_server_config::EngineConfig;
use tracing::{debug, info, instrument};

use crate::cleanup::{run_cleanup, CleanupReport};
use crate::error::Result;
use crate::git::GitCli;
use crate::github::{GithubClient, RefMetadata, RefSearchResult};
use crate::types::{safe_ref_id, RefInfo};

/// Directory holding the bare mirror inside the cache root.
pub const BARE_REPO_DIR: &str = "django.git";
/// Directory holding all checkouts inside the cache root.
pub const WORKTREES_DIR: &str = "worktrees";

/// Resolves ref metadata from the upstream hosting service. Split out of
/// the provider so tests can materialize worktrees against local fixture
/// repositories.
#[async_trait]
pub trait MetadataSource: Send + Sync {
	async fn ref_metadata(&self, ref_type: RefType, ref_id: &str) -> Result<RefMetadata>;
	async fn search(
		&self,
		ref_type: RefType,
		query: &str,
		limit: usize,
	) -> Result<Vec<RefSearchResult>>;
}

#[async_trait]
impl MetadataSource for GithubClient {
	async fn ref_metadata(&self, ref_type: RefType, ref_id: &str) -> Result<RefMetadata> {
		GithubClient::ref_metadata(self, ref_type, ref_id).await
	}

	async fn search(
		&self,
		ref_type: RefType,
		query: &str,
		limit: usize,
	) -> Result<Vec<RefSearchResult>> {
		GithubClient::search(self, ref_type, query, limit).await
	}
}

/// The engine-facing surface of the source-version provider.
#[async_trait]
pub trait RefSource: Send + Sync {
	/// Resolve the ref upstream and materialize a read-only checkout.
	async fn fetch(&self, ref_type: RefType, ref_id: &str) -> Result<RefInfo>;

	/// Filesystem-only lookup of an already materialized checkout. With
	/// `sha` given only that exact revision qualifies; without it the
	/// most recently materialized one wins.
	async fn get_cached(
		&self,
		ref_type: RefType,
		ref_id: &str,
		sha: Option<&str>,
	) -> Result<Option<RefInfo>>;

	/// Upstream search facade; metadata only.
	async fn search(
		&self,
		ref_type: RefType,
		query: &str,
		limit: usize,
	) -> Result<Vec<RefSearchResult>>;
}

/// One bare mirror plus per-revision worktrees. Many revisions share the
/// mirror's object store, so materializing another PR iteration costs a
/// checkout, not a clone.
pub struct RefProvider {
	cache_root: PathBuf,
	host_cache_root: PathBuf,
	clone_url: String,
	git: GitCli,
	metadata: Arc<dyn MetadataSource>,
}

impl RefProvider {
	pub fn new(config: &EngineConfig) -> Result<Self> {
		let github = GithubClient::new(
			config.github.api_base.clone(),
			config.github.upstream_repo.clone(),
			config.github.token.clone(),
			config.timeouts.github_metadata,
		)?;

		Ok(Self::with_parts(
			config.paths.cache_root.clone(),
			config.paths.host_cache_root.clone(),
			format!("https://github.com/{}.git", config.github.upstream_repo),
			GitCli::new(config.timeouts.git_fetch),
			Arc::new(github),
		))
	}

	pub fn with_parts(
		cache_root: PathBuf,
		host_cache_root: PathBuf,
		clone_url: String,
		git: GitCli,
		metadata: Arc<dyn MetadataSource>,
	) -> Self {
		Self {
			cache_root,
			host_cache_root,
			clone_url,
			git,
			metadata,
		}
	}

	fn bare_path(&self) -> PathBuf {
		self.cache_root.join(BARE_REPO_DIR)
	}

	/// Relative checkout location for a ref. PR and branch worktrees get
	/// a commit-prefix level because those refs move; tags are immutable
	/// and flat.
	fn worktree_rel(ref_type: RefType, ref_id: &str, sha: &str) -> PathBuf {
		let safe_id = safe_ref_id(ref_id);
		match ref_type {
			RefType::Pr | RefType::Branch => PathBuf::from(WORKTREES_DIR)
				.join(ref_type.as_str())
				.join(safe_id)
				.join(sha12(sha)),
			RefType::Tag => PathBuf::from(WORKTREES_DIR).join("tag").join(safe_id),
		}
	}

	fn ref_info(
		&self,
		ref_type: RefType,
		ref_id: &str,
		sha: String,
		rel: &Path,
		metadata: Option<&RefMetadata>,
	) -> RefInfo {
		RefInfo {
			ref_type,
			ref_id: ref_id.to_string(),
			sha,
			local_path: self.cache_root.join(rel),
			host_path: self.host_cache_root.join(rel),
			title: metadata
				.map(|m| m.title.clone())
				.unwrap_or_else(|| "(cached)".to_string()),
			author: metadata.map(|m| m.author.clone()).unwrap_or_default(),
			state: metadata.map(|m| m.state.clone()).unwrap_or_default(),
		}
	}

	/// Remove worktrees older than `max_age` and prune the mirror's
	/// bookkeeping.
	#[instrument(skip(self))]
	pub async fn cleanup(&self, max_age: Duration) -> Result<CleanupReport> {
		let report = run_cleanup(
			&self.git,
			&self.bare_path(),
			&self.cache_root.join(WORKTREES_DIR),
			max_age,
		)
		.await?;

		info!(
			removed = report.removed.len(),
			kept = report.kept,
			failed = report.failed.len(),
			"worktree cleanup finished"
		);
		Ok(report)
	}
}

#[async_trait]
impl RefSource for RefProvider {
	#[instrument(skip(self))]
	async fn fetch(&self, ref_type: RefType, ref_id: &str) -> Result<RefInfo> {
		let bare = self.bare_path();
		self.git.ensure_mirror(&bare, &self.clone_url).await?;

		let metadata = self.metadata.ref_metadata(ref_type, ref_id).await?;
		self.git.fetch_ref(&bare, ref_type, ref_id).await?;

		let rel = Self::worktree_rel(ref_type, ref_id, &metadata.sha);
		let local_path = self.cache_root.join(&rel);
		let existed = self
			.git
			.worktree_add(&bare, &local_path, &metadata.sha)
			.await?;

		debug!(
			path = %local_path.display(),
			sha = %metadata.sha,
			existed,
			"ref materialized"
		);

		Ok(self.ref_info(ref_type, ref_id, metadata.sha.clone(), &rel, Some(&metadata)))
	}

	async fn get_cached(
		&self,
		ref_type: RefType,
		ref_id: &str,
		sha: Option<&str>,
	) -> Result<Option<RefInfo>> {
		match ref_type {
			RefType::Tag => {
				let rel = Self::worktree_rel(ref_type, ref_id, "");
				if !self.cache_root.join(&rel).is_dir() {
					return Ok(None);
				}
				// Tag worktrees carry no revision level; the cache key
				// stays stable because tags are immutable.
				let sha = sha.map(str::to_string).unwrap_or_else(|| "cached".to_string());
				Ok(Some(self.ref_info(ref_type, ref_id, sha, &rel, None)))
			}
			RefType::Pr | RefType::Branch => {
				let ref_dir = self
					.cache_root
					.join(WORKTREES_DIR)
					.join(ref_type.as_str())
					.join(safe_ref_id(ref_id));
				if !ref_dir.is_dir() {
					return Ok(None);
				}

				let chosen = match sha {
					Some(sha) => {
						let candidate = ref_dir.join(sha12(sha));
						candidate.is_dir().then_some(candidate)
					}
					None => newest_subdir(&ref_dir)?,
				};

				Ok(chosen.map(|path| {
					let sha = path
						.file_name()
						.map(|n| n.to_string_lossy().into_owned())
						.unwrap_or_default();
					let rel = Self::worktree_rel(ref_type, ref_id, &sha);
					self.ref_info(ref_type, ref_id, sha, &rel, None)
				}))
			}
		}
	}

	async fn search(
		&self,
		ref_type: RefType,
		query: &str,
		limit: usize,
	) -> Result<Vec<RefSearchResult>> {
		self.metadata.search(ref_type, query, limit).await
	}
}

/// Most recently modified immediate subdirectory, if any.
fn newest_subdir(dir: &Path) -> Result<Option<PathBuf>> {
	let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;

	for entry in std::fs::read_dir(dir)? {
		let entry = entry?;
		if !entry.file_type()?.is_dir() {
			continue;
		}
		let modified = entry.metadata()?.modified()?;
		if newest.as_ref().map(|(t, _)| modified > *t).unwrap_or(true) {
			newest = Some((modified, entry.path()));
		}
	}

	Ok(newest.map(|(_, path)| path))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::RefError;
	use std::fs;
	use std::process::Command as StdCommand;
	use tempfile::TempDir;

	const TIMEOUT: Duration = Duration::from_secs(30);

	struct FakeMetadataSource {
		sha: String,
	}

	#[async_trait]
	impl MetadataSource for FakeMetadataSource {
		async fn ref_metadata(&self, _ref_type: RefType, ref_id: &str) -> Result<RefMetadata> {
			if ref_id == "missing" {
				return Err(RefError::NotFound(format!("PR #{ref_id}")));
			}
			Ok(RefMetadata {
				sha: self.sha.clone(),
				title: "Fixed #100 -- test".to_string(),
				author: "contributor".to_string(),
				state: "open".to_string(),
			})
		}

		async fn search(
			&self,
			ref_type: RefType,
			query: &str,
			_limit: usize,
		) -> Result<Vec<RefSearchResult>> {
			Ok(vec![RefSearchResult {
				ref_type,
				id: query.to_string(),
				title: query.to_string(),
				state: None,
				author: None,
			}])
		}
	}

	fn git(dir: &Path, args: &[&str]) {
		let output = StdCommand::new("git")
			.arg("-C")
			.arg(dir)
			.args(args)
			.output()
			.expect("git failed to spawn");
		assert!(
			output.status.success(),
			"git {:?} failed: {}",
			args,
			String::from_utf8_lossy(&output.stderr)
		);
	}

	fn make_source_repo(temp: &TempDir) -> (PathBuf, String) {
		let source = temp.path().join("source");
		fs::create_dir_all(&source).unwrap();

		git(&source, &["init", "-b", "main"]);
		git(&source, &["config", "user.email", "test@test.com"]);
		git(&source, &["config", "user.name", "Test"]);
		fs::write(source.join("setup.py"), "# orm").unwrap();
		git(&source, &["add", "."]);
		git(&source, &["commit", "-m", "initial"]);
		git(&source, &["tag", "5.2"]);

		let output = StdCommand::new("git")
			.arg("-C")
			.arg(&source)
			.args(["rev-parse", "HEAD"])
			.output()
			.unwrap();
		let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();

		(source, sha)
	}

	fn make_provider(temp: &TempDir, source: &Path, sha: &str) -> RefProvider {
		RefProvider::with_parts(
			temp.path().join("cache"),
			PathBuf::from("/host/pr_cache"),
			format!("file://{}", source.display()),
			GitCli::new(TIMEOUT),
			Arc::new(FakeMetadataSource {
				sha: sha.to_string(),
			}),
		)
	}

	#[tokio::test]
	async fn test_fetch_materializes_branch_worktree() {
		let temp = TempDir::new().unwrap();
		let (source, sha) = make_source_repo(&temp);
		let provider = make_provider(&temp, &source, &sha);

		let info = provider.fetch(RefType::Branch, "main").await.unwrap();

		assert_eq!(info.sha, sha);
		assert!(info.local_path.ends_with(
			PathBuf::from("worktrees/branch/main").join(&sha[..12])
		));
		assert!(info.local_path.join("setup.py").exists());
		assert!(info
			.host_path
			.starts_with("/host/pr_cache/worktrees/branch/main"));
	}

	#[tokio::test]
	async fn test_fetch_pr_uses_commit_prefix_directory() {
		let temp = TempDir::new().unwrap();
		let (source, sha) = make_source_repo(&temp);

		// PR heads live under refs/pull/; build one pointing at main.
		git(&source, &["update-ref", "refs/pull/42/head", &sha]);

		let provider = make_provider(&temp, &source, &sha);
		let info = provider.fetch(RefType::Pr, "42").await.unwrap();

		assert_eq!(
			info.local_path.file_name().unwrap().to_string_lossy(),
			&sha[..12]
		);
		assert_eq!(info.title, "Fixed #100 -- test");
		assert_eq!(info.state, "open");
	}

	#[tokio::test]
	async fn test_fetch_tag_worktree_has_no_sha_level() {
		let temp = TempDir::new().unwrap();
		let (source, sha) = make_source_repo(&temp);
		let provider = make_provider(&temp, &source, &sha);

		let info = provider.fetch(RefType::Tag, "5.2").await.unwrap();

		assert!(info.local_path.ends_with("worktrees/tag/5.2"));
		assert!(info.local_path.join("setup.py").exists());
	}

	#[tokio::test]
	async fn test_fetch_twice_is_idempotent() {
		let temp = TempDir::new().unwrap();
		let (source, sha) = make_source_repo(&temp);
		let provider = make_provider(&temp, &source, &sha);

		let first = provider.fetch(RefType::Branch, "main").await.unwrap();
		let before = std::fs::metadata(&first.local_path).unwrap().modified().unwrap();

		let second = provider.fetch(RefType::Branch, "main").await.unwrap();
		let after = std::fs::metadata(&second.local_path).unwrap().modified().unwrap();

		assert_eq!(first.local_path, second.local_path);
		assert_eq!(before, after, "existing worktree must not be rewritten");
	}

	#[tokio::test]
	async fn test_fetch_unknown_ref_surfaces_not_found() {
		let temp = TempDir::new().unwrap();
		let (source, sha) = make_source_repo(&temp);
		let provider = make_provider(&temp, &source, &sha);

		let err = provider.fetch(RefType::Pr, "missing").await.unwrap_err();
		assert!(matches!(err, RefError::NotFound(_)));
	}

	#[tokio::test]
	async fn test_get_cached_misses_when_nothing_materialized() {
		let temp = TempDir::new().unwrap();
		let (source, sha) = make_source_repo(&temp);
		let provider = make_provider(&temp, &source, &sha);

		let cached = provider.get_cached(RefType::Pr, "42", None).await.unwrap();
		assert!(cached.is_none());
	}

	#[tokio::test]
	async fn test_get_cached_after_fetch() {
		let temp = TempDir::new().unwrap();
		let (source, sha) = make_source_repo(&temp);
		let provider = make_provider(&temp, &source, &sha);

		provider.fetch(RefType::Branch, "main").await.unwrap();

		let cached = provider
			.get_cached(RefType::Branch, "main", None)
			.await
			.unwrap()
			.unwrap();
		assert_eq!(cached.sha, &sha[..12]);
		assert_eq!(cached.title, "(cached)");
	}

	#[tokio::test]
	async fn test_get_cached_exact_sha_only() {
		let temp = TempDir::new().unwrap();
		let (source, sha) = make_source_repo(&temp);
		let provider = make_provider(&temp, &source, &sha);

		provider.fetch(RefType::Branch, "main").await.unwrap();

		let hit = provider
			.get_cached(RefType::Branch, "main", Some(&sha))
			.await
			.unwrap();
		assert!(hit.is_some());

		let miss = provider
			.get_cached(
				RefType::Branch,
				"main",
				Some("ffffffffffffffffffffffffffffffffffffffff"),
			)
			.await
			.unwrap();
		assert!(miss.is_none());
	}

	#[tokio::test]
	async fn test_get_cached_tag_checks_existence() {
		let temp = TempDir::new().unwrap();
		let (source, sha) = make_source_repo(&temp);
		let provider = make_provider(&temp, &source, &sha);

		assert!(provider
			.get_cached(RefType::Tag, "5.2", None)
			.await
			.unwrap()
			.is_none());

		provider.fetch(RefType::Tag, "5.2").await.unwrap();

		let cached = provider
			.get_cached(RefType::Tag, "5.2", None)
			.await
			.unwrap()
			.unwrap();
		assert!(cached.local_path.ends_with("worktrees/tag/5.2"));
	}

	#[tokio::test]
	async fn test_get_cached_slashed_branch_is_flattened() {
		let temp = TempDir::new().unwrap();
		let (source, sha) = make_source_repo(&temp);
		git(&source, &["branch", "stable/5.2.x"]);
		let provider = make_provider(&temp, &source, &sha);

		provider.fetch(RefType::Branch, "stable/5.2.x").await.unwrap();

		let cached = provider
			.get_cached(RefType::Branch, "stable/5.2.x", None)
			.await
			.unwrap()
			.unwrap();
		assert!(cached
			.local_path
			.to_string_lossy()
			.contains("branch/stable__5.2.x"));
	}

	#[tokio::test]
	async fn test_cleanup_removes_aged_worktrees() {
		let temp = TempDir::new().unwrap();
		let (source, sha) = make_source_repo(&temp);
		let provider = make_provider(&temp, &source, &sha);

		let info = provider.fetch(RefType::Branch, "main").await.unwrap();
		assert!(info.local_path.exists());

		// Zero max-age: everything is stale.
		let report = provider.cleanup(Duration::ZERO).await.unwrap();
		assert_eq!(report.removed.len(), 1);
		assert!(!info.local_path.exists());

		let cached = provider.get_cached(RefType::Branch, "main", None).await.unwrap();
		assert!(cached.is_none());
	}

	#[tokio::test]
	async fn test_cleanup_keeps_fresh_worktrees() {
		let temp = TempDir::new().unwrap();
		let (source, sha) = make_source_repo(&temp);
		let provider = make_provider(&temp, &source, &sha);

		let info = provider.fetch(RefType::Branch, "main").await.unwrap();

		let report = provider.cleanup(Duration::from_secs(3600)).await.unwrap();
		assert!(report.removed.is_empty());
		assert_eq!(report.kept, 1);
		assert!(info.local_path.exists());
	}
}
