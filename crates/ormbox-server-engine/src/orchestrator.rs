// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures::FutureExt;
use ormbox_common_core::{
	fingerprint, CacheKey, Database, ExecutionEvent, RefType, Submission, VersionSelector,
};
use ormbox_server_config::EngineConfig;
use ormbox_server_db::cache::DEFAULT_RESULT_TTL_DAYS;
use ormbox_server_db::{AdmissionRepository, ResultCacheRepository, ResultCacheStore};
use ormbox_server_provision::{all_engines, DatabaseEngine};
use ormbox_server_refs::{RefError, RefInfo, RefProvider, RefSource};
use ormbox_server_sandbox::{
	classify_outcome, event_for_error, DockerRunner, ExecutorDescriptor, ExecutorFallback,
	ExecutorRegistry, SandboxRequest, SandboxRunner,
};
use sqlx::SqlitePool;
use tracing::{debug, error, info, instrument, warn};

use crate::admission::{AdmissionController, AdmissionRejected};
use crate::error::{EngineError, Result};

/// Coordinates one submission through cache, admission, source
/// materialization, database provisioning, the sandbox, and
/// classification. Every acquired resource is returned on every path.
#[derive(Clone)]
pub struct Engine {
	registry: Arc<ExecutorRegistry>,
	cache: Arc<dyn ResultCacheStore>,
	admission: AdmissionController,
	refs: Arc<dyn RefSource>,
	provisioners: HashMap<Database, Arc<dyn DatabaseEngine>>,
	runner: Arc<dyn SandboxRunner>,
	cache_ttl_days: i64,
}

impl Engine {
	pub fn new(
		registry: Arc<ExecutorRegistry>,
		cache: Arc<dyn ResultCacheStore>,
		admission: AdmissionController,
		refs: Arc<dyn RefSource>,
		provisioners: Vec<Arc<dyn DatabaseEngine>>,
		runner: Arc<dyn SandboxRunner>,
	) -> Self {
		Self {
			registry,
			cache,
			admission,
			refs,
			provisioners: provisioners
				.into_iter()
				.map(|engine| (engine.database(), engine))
				.collect(),
			runner,
			cache_ttl_days: DEFAULT_RESULT_TTL_DAYS,
		}
	}

	/// Production wiring: SQLite-backed cache and counters, the git/
	/// GitHub ref provider, CLI provisioners, the docker runner.
	pub fn from_config(config: &EngineConfig, pool: SqlitePool) -> Result<Self> {
		let refs = RefProvider::new(config)
			.map_err(|e| EngineError::Init(format!("ref provider: {e}")))?;

		Ok(Self::new(
			Arc::new(ExecutorRegistry::builtin()),
			Arc::new(ResultCacheRepository::new(pool.clone())),
			AdmissionController::new(
				Arc::new(AdmissionRepository::new(pool)),
				config.timeouts.admission_ttl.as_secs() as i64,
			),
			Arc::new(refs),
			all_engines(config.timeouts.provision),
			Arc::new(DockerRunner::new(
				config.docker.network.clone(),
				config.timeouts.sandbox_wait,
				config.timeouts.sandbox_wait_ref,
			)),
		))
	}

	pub fn with_cache_ttl_days(mut self, days: i64) -> Self {
		self.cache_ttl_days = days;
		self
	}

	/// Runs one submission to its terminal event.
	///
	/// Only input validation errors surface as `Err`; once a submission
	/// is accepted, every failure inside the engine maps into the closed
	/// event set. A panic in any component is caught and reported as an
	/// internal error, with detail in the logs only.
	#[instrument(skip(self, submission), fields(database = %submission.database))]
	pub async fn execute(
		&self,
		submission: &Submission,
		ignore_cache: bool,
	) -> Result<ExecutionEvent> {
		if submission.code.trim().is_empty() {
			return Err(EngineError::InvalidSubmission("no code provided".to_string()));
		}

		let inner = self.execute_inner(submission.clone(), ignore_cache);
		match std::panic::AssertUnwindSafe(inner).catch_unwind().await {
			Ok(event) => Ok(event),
			Err(panic) => {
				error!(panic = %panic_message(&panic), "execution panicked");
				Ok(ExecutionEvent::internal_error())
			}
		}
	}

	async fn execute_inner(&self, submission: Submission, ignore_cache: bool) -> ExecutionEvent {
		let code_fingerprint = fingerprint(&submission.code);

		match submission.version.clone() {
			VersionSelector::Release { version } => {
				let (executor, fallback) = self.registry.lookup(submission.database, &version);
				if fallback != ExecutorFallback::None {
					info!(
						requested = %version,
						resolved = %executor.version,
						fallback = ?fallback,
						"executor lookup fell back"
					);
				}

				let key = CacheKey::release(&executor.version, submission.database, &code_fingerprint);
				self
					.run_cached(executor.clone(), &submission, key, None, ignore_cache)
					.await
			}
			VersionSelector::Ref {
				ref_type,
				ref_id,
				sha,
			} => {
				let executor = self.registry.lookup_ref(submission.database).clone();

				let info = match self.resolve_ref(ref_type, &ref_id, sha.as_deref()).await {
					Ok(info) => info,
					Err(event) => return event,
				};

				// The worktree directory carries sha12, so the cache key
				// does too; a moved ref lands in a new key.
				let execution_sha = sha.unwrap_or_else(|| info.sha.clone());
				let key = CacheKey::git_ref(
					ref_type,
					&ref_id,
					&execution_sha,
					submission.database,
					&code_fingerprint,
				);

				self
					.run_cached(
						executor,
						&submission,
						key,
						Some(info.host_path.clone()),
						ignore_cache,
					)
					.await
			}
		}
	}

	/// Materialize the requested ref: a cached worktree if one qualifies,
	/// otherwise a fresh fetch. Ref failures are user-addressable (a bad
	/// PR number, a deleted branch) and map to a code error, matching
	/// the submission surface.
	async fn resolve_ref(
		&self,
		ref_type: RefType,
		ref_id: &str,
		sha: Option<&str>,
	) -> std::result::Result<RefInfo, ExecutionEvent> {
		let cached = match self.refs.get_cached(ref_type, ref_id, sha).await {
			Ok(cached) => cached,
			Err(e) => {
				warn!(error = %e, "cached ref lookup failed, fetching fresh");
				None
			}
		};

		if let Some(info) = cached {
			debug!(ref_type = %ref_type, ref_id = %ref_id, sha = %info.sha, "using cached worktree");
			return Ok(info);
		}

		match self.refs.fetch(ref_type, ref_id).await {
			Ok(info) => Ok(info),
			Err(e @ (RefError::NotFound(_) | RefError::Fetch(_))) => {
				Err(ExecutionEvent::CodeError {
					error: e.to_string(),
				})
			}
			Err(e) => {
				error!(error = %e, "ref materialization failed");
				Err(ExecutionEvent::internal_error())
			}
		}
	}

	async fn run_cached(
		&self,
		executor: ExecutorDescriptor,
		submission: &Submission,
		key: CacheKey,
		worktree_host_path: Option<PathBuf>,
		ignore_cache: bool,
	) -> ExecutionEvent {
		if !ignore_cache {
			match self.cache.get(key.as_str()).await {
				Ok(Some(payload)) => match serde_json::from_str::<ExecutionEvent>(&payload) {
					Ok(event) => {
						debug!(key = %key, "result cache hit");
						return event;
					}
					Err(e) => warn!(key = %key, error = %e, "corrupt cache entry, recomputing"),
				},
				Ok(None) => {}
				Err(e) => warn!(key = %key, error = %e, "cache read failed, recomputing"),
			}
		}

		let slot = match self.admission.acquire(&executor).await {
			Ok(slot) => slot,
			Err(AdmissionRejected::Overloaded { max_concurrent }) => {
				return ExecutionEvent::overloaded(max_concurrent);
			}
			Err(AdmissionRejected::Store(e)) => {
				error!(error = %e, "admission counter failed");
				return ExecutionEvent::internal_error();
			}
		};

		let provisioner = self.provisioners.get(&submission.database).cloned();
		let ephemeral = if submission.database.needs_setup() {
			let Some(provisioner) = provisioner.as_ref() else {
				error!(database = %submission.database, "no provisioner registered");
				slot.release().await;
				return ExecutionEvent::internal_error();
			};
			match provisioner.setup().await {
				Ok(db) => Some(db),
				Err(e) => {
					// The sandbox is never started without its database.
					error!(error = %e, "ephemeral database setup failed");
					slot.release().await;
					return ExecutionEvent::internal_error();
				}
			}
		} else {
			None
		};

		let request = SandboxRequest {
			executor: executor.clone(),
			code: submission.code.clone(),
			database: submission.database,
			ephemeral: ephemeral.clone(),
			worktree_host_path,
		};

		// Panics inside the sandbox section must not leak the slot or
		// the ephemeral database; both are settled right below.
		let section = self.run_and_classify(&executor, &request, &key);
		let event = match std::panic::AssertUnwindSafe(section).catch_unwind().await {
			Ok(event) => event,
			Err(panic) => {
				error!(panic = %panic_message(&panic), "sandbox section panicked");
				ExecutionEvent::internal_error()
			}
		};

		if let (Some(db), Some(provisioner)) = (ephemeral.as_ref(), provisioner.as_ref()) {
			provisioner.teardown(db).await;
		}
		slot.release().await;

		event
	}

	async fn run_and_classify(
		&self,
		executor: &ExecutorDescriptor,
		request: &SandboxRequest,
		key: &CacheKey,
	) -> ExecutionEvent {
		let event = match self.runner.run(request).await {
			Ok(outcome) => classify_outcome(&outcome),
			Err(e) => event_for_error(executor, &e),
		};

		// Only completed runs are memoized: an overloaded or broken
		// engine must never pin its failure into the cache.
		if event.is_done() {
			match serde_json::to_string(&event) {
				Ok(payload) => {
					if let Err(e) = self.cache.put(key.as_str(), &payload, self.cache_ttl_days).await {
						warn!(key = %key, error = %e, "failed to cache result");
					}
				}
				Err(e) => warn!(key = %key, error = %e, "failed to serialize result for cache"),
			}
		}

		event
	}
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
	if let Some(message) = panic.downcast_ref::<&str>() {
		(*message).to_string()
	} else if let Some(message) = panic.downcast_ref::<String>() {
		message.clone()
	} else {
		"opaque panic payload".to_string()
	}
}
