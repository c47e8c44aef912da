// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ormbox_server_db::{AdmissionStore, DbError};
use ormbox_server_sandbox::ExecutorDescriptor;
use tracing::{debug, warn};

/// Why a slot was not handed out.
#[derive(Debug)]
pub enum AdmissionRejected {
	/// The executor is at its concurrency cap; reject fast, do not queue.
	Overloaded { max_concurrent: u32 },
	/// The shared counter itself failed.
	Store(DbError),
}

/// Bounds the number of simultaneously running sandboxes per executor
/// against the shared counter. A counter rather than a queue: under
/// overload callers get an immediate rejection instead of build-up.
#[derive(Clone)]
pub struct AdmissionController {
	store: Arc<dyn AdmissionStore>,
	ttl_secs: i64,
}

impl AdmissionController {
	pub fn new(store: Arc<dyn AdmissionStore>, ttl_secs: i64) -> Self {
		Self { store, ttl_secs }
	}

	pub async fn acquire(
		&self,
		executor: &ExecutorDescriptor,
	) -> Result<AdmissionSlot, AdmissionRejected> {
		let acquired = self
			.store
			.try_increment(&executor.key, executor.max_concurrent, self.ttl_secs)
			.await
			.map_err(AdmissionRejected::Store)?;

		if !acquired {
			debug!(executor = %executor.key, max = executor.max_concurrent, "admission saturated");
			return Err(AdmissionRejected::Overloaded {
				max_concurrent: executor.max_concurrent,
			});
		}

		Ok(AdmissionSlot {
			store: Arc::clone(&self.store),
			family: executor.key.clone(),
			released: AtomicBool::new(false),
		})
	}
}

/// One unit of the shared concurrency budget, held for one sandbox
/// lifetime. Release is idempotent and best-effort: a lost decrement is
/// healed by the counter TTL, so failures are logged and swallowed.
pub struct AdmissionSlot {
	store: Arc<dyn AdmissionStore>,
	family: String,
	released: AtomicBool,
}

impl std::fmt::Debug for AdmissionSlot {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("AdmissionSlot")
			.field("family", &self.family)
			.field("released", &self.released)
			.finish()
	}
}

impl AdmissionSlot {
	pub async fn release(&self) {
		if self.released.swap(true, Ordering::SeqCst) {
			return;
		}

		if let Err(e) = self.store.decrement(&self.family).await {
			warn!(family = %self.family, error = %e, "failed to release admission slot");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use ormbox_common_core::Database;
	use ormbox_server_db::testing::create_engine_test_pool;
	use ormbox_server_db::AdmissionRepository;
	use ormbox_server_sandbox::ExecutorRegistry;

	async fn make_controller() -> (AdmissionController, Arc<AdmissionRepository>) {
		let pool = create_engine_test_pool().await;
		let repo = Arc::new(AdmissionRepository::new(pool));
		(AdmissionController::new(repo.clone(), 60), repo)
	}

	fn executor(max_concurrent: u32) -> ExecutorDescriptor {
		let registry = ExecutorRegistry::builtin();
		let (executor, _) = registry.lookup(Database::Sqlite, "django-5.2.8");
		let mut executor = executor.clone();
		executor.max_concurrent = max_concurrent;
		executor
	}

	#[tokio::test]
	async fn test_acquire_then_release() {
		let (controller, repo) = make_controller().await;
		let executor = executor(1);

		let slot = controller.acquire(&executor).await.unwrap();
		assert_eq!(repo.current(&executor.key).await.unwrap(), 1);

		slot.release().await;
		assert_eq!(repo.current(&executor.key).await.unwrap(), 0);
	}

	#[tokio::test]
	async fn test_saturation_rejects_with_limit() {
		let (controller, _) = make_controller().await;
		let executor = executor(1);

		let _held = controller.acquire(&executor).await.unwrap();
		let rejected = controller.acquire(&executor).await.unwrap_err();

		match rejected {
			AdmissionRejected::Overloaded { max_concurrent } => assert_eq!(max_concurrent, 1),
			other => panic!("expected overloaded, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn test_release_is_idempotent() {
		let (controller, repo) = make_controller().await;
		let executor = executor(2);

		let slot = controller.acquire(&executor).await.unwrap();
		slot.release().await;
		slot.release().await;
		slot.release().await;

		assert_eq!(repo.current(&executor.key).await.unwrap(), 0);
	}

	#[tokio::test]
	async fn test_slots_free_up_after_release() {
		let (controller, _) = make_controller().await;
		let executor = executor(1);

		let first = controller.acquire(&executor).await.unwrap();
		first.release().await;
		let second = controller.acquire(&executor).await;
		assert!(second.is_ok());
	}
}
