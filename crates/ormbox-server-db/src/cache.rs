// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::SqlitePool;

use crate::error::Result;

/// Default retention for cached execution results.
pub const DEFAULT_RESULT_TTL_DAYS: i64 = 365;

/// Store for memoized execution results, keyed by
/// `(version descriptor, database, fingerprint)` strings.
///
/// Entries are immutable: invalidation happens by key (a moved ref gets a
/// new sha12 in its key), never by rewriting a row's payload in place.
#[async_trait]
pub trait ResultCacheStore: Send + Sync {
	/// Returns the stored payload, treating expired rows as misses.
	async fn get(&self, key: &str) -> Result<Option<String>>;

	/// Stores a payload under `key` for `ttl_days`.
	async fn put(&self, key: &str, payload: &str, ttl_days: i64) -> Result<()>;
}

#[derive(Clone)]
pub struct ResultCacheRepository {
	pool: SqlitePool,
}

impl ResultCacheRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Drops expired rows. Run from a periodic job; correctness does not
	/// depend on it because `get` filters on expiry.
	#[tracing::instrument(skip(self))]
	pub async fn evict_expired(&self) -> Result<u64> {
		let result = sqlx::query("DELETE FROM result_cache WHERE expires_at <= ?")
			.bind(Utc::now())
			.execute(&self.pool)
			.await?;
		Ok(result.rows_affected())
	}
}

#[async_trait]
impl ResultCacheStore for ResultCacheRepository {
	#[tracing::instrument(skip(self))]
	async fn get(&self, key: &str) -> Result<Option<String>> {
		let row = sqlx::query_as::<_, (String,)>(
			"SELECT payload FROM result_cache WHERE key = ? AND expires_at > ?",
		)
		.bind(key)
		.bind(Utc::now())
		.fetch_optional(&self.pool)
		.await?;

		Ok(row.map(|(payload,)| payload))
	}

	#[tracing::instrument(skip(self, payload))]
	async fn put(&self, key: &str, payload: &str, ttl_days: i64) -> Result<()> {
		let now = Utc::now();
		let expires_at = now + Duration::days(ttl_days);

		sqlx::query(
			r#"
			INSERT INTO result_cache (key, payload, created_at, expires_at)
			VALUES (?, ?, ?, ?)
			ON CONFLICT(key) DO UPDATE SET
				payload = excluded.payload,
				created_at = excluded.created_at,
				expires_at = excluded.expires_at
			"#,
		)
		.bind(key)
		.bind(payload)
		.bind(now)
		.bind(expires_at)
		.execute(&self.pool)
		.await?;

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_engine_test_pool;

	#[tokio::test]
	async fn test_miss_on_empty_store() {
		let pool = create_engine_test_pool().await;
		let repo = ResultCacheRepository::new(pool);

		assert!(repo.get("django-5.2.8-sqlite-feed").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_put_then_get() {
		let pool = create_engine_test_pool().await;
		let repo = ResultCacheRepository::new(pool);

		repo
			.put("django-5.2.8-sqlite-feed", r#"{"event":"job-done"}"#, 365)
			.await
			.unwrap();

		let payload = repo.get("django-5.2.8-sqlite-feed").await.unwrap();
		assert_eq!(payload.as_deref(), Some(r#"{"event":"job-done"}"#));
	}

	#[tokio::test]
	async fn test_expired_entry_is_a_miss() {
		let pool = create_engine_test_pool().await;
		let repo = ResultCacheRepository::new(pool);

		repo.put("k", "payload", -1).await.unwrap();

		assert!(repo.get("k").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_put_replaces_existing_key() {
		let pool = create_engine_test_pool().await;
		let repo = ResultCacheRepository::new(pool);

		repo.put("k", "first", 365).await.unwrap();
		repo.put("k", "second", 365).await.unwrap();

		assert_eq!(repo.get("k").await.unwrap().as_deref(), Some("second"));
	}

	#[tokio::test]
	async fn test_evict_expired_removes_only_stale_rows() {
		let pool = create_engine_test_pool().await;
		let repo = ResultCacheRepository::new(pool);

		repo.put("stale", "x", -1).await.unwrap();
		repo.put("fresh", "y", 365).await.unwrap();

		let evicted = repo.evict_expired().await.unwrap();
		assert_eq!(evicted, 1);
		assert!(repo.get("fresh").await.unwrap().is_some());
	}

	#[tokio::test]
	async fn test_keys_are_independent() {
		let pool = create_engine_test_pool().await;
		let repo = ResultCacheRepository::new(pool);

		repo.put("pr-123-abc-sqlite-f1", "a", 365).await.unwrap();
		repo.put("pr-123-def-sqlite-f1", "b", 365).await.unwrap();

		assert_eq!(
			repo.get("pr-123-abc-sqlite-f1").await.unwrap().as_deref(),
			Some("a")
		);
		assert_eq!(
			repo.get("pr-123-def-sqlite-f1").await.unwrap().as_deref(),
			Some("b")
		);
	}
}
