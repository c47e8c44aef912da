// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::SqlitePool;

use crate::error::Result;

/// Shared counter of live sandboxes per executor family.
///
/// Backed by the same SQLite store as the result cache so the count
/// survives engine restarts. A row untouched for the TTL is treated as
/// zero before incrementing: a crashed process cannot leak slots forever.
#[async_trait]
pub trait AdmissionStore: Send + Sync {
	/// Atomically increments the counter for `family` unless it already
	/// holds `max` slots. Returns whether a slot was acquired.
	async fn try_increment(&self, family: &str, max: u32, ttl_secs: i64) -> Result<bool>;

	/// Releases one slot, flooring at zero. Callers treat failures as
	/// best-effort; the TTL heals anything lost here.
	async fn decrement(&self, family: &str) -> Result<()>;

	/// Current counter value, zero for an absent row.
	async fn current(&self, family: &str) -> Result<i64>;
}

#[derive(Clone)]
pub struct AdmissionRepository {
	pool: SqlitePool,
}

impl AdmissionRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}
}

#[async_trait]
impl AdmissionStore for AdmissionRepository {
	#[tracing::instrument(skip(self))]
	async fn try_increment(&self, family: &str, max: u32, ttl_secs: i64) -> Result<bool> {
		let now = Utc::now();
		let stale_cutoff = now - Duration::seconds(ttl_secs);

		sqlx::query(
			"INSERT INTO admission_counters (family, count, updated_at) VALUES (?, 0, ?) \
			 ON CONFLICT(family) DO NOTHING",
		)
		.bind(family)
		.bind(now)
		.execute(&self.pool)
		.await?;

		// Single UPDATE so check-and-increment is atomic. A stale row is
		// reset rather than incremented past a count nobody holds anymore.
		let result = sqlx::query(
			r#"
			UPDATE admission_counters
			SET count = CASE WHEN updated_at < ? THEN 1 ELSE count + 1 END,
			    updated_at = ?
			WHERE family = ? AND (count < ? OR updated_at < ?)
			"#,
		)
		.bind(stale_cutoff)
		.bind(now)
		.bind(family)
		.bind(max as i64)
		.bind(stale_cutoff)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() == 1)
	}

	#[tracing::instrument(skip(self))]
	async fn decrement(&self, family: &str) -> Result<()> {
		sqlx::query(
			r#"
			UPDATE admission_counters
			SET count = CASE WHEN count > 0 THEN count - 1 ELSE 0 END,
			    updated_at = ?
			WHERE family = ?
			"#,
		)
		.bind(Utc::now())
		.bind(family)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self))]
	async fn current(&self, family: &str) -> Result<i64> {
		let row = sqlx::query_as::<_, (i64,)>(
			"SELECT count FROM admission_counters WHERE family = ?",
		)
		.bind(family)
		.fetch_optional(&self.pool)
		.await?;

		Ok(row.map(|(count,)| count).unwrap_or(0))
	}
}
