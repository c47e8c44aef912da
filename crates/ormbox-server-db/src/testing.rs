// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use sqlx::sqlite::SqlitePool;

pub async fn create_test_pool() -> SqlitePool {
	SqlitePool::connect(":memory:").await.unwrap()
}

pub async fn create_result_cache_table(pool: &SqlitePool) {
	sqlx::query(
		r#"
		CREATE TABLE IF NOT EXISTS result_cache (
			key TEXT PRIMARY KEY,
			payload TEXT NOT NULL,
			created_at TEXT NOT NULL,
			expires_at TEXT NOT NULL
		)
		"#,
	)
	.execute(pool)
	.await
	.unwrap();
}

pub async fn create_admission_counters_table(pool: &SqlitePool) {
	sqlx::query(
		r#"
		CREATE TABLE IF NOT EXISTS admission_counters (
			family TEXT PRIMARY KEY,
			count INTEGER NOT NULL DEFAULT 0,
			updated_at TEXT NOT NULL
		)
		"#,
	)
	.execute(pool)
	.await
	.unwrap();
}

pub async fn create_snippets_table(pool: &SqlitePool) {
	sqlx::query(
		r#"
		CREATE TABLE IF NOT EXISTS snippets (
			slug TEXT PRIMARY KEY,
			name TEXT NOT NULL,
			code TEXT NOT NULL,
			database TEXT NOT NULL DEFAULT 'sqlite',
			orm_version TEXT,
			ref_type TEXT,
			ref_id TEXT,
			sha TEXT,
			private INTEGER NOT NULL DEFAULT 0,
			session_key TEXT,
			created_at TEXT NOT NULL
		)
		"#,
	)
	.execute(pool)
	.await
	.unwrap();

	sqlx::query("CREATE INDEX IF NOT EXISTS idx_snippets_private_created ON snippets(private, created_at)")
		.execute(pool)
		.await
		.unwrap();
}

/// Pool with the tables the execution engine touches (cache + admission).
pub async fn create_engine_test_pool() -> SqlitePool {
	let pool = create_test_pool().await;
	create_result_cache_table(&pool).await;
	create_admission_counters_table(&pool).await;
	pool
}

pub async fn create_snippet_test_pool() -> SqlitePool {
	let pool = create_test_pool().await;
	create_snippets_table(&pool).await;
	pool
}
