// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::{DbError, Result};

/// One stored submission. Version provenance is either `orm_version` or
/// the `(ref_type, ref_id, sha)` triple; the domain layer enforces that
/// exactly one form is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnippetRecord {
	pub slug: String,
	pub name: String,
	pub code: String,
	pub database: String,
	pub orm_version: Option<String>,
	pub ref_type: Option<String>,
	pub ref_id: Option<String>,
	pub sha: Option<String>,
	pub private: bool,
	pub session_key: Option<String>,
	pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSnippetRecord {
	pub slug: String,
	pub name: String,
	pub code: String,
	pub database: String,
	pub orm_version: Option<String>,
	pub ref_type: Option<String>,
	pub ref_id: Option<String>,
	pub sha: Option<String>,
	pub private: bool,
	pub session_key: Option<String>,
}

/// One page of public snippets plus the total row count for pagination.
#[derive(Debug, Clone)]
pub struct SnippetPageRecord {
	pub snippets: Vec<SnippetRecord>,
	pub total: i64,
}

type SnippetRow = (
	String,
	String,
	String,
	String,
	Option<String>,
	Option<String>,
	Option<String>,
	Option<String>,
	bool,
	Option<String>,
	DateTime<Utc>,
);

const SNIPPET_COLUMNS: &str = "slug, name, code, database, orm_version, ref_type, ref_id, sha, private, session_key, created_at";

fn row_to_record(row: SnippetRow) -> SnippetRecord {
	let (slug, name, code, database, orm_version, ref_type, ref_id, sha, private, session_key, created_at) =
		row;
	SnippetRecord {
		slug,
		name,
		code,
		database,
		orm_version,
		ref_type,
		ref_id,
		sha,
		private,
		session_key,
		created_at,
	}
}

#[derive(Clone)]
pub struct SnippetRepository {
	pool: SqlitePool,
}

impl SnippetRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, record), fields(slug = %record.slug))]
	pub async fn insert(&self, record: &NewSnippetRecord) -> Result<SnippetRecord> {
		let created_at = Utc::now();

		sqlx::query(
			r#"
			INSERT INTO snippets (slug, name, code, database, orm_version, ref_type, ref_id, sha, private, session_key, created_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(&record.slug)
		.bind(&record.name)
		.bind(&record.code)
		.bind(&record.database)
		.bind(&record.orm_version)
		.bind(&record.ref_type)
		.bind(&record.ref_id)
		.bind(&record.sha)
		.bind(record.private)
		.bind(&record.session_key)
		.bind(created_at)
		.execute(&self.pool)
		.await
		.map_err(|e| match e {
			sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
				DbError::Conflict(format!("slug already taken: {}", record.slug))
			}
			other => DbError::Sqlx(other),
		})?;

		Ok(SnippetRecord {
			slug: record.slug.clone(),
			name: record.name.clone(),
			code: record.code.clone(),
			database: record.database.clone(),
			orm_version: record.orm_version.clone(),
			ref_type: record.ref_type.clone(),
			ref_id: record.ref_id.clone(),
			sha: record.sha.clone(),
			private: record.private,
			session_key: record.session_key.clone(),
			created_at,
		})
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_by_slug(&self, slug: &str) -> Result<Option<SnippetRecord>> {
		let row = sqlx::query_as::<_, SnippetRow>(&format!(
			"SELECT {SNIPPET_COLUMNS} FROM snippets WHERE slug = ?"
		))
		.bind(slug)
		.fetch_optional(&self.pool)
		.await?;

		Ok(row.map(row_to_record))
	}

	#[tracing::instrument(skip(self, record), fields(slug = %record.slug))]
	pub async fn update(&self, record: &SnippetRecord) -> Result<()> {
		let result = sqlx::query(
			r#"
			UPDATE snippets
			SET name = ?, code = ?, database = ?, orm_version = ?, ref_type = ?, ref_id = ?, sha = ?, private = ?
			WHERE slug = ?
			"#,
		)
		.bind(&record.name)
		.bind(&record.code)
		.bind(&record.database)
		.bind(&record.orm_version)
		.bind(&record.ref_type)
		.bind(&record.ref_id)
		.bind(&record.sha)
		.bind(record.private)
		.bind(&record.slug)
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(record.slug.clone()));
		}

		Ok(())
	}

	/// Public snippets, newest first. `query` matches name or code.
	#[tracing::instrument(skip(self))]
	pub async fn list_public(
		&self,
		query: Option<&str>,
		limit: i64,
		offset: i64,
	) -> Result<SnippetPageRecord> {
		let pattern = query.map(|q| format!("%{q}%"));

		let (snippets, total) = match &pattern {
			Some(pattern) => {
				let rows = sqlx::query_as::<_, SnippetRow>(&format!(
					"SELECT {SNIPPET_COLUMNS} FROM snippets \
					 WHERE private = 0 AND (name LIKE ? OR code LIKE ?) \
					 ORDER BY created_at DESC LIMIT ? OFFSET ?"
				))
				.bind(pattern)
				.bind(pattern)
				.bind(limit)
				.bind(offset)
				.fetch_all(&self.pool)
				.await?;

				let (total,) = sqlx::query_as::<_, (i64,)>(
					"SELECT COUNT(*) FROM snippets WHERE private = 0 AND (name LIKE ? OR code LIKE ?)",
				)
				.bind(pattern)
				.bind(pattern)
				.fetch_one(&self.pool)
				.await?;

				(rows, total)
			}
			None => {
				let rows = sqlx::query_as::<_, SnippetRow>(&format!(
					"SELECT {SNIPPET_COLUMNS} FROM snippets \
					 WHERE private = 0 ORDER BY created_at DESC LIMIT ? OFFSET ?"
				))
				.bind(limit)
				.bind(offset)
				.fetch_all(&self.pool)
				.await?;

				let (total,) =
					sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM snippets WHERE private = 0")
						.fetch_one(&self.pool)
						.await?;

				(rows, total)
			}
		};

		Ok(SnippetPageRecord {
			snippets: snippets.into_iter().map(row_to_record).collect(),
			total,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_snippet_test_pool;

	fn make_record(slug: &str, private: bool) -> NewSnippetRecord {
		NewSnippetRecord {
			slug: slug.to_string(),
			name: slug.to_string(),
			code: "from django.db import models".to_string(),
			database: "sqlite".to_string(),
			orm_version: Some("django-5.2.8".to_string()),
			ref_type: None,
			ref_id: None,
			sha: None,
			private,
			session_key: None,
		}
	}

	#[tokio::test]
	async fn test_insert_and_get() {
		let pool = create_snippet_test_pool().await;
		let repo = SnippetRepository::new(pool);

		repo.insert(&make_record("bands", false)).await.unwrap();

		let snippet = repo.get_by_slug("bands").await.unwrap().unwrap();
		assert_eq!(snippet.name, "bands");
		assert_eq!(snippet.orm_version.as_deref(), Some("django-5.2.8"));
	}

	#[tokio::test]
	async fn test_get_missing_slug() {
		let pool = create_snippet_test_pool().await;
		let repo = SnippetRepository::new(pool);

		assert!(repo.get_by_slug("nope").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_duplicate_slug_is_conflict() {
		let pool = create_snippet_test_pool().await;
		let repo = SnippetRepository::new(pool);

		repo.insert(&make_record("bands", false)).await.unwrap();
		let err = repo.insert(&make_record("bands", false)).await.unwrap_err();
		assert!(matches!(err, DbError::Conflict(_)));
	}

	#[tokio::test]
	async fn test_update_missing_is_not_found() {
		let pool = create_snippet_test_pool().await;
		let repo = SnippetRepository::new(pool);

		let record = repo.insert(&make_record("bands", false)).await.unwrap();
		let mut ghost = record.clone();
		ghost.slug = "missing".to_string();

		assert!(matches!(
			repo.update(&ghost).await.unwrap_err(),
			DbError::NotFound(_)
		));
	}

	#[tokio::test]
	async fn test_update_changes_fields() {
		let pool = create_snippet_test_pool().await;
		let repo = SnippetRepository::new(pool);

		let mut record = repo.insert(&make_record("bands", false)).await.unwrap();
		record.code = "# updated".to_string();
		record.database = "postgres".to_string();
		repo.update(&record).await.unwrap();

		let fetched = repo.get_by_slug("bands").await.unwrap().unwrap();
		assert_eq!(fetched.code, "# updated");
		assert_eq!(fetched.database, "postgres");
	}

	#[tokio::test]
	async fn test_list_public_excludes_private() {
		let pool = create_snippet_test_pool().await;
		let repo = SnippetRepository::new(pool);

		repo.insert(&make_record("public-one", false)).await.unwrap();
		repo.insert(&make_record("public-two", false)).await.unwrap();
		repo.insert(&make_record("hidden", true)).await.unwrap();

		let page = repo.list_public(None, 20, 0).await.unwrap();
		assert_eq!(page.total, 2);
		assert!(page.snippets.iter().all(|s| !s.private));
	}

	#[tokio::test]
	async fn test_list_public_search_matches_name_or_code() {
		let pool = create_snippet_test_pool().await;
		let repo = SnippetRepository::new(pool);

		let mut by_code = make_record("first", false);
		by_code.code = "class Band(models.Model): pass".to_string();
		repo.insert(&by_code).await.unwrap();

		let mut other = make_record("band-second", false);
		other.code = "nothing".to_string();
		repo.insert(&other).await.unwrap();

		repo.insert(&make_record("unrelated", false)).await.unwrap();

		let page = repo.list_public(Some("Band"), 20, 0).await.unwrap();
		assert_eq!(page.total, 2);
	}

	#[tokio::test]
	async fn test_list_public_pagination() {
		let pool = create_snippet_test_pool().await;
		let repo = SnippetRepository::new(pool);

		for i in 0..5 {
			repo.insert(&make_record(&format!("snippet-{i}"), false))
				.await
				.unwrap();
		}

		let page = repo.list_public(None, 2, 2).await.unwrap();
		assert_eq!(page.total, 5);
		assert_eq!(page.snippets.len(), 2);
	}
}
