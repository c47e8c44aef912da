// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use ormbox_common_core::{Database, RefType, VersionSelector};
use ormbox_server_db::{DbError, NewSnippetRecord, SnippetRecord, SnippetRepository};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{Result, SnippetError};
use crate::naming::{random_name, slugify};

pub const PER_PAGE: i64 = 20;

/// How many fresh random slugs to try when the derived one is taken.
const SLUG_RETRIES: usize = 5;

/// A stored submission with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
	pub slug: String,
	pub name: String,
	pub code: String,
	pub database: Database,
	pub version: VersionSelector,
	pub private: bool,
	pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSnippet {
	/// Empty or missing name gets a random 8-character one.
	pub name: Option<String>,
	pub code: String,
	pub database: Database,
	pub version: VersionSelector,
	pub private: bool,
	pub session_key: Option<String>,
}

/// Partial update; `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct SnippetChanges {
	pub name: Option<String>,
	pub code: Option<String>,
	pub database: Option<Database>,
	pub version: Option<VersionSelector>,
	pub private: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pagination {
	pub page: i64,
	#[serde(rename = "totalPages")]
	pub total_pages: i64,
	pub total: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnippetPage {
	pub snippets: Vec<Snippet>,
	pub pagination: Pagination,
}

#[async_trait]
pub trait SnippetStore: Send + Sync {
	async fn create(&self, snippet: NewSnippet) -> Result<Snippet>;
	async fn get(&self, slug: &str) -> Result<Option<Snippet>>;
	async fn update(&self, slug: &str, session_key: &str, changes: SnippetChanges)
		-> Result<Snippet>;
	/// Public snippets only, newest first, `PER_PAGE` per page.
	async fn list(&self, query: Option<&str>, page: i64) -> Result<SnippetPage>;
}

pub struct SqliteSnippetStore {
	repo: SnippetRepository,
}

impl SqliteSnippetStore {
	pub fn new(repo: SnippetRepository) -> Self {
		Self { repo }
	}
}

#[async_trait]
impl SnippetStore for SqliteSnippetStore {
	#[instrument(skip(self, snippet))]
	async fn create(&self, snippet: NewSnippet) -> Result<Snippet> {
		validate_version(&snippet.version)?;

		let name = match snippet.name.as_deref() {
			Some(name) if !name.trim().is_empty() => name.trim().to_string(),
			_ => random_name(),
		};

		let mut candidate_name = name;
		let mut slug = slugify(&candidate_name);
		if slug.is_empty() {
			candidate_name = random_name();
			slug = slugify(&candidate_name);
		}

		for attempt in 0..=SLUG_RETRIES {
			let record = new_record(&snippet, &candidate_name, &slug);
			match self.repo.insert(&record).await {
				Ok(record) => {
					debug!(slug = %record.slug, attempt, "snippet created");
					return record_to_snippet(record);
				}
				Err(DbError::Conflict(_)) if attempt < SLUG_RETRIES => {
					// Taken; a fresh random name gets a fresh slug.
					candidate_name = random_name();
					slug = slugify(&candidate_name);
				}
				Err(e) => return Err(e.into()),
			}
		}

		Err(SnippetError::Invalid(
			"could not allocate a unique slug".to_string(),
		))
	}

	async fn get(&self, slug: &str) -> Result<Option<Snippet>> {
		let record = self.repo.get_by_slug(slug).await?;
		record.map(record_to_snippet).transpose()
	}

	#[instrument(skip(self, changes))]
	async fn update(
		&self,
		slug: &str,
		session_key: &str,
		changes: SnippetChanges,
	) -> Result<Snippet> {
		let mut record = self
			.repo
			.get_by_slug(slug)
			.await?
			.ok_or_else(|| SnippetError::NotFound(slug.to_string()))?;

		if record.session_key.as_deref() != Some(session_key) {
			return Err(SnippetError::NotOwner(slug.to_string()));
		}

		if let Some(name) = changes.name {
			record.name = name;
		}
		if let Some(code) = changes.code {
			record.code = code;
		}
		if let Some(database) = changes.database {
			record.database = database.as_str().to_string();
		}
		if let Some(version) = changes.version {
			validate_version(&version)?;
			let (orm_version, ref_type, ref_id, sha) = version_to_columns(&version);
			record.orm_version = orm_version;
			record.ref_type = ref_type;
			record.ref_id = ref_id;
			record.sha = sha;
		}
		if let Some(private) = changes.private {
			record.private = private;
		}

		self.repo.update(&record).await?;
		record_to_snippet(record)
	}

	async fn list(&self, query: Option<&str>, page: i64) -> Result<SnippetPage> {
		let page = page.max(1);
		let offset = (page - 1) * PER_PAGE;
		let query = query.map(str::trim).filter(|q| !q.is_empty());

		let page_record = self.repo.list_public(query, PER_PAGE, offset).await?;
		let total = page_record.total;
		let total_pages = (total + PER_PAGE - 1) / PER_PAGE;

		let snippets = page_record
			.snippets
			.into_iter()
			.map(record_to_snippet)
			.collect::<Result<Vec<_>>>()?;

		Ok(SnippetPage {
			snippets,
			pagination: Pagination {
				page,
				total_pages,
				total,
			},
		})
	}
}

/// Writes must carry usable provenance; ref snippets must pin a commit
/// so re-running them is reproducible. Legacy rows without a pinned sha
/// still load through `record_to_snippet`.
fn validate_version(version: &VersionSelector) -> Result<()> {
	match version {
		VersionSelector::Release { version } if version.is_empty() => Err(SnippetError::Invalid(
			"orm_version must not be empty".to_string(),
		)),
		VersionSelector::Ref { ref_id, sha, .. } => {
			if ref_id.is_empty() {
				return Err(SnippetError::Invalid("ref_id must not be empty".to_string()));
			}
			if sha.as_deref().map(str::is_empty).unwrap_or(true) {
				return Err(SnippetError::Invalid(
					"ref snippets must pin a commit sha".to_string(),
				));
			}
			Ok(())
		}
		_ => Ok(()),
	}
}

fn version_to_columns(
	version: &VersionSelector,
) -> (Option<String>, Option<String>, Option<String>, Option<String>) {
	match version {
		VersionSelector::Release { version } => (Some(version.clone()), None, None, None),
		VersionSelector::Ref {
			ref_type,
			ref_id,
			sha,
		} => (
			None,
			Some(ref_type.as_str().to_string()),
			Some(ref_id.clone()),
			sha.clone(),
		),
	}
}

fn new_record(snippet: &NewSnippet, name: &str, slug: &str) -> NewSnippetRecord {
	let (orm_version, ref_type, ref_id, sha) = version_to_columns(&snippet.version);
	NewSnippetRecord {
		slug: slug.to_string(),
		name: name.to_string(),
		code: snippet.code.clone(),
		database: snippet.database.as_str().to_string(),
		orm_version,
		ref_type,
		ref_id,
		sha,
		private: snippet.private,
		session_key: snippet.session_key.clone(),
	}
}

fn record_to_snippet(record: SnippetRecord) -> Result<Snippet> {
	let database = record
		.database
		.parse::<Database>()
		.map_err(SnippetError::Invalid)?;

	let version = match (&record.orm_version, &record.ref_type, &record.ref_id) {
		(Some(version), _, _) => VersionSelector::Release {
			version: version.clone(),
		},
		(None, Some(ref_type), Some(ref_id)) => {
			let ref_type = ref_type.parse::<RefType>().map_err(SnippetError::Invalid)?;
			VersionSelector::Ref {
				ref_type,
				ref_id: ref_id.clone(),
				sha: record.sha.clone(),
			}
		}
		_ => {
			return Err(SnippetError::Invalid(format!(
				"snippet {} has no version provenance",
				record.slug
			)))
		}
	};

	Ok(Snippet {
		slug: record.slug,
		name: record.name,
		code: record.code,
		database,
		version,
		private: record.private,
		created_at: record.created_at,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use ormbox_server_db::testing::create_snippet_test_pool;

	async fn make_store() -> SqliteSnippetStore {
		let pool = create_snippet_test_pool().await;
		SqliteSnippetStore::new(SnippetRepository::new(pool))
	}

	fn release_snippet(name: Option<&str>) -> NewSnippet {
		NewSnippet {
			name: name.map(str::to_string),
			code: "from django.db import models".to_string(),
			database: Database::Sqlite,
			version: VersionSelector::release("django-5.2.8"),
			private: false,
			session_key: Some("session-1".to_string()),
		}
	}

	#[tokio::test]
	async fn test_create_derives_slug_from_name() {
		let store = make_store().await;
		let snippet = store
			.create(release_snippet(Some("My First Snippet")))
			.await
			.unwrap();

		assert_eq!(snippet.slug, "my-first-snippet");
		assert_eq!(snippet.name, "My First Snippet");
	}

	#[tokio::test]
	async fn test_create_without_name_gets_random_one() {
		let store = make_store().await;
		let snippet = store.create(release_snippet(None)).await.unwrap();

		assert_eq!(snippet.name.len(), 8);
		assert!(!snippet.slug.is_empty());
	}

	#[tokio::test]
	async fn test_create_blank_name_gets_random_one() {
		let store = make_store().await;
		let snippet = store.create(release_snippet(Some("   "))).await.unwrap();
		assert_eq!(snippet.name.len(), 8);
	}

	#[tokio::test]
	async fn test_slug_collision_retries_with_fresh_name() {
		let store = make_store().await;
		let first = store.create(release_snippet(Some("demo"))).await.unwrap();
		let second = store.create(release_snippet(Some("demo"))).await.unwrap();

		assert_eq!(first.slug, "demo");
		assert_ne!(second.slug, "demo");
		assert_eq!(second.name.len(), 8);
	}

	#[tokio::test]
	async fn test_ref_snippet_requires_pinned_sha() {
		let store = make_store().await;
		let mut snippet = release_snippet(Some("pr-demo"));
		snippet.version = VersionSelector::git_ref(RefType::Pr, "12345", None);

		let err = store.create(snippet).await.unwrap_err();
		assert!(matches!(err, SnippetError::Invalid(_)));
	}

	#[tokio::test]
	async fn test_ref_snippet_with_sha_round_trips() {
		let store = make_store().await;
		let mut snippet = release_snippet(Some("pr-demo"));
		snippet.version =
			VersionSelector::git_ref(RefType::Pr, "12345", Some("0123456789ab".to_string()));

		let created = store.create(snippet).await.unwrap();
		let fetched = store.get(&created.slug).await.unwrap().unwrap();

		assert_eq!(
			fetched.version,
			VersionSelector::git_ref(RefType::Pr, "12345", Some("0123456789ab".to_string()))
		);
	}

	#[tokio::test]
	async fn test_get_missing_is_none() {
		let store = make_store().await;
		assert!(store.get("nope").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_update_requires_matching_session() {
		let store = make_store().await;
		let created = store.create(release_snippet(Some("mine"))).await.unwrap();

		let err = store
			.update(
				&created.slug,
				"someone-else",
				SnippetChanges {
					code: Some("# stolen".to_string()),
					..Default::default()
				},
			)
			.await
			.unwrap_err();
		assert!(matches!(err, SnippetError::NotOwner(_)));

		let updated = store
			.update(
				&created.slug,
				"session-1",
				SnippetChanges {
					code: Some("# updated".to_string()),
					database: Some(Database::Postgres),
					..Default::default()
				},
			)
			.await
			.unwrap();
		assert_eq!(updated.code, "# updated");
		assert_eq!(updated.database, Database::Postgres);
	}

	#[tokio::test]
	async fn test_update_missing_is_not_found() {
		let store = make_store().await;
		let err = store
			.update("ghost", "session-1", SnippetChanges::default())
			.await
			.unwrap_err();
		assert!(matches!(err, SnippetError::NotFound(_)));
	}

	#[tokio::test]
	async fn test_list_excludes_private_snippets() {
		let store = make_store().await;
		store.create(release_snippet(Some("public-one"))).await.unwrap();

		let mut private = release_snippet(Some("secret"));
		private.private = true;
		store.create(private).await.unwrap();

		let page = store.list(None, 1).await.unwrap();
		assert_eq!(page.pagination.total, 1);
		assert!(page.snippets.iter().all(|s| s.slug != "secret"));
	}

	#[tokio::test]
	async fn test_list_pagination_shape() {
		let store = make_store().await;
		for i in 0..25 {
			store
				.create(release_snippet(Some(&format!("snippet {i}"))))
				.await
				.unwrap();
		}

		let first = store.list(None, 1).await.unwrap();
		assert_eq!(first.snippets.len(), PER_PAGE as usize);
		assert_eq!(first.pagination.total, 25);
		assert_eq!(first.pagination.total_pages, 2);

		let second = store.list(None, 2).await.unwrap();
		assert_eq!(second.snippets.len(), 5);
		assert_eq!(second.pagination.page, 2);
	}

	#[tokio::test]
	async fn test_list_search_filters() {
		let store = make_store().await;
		store.create(release_snippet(Some("band models"))).await.unwrap();
		store.create(release_snippet(Some("album demo"))).await.unwrap();

		let page = store.list(Some("band"), 1).await.unwrap();
		assert_eq!(page.pagination.total, 1);
		assert_eq!(page.snippets[0].name, "band models");
	}

	#[tokio::test]
	async fn test_pagination_serializes_camel_case() {
		let pagination = Pagination {
			page: 1,
			total_pages: 3,
			total: 41,
		};
		let value = serde_json::to_value(&pagination).unwrap();
		assert_eq!(value["totalPages"], 3);
	}
}
