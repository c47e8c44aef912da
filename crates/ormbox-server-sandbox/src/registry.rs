// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::collections::HashMap;

use ormbox_common_core::Database;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Newest Django release the registry knows about; the terminal step of
/// the lookup fallback chain.
pub const LATEST_DJANGO: &str = "django-5.2.8";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrmFamily {
	Django,
	Sqlalchemy,
	Prisma,
}

impl OrmFamily {
	pub fn as_str(&self) -> &'static str {
		match self {
			OrmFamily::Django => "django",
			OrmFamily::Sqlalchemy => "sqlalchemy",
			OrmFamily::Prisma => "prisma",
		}
	}
}

/// Container image plus resource limits for one
/// `(family, version, database)` triple.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorDescriptor {
	pub image: String,
	/// Stable identifier, also the admission-counter key: one cap per
	/// executor, not one global cap.
	pub key: String,
	pub verbose: String,
	/// Docker memory limit string; swap is pinned to the same value.
	pub memory: String,
	pub max_concurrent: u32,
	pub family: OrmFamily,
	pub version: String,
	pub database: Database,
}

/// Which step of the lookup chain produced the executor. Exposed so the
/// fallback is a visible product decision instead of a silent error path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorFallback {
	/// Exact `(database, version)` match.
	None,
	/// Matched after prefixing a bare legacy version with `django-`.
	LegacyPrefix,
	/// Fell back to the latest Django release for the requested database.
	LatestDjango,
	/// Fell back to the global default (SQLite + latest Django).
	Default,
}

pub struct ExecutorRegistry {
	executors: HashMap<(Database, String), ExecutorDescriptor>,
	ref_executors: HashMap<Database, ExecutorDescriptor>,
}

impl ExecutorRegistry {
	/// The static production registry. Every supported release runs at
	/// 75m (Prisma at 250m: node needs headroom); SQLite submissions
	/// reuse the postgres image with the engine switched by env.
	pub fn builtin() -> Self {
		let mut registry = Self {
			executors: HashMap::new(),
			ref_executors: HashMap::new(),
		};

		for version in ["django-5.2.8", "django-4.2.26"] {
			let release = version.strip_prefix("django-").unwrap();
			registry.insert(descriptor(
				OrmFamily::Django,
				version,
				Database::Postgres,
				&format!("ormbox-executor/python-django-postgres-{release}"),
				"75m",
			));
			registry.insert(descriptor(
				OrmFamily::Django,
				version,
				Database::Mariadb,
				&format!("ormbox-executor/python-django-mariadb-{release}"),
				"75m",
			));
			registry.insert(descriptor(
				OrmFamily::Django,
				version,
				Database::Sqlite,
				&format!("ormbox-executor/python-django-postgres-{release}"),
				"75m",
			));
		}

		registry.insert(descriptor(
			OrmFamily::Sqlalchemy,
			"sqlalchemy-2.0",
			Database::Postgres,
			"ormbox-executor/python-sqlalchemy-postgres-2.0",
			"75m",
		));
		registry.insert(descriptor(
			OrmFamily::Sqlalchemy,
			"sqlalchemy-2.0",
			Database::Mariadb,
			"ormbox-executor/python-sqlalchemy-mariadb-2.0",
			"75m",
		));
		registry.insert(descriptor(
			OrmFamily::Sqlalchemy,
			"sqlalchemy-2.0",
			Database::Sqlite,
			"ormbox-executor/python-sqlalchemy-postgres-2.0",
			"75m",
		));

		registry.insert(descriptor(
			OrmFamily::Prisma,
			"prisma-6.3",
			Database::Postgres,
			"ormbox-executor/nodejs-prisma-postgres-6.3",
			"250m",
		));
		registry.insert(descriptor(
			OrmFamily::Prisma,
			"prisma-6.3",
			Database::Mariadb,
			"ormbox-executor/nodejs-prisma-mariadb-6.3",
			"250m",
		));
		registry.insert(descriptor(
			OrmFamily::Prisma,
			"prisma-6.3",
			Database::Sqlite,
			"ormbox-executor/nodejs-prisma-postgres-6.3",
			"250m",
		));

		// Ref mode loads Django from the mounted checkout at runtime, so
		// one image per database covers every revision.
		for database in [Database::Sqlite, Database::Postgres, Database::Mariadb] {
			let image_db = match database {
				Database::Sqlite | Database::Postgres => "postgres",
				Database::Mariadb => "mariadb",
			};
			registry.ref_executors.insert(
				database,
				ExecutorDescriptor {
					image: format!("ormbox-executor/python-django-ref-{image_db}"),
					key: format!("python/django/ref/{}", database.as_str()),
					verbose: format!(
						"Python - Django (source checkout) - {}",
						database_verbose(database)
					),
					memory: "250m".to_string(),
					max_concurrent: 10,
					family: OrmFamily::Django,
					version: "ref".to_string(),
					database,
				},
			);
		}

		registry
	}

	fn insert(&mut self, executor: ExecutorDescriptor) {
		self
			.executors
			.insert((executor.database, executor.version.clone()), executor);
	}

	/// Release-mode lookup with the explicit fallback chain: exact match,
	/// legacy `django-` prefixing, latest Django for the database, and
	/// finally SQLite + latest Django.
	pub fn lookup(
		&self,
		database: Database,
		version: &str,
	) -> (&ExecutorDescriptor, ExecutorFallback) {
		if let Some(executor) = self.executors.get(&(database, version.to_string())) {
			return (executor, ExecutorFallback::None);
		}

		if !version.starts_with("django-")
			&& !version.starts_with("sqlalchemy-")
			&& !version.starts_with("prisma-")
		{
			let prefixed = format!("django-{version}");
			if let Some(executor) = self.executors.get(&(database, prefixed)) {
				return (executor, ExecutorFallback::LegacyPrefix);
			}
		}

		if let Some(executor) = self.executors.get(&(database, LATEST_DJANGO.to_string())) {
			debug!(database = %database, version = %version, "falling back to latest django");
			return (executor, ExecutorFallback::LatestDjango);
		}

		let executor = self
			.executors
			.get(&(Database::Sqlite, LATEST_DJANGO.to_string()))
			.expect("builtin registry always has the sqlite default");
		(executor, ExecutorFallback::Default)
	}

	/// Ref-mode lookup; one executor per database.
	pub fn lookup_ref(&self, database: Database) -> &ExecutorDescriptor {
		self
			.ref_executors
			.get(&database)
			.unwrap_or_else(|| &self.ref_executors[&Database::Sqlite])
	}
}

impl Default for ExecutorRegistry {
	fn default() -> Self {
		Self::builtin()
	}
}

fn database_verbose(database: Database) -> &'static str {
	match database {
		Database::Sqlite => "SQLite",
		Database::Postgres => "PostgreSQL",
		Database::Mariadb => "MariaDB",
	}
}

fn descriptor(
	family: OrmFamily,
	version: &str,
	database: Database,
	image: &str,
	memory: &str,
) -> ExecutorDescriptor {
	let release = version
		.split_once('-')
		.map(|(_, release)| release)
		.unwrap_or(version);
	let language = match family {
		OrmFamily::Django | OrmFamily::Sqlalchemy => "python",
		OrmFamily::Prisma => "nodejs",
	};
	let family_verbose = match family {
		OrmFamily::Django => "Django",
		OrmFamily::Sqlalchemy => "SQLAlchemy",
		OrmFamily::Prisma => "Prisma",
	};
	let language_verbose = match family {
		OrmFamily::Django | OrmFamily::Sqlalchemy => "Python",
		OrmFamily::Prisma => "Node.js",
	};

	ExecutorDescriptor {
		image: image.to_string(),
		key: format!(
			"{language}/{}/{}/{release}",
			family.as_str(),
			database.as_str()
		),
		verbose: format!(
			"{language_verbose} - {family_verbose} {release} - {}",
			database_verbose(database)
		),
		memory: memory.to_string(),
		max_concurrent: 10,
		family,
		version: version.to_string(),
		database,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_exact_lookup() {
		let registry = ExecutorRegistry::builtin();
		let (executor, fallback) = registry.lookup(Database::Postgres, "django-5.2.8");

		assert_eq!(fallback, ExecutorFallback::None);
		assert_eq!(executor.image, "ormbox-executor/python-django-postgres-5.2.8");
		assert_eq!(executor.memory, "75m");
		assert_eq!(executor.max_concurrent, 10);
	}

	#[test]
	fn test_sqlite_reuses_postgres_image() {
		let registry = ExecutorRegistry::builtin();
		let (executor, fallback) = registry.lookup(Database::Sqlite, "django-5.2.8");

		assert_eq!(fallback, ExecutorFallback::None);
		assert_eq!(executor.image, "ormbox-executor/python-django-postgres-5.2.8");
		assert_eq!(executor.database, Database::Sqlite);
	}

	#[test]
	fn test_legacy_version_gets_prefixed() {
		let registry = ExecutorRegistry::builtin();
		let (executor, fallback) = registry.lookup(Database::Postgres, "4.2.26");

		assert_eq!(fallback, ExecutorFallback::LegacyPrefix);
		assert_eq!(executor.version, "django-4.2.26");
	}

	#[test]
	fn test_unknown_version_falls_back_to_latest_django() {
		let registry = ExecutorRegistry::builtin();
		let (executor, fallback) = registry.lookup(Database::Mariadb, "django-3.0");

		assert_eq!(fallback, ExecutorFallback::LatestDjango);
		assert_eq!(executor.version, LATEST_DJANGO);
		assert_eq!(executor.database, Database::Mariadb);
	}

	#[test]
	fn test_prisma_memory_headroom() {
		let registry = ExecutorRegistry::builtin();
		let (executor, _) = registry.lookup(Database::Postgres, "prisma-6.3");

		assert_eq!(executor.memory, "250m");
		assert_eq!(executor.family, OrmFamily::Prisma);
	}

	#[test]
	fn test_ref_executor_per_database() {
		let registry = ExecutorRegistry::builtin();

		let postgres = registry.lookup_ref(Database::Postgres);
		assert_eq!(postgres.image, "ormbox-executor/python-django-ref-postgres");

		let mariadb = registry.lookup_ref(Database::Mariadb);
		assert_eq!(mariadb.image, "ormbox-executor/python-django-ref-mariadb");

		let sqlite = registry.lookup_ref(Database::Sqlite);
		assert_eq!(sqlite.image, "ormbox-executor/python-django-ref-postgres");
	}

	#[test]
	fn test_executor_keys_are_unique() {
		let registry = ExecutorRegistry::builtin();
		let mut keys: Vec<&str> = registry
			.executors
			.values()
			.map(|e| e.key.as_str())
			.collect();
		keys.sort();
		let before = keys.len();
		keys.dedup();
		assert_eq!(keys.len(), before);
	}
}
