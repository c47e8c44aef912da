// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ormbox_common_core::Database;
use rand::Rng;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::error::{ProvisionError, Result};

/// A database created for exactly one execution. Database, role and
/// password all share `name`; the unique hex suffix keeps concurrent
/// sandboxes from ever seeing each other's data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EphemeralDatabase {
	pub engine: Database,
	pub name: String,
	pub host: String,
	pub port: u16,
	pub service_user: String,
	pub service_password: String,
}

/// Lifecycle of per-request databases for one server engine.
///
/// `teardown` must not raise: it runs on every completion path and a
/// failed drop only costs disk on the database server until the next
/// sweep.
#[async_trait]
pub trait DatabaseEngine: Send + Sync {
	fn database(&self) -> Database;

	fn needs_setup(&self) -> bool {
		self.database().needs_setup()
	}

	async fn setup(&self) -> Result<EphemeralDatabase>;

	async fn teardown(&self, db: &EphemeralDatabase);
}

/// SQLite needs no server: the sandbox uses an in-container file.
pub struct SqliteEngine;

#[async_trait]
impl DatabaseEngine for SqliteEngine {
	fn database(&self) -> Database {
		Database::Sqlite
	}

	async fn setup(&self) -> Result<EphemeralDatabase> {
		Err(ProvisionError::NoSetupNeeded("sqlite"))
	}

	async fn teardown(&self, _db: &EphemeralDatabase) {}
}

pub struct PostgresEngine {
	host: String,
	port: u16,
	service_user: String,
	service_password: String,
	timeout: Duration,
}

impl PostgresEngine {
	pub fn new(timeout: Duration) -> Self {
		Self::with_endpoint("database_postgres", 5432, "ormbox", "ormbox", timeout)
	}

	pub fn with_endpoint(
		host: impl Into<String>,
		port: u16,
		service_user: impl Into<String>,
		service_password: impl Into<String>,
		timeout: Duration,
	) -> Self {
		Self {
			host: host.into(),
			port,
			service_user: service_user.into(),
			service_password: service_password.into(),
			timeout,
		}
	}

	async fn psql(&self, statement: &str) -> Result<()> {
		let port = self.port.to_string();
		let args = vec![
			"-h".to_string(),
			self.host.clone(),
			"-p".to_string(),
			port,
			"-U".to_string(),
			self.service_user.clone(),
			"-v".to_string(),
			"ON_ERROR_STOP=1".to_string(),
			"-c".to_string(),
			statement.to_string(),
		];
		run_tool(
			"psql",
			&args,
			&[("PGPASSWORD", self.service_password.as_str())],
			self.timeout,
		)
		.await
	}
}

#[async_trait]
impl DatabaseEngine for PostgresEngine {
	fn database(&self) -> Database {
		Database::Postgres
	}

	#[instrument(skip(self))]
	async fn setup(&self) -> Result<EphemeralDatabase> {
		let name = unique_name("postgres");

		self.psql(&postgres_create_role(&name)).await?;
		self.psql(&postgres_create_database(&name)).await?;

		debug!(name = %name, "ephemeral postgres database created");
		Ok(EphemeralDatabase {
			engine: Database::Postgres,
			name,
			host: self.host.clone(),
			port: self.port,
			service_user: self.service_user.clone(),
			service_password: self.service_password.clone(),
		})
	}

	#[instrument(skip(self, db), fields(name = %db.name))]
	async fn teardown(&self, db: &EphemeralDatabase) {
		if let Err(e) = self.psql(&postgres_drop_database(&db.name)).await {
			warn!(name = %db.name, error = %e, "failed to drop ephemeral postgres database");
		}
	}
}

pub struct MariadbEngine {
	host: String,
	port: u16,
	service_user: String,
	service_password: String,
	timeout: Duration,
}

impl MariadbEngine {
	pub fn new(timeout: Duration) -> Self {
		Self::with_endpoint("database_mariadb", 3306, "ormbox", "ormbox", timeout)
	}

	pub fn with_endpoint(
		host: impl Into<String>,
		port: u16,
		service_user: impl Into<String>,
		service_password: impl Into<String>,
		timeout: Duration,
	) -> Self {
		Self {
			host: host.into(),
			port,
			service_user: service_user.into(),
			service_password: service_password.into(),
			timeout,
		}
	}

	async fn mysql(&self, statements: &str) -> Result<()> {
		let port = self.port.to_string();
		let password = format!("-p{}", self.service_password);
		let args = vec![
			"-h".to_string(),
			self.host.clone(),
			"-P".to_string(),
			port,
			"-u".to_string(),
			self.service_user.clone(),
			password,
			"-e".to_string(),
			statements.to_string(),
		];
		run_tool("mysql", &args, &[], self.timeout).await
	}
}

#[async_trait]
impl DatabaseEngine for MariadbEngine {
	fn database(&self) -> Database {
		Database::Mariadb
	}

	#[instrument(skip(self))]
	async fn setup(&self) -> Result<EphemeralDatabase> {
		let name = unique_name("mariadb");

		self.mysql(&mariadb_create(&name)).await?;

		debug!(name = %name, "ephemeral mariadb database created");
		Ok(EphemeralDatabase {
			engine: Database::Mariadb,
			name,
			host: self.host.clone(),
			port: self.port,
			service_user: self.service_user.clone(),
			service_password: self.service_password.clone(),
		})
	}

	#[instrument(skip(self, db), fields(name = %db.name))]
	async fn teardown(&self, db: &EphemeralDatabase) {
		if let Err(e) = self.mysql(&mariadb_drop(&db.name)).await {
			warn!(name = %db.name, error = %e, "failed to drop ephemeral mariadb database");
		}
	}
}

/// Engine for one submission's target database, with default endpoints.
pub fn engine_for(database: Database, timeout: Duration) -> Arc<dyn DatabaseEngine> {
	match database {
		Database::Sqlite => Arc::new(SqliteEngine),
		Database::Postgres => Arc::new(PostgresEngine::new(timeout)),
		Database::Mariadb => Arc::new(MariadbEngine::new(timeout)),
	}
}

pub fn all_engines(timeout: Duration) -> Vec<Arc<dyn DatabaseEngine>> {
	vec![
		Arc::new(SqliteEngine),
		Arc::new(PostgresEngine::new(timeout)),
		Arc::new(MariadbEngine::new(timeout)),
	]
}

/// `<engine>-<rand6>`: collisions are astronomically unlikely, so there
/// is no retry.
fn unique_name(engine: &str) -> String {
	let mut rng = rand::thread_rng();
	let suffix: String = (0..6)
		.map(|_| char::from_digit(rng.gen_range(0..16u32), 16).unwrap())
		.collect();
	format!("{engine}-{suffix}")
}

fn postgres_create_role(name: &str) -> String {
	format!("CREATE ROLE \"{name}\" LOGIN PASSWORD '{name}';")
}

fn postgres_create_database(name: &str) -> String {
	format!("CREATE DATABASE \"{name}\" OWNER \"{name}\";")
}

fn postgres_drop_database(name: &str) -> String {
	format!("DROP DATABASE \"{name}\";")
}

fn mariadb_create(name: &str) -> String {
	format!(
		"CREATE DATABASE `{name}`; \
		 CREATE USER `{name}`@`%` IDENTIFIED BY '{name}'; \
		 GRANT ALL PRIVILEGES ON `{name}`.* TO `{name}`@`%`; \
		 FLUSH PRIVILEGES;"
	)
}

fn mariadb_drop(name: &str) -> String {
	format!("DROP DATABASE IF EXISTS `{name}`; DROP USER IF EXISTS `{name}`@`%`;")
}

async fn run_tool(
	tool: &'static str,
	args: &[String],
	envs: &[(&str, &str)],
	timeout: Duration,
) -> Result<()> {
	let mut cmd = Command::new(tool);
	cmd.args(args);
	for (key, value) in envs {
		cmd.env(key, value);
	}

	let output = tokio::time::timeout(timeout, cmd.output())
		.await
		.map_err(|_| ProvisionError::CommandTimeout {
			tool,
			secs: timeout.as_secs(),
		})?
		.map_err(|e| {
			if e.kind() == std::io::ErrorKind::NotFound {
				ProvisionError::ToolNotInstalled { tool }
			} else {
				ProvisionError::Io(e)
			}
		})?;

	if output.status.success() {
		Ok(())
	} else {
		Err(ProvisionError::CommandFailed {
			tool,
			args: args.to_vec(),
			stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
		})
	}
}
