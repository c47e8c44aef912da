// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};

/// Target database for a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Database {
	Sqlite,
	Postgres,
	Mariadb,
}

impl Database {
	pub fn as_str(&self) -> &'static str {
		match self {
			Database::Sqlite => "sqlite",
			Database::Postgres => "postgres",
			Database::Mariadb => "mariadb",
		}
	}

	/// Whether a per-run database and role must be created before the
	/// sandbox starts. SQLite lives as a file inside the container.
	pub fn needs_setup(&self) -> bool {
		!matches!(self, Database::Sqlite)
	}
}

impl std::str::FromStr for Database {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"sqlite" => Ok(Database::Sqlite),
			"postgres" => Ok(Database::Postgres),
			"mariadb" => Ok(Database::Mariadb),
			_ => Err(format!("unknown database: {s}")),
		}
	}
}

impl std::fmt::Display for Database {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Kind of git reference a submission can target instead of a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefType {
	Pr,
	Branch,
	Tag,
}

impl RefType {
	pub fn as_str(&self) -> &'static str {
		match self {
			RefType::Pr => "pr",
			RefType::Branch => "branch",
			RefType::Tag => "tag",
		}
	}
}

impl std::str::FromStr for RefType {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"pr" => Ok(RefType::Pr),
			"branch" => Ok(RefType::Branch),
			"tag" => Ok(RefType::Tag),
			_ => Err(format!("unknown ref type: {s}")),
		}
	}
}

impl std::fmt::Display for RefType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Which ORM source a submission runs against: a named release
/// (`django-5.2.8`, `sqlalchemy-2.0`, ...) or a git ref of the upstream
/// repository, optionally pinned to a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VersionSelector {
	Release {
		version: String,
	},
	Ref {
		ref_type: RefType,
		ref_id: String,
		#[serde(skip_serializing_if = "Option::is_none")]
		sha: Option<String>,
	},
}

impl VersionSelector {
	/// Normalizes a bare legacy version string (`"5.2.8"`) into the
	/// prefixed form (`"django-5.2.8"`). Prefixed strings pass through.
	pub fn release(version: impl Into<String>) -> Self {
		let version = version.into();
		let version = if version.starts_with("django-")
			|| version.starts_with("sqlalchemy-")
			|| version.starts_with("prisma-")
		{
			version
		} else {
			format!("django-{version}")
		};
		VersionSelector::Release { version }
	}

	pub fn git_ref(ref_type: RefType, ref_id: impl Into<String>, sha: Option<String>) -> Self {
		VersionSelector::Ref {
			ref_type,
			ref_id: ref_id.into(),
			sha,
		}
	}

	pub fn is_ref(&self) -> bool {
		matches!(self, VersionSelector::Ref { .. })
	}
}

/// One submitted program: the unit of work the engine executes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
	pub code: String,
	pub database: Database,
	pub version: VersionSelector,
}
