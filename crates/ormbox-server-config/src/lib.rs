// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Configuration for the ormbox execution engine.
//!
//! Everything is read from the environment: the service runs inside a
//! container in production, where env vars are the only knob. Legacy
//! variable names (`PR_CACHE_DIR`, `HOST_PR_CACHE_PATH`, `GITHUB_TOKEN`)
//! are honored next to the `ORMBOX_*` namespace.

pub mod error;

pub use error::ConfigError;

use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

/// Fully resolved engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
	pub paths: PathsConfig,
	pub github: GithubConfig,
	pub docker: DockerConfig,
	pub database: DatabaseConfig,
	pub timeouts: TimeoutsConfig,
}

/// Filesystem roots for the source-version cache.
#[derive(Debug, Clone)]
pub struct PathsConfig {
	/// Worktree cache root as visible to this process.
	pub cache_root: PathBuf,
	/// The same root as seen by the container engine. Differs from
	/// `cache_root` when the engine itself runs in a container and the
	/// cache is a bind mount.
	pub host_cache_root: PathBuf,
}

impl Default for PathsConfig {
	fn default() -> Self {
		Self {
			cache_root: PathBuf::from("/app/pr_cache"),
			host_cache_root: PathBuf::from("/app/pr_cache"),
		}
	}
}

#[derive(Debug, Clone)]
pub struct GithubConfig {
	pub api_base: String,
	/// `owner/repo` of the ORM under test.
	pub upstream_repo: String,
	pub token: Option<String>,
}

impl Default for GithubConfig {
	fn default() -> Self {
		Self {
			api_base: "https://api.github.com".to_string(),
			upstream_repo: "django/django".to_string(),
			token: None,
		}
	}
}

#[derive(Debug, Clone)]
pub struct DockerConfig {
	/// Network shared by sandboxes and the database servers.
	pub network: String,
}

impl Default for DockerConfig {
	fn default() -> Self {
		Self {
			network: "ormbox_snippets_net".to_string(),
		}
	}
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
	pub url: String,
}

impl Default for DatabaseConfig {
	fn default() -> Self {
		Self {
			url: "sqlite:./ormbox.db".to_string(),
		}
	}
}

/// Bounds on every external suspension point.
#[derive(Debug, Clone)]
pub struct TimeoutsConfig {
	/// Upstream metadata API calls.
	pub github_metadata: Duration,
	/// Bare-repo clone / fetch.
	pub git_fetch: Duration,
	/// Container wait, release mode.
	pub sandbox_wait: Duration,
	/// Container wait, ref mode. Higher: the image may install the
	/// mounted source tree before running user code.
	pub sandbox_wait_ref: Duration,
	/// Ephemeral database CLI calls.
	pub provision: Duration,
	/// Admission counter staleness floor.
	pub admission_ttl: Duration,
}

impl Default for TimeoutsConfig {
	fn default() -> Self {
		Self {
			github_metadata: Duration::from_secs(30),
			git_fetch: Duration::from_secs(300),
			sandbox_wait: Duration::from_secs(30),
			sandbox_wait_ref: Duration::from_secs(120),
			provision: Duration::from_secs(30),
			admission_ttl: Duration::from_secs(60),
		}
	}
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			paths: PathsConfig::default(),
			github: GithubConfig::default(),
			docker: DockerConfig::default(),
			database: DatabaseConfig::default(),
			timeouts: TimeoutsConfig::default(),
		}
	}
}

/// Load configuration from the environment.
pub fn load_config_from_env() -> Result<EngineConfig, ConfigError> {
	let defaults = EngineConfig::default();

	let cache_root = env_var("ORMBOX_CACHE_DIR")
		.or_else(|| env_var("PR_CACHE_DIR"))
		.map(PathBuf::from)
		.unwrap_or(defaults.paths.cache_root);
	let host_cache_root = env_var("ORMBOX_HOST_CACHE_PATH")
		.or_else(|| env_var("HOST_PR_CACHE_PATH"))
		.map(PathBuf::from)
		.unwrap_or_else(|| cache_root.clone());

	let config = EngineConfig {
		paths: PathsConfig {
			cache_root,
			host_cache_root,
		},
		github: GithubConfig {
			api_base: env_var("ORMBOX_GITHUB_API_BASE").unwrap_or(defaults.github.api_base),
			upstream_repo: env_var("ORMBOX_UPSTREAM_REPO").unwrap_or(defaults.github.upstream_repo),
			token: env_var("GITHUB_TOKEN"),
		},
		docker: DockerConfig {
			network: env_var("ORMBOX_DOCKER_NETWORK").unwrap_or(defaults.docker.network),
		},
		database: DatabaseConfig {
			url: env_var("ORMBOX_DATABASE_URL").unwrap_or(defaults.database.url),
		},
		timeouts: TimeoutsConfig {
			github_metadata: env_secs("ORMBOX_GITHUB_TIMEOUT_SECS")?
				.unwrap_or(defaults.timeouts.github_metadata),
			git_fetch: env_secs("ORMBOX_GIT_FETCH_TIMEOUT_SECS")?
				.unwrap_or(defaults.timeouts.git_fetch),
			sandbox_wait: env_secs("ORMBOX_SANDBOX_WAIT_SECS")?
				.unwrap_or(defaults.timeouts.sandbox_wait),
			sandbox_wait_ref: env_secs("ORMBOX_SANDBOX_WAIT_REF_SECS")?
				.unwrap_or(defaults.timeouts.sandbox_wait_ref),
			provision: env_secs("ORMBOX_PROVISION_TIMEOUT_SECS")?
				.unwrap_or(defaults.timeouts.provision),
			admission_ttl: env_secs("ORMBOX_ADMISSION_TTL_SECS")?
				.unwrap_or(defaults.timeouts.admission_ttl),
		},
	};

	validate_config(&config)?;

	info!(
		cache_root = %config.paths.cache_root.display(),
		host_cache_root = %config.paths.host_cache_root.display(),
		upstream_repo = %config.github.upstream_repo,
		github_token_configured = config.github.token.is_some(),
		docker_network = %config.docker.network,
		database = %config.database.url,
		"Engine configuration loaded"
	);

	Ok(config)
}

fn validate_config(config: &EngineConfig) -> Result<(), ConfigError> {
	if !config.github.upstream_repo.contains('/') {
		return Err(ConfigError::Validation(format!(
			"ORMBOX_UPSTREAM_REPO must be 'owner/repo', got '{}'",
			config.github.upstream_repo
		)));
	}

	if config.timeouts.sandbox_wait_ref < config.timeouts.sandbox_wait {
		return Err(ConfigError::Validation(
			"ORMBOX_SANDBOX_WAIT_REF_SECS must be >= ORMBOX_SANDBOX_WAIT_SECS".to_string(),
		));
	}

	Ok(())
}

fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_secs(name: &str) -> Result<Option<Duration>, ConfigError> {
	match env_var(name) {
		Some(v) => v
			.parse::<u64>()
			.map(|secs| Some(Duration::from_secs(secs)))
			.map_err(|_| ConfigError::InvalidValue {
				key: name.to_string(),
				message: format!("invalid seconds value '{v}'"),
			}),
		None => Ok(None),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = EngineConfig::default();
		assert_eq!(config.github.upstream_repo, "django/django");
		assert_eq!(config.docker.network, "ormbox_snippets_net");
		assert_eq!(config.timeouts.sandbox_wait_ref, Duration::from_secs(120));
		assert_eq!(config.timeouts.admission_ttl, Duration::from_secs(60));
	}

	#[test]
	fn test_host_path_defaults_to_cache_root() {
		let paths = PathsConfig::default();
		assert_eq!(paths.cache_root, paths.host_cache_root);
	}

	#[test]
	fn test_validate_rejects_bad_repo() {
		let mut config = EngineConfig::default();
		config.github.upstream_repo = "django".to_string();
		assert!(validate_config(&config).is_err());
	}

	#[test]
	fn test_validate_rejects_inverted_waits() {
		let mut config = EngineConfig::default();
		config.timeouts.sandbox_wait_ref = Duration::from_secs(5);
		let result = validate_config(&config);
		assert!(result.is_err());
		assert!(result
			.unwrap_err()
			.to_string()
			.contains("SANDBOX_WAIT_REF_SECS"));
	}

	#[test]
	fn test_validate_accepts_defaults() {
		assert!(validate_config(&EngineConfig::default()).is_ok());
	}

	#[test]
	fn test_load_from_env_succeeds() {
		// Unset variables fall through to defaults; variables that are
		// set must at least parse into a valid config.
		assert!(load_config_from_env().is_ok());
	}

	#[test]
	fn test_env_secs_rejects_garbage() {
		std::env::set_var("ORMBOX_TEST_SECS_GARBAGE", "ten");
		let result = env_secs("ORMBOX_TEST_SECS_GARBAGE");
		std::env::remove_var("ORMBOX_TEST_SECS_GARBAGE");
		assert!(result.is_err());
	}
}
