// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use ormbox_common_core::Database;
use ormbox_server_provision::EphemeralDatabase;
use rand::Rng;
use tokio::process::Command;
use tracing::{debug, instrument, trace, warn};

use crate::error::{Result, SandboxError};
use crate::registry::ExecutorDescriptor;

/// Mount point of a source checkout inside ref-mode containers.
pub const REF_MOUNT_POINT: &str = "/django-pr";
/// Path the sandbox writes its structured report to before exiting.
pub const RESULT_PATH: &str = "/tmp/result.json";

/// Everything needed to run one sandbox.
#[derive(Debug, Clone)]
pub struct SandboxRequest {
	pub executor: ExecutorDescriptor,
	pub code: String,
	pub database: Database,
	/// Present when the database engine needed per-run setup.
	pub ephemeral: Option<EphemeralDatabase>,
	/// Host path of a source checkout to bind-mount read-only.
	pub worktree_host_path: Option<PathBuf>,
}

impl SandboxRequest {
	pub fn is_ref_mode(&self) -> bool {
		self.worktree_host_path.is_some()
	}
}

/// Where the payload bytes came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSource {
	/// The structured report file extracted from the stopped container.
	ResultFile,
	/// Container logs; the report file could not be extracted.
	Logs,
}

/// Raw outcome of one container run, before classification.
#[derive(Debug, Clone)]
pub struct SandboxOutcome {
	pub exit_code: i64,
	pub payload: Vec<u8>,
	pub payload_source: PayloadSource,
}

#[async_trait]
pub trait SandboxRunner: Send + Sync {
	async fn run(&self, request: &SandboxRequest) -> Result<SandboxOutcome>;
}

/// Runs sandboxes through the docker CLI: create, start, bounded wait,
/// report extraction from the stopped container, forced removal on every
/// path.
pub struct DockerRunner {
	network: String,
	wait_timeout: Duration,
	ref_wait_timeout: Duration,
}

impl DockerRunner {
	pub fn new(network: impl Into<String>, wait_timeout: Duration, ref_wait_timeout: Duration) -> Self {
		Self {
			network: network.into(),
			wait_timeout,
			ref_wait_timeout,
		}
	}
}

#[async_trait]
impl SandboxRunner for DockerRunner {
	#[instrument(skip(self, request), fields(executor = %request.executor.key, ref_mode = request.is_ref_mode()))]
	async fn run(&self, request: &SandboxRequest) -> Result<SandboxOutcome> {
		let name = container_name(request.is_ref_mode());
		let args = create_args(&name, &self.network, request);

		let create = run_docker(&args, self.wait_timeout).await;
		if let Err(e) = create {
			return Err(map_create_error(e, &request.executor.image));
		}

		let result = self.drive_container(&name, request).await;

		// The container is removed on every path; the happy path already
		// removed it, so only force here if something is left.
		if result.is_err() {
			let _ = run_docker(&["rm".into(), "-f".into(), name.clone()], self.wait_timeout).await;
		}

		result
	}
}

impl DockerRunner {
	async fn drive_container(&self, name: &str, request: &SandboxRequest) -> Result<SandboxOutcome> {
		run_docker(&["start".into(), name.to_string()], self.wait_timeout).await?;

		let wait_timeout = if request.is_ref_mode() {
			self.ref_wait_timeout
		} else {
			self.wait_timeout
		};
		let wait_output = run_docker(&["wait".into(), name.to_string()], wait_timeout).await?;
		let exit_code: i64 = wait_output.trim().parse().map_err(|_| {
			SandboxError::Engine(format!("unparseable docker wait output: {wait_output}"))
		})?;

		let (payload, payload_source) = self.extract_payload(name).await;

		debug!(exit_code, source = ?payload_source, "container finished");

		if let Err(e) = run_docker(&["rm".into(), name.to_string()], self.wait_timeout).await {
			warn!(container = %name, error = %e, "failed to remove container");
		}

		Ok(SandboxOutcome {
			exit_code,
			payload,
			payload_source,
		})
	}

	/// Copies the report out of the stopped container; docker cp works
	/// against stopped containers because it streams a filesystem
	/// archive. Falls back to logs when the program died before writing
	/// the file.
	async fn extract_payload(&self, name: &str) -> (Vec<u8>, PayloadSource) {
		let extracted = self.copy_result_file(name).await;
		match extracted {
			Ok(bytes) => (bytes, PayloadSource::ResultFile),
			Err(e) => {
				debug!(container = %name, error = %e, "report extraction failed, falling back to logs");
				let logs = self.container_logs(name).await.unwrap_or_default();
				(logs, PayloadSource::Logs)
			}
		}
	}

	async fn copy_result_file(&self, name: &str) -> Result<Vec<u8>> {
		let scratch = tempfile::tempdir()?;
		let destination = scratch.path().join("result.json");

		run_docker(
			&[
				"cp".into(),
				format!("{name}:{RESULT_PATH}"),
				destination.to_string_lossy().into_owned(),
			],
			self.wait_timeout,
		)
		.await?;

		Ok(std::fs::read(&destination)?)
	}

	async fn container_logs(&self, name: &str) -> Result<Vec<u8>> {
		let mut cmd = Command::new("docker");
		cmd.args(["logs", name]);

		let output = tokio::time::timeout(self.wait_timeout, cmd.output())
			.await
			.map_err(|_| SandboxError::CommandTimeout {
				args: vec!["logs".to_string()],
				secs: self.wait_timeout.as_secs(),
			})?
			.map_err(SandboxError::Io)?;

		// Stdout and stderr both matter: tracebacks land on stderr.
		let mut combined = output.stdout;
		combined.extend_from_slice(&output.stderr);
		Ok(combined)
	}
}

/// Unique container name; the suffix keeps concurrent runs apart.
fn container_name(ref_mode: bool) -> String {
	let mut rng = rand::thread_rng();
	let suffix: String = (0..6)
		.map(|_| char::from_digit(rng.gen_range(0..16u32), 16).unwrap())
		.collect();
	if ref_mode {
		format!("executor-ref-{suffix}")
	} else {
		format!("executor-{suffix}")
	}
}

/// Full argv for `docker create`. Memory and swap share one limit so the
/// sandbox cannot page its way past the cap.
fn create_args(name: &str, network: &str, request: &SandboxRequest) -> Vec<String> {
	let mut args = vec![
		"create".to_string(),
		"--name".to_string(),
		name.to_string(),
		"--memory".to_string(),
		request.executor.memory.clone(),
		"--memory-swap".to_string(),
		request.executor.memory.clone(),
		"--network".to_string(),
		network.to_string(),
	];

	for (key, value) in build_environment(request) {
		args.push("-e".to_string());
		args.push(format!("{key}={value}"));
	}

	if let Some(host_path) = &request.worktree_host_path {
		args.push("-v".to_string());
		args.push(format!("{}:{REF_MOUNT_POINT}:ro", host_path.display()));
	}

	args.push(request.executor.image.clone());
	args
}

/// Environment contract with the executor images.
fn build_environment(request: &SandboxRequest) -> Vec<(String, String)> {
	let (db_name, host, port, service_user, service_password) = match &request.ephemeral {
		Some(db) => (
			db.name.clone(),
			db.host.clone(),
			db.port.to_string(),
			db.service_user.clone(),
			db.service_password.clone(),
		),
		None => (
			String::new(),
			String::new(),
			String::new(),
			String::new(),
			String::new(),
		),
	};

	vec![
		("CODE".to_string(), request.code.clone()),
		("SERVICE_DB_HOST".to_string(), host),
		("SERVICE_DB_PORT".to_string(), port),
		("SERVICE_DB_USER".to_string(), service_user),
		("SERVICE_DB_PASSWORD".to_string(), service_password),
		("DB_TYPE".to_string(), request.database.as_str().to_string()),
		("DB_NAME".to_string(), db_name.clone()),
		("DB_USER".to_string(), db_name.clone()),
		("DB_PASSWORD".to_string(), db_name),
	]
}

fn map_create_error(error: SandboxError, image: &str) -> SandboxError {
	match error {
		SandboxError::Engine(ref stderr) if is_image_missing(stderr) => SandboxError::ImageMissing {
			image: image.to_string(),
		},
		other => other,
	}
}

fn is_image_missing(stderr: &str) -> bool {
	let lower = stderr.to_lowercase();
	lower.contains("unable to find image")
		|| lower.contains("no such image")
		|| lower.contains("pull access denied")
		|| lower.contains("manifest unknown")
		|| lower.contains("repository does not exist")
}

async fn run_docker(args: &[String], timeout: Duration) -> Result<String> {
	let mut cmd = Command::new("docker");
	cmd.args(args);

	trace!(cmd = %format!("docker {}", args.join(" ")), "running docker command");

	let output = tokio::time::timeout(timeout, cmd.output())
		.await
		.map_err(|_| SandboxError::CommandTimeout {
			args: args.to_vec(),
			secs: timeout.as_secs(),
		})?
		.map_err(|e| {
			if e.kind() == std::io::ErrorKind::NotFound {
				warn!("docker not found in PATH");
				SandboxError::DockerNotInstalled
			} else {
				SandboxError::Io(e)
			}
		})?;

	if output.status.success() {
		Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
	} else {
		Err(SandboxError::Engine(
			String::from_utf8_lossy(&output.stderr).trim().to_string(),
		))
	}
}
