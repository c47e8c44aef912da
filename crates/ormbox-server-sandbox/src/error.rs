// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
	#[error("docker not found in PATH")]
	DockerNotInstalled,

	#[error("image not available: {image}")]
	ImageMissing { image: String },

	#[error("container engine error: {0}")]
	Engine(String),

	#[error("docker {args:?} timed out after {secs}s")]
	CommandTimeout { args: Vec<String>, secs: u64 },

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SandboxError>;
