// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
	#[error("{tool} not found in PATH")]
	ToolNotInstalled { tool: &'static str },

	#[error("{tool} {args:?} failed: {stderr}")]
	CommandFailed {
		tool: &'static str,
		args: Vec<String>,
		stderr: String,
	},

	#[error("{tool} timed out after {secs}s")]
	CommandTimeout { tool: &'static str, secs: u64 },

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("{0} requires no setup")]
	NoSetupNeeded(&'static str),
}

pub type Result<T> = std::result::Result<T, ProvisionError>;
