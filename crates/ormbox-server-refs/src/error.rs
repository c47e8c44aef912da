// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

#[derive(Debug, thiserror::Error)]
pub enum RefError {
	#[error("{0} not found")]
	NotFound(String),

	#[error("Failed to fetch ref: {0}")]
	Fetch(String),

	#[error("git not found in PATH")]
	GitNotInstalled,

	#[error("git {args:?} failed: {stderr}")]
	CommandFailed { args: Vec<String>, stderr: String },

	#[error("git {args:?} timed out after {secs}s")]
	CommandTimeout { args: Vec<String>, secs: u64 },

	#[error("HTTP error: {0}")]
	Http(#[from] reqwest::Error),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RefError>;
