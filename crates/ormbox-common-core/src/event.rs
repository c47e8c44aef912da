// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};

use crate::report::SandboxReport;

/// Terminal outcome of one execution. Exactly one event is returned per
/// submission; the wire shape is `{"event": "<tag>", ...}` and adapters
/// serialize it as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ExecutionEvent {
	#[serde(rename = "job-done")]
	Done { result: SandboxReport },

	#[serde(rename = "job-code-error")]
	CodeError { error: String },

	#[serde(rename = "job-oom-killed")]
	OomKilled { error: String },

	#[serde(rename = "job-network-disabled")]
	NetworkDisabled { error: String },

	#[serde(rename = "job-timeout")]
	Timeout { error: String },

	#[serde(rename = "job-image-not-found-error")]
	ImageMissing { error: String },

	#[serde(rename = "job-internal-error")]
	InternalError { error: String },

	#[serde(rename = "job-overloaded")]
	Overloaded { error: String },
}

impl ExecutionEvent {
	pub fn oom_killed() -> Self {
		ExecutionEvent::OomKilled {
			error: "OOM! Please use less memory. Sorry!".to_string(),
		}
	}

	pub fn network_disabled() -> Self {
		ExecutionEvent::NetworkDisabled {
			error: "Network is disabled! Sorry!".to_string(),
		}
	}

	pub fn timeout() -> Self {
		ExecutionEvent::Timeout {
			error: "Timed out! Maximum allowed is 10 seconds. Sorry!".to_string(),
		}
	}

	pub fn image_missing(executor_verbose: &str) -> Self {
		ExecutionEvent::ImageMissing {
			error: format!("Executor for {executor_verbose} not found!"),
		}
	}

	pub fn overloaded(max_concurrent: u32) -> Self {
		ExecutionEvent::Overloaded {
			error: format!(
				"System is currently overloaded (>= {max_concurrent} instances), please try again in a few! Sorry!"
			),
		}
	}

	/// Generic internal-error event. Diagnostic detail belongs in logs,
	/// never in the user-visible string.
	pub fn internal_error() -> Self {
		ExecutionEvent::InternalError {
			error: "Unknown error occurred. Please try again later.".to_string(),
		}
	}

	pub fn tag(&self) -> &'static str {
		match self {
			ExecutionEvent::Done { .. } => "job-done",
			ExecutionEvent::CodeError { .. } => "job-code-error",
			ExecutionEvent::OomKilled { .. } => "job-oom-killed",
			ExecutionEvent::NetworkDisabled { .. } => "job-network-disabled",
			ExecutionEvent::Timeout { .. } => "job-timeout",
			ExecutionEvent::ImageMissing { .. } => "job-image-not-found-error",
			ExecutionEvent::InternalError { .. } => "job-internal-error",
			ExecutionEvent::Overloaded { .. } => "job-overloaded",
		}
	}

	pub fn is_done(&self) -> bool {
		matches!(self, ExecutionEvent::Done { .. })
	}
}
