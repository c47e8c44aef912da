// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use ormbox_common_core::{ExecutionEvent, SandboxReport};
use tracing::{debug, warn};

use crate::error::SandboxError;
use crate::registry::ExecutorDescriptor;
use crate::runner::SandboxOutcome;

/// Exit codes with a dedicated meaning in the sandbox contract.
const EXIT_OOM: i64 = 137;
const EXIT_TIMEOUT: i64 = 124;
const EXIT_NETWORK: i64 = 101;

/// Maps a finished container to its terminal event.
///
/// The mapping is authoritative: every exit code lands in exactly one
/// event, and a report that fails to parse is an internal error (our
/// contract with the image broke), never blamed on the user's code.
pub fn classify_outcome(outcome: &SandboxOutcome) -> ExecutionEvent {
	match outcome.exit_code {
		0 => match SandboxReport::parse(&outcome.payload) {
			Ok(report) => ExecutionEvent::Done { result: report },
			Err(e) => {
				warn!(error = %e, source = ?outcome.payload_source, "sandbox exited 0 with unparseable report");
				ExecutionEvent::internal_error()
			}
		},
		EXIT_OOM => ExecutionEvent::oom_killed(),
		EXIT_TIMEOUT => ExecutionEvent::timeout(),
		EXIT_NETWORK => ExecutionEvent::network_disabled(),
		code => {
			let message = String::from_utf8_lossy(&outcome.payload).into_owned();
			if code == 1 && is_network_failure(&message) {
				return ExecutionEvent::network_disabled();
			}
			debug!(exit_code = code, "sandbox exited with code error");
			ExecutionEvent::CodeError { error: message }
		}
	}
}

/// Maps a runner failure (the sandbox never produced an exit code) to
/// its terminal event.
pub fn event_for_error(executor: &ExecutorDescriptor, error: &SandboxError) -> ExecutionEvent {
	match error {
		SandboxError::ImageMissing { .. } => ExecutionEvent::image_missing(&executor.verbose),
		other => {
			warn!(executor = %executor.key, error = %other, "sandbox runner failed");
			ExecutionEvent::internal_error()
		}
	}
}

/// Sandboxes run with networking disabled at the platform level; user
/// code that tries anyway dies with one of these in its traceback.
fn is_network_failure(message: &str) -> bool {
	message.contains("Network is unreachable")
		|| message.contains("Temporary failure in name resolution")
}
