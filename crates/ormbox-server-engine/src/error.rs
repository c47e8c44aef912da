// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

/// Errors that never become execution events: bad input the adapter
/// should turn into a 4xx, and wiring failures at startup. Everything
/// that happens after a submission is accepted maps into the closed
/// event set instead.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
	#[error("Invalid submission: {0}")]
	InvalidSubmission(String),

	#[error("Engine initialization failed: {0}")]
	Init(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
