// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

#[derive(Debug, thiserror::Error)]
pub enum SnippetError {
	#[error("Snippet not found: {0}")]
	NotFound(String),

	#[error("Session does not own snippet: {0}")]
	NotOwner(String),

	#[error("Invalid snippet: {0}")]
	Invalid(String),

	#[error("Database error: {0}")]
	Database(#[from] ormbox_server_db::DbError),
}

pub type Result<T> = std::result::Result<T, SnippetError>;
