// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};

/// Structured result a sandbox writes to `/tmp/result.json` before exiting.
///
/// The field set is a contract with the executor images; all five fields
/// must be present for a run to classify as done.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxReport {
	/// Raw stdout of the user program.
	pub output: String,
	/// Stdout fragments attributed to source lines.
	pub outputs: Vec<LineOutput>,
	/// SQL statements executed by the ORM, in order.
	pub queries: Vec<QueryRecord>,
	/// Entity-relationship diagram: url-safe base64 of zlib-compressed
	/// mermaid source. Opaque to the engine; rendered by the frontend.
	pub erd: String,
	/// Value returned by the user program's entry point, if any.
	pub returned: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineOutput {
	pub line_number: u32,
	pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
	pub sql: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub template: Option<String>,
	/// Execution time as reported by the ORM's query log, in seconds.
	pub time: f64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub line_number: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub source_context: Option<String>,
}

impl SandboxReport {
	/// Parses the bytes extracted from a sandbox. Any deviation from the
	/// contract (missing field, truncated stream, non-JSON logs) is an
	/// error; the caller maps it to an internal-error event, never to a
	/// user code error.
	pub fn parse(bytes: &[u8]) -> Result<Self, serde_json::Error> {
		serde_json::from_slice(bytes)
	}
}
