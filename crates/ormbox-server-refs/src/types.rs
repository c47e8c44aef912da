// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::path::PathBuf;

use ormbox_common_core::RefType;
use serde::{Deserialize, Serialize};

/// A materialized git reference: metadata plus the checkout paths to
/// mount into a sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefInfo {
	pub ref_type: RefType,
	/// PR number, branch name, or tag name.
	pub ref_id: String,
	pub sha: String,
	/// Checkout path as visible to this process.
	pub local_path: PathBuf,
	/// The same checkout as the container engine sees it, for bind
	/// mounting. Differs from `local_path` when the engine itself runs
	/// inside a container.
	pub host_path: PathBuf,
	pub title: String,
	pub author: String,
	/// For PRs: open/closed/merged. Empty for branches and tags.
	pub state: String,
}

/// Branch and tag names may contain `/`; flatten them so one ref maps to
/// one directory level.
pub fn safe_ref_id(ref_id: &str) -> String {
	ref_id.replace('/', "__")
}
