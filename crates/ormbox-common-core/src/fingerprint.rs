// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use sha2::{Digest, Sha256};

use crate::version::{Database, RefType};

/// Number of commit-hash characters carried in ref cache keys and worktree
/// directory names.
pub const SHA_PREFIX_LEN: usize = 12;

/// 128-bit content fingerprint over the exact code bytes as submitted.
///
/// No whitespace normalization: the ORMs under test are whitespace
/// sensitive, so two visually-equal programs may behave differently.
pub fn fingerprint(code: &str) -> String {
	let digest = Sha256::digest(code.as_bytes());
	hex::encode(&digest[..16])
}

/// Truncates a full commit hash to the prefix used in keys and paths.
pub fn sha12(sha: &str) -> &str {
	if sha.len() > SHA_PREFIX_LEN {
		&sha[..SHA_PREFIX_LEN]
	} else {
		sha
	}
}

/// Result-cache key for one `(version descriptor, database, fingerprint)`
/// triple. Ref keys carry the resolved commit prefix so a moved ref is
/// recomputed instead of served stale.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
	pub fn release(version: &str, database: Database, fingerprint: &str) -> Self {
		CacheKey(format!("{version}-{}-{fingerprint}", database.as_str()))
	}

	pub fn git_ref(
		ref_type: RefType,
		ref_id: &str,
		sha: &str,
		database: Database,
		fingerprint: &str,
	) -> Self {
		CacheKey(format!(
			"{}-{ref_id}-{}-{}-{fingerprint}",
			ref_type.as_str(),
			sha12(sha),
			database.as_str()
		))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl std::fmt::Display for CacheKey {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}
