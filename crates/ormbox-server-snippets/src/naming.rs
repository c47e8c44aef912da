// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use rand::Rng;

const RANDOM_NAME_LEN: usize = 8;

/// URL-friendly slug: lowercase, punctuation stripped, whitespace and
/// dash runs collapsed to a single dash.
pub fn slugify(text: &str) -> String {
	let lowered = text.to_lowercase();

	let mut slug = String::with_capacity(lowered.len());
	let mut pending_dash = false;
	for c in lowered.chars() {
		if c.is_alphanumeric() || c == '_' {
			if pending_dash && !slug.is_empty() {
				slug.push('-');
			}
			pending_dash = false;
			slug.push(c);
		} else if c.is_whitespace() || c == '-' {
			pending_dash = true;
		}
		// Everything else is dropped entirely.
	}

	slug
}

/// Random A-Za-z0-9 name for snippets saved without one.
pub fn random_name() -> String {
	const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
	let mut rng = rand::thread_rng();
	(0..RANDOM_NAME_LEN)
		.map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
		.collect()
}
