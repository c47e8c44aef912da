// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

pub mod error;
pub mod naming;
pub mod store;

pub use error::{Result, SnippetError};
pub use naming::{random_name, slugify};
pub use store::{
	NewSnippet, Pagination, Snippet, SnippetChanges, SnippetPage, SnippetStore, SqliteSnippetStore,
	PER_PAGE,
};
