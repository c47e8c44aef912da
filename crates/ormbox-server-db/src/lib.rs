// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

pub mod admission;
pub mod cache;
pub mod error;
pub mod pool;
pub mod snippet;
pub mod testing;

pub use admission::{AdmissionRepository, AdmissionStore};
pub use cache::{ResultCacheRepository, ResultCacheStore};
pub use error::{DbError, Result};
pub use pool::create_pool;
pub use snippet::{NewSnippetRecord, SnippetPageRecord, SnippetRecord, SnippetRepository};
