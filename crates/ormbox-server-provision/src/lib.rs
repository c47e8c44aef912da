// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

pub mod engines;
pub mod error;

pub use engines::{
	all_engines, engine_for, DatabaseEngine, EphemeralDatabase, MariadbEngine, PostgresEngine,
	SqliteEngine,
};
pub use error::{ProvisionError, Result};
