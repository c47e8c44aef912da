// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

pub mod admission;
pub mod error;
pub mod orchestrator;

pub use admission::{AdmissionController, AdmissionRejected, AdmissionSlot};
pub use error::{EngineError, Result};
pub use orchestrator::Engine;
