// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

pub mod classify;
pub mod error;
pub mod registry;
pub mod runner;

pub use classify::{classify_outcome, event_for_error};
pub use error::{Result, SandboxError};
pub use registry::{ExecutorDescriptor, ExecutorFallback, ExecutorRegistry, OrmFamily};
pub use runner::{DockerRunner, PayloadSource, SandboxOutcome, SandboxRequest, SandboxRunner};
