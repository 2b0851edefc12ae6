// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PrintFlow: Core types, configuration, and error definitions shared across
// all crates.

pub mod config;
pub mod error;
pub mod human_errors;
pub mod types;

pub use config::AgentConfig;
pub use error::PrintflowError;
pub use types::*;

/// Product name used in certificates, logs, and the health endpoint.
pub const APP_TITLE: &str = "PrintFlow Agent";

/// Crate version, reported by `/health`.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
