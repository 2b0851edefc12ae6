// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Tracing setup: human-readable stdout plus a daily log file in the data
// directory.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use printflow_core::error::{PrintflowError, Result};

/// Log file prefix; the appender adds the date.
pub const LOG_FILE: &str = "agent.log";

/// `RUST_LOG` wins; otherwise the configured level.
fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.  Keep the guard alive until exit or the
/// file writer loses buffered lines.
pub fn init(data_dir: &Path, default_level: &str) -> Result<WorkerGuard> {
    let appender = tracing_appender::rolling::daily(data_dir, LOG_FILE);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(filter(default_level))
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| PrintflowError::Configuration(format!("logging already initialised: {e}")))?;

    Ok(guard)
}
