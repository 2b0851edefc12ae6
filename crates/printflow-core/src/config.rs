// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Agent configuration.
//
// Loaded once at startup from `config.json` in the data directory.  Running
// components never mutate it in place: the control bridge publishes a fresh
// immutable snapshot whenever the desktop surface saves new settings.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{PrintflowError, Result};

/// File name of the configuration inside the data directory.
pub const CONFIG_FILE: &str = "config.json";

/// Lowest port the preferences window accepts.
const MIN_PORT: u16 = 1024;

/// Persistent agent settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// HTTPS listening port.
    pub port: u16,
    /// Default auto-cut flag for jobs that do not request it.
    pub auto_cut: bool,
    /// Start the desktop surface minimized to the tray.
    pub start_minimized: bool,
    /// Default tracing filter (overridden by `RUST_LOG`).
    pub log_level: String,
    /// Reject jobs for printers the registry does not know.
    pub strict_targets: bool,
    /// Serve plain HTTP if the certificate cannot be set up.  Operator opt-in.
    pub allow_plaintext: bool,
    pub retry: RetrySettings,
    /// Upper bound for a single spooler submission.
    pub spool_timeout_secs: u64,
    /// Printer enumeration refresh interval.
    pub printer_poll_secs: u64,
    /// Retained job history before oldest terminal jobs are evicted.
    pub history_limit: usize,
    /// Keep job history in SQLite across restarts.
    pub persist_history: bool,
    /// Largest accepted request body.
    pub max_payload_bytes: usize,
    /// Origins allowed by CORS; `*` allows any.
    pub cors_origins: Vec<String>,
    pub certificate: CertificateSettings,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            auto_cut: false,
            start_minimized: false,
            log_level: "info".into(),
            strict_targets: true,
            allow_plaintext: false,
            retry: RetrySettings::default(),
            spool_timeout_secs: 30,
            printer_poll_secs: 30,
            history_limit: 500,
            persist_history: false,
            max_payload_bytes: 32 * 1024 * 1024,
            cors_origins: vec!["*".into()],
            certificate: CertificateSettings::default(),
        }
    }
}

/// Retry policy for transient dispatch failures.
///
/// The transient/permanent boundary for unrecognised spooler messages is
/// driven by the two pattern lists (lower-case substrings).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total spooler attempts per job, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub transient_patterns: Vec<String>,
    pub permanent_patterns: Vec<String>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            transient_patterns: [
                "timed out",
                "timeout",
                "busy",
                "connection refused",
                "connection reset",
                "broken pipe",
                "temporarily unavailable",
                "try again",
            ]
            .map(String::from)
            .to_vec(),
            permanent_patterns: [
                "does not exist",
                "unknown destination",
                "not found",
                "forbidden",
                "not authorized",
                "permission denied",
                "access denied",
                "unsupported document",
                "malformed",
            ]
            .map(String::from)
            .to_vec(),
        }
    }
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Self-signed certificate lifetime settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificateSettings {
    pub validity_days: u32,
    /// Regenerate when fewer than this many days remain.
    pub renew_before_days: u32,
}

impl Default for CertificateSettings {
    fn default() -> Self {
        Self {
            validity_days: 3650,
            renew_before_days: 30,
        }
    }
}

impl AgentConfig {
    /// Load the configuration from `dir/config.json`.
    ///
    /// A missing file yields defaults.  An unreadable or invalid file is a
    /// `Configuration` error: starting with silently different settings
    /// (e.g. another port) would strand the remote application.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(&path).map_err(|e| {
            PrintflowError::Configuration(format!("read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&data).map_err(|e| {
            PrintflowError::Configuration(format!("parse {}: {e}", path.display()))
        })?;
        config.validate()?;

        info!(path = %path.display(), port = config.port, "configuration loaded");
        Ok(config)
    }

    /// Persist the configuration to `dir/config.json` (write-then-rename).
    pub fn save(&self, dir: &Path) -> Result<()> {
        self.validate()?;
        std::fs::create_dir_all(dir)?;

        let path = dir.join(CONFIG_FILE);
        let tmp = dir.join(format!("{CONFIG_FILE}.tmp"));
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;

        debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Check every value is within its accepted range.
    pub fn validate(&self) -> Result<()> {
        if self.port < MIN_PORT {
            return Err(PrintflowError::Configuration(format!(
                "port {} out of range ({MIN_PORT}-65535)",
                self.port
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(PrintflowError::Configuration(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(PrintflowError::Configuration(
                "retry.base_delay_ms exceeds retry.max_delay_ms".into(),
            ));
        }
        if self.spool_timeout_secs == 0 || self.printer_poll_secs == 0 {
            return Err(PrintflowError::Configuration(
                "spool_timeout_secs and printer_poll_secs must be positive".into(),
            ));
        }
        if self.history_limit == 0 {
            return Err(PrintflowError::Configuration(
                "history_limit must be positive".into(),
            ));
        }
        if self.certificate.validity_days <= self.certificate.renew_before_days {
            return Err(PrintflowError::Configuration(
                "certificate.validity_days must exceed renew_before_days".into(),
            ));
        }
        if self.cors_origins.is_empty() {
            warn!("no CORS origins configured; browser clients will be refused");
        }
        Ok(())
    }

    pub fn spool_timeout(&self) -> Duration {
        Duration::from_secs(self.spool_timeout_secs)
    }

    pub fn printer_poll_interval(&self) -> Duration {
        Duration::from_secs(self.printer_poll_secs)
    }
}
