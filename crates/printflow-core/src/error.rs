// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for PrintFlow.

use thiserror::Error;

/// Top-level error type for all PrintFlow operations.
#[derive(Debug, Error)]
pub enum PrintflowError {
    // -- Startup --
    /// Fatal: blocks startup (certificate, port binding, unreadable config).
    #[error("configuration error: {0}")]
    Configuration(String),

    // -- Caller errors --
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("not found: {0}")]
    NotFound(String),

    // -- Dispatch --
    #[error("transient dispatch error: {0}")]
    TransientDispatch(String),

    #[error("permanent dispatch error: {0}")]
    PermanentDispatch(String),

    // -- Storage / persistence --
    #[error("database error: {0}")]
    Database(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PrintflowError {
    /// Stable machine-readable code, used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "ConfigurationError",
            Self::InvalidTarget(_) => "InvalidTarget",
            Self::InvalidRequest(_) => "InvalidRequest",
            Self::InvalidState(_) => "InvalidState",
            Self::NotFound(_) => "NotFound",
            Self::TransientDispatch(_) => "TransientDispatchError",
            Self::PermanentDispatch(_) => "PermanentDispatchError",
            Self::Database(_) | Self::Io(_) | Self::Serialization(_) => "InternalError",
        }
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PrintflowError>;
