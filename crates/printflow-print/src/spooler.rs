// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The seam between the dispatcher and the OS print spooler.

use async_trait::async_trait;

use printflow_core::types::SpoolError;

/// One spooler submission: the fully rendered bytes for one printer.
#[derive(Debug, Clone)]
pub struct SpoolRequest {
    pub printer: String,
    pub data: Vec<u8>,
    /// Bypass the OS filters (`-o raw`).  False for PDF.
    pub raw: bool,
    /// Job title shown in the OS queue.
    pub title: String,
}

/// Hands rendered payloads to the OS print subsystem.
///
/// `submit` returns once the spooler has accepted or refused the job; the
/// caller bounds it with a timeout.
#[async_trait]
pub trait Spooler: Send + Sync {
    async fn submit(&self, request: SpoolRequest) -> Result<(), SpoolError>;
}
