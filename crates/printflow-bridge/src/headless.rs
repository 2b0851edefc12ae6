// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Surface for servers and CI: everything the tray would show goes to the log.

use std::sync::{Mutex, PoisonError};

use tracing::{info, warn};

use crate::control::{ServiceSnapshot, TrustInfo};
use crate::surface::DesktopSurface;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Seen {
    queue_depth: usize,
    failed: usize,
    printers: usize,
    last_error: Option<String>,
}

/// Logs queue and error changes instead of drawing them.
///
/// Only transitions are logged; a snapshot identical to the previous one in
/// the fields above produces no output.
#[derive(Debug, Default)]
pub struct HeadlessSurface {
    seen: Mutex<Option<Seen>>,
}

impl HeadlessSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `snapshot`; returns `true` when it differs from the last one.
    fn observe(&self, snapshot: &ServiceSnapshot) -> bool {
        let current = Seen {
            queue_depth: snapshot.queue_depth,
            failed: snapshot.failed,
            printers: snapshot.printers.len(),
            last_error: snapshot.last_error.as_ref().map(|e| e.job_id.to_string()),
        };
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        if seen.as_ref() == Some(&current) {
            return false;
        }
        *seen = Some(current);
        true
    }
}

impl DesktopSurface for HeadlessSurface {
    fn present(&self, snapshot: &ServiceSnapshot) {
        if !self.observe(snapshot) {
            return;
        }

        info!(
            queue_depth = snapshot.queue_depth,
            dispatching = snapshot.dispatching,
            succeeded = snapshot.succeeded,
            failed = snapshot.failed,
            printers = snapshot.printers.len(),
            "service status"
        );

        if let Some(error) = &snapshot.last_error {
            warn!(
                job_id = %error.job_id,
                printer = %error.printer,
                code = error.code.map(|c| c.as_str()).unwrap_or("Unknown"),
                message = %error.message,
                hint = %error.hint.message,
                "last print failure"
            );
        }
        if let Some(reason) = &snapshot.config_error {
            warn!(%reason, "configuration update was refused");
        }
    }

    fn show_trust_prompt(&self, trust: &TrustInfo) {
        info!(
            fingerprint = %trust.fingerprint,
            expires_at = %trust.expires_at,
            cert = %trust.cert_path.display(),
            "open each address once in the browser and accept the certificate"
        );
        for url in &trust.urls {
            info!(%url, "trust URL");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use printflow_core::AgentConfig;
    use printflow_core::human_errors::humanize_job_error;
    use printflow_core::types::{ErrorCode, JobId};

    use super::*;
    use crate::control::LastError;

    fn snapshot(queue_depth: usize, last_error: Option<LastError>) -> ServiceSnapshot {
        ServiceSnapshot {
            queue_depth,
            dispatching: 0,
            succeeded: 0,
            failed: usize::from(last_error.is_some()),
            printers: Vec::new(),
            last_error,
            trust: None,
            config: Arc::new(AgentConfig::default()),
            config_error: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn only_transitions_are_reported() {
        let surface = HeadlessSurface::new();
        assert!(surface.observe(&snapshot(0, None)));
        assert!(!surface.observe(&snapshot(0, None)));
        assert!(surface.observe(&snapshot(2, None)));
        assert!(!surface.observe(&snapshot(2, None)));
    }

    #[test]
    fn a_new_failure_is_a_transition() {
        let surface = HeadlessSurface::new();
        let failure = LastError {
            job_id: JobId::new(),
            printer: "LAB1".into(),
            code: Some(ErrorCode::PrinterNotFound),
            message: "lp: The printer or class does not exist.".into(),
            at: Utc::now(),
            hint: humanize_job_error(Some(ErrorCode::PrinterNotFound), ""),
        };
        assert!(surface.observe(&snapshot(0, None)));
        assert!(surface.observe(&snapshot(0, Some(failure.clone()))));
        assert!(!surface.observe(&snapshot(0, Some(failure))));
        surface.present(&snapshot(1, None));
    }
}
