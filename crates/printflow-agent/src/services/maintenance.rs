// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Background maintenance: periodic printer polling and certificate renewal.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use printflow_bridge::ControlBridge;
use printflow_core::error::Result;
use printflow_print::PrinterRegistry;
use printflow_security::server_config;

use super::context::{TlsSetup, trust_info};

/// How often the certificate is re-checked against its renewal window.
const CERT_CHECK_INTERVAL: Duration = Duration::from_secs(12 * 60 * 60);

pub struct Maintenance {
    pub registry: Arc<PrinterRegistry>,
    pub bridge: Arc<ControlBridge>,
    pub tls: Option<TlsSetup>,
    pub trust_urls: Vec<String>,
    pub cancel: CancellationToken,
}

impl Maintenance {
    pub async fn run(self) {
        let mut next_cert_check = Instant::now() + CERT_CHECK_INTERVAL;

        loop {
            let poll_interval = self.bridge.config().printer_poll_interval();
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(poll_interval) => {
                    let printers = self.registry.list_printers().await;
                    debug!(count = printers.len(), "printer poll");
                    self.bridge.publish();
                }
                _ = sleep_until(next_cert_check), if self.tls.is_some() => {
                    next_cert_check = Instant::now() + CERT_CHECK_INTERVAL;
                    if let Err(e) = self.check_certificate() {
                        error!(error = %e, "certificate renewal failed; keeping the current one");
                    }
                }
            }
        }
        debug!("maintenance stopped");
    }

    /// Renew the certificate if needed and swap it into the listener.
    ///
    /// Returns `true` when a new certificate was installed.  Connections
    /// already established keep the old one.
    pub fn check_certificate(&self) -> Result<bool> {
        let Some(tls) = &self.tls else {
            return Ok(false);
        };
        let cert = tls.store.ensure_certificate(&tls.subject)?;
        let current = self.bridge.trust().map(|t| t.fingerprint);
        if current.as_deref() == Some(cert.info().fingerprint.as_str()) {
            return Ok(false);
        }

        tls.reloader.replace(server_config(&cert)?);
        self.bridge
            .set_trust(trust_info(&cert, self.trust_urls.clone(), &tls.store));
        info!(
            fingerprint = %cert.info().fingerprint,
            expires_at = %cert.info().expires_at,
            "certificate renewed; browsers must trust it again"
        );
        Ok(true)
    }
}
