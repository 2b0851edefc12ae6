// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The desktop surface seam.
//
// A surface (tray icon, preferences window, or the headless logger) only
// ever sees snapshots and only ever talks back through `ControlHandle`.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::control::{ControlHandle, ServiceSnapshot, TrustInfo};

/// Something that shows service state to the operator.
///
/// Both methods are called from the task running [`drive_surface`] and must
/// return promptly; a GUI implementation forwards to its own event loop.
pub trait DesktopSurface: Send + Sync {
    /// Show the latest state.
    fn present(&self, snapshot: &ServiceSnapshot);

    /// Walk the operator through trusting the local certificate.  Called once
    /// per certificate.
    fn show_trust_prompt(&self, trust: &TrustInfo);
}

/// Feed snapshots to `surface` until the service stops or `cancel` fires.
pub async fn drive_surface(
    surface: Arc<dyn DesktopSurface>,
    mut handle: ControlHandle,
    cancel: CancellationToken,
) {
    let mut prompted_for: Option<String> = None;
    let mut snapshot = handle.snapshot();

    loop {
        surface.present(&snapshot);

        if let Some(trust) = &snapshot.trust {
            if prompted_for.as_deref() != Some(trust.fingerprint.as_str()) {
                surface.show_trust_prompt(trust);
                prompted_for = Some(trust.fingerprint.clone());
            }
        }

        snapshot = tokio::select! {
            _ = cancel.cancelled() => break,
            next = handle.changed() => match next {
                Some(next) => next,
                None => break,
            },
        };
    }
    debug!("desktop surface detached");
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;

    use chrono::Utc;
    use printflow_core::AgentConfig;
    use printflow_print::{JobQueue, PrinterBackend, PrinterRegistry, SimulatedPrinters};

    use super::*;
    use crate::control::ControlBridge;

    #[derive(Default)]
    struct Recorder {
        presented: Mutex<usize>,
        prompts: Mutex<Vec<String>>,
    }

    impl DesktopSurface for Recorder {
        fn present(&self, _snapshot: &ServiceSnapshot) {
            *self.presented.lock().expect("lock") += 1;
        }

        fn show_trust_prompt(&self, trust: &TrustInfo) {
            self.prompts
                .lock()
                .expect("lock")
                .push(trust.fingerprint.clone());
        }
    }

    fn trust(fingerprint: &str) -> TrustInfo {
        TrustInfo {
            urls: vec!["https://localhost:5000".into()],
            fingerprint: fingerprint.into(),
            expires_at: Utc::now(),
            cert_path: PathBuf::from("server.crt"),
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn trust_prompt_shown_once_per_certificate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sim = Arc::new(SimulatedPrinters::new(["LAB1"]));
        let registry = Arc::new(PrinterRegistry::new(
            sim as Arc<dyn PrinterBackend>,
            Duration::from_secs(60),
        ));
        let (queue, _wake) = JobQueue::new(Arc::clone(&registry), 10);
        let cancel = CancellationToken::new();
        let (bridge, handle, _commands) = ControlBridge::new(
            Arc::new(queue),
            registry,
            AgentConfig::default(),
            dir.path().to_path_buf(),
            cancel.clone(),
        );

        let recorder = Arc::new(Recorder::default());
        let task = tokio::spawn(drive_surface(
            Arc::clone(&recorder) as Arc<dyn DesktopSurface>,
            handle,
            cancel.clone(),
        ));

        bridge.set_trust(trust("AA"));
        settle().await;
        bridge.publish();
        settle().await;
        bridge.set_trust(trust("BB"));
        settle().await;

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("surface stops")
            .expect("join");

        assert_eq!(*recorder.prompts.lock().expect("lock"), vec!["AA", "BB"]);
        assert!(*recorder.presented.lock().expect("lock") >= 3);
    }
}
