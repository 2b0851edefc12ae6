// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service side of the control bridge.
//
// `ControlBridge::run` is a single task that owns publication: it rebuilds
// the snapshot whenever the queue reports a change (and on a slow tick, to
// pick up printer list refreshes), and applies commands from the surface.
// Configuration updates are validated, persisted, then published as a new
// `Arc<AgentConfig>` on the config watch channel the dispatcher reads.

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use printflow_core::AgentConfig;
use printflow_core::error::{PrintflowError, Result};
use printflow_core::human_errors::{HumanError, humanize_job_error};
use printflow_core::types::{ErrorCode, JobId, JobStatus, Reachability};
use printflow_print::{JobQueue, PrinterRegistry};

/// Pending commands the surface may queue before being told to retry.
const COMMAND_CAPACITY: usize = 16;

/// How often the snapshot is rebuilt without a queue event.
const REFRESH_TICK: Duration = Duration::from_secs(5);

/// One printer as the tray shows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrinterView {
    pub name: String,
    pub reachability: Reachability,
    pub supports_cut: bool,
    /// Jobs waiting for this printer.
    pub queued: usize,
    /// A job for this printer is at the spooler right now.
    pub dispatching: bool,
}

/// The most recent job failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    pub job_id: JobId,
    pub printer: String,
    pub code: Option<ErrorCode>,
    /// Verbatim spooler message.
    pub message: String,
    pub at: DateTime<Utc>,
    /// Plain-language explanation for the operator.
    pub hint: HumanError,
}

/// What the operator needs for the one-time browser trust step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustInfo {
    /// `https://<host>:<port>` for localhost and every local address.
    pub urls: Vec<String>,
    pub fingerprint: String,
    pub expires_at: DateTime<Utc>,
    pub cert_path: PathBuf,
}

/// Read-only view of the running service.
#[derive(Debug, Clone)]
pub struct ServiceSnapshot {
    /// Jobs not yet terminal.
    pub queue_depth: usize,
    pub dispatching: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub printers: Vec<PrinterView>,
    pub last_error: Option<LastError>,
    pub trust: Option<TrustInfo>,
    pub config: Arc<AgentConfig>,
    /// Why the last configuration update was refused, if it was.
    pub config_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Requests from the desktop surface.
#[derive(Debug, Clone)]
pub enum ControlCommand {
    /// Replace the configuration.  The listening port applies on restart.
    UpdateConfig(AgentConfig),
    RefreshPrinters,
    Shutdown,
}

/// Surface side of the bridge: read snapshots, send commands.
#[derive(Clone)]
pub struct ControlHandle {
    snapshots: watch::Receiver<Arc<ServiceSnapshot>>,
    commands: mpsc::Sender<ControlCommand>,
}

impl ControlHandle {
    /// The latest snapshot.
    pub fn snapshot(&self) -> Arc<ServiceSnapshot> {
        Arc::clone(&self.snapshots.borrow())
    }

    /// Wait for the next snapshot.  `None` once the service has stopped.
    pub async fn changed(&mut self) -> Option<Arc<ServiceSnapshot>> {
        self.snapshots.changed().await.ok()?;
        Some(Arc::clone(&self.snapshots.borrow_and_update()))
    }

    /// Queue a command without blocking (safe from a UI event loop).
    pub fn send(&self, command: ControlCommand) -> Result<()> {
        self.commands.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                PrintflowError::InvalidState("control bridge is busy, try again".into())
            }
            mpsc::error::TrySendError::Closed(_) => {
                PrintflowError::InvalidState("service has stopped".into())
            }
        })
    }
}

/// Service side of the bridge.
pub struct ControlBridge {
    queue: Arc<JobQueue>,
    registry: Arc<PrinterRegistry>,
    data_dir: PathBuf,
    cancel: CancellationToken,
    config: watch::Sender<Arc<AgentConfig>>,
    snapshots: watch::Sender<Arc<ServiceSnapshot>>,
    trust: RwLock<Option<TrustInfo>>,
    config_error: RwLock<Option<String>>,
}

impl ControlBridge {
    /// Build the bridge around the initial configuration.
    ///
    /// Returns the bridge, the surface handle, and the command receiver to
    /// pass to [`ControlBridge::run`].
    pub fn new(
        queue: Arc<JobQueue>,
        registry: Arc<PrinterRegistry>,
        config: AgentConfig,
        data_dir: PathBuf,
        cancel: CancellationToken,
    ) -> (Arc<Self>, ControlHandle, mpsc::Receiver<ControlCommand>) {
        let config = Arc::new(config);
        let (config_tx, _) = watch::channel(Arc::clone(&config));
        let initial = ServiceSnapshot {
            queue_depth: 0,
            dispatching: 0,
            succeeded: 0,
            failed: 0,
            printers: Vec::new(),
            last_error: None,
            trust: None,
            config,
            config_error: None,
            updated_at: Utc::now(),
        };
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(initial));
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);

        let bridge = Arc::new(Self {
            queue,
            registry,
            data_dir,
            cancel,
            config: config_tx,
            snapshots: snapshot_tx,
            trust: RwLock::new(None),
            config_error: RwLock::new(None),
        });
        bridge.publish();

        let handle = ControlHandle {
            snapshots: snapshot_rx,
            commands: command_tx,
        };
        (bridge, handle, command_rx)
    }

    /// Receiver of configuration snapshots, for the dispatcher.
    pub fn config_receiver(&self) -> watch::Receiver<Arc<AgentConfig>> {
        self.config.subscribe()
    }

    /// The configuration currently in force.
    pub fn config(&self) -> Arc<AgentConfig> {
        Arc::clone(&self.config.borrow())
    }

    /// Publish trust details (after certificate setup or renewal).
    pub fn set_trust(&self, trust: TrustInfo) {
        *self.trust.write().unwrap_or_else(PoisonError::into_inner) = Some(trust);
        self.publish();
    }

    pub fn trust(&self) -> Option<TrustInfo> {
        self.trust.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Process commands and keep the snapshot current until cancelled.
    pub async fn run(self: Arc<Self>, mut commands: mpsc::Receiver<ControlCommand>) {
        let mut events = self.queue.subscribe();
        let mut tick = tokio::time::interval(REFRESH_TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut surface_attached = true;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = events.recv() => match event {
                    Ok(_) => self.publish(),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "bridge lagged behind queue events");
                        self.publish();
                    }
                    Err(RecvError::Closed) => break,
                },
                command = commands.recv(), if surface_attached => match command {
                    Some(command) => self.handle(command).await,
                    // Surface gone; keep publishing for the API side.
                    None => surface_attached = false,
                },
                _ = tick.tick() => self.publish(),
            }
        }
        debug!("control bridge stopped");
    }

    async fn handle(&self, command: ControlCommand) {
        match command {
            ControlCommand::UpdateConfig(config) => {
                let result = self.apply_config(config);
                *self
                    .config_error
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) =
                    result.err().map(|e| e.to_string());
            }
            ControlCommand::RefreshPrinters => {
                let printers = self.registry.refresh().await;
                info!(count = printers.len(), "printer list refreshed on request");
            }
            ControlCommand::Shutdown => {
                info!("shutdown requested from desktop surface");
                self.cancel.cancel();
            }
        }
        self.publish();
    }

    /// Validate, persist, and publish a new configuration.
    pub fn apply_config(&self, config: AgentConfig) -> Result<()> {
        if let Err(e) = config.validate() {
            warn!(error = %e, "configuration update rejected");
            return Err(e);
        }
        config.save(&self.data_dir)?;

        let previous = self.config();
        if previous.port != config.port {
            info!(
                from = previous.port,
                to = config.port,
                "port change saved; it takes effect after restart"
            );
        }

        self.queue.set_history_limit(config.history_limit);
        self.registry.set_poll_interval(config.printer_poll_interval());
        self.config.send_replace(Arc::new(config));
        info!("configuration updated");
        Ok(())
    }

    /// Rebuild and publish the snapshot.
    pub fn publish(&self) {
        let stats = self.queue.stats();
        let queued = self.queue.list(&printflow_core::types::JobFilter {
            status: Some(JobStatus::Queued),
            printer: None,
        });
        let dispatching = self.queue.list(&printflow_core::types::JobFilter {
            status: Some(JobStatus::Dispatching),
            printer: None,
        });

        let printers = self
            .registry
            .cached()
            .iter()
            .map(|device| PrinterView {
                name: device.name.clone(),
                reachability: device.reachability,
                supports_cut: device.capabilities.supports_cut,
                queued: queued.iter().filter(|j| j.printer == device.name).count(),
                dispatching: dispatching.iter().any(|j| j.printer == device.name),
            })
            .collect();

        let last_error = self.queue.last_failure().map(|job| {
            let message = job.error.clone().unwrap_or_default();
            LastError {
                job_id: job.id,
                printer: job.printer.clone(),
                code: job.error_code,
                hint: humanize_job_error(job.error_code, &message),
                message,
                at: job.updated_at,
            }
        });

        let snapshot = ServiceSnapshot {
            queue_depth: stats.depth(),
            dispatching: stats.dispatching,
            succeeded: stats.succeeded,
            failed: stats.failed,
            printers,
            last_error,
            trust: self.trust(),
            config: self.config(),
            config_error: self
                .config_error
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            updated_at: Utc::now(),
        };
        self.snapshots.send_replace(Arc::new(snapshot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use printflow_core::types::{JobFlags, PayloadFormat};
    use printflow_print::{PrinterBackend, SimulatedPrinters, TargetPolicy};

    struct Fixture {
        _dir: tempfile::TempDir,
        data_dir: PathBuf,
        queue: Arc<JobQueue>,
        bridge: Arc<ControlBridge>,
        handle: ControlHandle,
        cancel: CancellationToken,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let data_dir = dir.path().to_path_buf();
        let sim = Arc::new(SimulatedPrinters::new(["LAB1", "KITCHEN"]));
        let registry = Arc::new(PrinterRegistry::new(
            sim as Arc<dyn PrinterBackend>,
            Duration::from_secs(60),
        ));
        registry.refresh().await;
        let (queue, _wake) = JobQueue::new(Arc::clone(&registry), 100);
        let queue = Arc::new(queue);
        let cancel = CancellationToken::new();
        let (bridge, handle, commands) = ControlBridge::new(
            Arc::clone(&queue),
            registry,
            AgentConfig::default(),
            data_dir.clone(),
            cancel.clone(),
        );
        tokio::spawn(Arc::clone(&bridge).run(commands));
        Fixture {
            _dir: dir,
            data_dir,
            queue,
            bridge,
            handle,
            cancel,
        }
    }

    async fn wait_for(
        handle: &mut ControlHandle,
        pred: impl Fn(&ServiceSnapshot) -> bool,
    ) -> Arc<ServiceSnapshot> {
        let snapshot = handle.snapshot();
        if pred(&snapshot) {
            return snapshot;
        }
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let snapshot = handle.changed().await.expect("bridge alive");
                if pred(&snapshot) {
                    return snapshot;
                }
            }
        })
        .await
        .expect("snapshot condition reached")
    }

    #[tokio::test]
    async fn snapshot_tracks_queue_depth_and_printers() {
        let mut f = fixture().await;
        f.queue
            .enqueue("LAB1", PayloadFormat::Raw, b"x".to_vec(), JobFlags::default(), TargetPolicy::Strict)
            .await
            .expect("enqueue");

        let snapshot = wait_for(&mut f.handle, |s| s.queue_depth == 1).await;
        let lab1 = snapshot
            .printers
            .iter()
            .find(|p| p.name == "LAB1")
            .expect("LAB1 listed");
        assert_eq!(lab1.queued, 1);
        assert_eq!(snapshot.printers.len(), 2);
    }

    #[tokio::test]
    async fn last_error_carries_a_hint() {
        let mut f = fixture().await;
        let id = f
            .queue
            .enqueue("LAB1", PayloadFormat::Raw, b"x".to_vec(), JobFlags::default(), TargetPolicy::Strict)
            .await
            .expect("enqueue");
        f.queue.cancel(&id).expect("cancel");

        let snapshot = wait_for(&mut f.handle, |s| s.last_error.is_some()).await;
        let last = snapshot.last_error.as_ref().expect("last error");
        assert_eq!(last.job_id, id);
        assert_eq!(last.code, Some(ErrorCode::Cancelled));
        assert!(!last.hint.message.is_empty());
    }

    #[tokio::test]
    async fn config_update_is_persisted_and_published() {
        let mut f = fixture().await;
        let mut config_rx = f.bridge.config_receiver();

        let updated = AgentConfig {
            auto_cut: true,
            port: 6001,
            ..Default::default()
        };
        f.handle
            .send(ControlCommand::UpdateConfig(updated.clone()))
            .expect("send");

        tokio::time::timeout(Duration::from_secs(2), config_rx.changed())
            .await
            .expect("published")
            .expect("sender alive");
        assert!(config_rx.borrow().auto_cut);
        assert_eq!(AgentConfig::load(&f.data_dir).expect("load"), updated);

        let snapshot = wait_for(&mut f.handle, |s| s.config.auto_cut).await;
        assert!(snapshot.config_error.is_none());
    }

    #[tokio::test]
    async fn invalid_config_is_refused() {
        let mut f = fixture().await;
        f.handle
            .send(ControlCommand::UpdateConfig(AgentConfig {
                port: 80,
                ..Default::default()
            }))
            .expect("send");

        let snapshot = wait_for(&mut f.handle, |s| s.config_error.is_some()).await;
        assert_eq!(snapshot.config.port, 5000);
        assert!(!f.data_dir.join(printflow_core::config::CONFIG_FILE).exists());
    }

    #[tokio::test]
    async fn trust_info_is_published() {
        let mut f = fixture().await;
        f.bridge.set_trust(TrustInfo {
            urls: vec!["https://localhost:5000".into()],
            fingerprint: "AB:CD".into(),
            expires_at: Utc::now(),
            cert_path: f.data_dir.join("server.crt"),
        });
        let snapshot = wait_for(&mut f.handle, |s| s.trust.is_some()).await;
        assert_eq!(snapshot.trust.as_ref().expect("trust").fingerprint, "AB:CD");
    }

    #[tokio::test]
    async fn shutdown_command_cancels_the_service() {
        let f = fixture().await;
        f.handle.send(ControlCommand::Shutdown).expect("send");
        tokio::time::timeout(Duration::from_secs(2), f.cancel.cancelled())
            .await
            .expect("cancelled");
    }
}
