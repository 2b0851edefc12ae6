// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service context: every long-lived component, built once in dependency
// order and passed around explicitly.
//
//   Configuration → Certificate Store → Printer Registry
//     → Job Queue / Control Bridge / Dispatcher → API Gateway
//
// The gateway is bound only after the certificate is in hand.  A
// certificate failure aborts startup unless the operator opted into
// plaintext.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use printflow_api::{ApiState, Gateway, TlsReloader, build_router};
use printflow_bridge::{
    ControlBridge, ControlCommand, ControlHandle, DesktopSurface, HeadlessSurface, TrustInfo,
    drive_surface,
};
use printflow_core::AgentConfig;
use printflow_core::error::Result;
use printflow_print::{
    CupsBackend, Dispatcher, HISTORY_FILE, HistoryStore, JobQueue, PrinterBackend,
    PrinterRegistry, SimulatedPrinters, Spooler, WakeReceiver,
};
use printflow_security::{Certificate, CertificateStore, CertificateSubject, server_config};

use super::maintenance::Maintenance;
use super::network;

/// How long workers get to finish their current spooler call on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Startup options from the command line.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub data_dir: PathBuf,
    /// Printer names for the in-memory spooler; `None` uses CUPS.
    pub simulate: Option<Vec<String>>,
}

/// The certificate together with the store and subject it came from.
pub struct TlsSetup {
    pub store: Arc<CertificateStore>,
    pub subject: CertificateSubject,
    pub reloader: TlsReloader,
}

/// The running service.
pub struct ServiceContext {
    pub config: AgentConfig,
    pub registry: Arc<PrinterRegistry>,
    pub queue: Arc<JobQueue>,
    pub bridge: Arc<ControlBridge>,
    pub dispatcher: Arc<Dispatcher>,
    pub gateway: Gateway,
    pub tls: Option<TlsSetup>,
    pub cancel: CancellationToken,
    trust_urls: Vec<String>,
    handle: ControlHandle,
    commands: mpsc::Receiver<ControlCommand>,
    wake: WakeReceiver,
}

impl ServiceContext {
    /// Build every component.  Nothing runs until [`ServiceContext::run`].
    ///
    /// # Errors
    ///
    /// `Configuration` when the certificate cannot be set up (without the
    /// plaintext opt-in), the history database cannot be opened, or the
    /// port cannot be bound.
    pub async fn start(config: AgentConfig, options: StartOptions) -> Result<Self> {
        let cancel = CancellationToken::new();
        let hostname = network::hostname();
        let addresses = network::local_addresses(&hostname);

        // -- Certificate Store --
        let subject = CertificateSubject::for_host(&hostname, &addresses);
        let store = Arc::new(CertificateStore::new(
            options.data_dir.clone(),
            config.certificate.clone(),
        ));
        let (tls, cert) = match setup_tls(&store, &subject) {
            Ok((cert, reloader)) => (
                Some(TlsSetup {
                    store,
                    subject,
                    reloader,
                }),
                Some(cert),
            ),
            Err(e) if config.allow_plaintext => {
                error!(error = %e, "certificate setup failed; serving plain HTTP as configured");
                (None, None)
            }
            Err(e) => return Err(e),
        };

        // -- Printer Registry --
        let (backend, spooler): (Arc<dyn PrinterBackend>, Arc<dyn Spooler>) =
            match &options.simulate {
                Some(names) => {
                    let sim = Arc::new(SimulatedPrinters::new(names.iter().cloned()));
                    info!(printers = ?names, "using simulated printers");
                    (
                        Arc::clone(&sim) as Arc<dyn PrinterBackend>,
                        sim as Arc<dyn Spooler>,
                    )
                }
                None => {
                    let cups = Arc::new(CupsBackend::new());
                    (
                        Arc::clone(&cups) as Arc<dyn PrinterBackend>,
                        cups as Arc<dyn Spooler>,
                    )
                }
            };
        let registry = Arc::new(PrinterRegistry::new(backend, config.printer_poll_interval()));
        let printers = registry.refresh().await;
        info!(
            backend = registry.backend_name(),
            count = printers.len(),
            "printer registry ready"
        );

        // -- Job Queue, Control Bridge, Dispatcher --
        let (queue, wake) = if config.persist_history {
            let store = HistoryStore::open(options.data_dir.join(HISTORY_FILE))?;
            JobQueue::with_store(Arc::clone(&registry), config.history_limit, store)?
        } else {
            JobQueue::new(Arc::clone(&registry), config.history_limit)
        };
        let queue = Arc::new(queue);

        let (bridge, handle, commands) = ControlBridge::new(
            Arc::clone(&queue),
            Arc::clone(&registry),
            config.clone(),
            options.data_dir.clone(),
            cancel.clone(),
        );
        let dispatcher = Dispatcher::new(
            Arc::clone(&queue),
            Arc::clone(&registry),
            spooler,
            bridge.config_receiver(),
            cancel.clone(),
        );

        // -- API Gateway --
        let router = build_router(
            ApiState::new(Arc::clone(&queue), Arc::clone(&registry), Arc::clone(&bridge)),
            &config,
        );
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port));
        let gateway = Gateway::bind(
            addr,
            router,
            tls.as_ref().map(|t| t.reloader.clone()),
            cancel.clone(),
        )
        .await?;

        // Trust URLs only make sense with a certificate to trust.
        let mut trust_urls = Vec::new();
        if let (Some(tls), Some(cert)) = (&tls, &cert) {
            trust_urls = network::trust_urls(gateway.local_addr().port(), &addresses);
            bridge.set_trust(trust_info(cert, trust_urls.clone(), &tls.store));
        }

        Ok(Self {
            config,
            registry,
            queue,
            bridge,
            dispatcher,
            gateway,
            tls,
            cancel,
            trust_urls,
            handle,
            commands,
            wake,
        })
    }

    /// Run until Ctrl-C or a shutdown command, then stop in order: listener,
    /// dispatch workers, background tasks.
    pub async fn run(self) -> Result<()> {
        let Self {
            config,
            registry,
            queue,
            bridge,
            dispatcher,
            gateway,
            tls,
            cancel,
            trust_urls,
            handle,
            commands,
            wake,
        } = self;

        let scheme = if gateway.is_tls() { "https" } else { "http" };
        info!(
            addr = %gateway.local_addr(),
            scheme,
            strict_targets = config.strict_targets,
            persist_history = config.persist_history,
            "PrintFlow Agent ready"
        );
        for url in &trust_urls {
            info!(%url, "open once in the browser to trust this agent");
        }

        let dispatch_task = dispatcher.spawn(wake);
        let bridge_task = tokio::spawn(Arc::clone(&bridge).run(commands));
        let surface_task = tokio::spawn(drive_surface(
            Arc::new(HeadlessSurface::new()) as Arc<dyn DesktopSurface>,
            handle,
            cancel.clone(),
        ));
        let maintenance_task = tokio::spawn(
            Maintenance {
                registry,
                bridge: Arc::clone(&bridge),
                tls,
                trust_urls,
                cancel: cancel.clone(),
            }
            .run(),
        );
        let server_task = tokio::spawn(gateway.serve());

        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("interrupt received, shutting down"),
                    Err(e) => warn!(error = %e, "cannot listen for Ctrl-C, shutting down"),
                }
                cancel.cancel();
            }
            _ = cancel.cancelled() => info!("shutdown requested"),
        }

        let _ = server_task.await;
        if tokio::time::timeout(SHUTDOWN_GRACE, dispatcher.wait_idle())
            .await
            .is_err()
        {
            warn!("dispatch workers did not finish in time");
        }
        let _ = tokio::join!(dispatch_task, bridge_task, surface_task, maintenance_task);
        queue.flush_history().await;

        info!(left_queued = queue.stats().queued, "PrintFlow Agent stopped");
        Ok(())
    }
}

/// Ensure the certificate and build a reloadable TLS context from it.
fn setup_tls(
    store: &CertificateStore,
    subject: &CertificateSubject,
) -> Result<(Arc<Certificate>, TlsReloader)> {
    let cert = store.ensure_certificate(subject)?;
    let info = cert.info();
    info!(
        fingerprint = %info.fingerprint,
        expires_at = %info.expires_at,
        days_remaining = info.days_remaining(chrono::Utc::now()),
        path = %store.cert_path().display(),
        "certificate ready"
    );
    let reloader = TlsReloader::new(server_config(&cert)?);
    Ok((cert, reloader))
}

pub(crate) fn trust_info(cert: &Certificate, urls: Vec<String>, store: &CertificateStore) -> TrustInfo {
    TrustInfo {
        urls,
        fingerprint: cert.info().fingerprint.clone(),
        expires_at: cert.info().expires_at,
        cert_path: store.cert_path(),
    }
}
