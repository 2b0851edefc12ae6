// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Dispatcher: moves jobs from the queue onto the OS spooler.
//
// One worker task per printer, started the first time the printer gets work.
// A worker drains its printer's FIFO one job at a time, then parks on a
// `Notify` until the queue wakes it again, so ordering per printer is the
// submission order while different printers print in parallel.
//
// Per job:
//   Queued → Dispatching → Succeeded
//                        → Queued (transient failure, budget left; backoff)
//                        → Failed (permanent failure or budget exhausted)

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info, info_span, warn};

use printflow_core::AgentConfig;
use printflow_core::types::{ErrorCode, PrintJob, SpoolError, SpoolErrorKind};

use crate::queue::{JobQueue, WakeReceiver};
use crate::registry::PrinterRegistry;
use crate::retry::{RetryDecision, should_retry};
use crate::spooler::{SpoolRequest, Spooler};

/// Job dispatcher.
pub struct Dispatcher {
    queue: Arc<JobQueue>,
    registry: Arc<PrinterRegistry>,
    spooler: Arc<dyn Spooler>,
    config: watch::Receiver<Arc<AgentConfig>>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    workers: Mutex<HashMap<String, Arc<Notify>>>,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<JobQueue>,
        registry: Arc<PrinterRegistry>,
        spooler: Arc<dyn Spooler>,
        config: watch::Receiver<Arc<AgentConfig>>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue,
            registry,
            spooler,
            config,
            cancel,
            tracker: TaskTracker::new(),
            workers: Mutex::new(HashMap::new()),
        })
    }

    /// Start routing wake signals to per-printer workers.
    pub fn spawn(self: &Arc<Self>, mut wake: WakeReceiver) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            info!("dispatcher started");
            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => break,
                    printer = wake.recv() => match printer {
                        Some(printer) => this.wake_worker(&printer),
                        None => break,
                    },
                }
            }
            info!("dispatcher stopped");
        })
    }

    /// Number of printers with a running worker.
    pub fn worker_count(&self) -> usize {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Wait for every worker to finish its current job and exit.  Call
    /// after cancelling the shared token.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    fn wake_worker(self: &Arc<Self>, printer: &str) {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(notify) = workers.get(printer) {
            notify.notify_one();
            return;
        }

        let notify = Arc::new(Notify::new());
        workers.insert(printer.to_string(), Arc::clone(&notify));
        debug!(printer, "starting dispatch worker");

        let this = Arc::clone(self);
        let span = info_span!("worker", printer = %printer);
        let printer = printer.to_string();
        self.tracker
            .spawn(async move { this.worker(printer, notify).await }.instrument(span));
    }

    async fn worker(self: Arc<Self>, printer: String, notify: Arc<Notify>) {
        loop {
            while let Some(job) = self.queue.claim_next(&printer) {
                let backoff = self.dispatch(&job).await;

                if let Some(delay) = backoff {
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                if self.cancel.is_cancelled() {
                    return;
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = notify.notified() => {}
            }
        }
    }

    /// One spooler attempt for a job already marked `Dispatching`.
    /// Returns the backoff to wait when the job was re-queued.
    async fn dispatch(&self, job: &PrintJob) -> Option<std::time::Duration> {
        let config = Arc::clone(&self.config.borrow());

        // Rendering and the spooler call share one budget per attempt.
        let timeout = config.spool_timeout();
        let attempt = async {
            let request = self.prepare(job).await?;
            self.spooler.submit(request).await
        };
        let outcome = match tokio::time::timeout(timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(SpoolError::new(
                SpoolErrorKind::Timeout,
                format!("spooler did not answer within {}s", timeout.as_secs()),
            )),
        };

        let err = match outcome {
            Ok(()) => {
                match self.queue.complete(&job.id) {
                    Ok(_) => info!(job_id = %job.id, attempt = job.attempts, "job printed"),
                    Err(e) => warn!(job_id = %job.id, error = %e, "could not record success"),
                }
                return None;
            }
            Err(err) => err,
        };

        match should_retry(&err, job.attempts, &config.retry) {
            RetryDecision::RetryAfter(delay) => {
                warn!(
                    job_id = %job.id,
                    attempt = job.attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient dispatch failure, retrying"
                );
                match self.queue.requeue(&job.id, &err.message) {
                    Ok(_) => Some(delay),
                    Err(e) => {
                        warn!(job_id = %job.id, error = %e, "could not re-queue job");
                        None
                    }
                }
            }
            RetryDecision::GiveUp => {
                self.finish_failed(job, err.error_code(), &err.message);
                None
            }
            RetryDecision::Exhausted => {
                self.finish_failed(job, ErrorCode::RetriesExhausted, &err.message);
                None
            }
        }
    }

    /// Re-resolve the printer and render the payload.
    async fn prepare(&self, job: &PrintJob) -> Result<SpoolRequest, SpoolError> {
        if self.registry.resolve(&job.printer).await.is_err() {
            return Err(SpoolError::new(
                SpoolErrorKind::PrinterNotFound,
                format!("printer {} is not installed on this machine", job.printer),
            ));
        }

        // Image decoding and resizing are CPU-bound; keep them off the worker.
        let format = job.payload.format;
        let bytes = Arc::clone(&job.payload.bytes);
        let cut = job.flags.auto_cut;
        let data = tokio::task::spawn_blocking(move || printflow_document::render(format, &bytes, cut))
            .await
            .map_err(|e| {
                SpoolError::new(SpoolErrorKind::MalformedPayload, format!("rendering aborted: {e}"))
            })?
            .map_err(|e| SpoolError::new(SpoolErrorKind::MalformedPayload, e.to_string()))?;

        Ok(SpoolRequest {
            printer: job.printer.clone(),
            data,
            raw: format.is_raw(),
            title: format!("PrintFlow {}", job.id),
        })
    }

    fn finish_failed(&self, job: &PrintJob, code: ErrorCode, message: &str) {
        match self.queue.fail(&job.id, code, message) {
            Ok(_) => warn!(
                job_id = %job.id,
                attempts = job.attempts,
                code = code.as_str(),
                error = message,
                "job failed"
            ),
            Err(e) => warn!(job_id = %job.id, error = %e, "could not record failure"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::TargetPolicy;
    use crate::registry::PrinterBackend;
    use crate::simulated::{SimOutcome, SimulatedPrinters};
    use printflow_core::config::RetrySettings;
    use printflow_core::types::{JobFlags, JobId, JobStatus, PayloadFormat};
    use std::time::Duration;

    struct Harness {
        sim: Arc<SimulatedPrinters>,
        queue: Arc<JobQueue>,
        dispatcher: Arc<Dispatcher>,
        cancel: CancellationToken,
        _config: watch::Sender<Arc<AgentConfig>>,
    }

    fn harness(printers: &[&str], config: AgentConfig) -> Harness {
        let sim = Arc::new(SimulatedPrinters::new(printers.iter().copied()));
        let registry = Arc::new(PrinterRegistry::new(
            Arc::clone(&sim) as Arc<dyn PrinterBackend>,
            Duration::from_secs(60),
        ));
        let (queue, wake) = JobQueue::new(Arc::clone(&registry), 100);
        let queue = Arc::new(queue);
        let (config_tx, config_rx) = watch::channel(Arc::new(config));
        let cancel = CancellationToken::new();
        let dispatcher = Dispatcher::new(
            Arc::clone(&queue),
            registry,
            Arc::clone(&sim) as Arc<dyn Spooler>,
            config_rx,
            cancel.clone(),
        );
        dispatcher.spawn(wake);
        Harness {
            sim,
            queue,
            dispatcher,
            cancel,
            _config: config_tx,
        }
    }

    fn fast_config(max_attempts: u32) -> AgentConfig {
        AgentConfig {
            retry: RetrySettings {
                max_attempts,
                base_delay_ms: 1,
                max_delay_ms: 5,
                ..Default::default()
            },
            spool_timeout_secs: 1,
            ..Default::default()
        }
    }

    async fn submit(h: &Harness, printer: &str, format: PayloadFormat, data: &[u8], cut: bool) -> JobId {
        h.queue
            .enqueue(
                printer,
                format,
                data.to_vec(),
                JobFlags { auto_cut: cut },
                TargetPolicy::Lenient,
            )
            .await
            .expect("enqueue")
    }

    async fn wait_terminal(queue: &JobQueue, id: &JobId) -> PrintJob {
        for _ in 0..500 {
            let job = queue.status(id).expect("status");
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} did not finish");
    }

    #[tokio::test]
    async fn job_is_printed() {
        let h = harness(&["LAB1"], fast_config(3));
        let id = submit(&h, "LAB1", PayloadFormat::Raster, b"TEST", false).await;

        let job = wait_terminal(&h.queue, &id).await;
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.attempts, 1);
        assert_eq!(h.sim.submitted_to("LAB1"), vec![b"TEST".to_vec()]);
    }

    #[tokio::test]
    async fn auto_cut_is_bundled_with_the_payload() {
        let h = harness(&["LAB1"], fast_config(3));
        let id = submit(&h, "LAB1", PayloadFormat::Raw, b"receipt\n", true).await;
        wait_terminal(&h.queue, &id).await;

        let submissions = h.sim.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].data, b"receipt\n\x1D\x56\x00");
        assert!(submissions[0].raw);
    }

    #[tokio::test]
    async fn per_printer_order_is_submission_order() {
        let h = harness(&["A", "B"], fast_config(3));
        h.sim.set_latency(Duration::from_millis(2));

        let mut ids = Vec::new();
        for i in 0..10u8 {
            let printer = if i % 3 == 0 { "B" } else { "A" };
            ids.push(submit(&h, printer, PayloadFormat::Raw, &[i], false).await);
        }
        for id in &ids {
            wait_terminal(&h.queue, id).await;
        }

        let expected_a: Vec<Vec<u8>> = (0..10u8).filter(|i| i % 3 != 0).map(|i| vec![i]).collect();
        let expected_b: Vec<Vec<u8>> = (0..10u8).filter(|i| i % 3 == 0).map(|i| vec![i]).collect();
        assert_eq!(h.sim.submitted_to("A"), expected_a);
        assert_eq!(h.sim.submitted_to("B"), expected_b);
        assert_eq!(h.dispatcher.worker_count(), 2);
    }

    #[tokio::test]
    async fn transient_failures_exhaust_after_exactly_n_attempts() {
        let h = harness(&["LAB1"], fast_config(3));
        h.sim.script(
            "LAB1",
            (1..=5).map(|i| {
                SimOutcome::Fail(SpoolError::new(SpoolErrorKind::Busy, format!("printer busy #{i}")))
            }),
        );

        let id = submit(&h, "LAB1", PayloadFormat::Raw, b"x", false).await;
        let job = wait_terminal(&h.queue, &id).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 3);
        assert_eq!(job.retry_count, 2);
        assert_eq!(job.error_code, Some(ErrorCode::RetriesExhausted));
        assert_eq!(job.error.as_deref(), Some("printer busy #3"));
        assert_eq!(h.sim.submitted_to("LAB1").len(), 3);
    }

    #[tokio::test]
    async fn transient_failure_then_success() {
        let h = harness(&["LAB1"], fast_config(3));
        h.sim.script(
            "LAB1",
            [SimOutcome::Fail(SpoolError::new(SpoolErrorKind::Connectivity, "connection refused"))],
        );

        let id = submit(&h, "LAB1", PayloadFormat::Raw, b"x", false).await;
        let job = wait_terminal(&h.queue, &id).await;
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.attempts, 2);
        assert_eq!(job.retry_count, 1);
        assert!(job.error.is_none());
    }

    #[tokio::test]
    async fn permanent_failure_skips_retry() {
        let h = harness(&["LAB1"], fast_config(3));
        h.sim.script(
            "LAB1",
            [SimOutcome::Fail(SpoolError::new(SpoolErrorKind::AccessDenied, "lp: Forbidden"))],
        );

        let id = submit(&h, "LAB1", PayloadFormat::Raw, b"x", false).await;
        let job = wait_terminal(&h.queue, &id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.error_code, Some(ErrorCode::AccessDenied));
        assert_eq!(job.error.as_deref(), Some("lp: Forbidden"));
    }

    #[tokio::test]
    async fn spooler_timeout_is_transient() {
        let h = harness(&["LAB1"], fast_config(2));
        h.sim.script(
            "LAB1",
            [
                SimOutcome::Stall(Duration::from_secs(5)),
                SimOutcome::Stall(Duration::from_secs(5)),
            ],
        );

        let id = submit(&h, "LAB1", PayloadFormat::Raw, b"x", false).await;
        let job = wait_terminal(&h.queue, &id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 2);
        assert_eq!(job.error_code, Some(ErrorCode::RetriesExhausted));
        assert!(job.error.as_deref().is_some_and(|e| e.contains("did not answer")));
    }

    #[tokio::test]
    async fn vanished_printer_fails_at_dispatch() {
        let h = harness(&["LAB1"], fast_config(3));
        let id = submit(&h, "GHOST", PayloadFormat::Raw, b"x", false).await;

        let job = wait_terminal(&h.queue, &id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_code, Some(ErrorCode::PrinterNotFound));
        assert!(h.sim.submissions().is_empty());
    }

    #[tokio::test]
    async fn undecodable_image_is_malformed() {
        let h = harness(&["LAB1"], fast_config(3));
        let id = submit(&h, "LAB1", PayloadFormat::Image, b"not an image", false).await;

        let job = wait_terminal(&h.queue, &id).await;
        assert_eq!(job.error_code, Some(ErrorCode::MalformedPayload));
        assert_eq!(job.attempts, 1);
    }

    #[tokio::test]
    async fn image_is_rendered_to_raster_before_spooling() {
        use image::{DynamicImage, GrayImage, ImageFormat, Luma};
        use printflow_document::escpos::{CUT, INIT, RASTER_START};

        let mut png = std::io::Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(GrayImage::from_pixel(16, 4, Luma([0])))
            .write_to(&mut png, ImageFormat::Png)
            .expect("encode png");

        let h = harness(&["LAB1"], fast_config(3));
        let id = submit(&h, "LAB1", PayloadFormat::Image, &png.into_inner(), true).await;
        let job = wait_terminal(&h.queue, &id).await;
        assert_eq!(job.status, JobStatus::Succeeded);

        let sent = &h.sim.submitted_to("LAB1")[0];
        assert!(sent.starts_with(&INIT));
        assert_eq!(&sent[INIT.len()..INIT.len() + RASTER_START.len()], &RASTER_START);
        assert!(sent.ends_with(&CUT));
    }

    #[tokio::test]
    async fn pdf_is_not_sent_raw() {
        let h = harness(&["LAB1"], fast_config(3));
        let id = submit(&h, "LAB1", PayloadFormat::Pdf, b"%PDF-1.4 body", true).await;
        wait_terminal(&h.queue, &id).await;

        let submissions = h.sim.submissions();
        assert!(!submissions[0].raw);
        assert_eq!(submissions[0].data, b"%PDF-1.4 body");
    }

    #[tokio::test]
    async fn shutdown_stops_workers() {
        let h = harness(&["LAB1"], fast_config(3));
        let id = submit(&h, "LAB1", PayloadFormat::Raw, b"x", false).await;
        wait_terminal(&h.queue, &id).await;

        h.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), h.dispatcher.wait_idle())
            .await
            .expect("workers exit");
    }
}
