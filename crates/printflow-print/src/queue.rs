// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job queue: owns every PrintJob from submission until eviction.
//
// All job state sits behind one mutex and every status change goes through
// `advance`, which only follows edges of the job state machine.  A terminal
// job therefore can never be rewritten by a late update (e.g. a dispatch
// result arriving for a job cancelled in the meantime).
//
// Each printer has its own FIFO of pending job ids.  Retried jobs go back to
// the front of their printer's FIFO so they keep their place in line.
//
// With history persistence on, changes are handed to a `HistoryWriter` while
// the lock is held (a non-blocking send) and written on its own thread.
//
// Two outbound signals:
//   * the wake channel carries a printer name to the dispatcher whenever that
//     printer gets new work;
//   * a broadcast of `QueueEvent`s feeds the control bridge.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, instrument};

use printflow_core::error::{PrintflowError, Result};
use printflow_core::types::{
    ErrorCode, JobFlags, JobFilter, JobId, JobStatus, Payload, PayloadFormat, PrintJob,
};
use printflow_security::hash_bytes;

use crate::registry::PrinterRegistry;
use crate::store::{HistoryStore, HistoryWriter};

/// Capacity of the event broadcast; slow subscribers skip ahead.
const EVENT_CAPACITY: usize = 256;

/// Whether unknown printers are rejected at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetPolicy {
    /// Reject with `InvalidTarget` (strict mode).
    Strict,
    /// Accept; the job fails at dispatch if the printer is still missing.
    Lenient,
}

impl TargetPolicy {
    pub fn from_strict(strict: bool) -> Self {
        if strict { Self::Strict } else { Self::Lenient }
    }
}

/// Change notifications for observers of the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    Submitted { id: JobId, printer: String },
    StatusChanged { id: JobId, printer: String, status: JobStatus },
    Evicted { id: JobId },
}

/// Per-status job counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub queued: usize,
    pub dispatching: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl QueueStats {
    /// Jobs not yet terminal.
    pub fn depth(&self) -> usize {
        self.queued + self.dispatching
    }

    pub fn total(&self) -> usize {
        self.depth() + self.succeeded + self.failed
    }
}

/// Receiving end of the dispatcher wake signal.
pub type WakeReceiver = mpsc::UnboundedReceiver<String>;

#[derive(Default)]
struct QueueState {
    jobs: HashMap<JobId, PrintJob>,
    /// Every retained job in submission order.
    order: VecDeque<JobId>,
    /// Queued job ids per printer, FIFO.
    pending: HashMap<String, VecDeque<JobId>>,
    next_seq: u64,
}

/// The job queue.
pub struct JobQueue {
    registry: Arc<PrinterRegistry>,
    state: Mutex<QueueState>,
    history_limit: AtomicUsize,
    history: Option<HistoryWriter>,
    wake: mpsc::UnboundedSender<String>,
    events: broadcast::Sender<QueueEvent>,
}

impl JobQueue {
    /// An empty, memory-only queue.
    pub fn new(registry: Arc<PrinterRegistry>, history_limit: usize) -> (Self, WakeReceiver) {
        let (wake, wake_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let queue = Self {
            registry,
            state: Mutex::new(QueueState {
                next_seq: 1,
                ..Default::default()
            }),
            history_limit: AtomicUsize::new(history_limit),
            history: None,
            wake,
            events,
        };
        (queue, wake_rx)
    }

    /// A queue backed by `store`, restoring the persisted history.
    ///
    /// Queued jobs are re-queued in submission order.  Jobs found
    /// `Dispatching` may or may not have reached the printer, so they are
    /// failed with `Interrupted` rather than replayed.
    #[instrument(skip_all)]
    pub fn with_store(
        registry: Arc<PrinterRegistry>,
        history_limit: usize,
        store: Arc<HistoryStore>,
    ) -> Result<(Self, WakeReceiver)> {
        let (mut queue, wake_rx) = Self::new(registry, history_limit);
        let jobs = store.load_all()?;

        let mut requeued = 0usize;
        let mut interrupted = 0usize;
        {
            let state = queue.state.get_mut().unwrap_or_else(PoisonError::into_inner);
            for mut job in jobs {
                state.next_seq = state.next_seq.max(job.seq + 1);
                match job.status {
                    JobStatus::Queued => {
                        state
                            .pending
                            .entry(job.printer.clone())
                            .or_default()
                            .push_back(job.id);
                        requeued += 1;
                    }
                    JobStatus::Dispatching => {
                        job.status = JobStatus::Failed;
                        job.error_code = Some(ErrorCode::Interrupted);
                        job.error = Some("agent stopped while the job was being dispatched".into());
                        job.updated_at = Utc::now();
                        store.upsert(&job)?;
                        interrupted += 1;
                    }
                    JobStatus::Succeeded | JobStatus::Failed => {}
                }
                state.order.push_back(job.id);
                state.jobs.insert(job.id, job);
            }
        }
        queue.history = Some(HistoryWriter::spawn(store)?);

        for printer in queue.pending_printers() {
            let _ = queue.wake.send(printer);
        }
        info!(requeued, interrupted, "job history restored");
        Ok((queue, wake_rx))
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until every change made so far is persisted.  No-op without a
    /// history store.
    pub async fn flush_history(&self) {
        if let Some(history) = &self.history {
            history.flush().await;
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub fn set_history_limit(&self, limit: usize) {
        self.history_limit.store(limit.max(1), Ordering::Relaxed);
        let mut state = self.lock();
        self.evict(&mut state);
    }

    /// Create a Queued job and wake the printer's dispatch worker.
    ///
    /// With `TargetPolicy::Strict` an unknown printer is rejected with
    /// `InvalidTarget` and no job is created.
    #[instrument(skip(self, bytes), fields(len = bytes.len()))]
    pub async fn enqueue(
        &self,
        printer: &str,
        format: PayloadFormat,
        bytes: Vec<u8>,
        flags: JobFlags,
        policy: TargetPolicy,
    ) -> Result<JobId> {
        if printer.trim().is_empty() {
            return Err(PrintflowError::InvalidRequest("printer name is empty".into()));
        }
        if bytes.is_empty() {
            return Err(PrintflowError::InvalidRequest("payload is empty".into()));
        }

        if policy == TargetPolicy::Strict {
            match self.registry.resolve(printer).await {
                Ok(_) => {}
                Err(PrintflowError::NotFound(_)) => {
                    info!(printer, "rejected job for unknown printer");
                    return Err(PrintflowError::InvalidTarget(format!(
                        "printer {printer} is not installed on this machine"
                    )));
                }
                Err(e) => return Err(e),
            }
        }

        let digest = hash_bytes(&bytes);
        let payload = Payload::new(format, bytes, digest);

        let id = {
            let mut state = self.lock();
            let seq = state.next_seq;
            let job = PrintJob::new(seq, printer.to_string(), payload, flags);
            let id = job.id;

            if let Some(history) = &self.history {
                history.upsert(&job);
            }
            state.next_seq += 1;
            state
                .pending
                .entry(job.printer.clone())
                .or_default()
                .push_back(id);
            state.order.push_back(id);
            state.jobs.insert(id, job);
            self.evict(&mut state);
            id
        };

        info!(job_id = %id, printer, format = format.as_str(), "job queued");
        let _ = self.wake.send(printer.to_string());
        let _ = self.events.send(QueueEvent::Submitted {
            id,
            printer: printer.to_string(),
        });
        Ok(id)
    }

    /// Snapshot of one job.
    pub fn status(&self, id: &JobId) -> Result<PrintJob> {
        self.lock()
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| PrintflowError::NotFound(format!("job {id}")))
    }

    /// Snapshots matching `filter`, newest first.
    pub fn list(&self, filter: &JobFilter) -> Vec<PrintJob> {
        let state = self.lock();
        state
            .order
            .iter()
            .rev()
            .filter_map(|id| state.jobs.get(id))
            .filter(|job| filter.matches(job))
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.lock();
        let mut stats = QueueStats::default();
        for job in state.jobs.values() {
            match job.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Dispatching => stats.dispatching += 1,
                JobStatus::Succeeded => stats.succeeded += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Printers with at least one Queued job.
    pub fn pending_printers(&self) -> Vec<String> {
        self.lock()
            .pending
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(printer, _)| printer.clone())
            .collect()
    }

    /// The most recent failure, for the control bridge.
    pub fn last_failure(&self) -> Option<PrintJob> {
        let state = self.lock();
        state
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Failed)
            .max_by_key(|job| job.updated_at)
            .cloned()
    }

    /// Cancel a job that has not started dispatching.
    ///
    /// The job becomes `Failed` with `ErrorCode::Cancelled`; cancelling a
    /// job in any other state is `InvalidState`.
    #[instrument(skip(self))]
    pub fn cancel(&self, id: &JobId) -> Result<PrintJob> {
        let job = {
            let mut state = self.lock();
            let job = self.advance(&mut state, id, JobStatus::Failed, |job| {
                job.error = Some("cancelled by operator".into());
                job.error_code = Some(ErrorCode::Cancelled);
            })?;
            if let Some(ids) = state.pending.get_mut(&job.printer) {
                ids.retain(|pending| pending != id);
            }
            job
        };
        info!(job_id = %id, printer = %job.printer, "job cancelled");
        self.notify(&job);
        Ok(job)
    }

    /// Take the next Queued job for `printer` and mark it `Dispatching`.
    pub fn claim_next(&self, printer: &str) -> Option<PrintJob> {
        let job = {
            let mut state = self.lock();
            loop {
                let id = state.pending.get_mut(printer)?.pop_front()?;
                match self.advance(&mut state, &id, JobStatus::Dispatching, |job| {
                    job.attempts += 1;
                }) {
                    Ok(job) => break job,
                    // Stale entry (job no longer Queued); skip it.
                    Err(e) => debug!(job_id = %id, error = %e, "skipping pending entry"),
                }
            }
        };
        debug!(job_id = %job.id, printer, attempt = job.attempts, "job claimed");
        self.notify(&job);
        Some(job)
    }

    /// Put a job that failed transiently back at the head of its printer's
    /// FIFO.
    pub fn requeue(&self, id: &JobId, error: &str) -> Result<PrintJob> {
        let job = {
            let mut state = self.lock();
            let job = self.advance(&mut state, id, JobStatus::Queued, |job| {
                job.retry_count += 1;
                job.error = Some(error.to_string());
            })?;
            state
                .pending
                .entry(job.printer.clone())
                .or_default()
                .push_front(*id);
            job
        };
        self.notify(&job);
        Ok(job)
    }

    /// The spooler accepted the job.
    pub fn complete(&self, id: &JobId) -> Result<PrintJob> {
        let job = {
            let mut state = self.lock();
            self.advance(&mut state, id, JobStatus::Succeeded, |job| {
                job.error = None;
                job.error_code = None;
            })?
        };
        self.notify(&job);
        Ok(job)
    }

    /// The job failed for good; `message` is kept verbatim.
    pub fn fail(&self, id: &JobId, code: ErrorCode, message: &str) -> Result<PrintJob> {
        let job = {
            let mut state = self.lock();
            self.advance(&mut state, id, JobStatus::Failed, |job| {
                job.error = Some(message.to_string());
                job.error_code = Some(code);
            })?
        };
        self.notify(&job);
        Ok(job)
    }

    /// Apply `next` if it is a legal edge from the job's current status.
    fn advance(
        &self,
        state: &mut QueueState,
        id: &JobId,
        next: JobStatus,
        update: impl FnOnce(&mut PrintJob),
    ) -> Result<PrintJob> {
        let job = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| PrintflowError::NotFound(format!("job {id}")))?;

        if !job.status.can_advance_to(next) {
            return Err(PrintflowError::InvalidState(format!(
                "job {id} is {} and cannot become {}",
                job.status.as_str(),
                next.as_str()
            )));
        }

        job.status = next;
        job.updated_at = Utc::now();
        update(job);

        if let Some(history) = &self.history {
            history.upsert(job);
        }
        let job = job.clone();
        if job.status.is_terminal() {
            self.evict(state);
        }
        Ok(job)
    }

    /// Drop the oldest terminal jobs while over the history limit.
    fn evict(&self, state: &mut QueueState) {
        let limit = self.history_limit.load(Ordering::Relaxed);
        while state.jobs.len() > limit {
            let Some(pos) = state
                .order
                .iter()
                .position(|id| state.jobs.get(id).is_some_and(|j| j.status.is_terminal()))
            else {
                // Only live jobs left; they are never evicted.
                break;
            };
            let Some(id) = state.order.remove(pos) else {
                break;
            };
            state.jobs.remove(&id);
            if let Some(history) = &self.history {
                history.delete(&id);
            }
            debug!(job_id = %id, "job evicted from history");
            let _ = self.events.send(QueueEvent::Evicted { id });
        }
    }

    fn notify(&self, job: &PrintJob) {
        let _ = self.events.send(QueueEvent::StatusChanged {
            id: job.id,
            printer: job.printer.clone(),
            status: job.status,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PrinterBackend;
    use crate::simulated::SimulatedPrinters;
    use std::time::Duration;

    fn queue_with(printers: &[&str], limit: usize) -> (JobQueue, WakeReceiver) {
        let sim = Arc::new(SimulatedPrinters::new(printers.iter().copied()));
        let registry = Arc::new(PrinterRegistry::new(
            sim as Arc<dyn PrinterBackend>,
            Duration::from_secs(60),
        ));
        JobQueue::new(registry, limit)
    }

    async fn submit(queue: &JobQueue, printer: &str, data: &[u8]) -> JobId {
        queue
            .enqueue(
                printer,
                PayloadFormat::Raster,
                data.to_vec(),
                JobFlags::default(),
                TargetPolicy::Strict,
            )
            .await
            .expect("enqueue")
    }

    #[tokio::test]
    async fn enqueue_creates_queued_job_and_wakes_dispatcher() {
        let (queue, mut wake) = queue_with(&["LAB1"], 10);
        let id = submit(&queue, "LAB1", b"TEST").await;

        let job = queue.status(&id).expect("status");
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.printer, "LAB1");
        assert_eq!(job.payload.size, 4);
        assert_eq!(job.payload.digest, hash_bytes(b"TEST"));
        assert_eq!(wake.recv().await.as_deref(), Some("LAB1"));
    }

    #[tokio::test]
    async fn strict_mode_rejects_unknown_printer_without_creating_a_job() {
        let (queue, _wake) = queue_with(&["LAB1"], 10);
        let result = queue
            .enqueue(
                "GHOST",
                PayloadFormat::Raw,
                b"x".to_vec(),
                JobFlags::default(),
                TargetPolicy::Strict,
            )
            .await;
        assert!(matches!(result, Err(PrintflowError::InvalidTarget(_))));
        assert!(queue.list(&JobFilter::default()).is_empty());
    }

    #[tokio::test]
    async fn lenient_mode_accepts_unknown_printer() {
        let (queue, _wake) = queue_with(&["LAB1"], 10);
        let id = queue
            .enqueue(
                "GHOST",
                PayloadFormat::Raw,
                b"x".to_vec(),
                JobFlags::default(),
                TargetPolicy::Lenient,
            )
            .await
            .expect("lenient enqueue");
        assert_eq!(queue.status(&id).expect("status").status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn empty_payload_is_invalid() {
        let (queue, _wake) = queue_with(&["LAB1"], 10);
        let result = queue
            .enqueue("LAB1", PayloadFormat::Raw, Vec::new(), JobFlags::default(), TargetPolicy::Strict)
            .await;
        assert!(matches!(result, Err(PrintflowError::InvalidRequest(_))));
    }

    #[test]
    fn unknown_job_is_not_found() {
        let (queue, _wake) = queue_with(&[], 10);
        assert!(matches!(
            queue.status(&JobId::new()),
            Err(PrintflowError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn claim_is_fifo_per_printer() {
        let (queue, _wake) = queue_with(&["A", "B"], 10);
        let a1 = submit(&queue, "A", b"a1").await;
        let b1 = submit(&queue, "B", b"b1").await;
        let a2 = submit(&queue, "A", b"a2").await;

        assert_eq!(queue.claim_next("A").map(|j| j.id), Some(a1));
        assert_eq!(queue.claim_next("B").map(|j| j.id), Some(b1));
        assert_eq!(queue.claim_next("A").map(|j| j.id), Some(a2));
        assert!(queue.claim_next("A").is_none());
    }

    #[tokio::test]
    async fn requeued_job_keeps_its_place() {
        let (queue, _wake) = queue_with(&["A"], 10);
        let first = submit(&queue, "A", b"1").await;
        let second = submit(&queue, "A", b"2").await;

        let claimed = queue.claim_next("A").expect("claim");
        assert_eq!(claimed.attempts, 1);
        let requeued = queue.requeue(&first, "printer busy").expect("requeue");
        assert_eq!(requeued.status, JobStatus::Queued);
        assert_eq!(requeued.retry_count, 1);

        let again = queue.claim_next("A").expect("claim again");
        assert_eq!(again.id, first);
        assert_eq!(again.attempts, 2);
        assert_eq!(queue.claim_next("A").map(|j| j.id), Some(second));
    }

    #[tokio::test]
    async fn cancel_only_while_queued() {
        let (queue, _wake) = queue_with(&["A"], 10);
        let queued = submit(&queue, "A", b"1").await;
        let running = submit(&queue, "A", b"2").await;

        let cancelled = queue.cancel(&queued).expect("cancel");
        assert_eq!(cancelled.status, JobStatus::Failed);
        assert_eq!(cancelled.error_code, Some(ErrorCode::Cancelled));

        // The cancelled job is skipped by the worker.
        assert_eq!(queue.claim_next("A").map(|j| j.id), Some(running));
        assert!(matches!(
            queue.cancel(&running),
            Err(PrintflowError::InvalidState(_))
        ));
        assert!(matches!(
            queue.cancel(&JobId::new()),
            Err(PrintflowError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn cancelled_job_is_not_overwritten_by_stale_update() {
        let (queue, _wake) = queue_with(&["A"], 10);
        let id = submit(&queue, "A", b"1").await;
        queue.cancel(&id).expect("cancel");

        assert!(queue.complete(&id).is_err());
        assert!(queue.requeue(&id, "late").is_err());
        assert!(queue.fail(&id, ErrorCode::Rejected, "late").is_err());

        let job = queue.status(&id).expect("status");
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_code, Some(ErrorCode::Cancelled));
    }

    #[tokio::test]
    async fn list_filters_and_orders_newest_first() {
        let (queue, _wake) = queue_with(&["A", "B"], 10);
        let a1 = submit(&queue, "A", b"1").await;
        let b1 = submit(&queue, "B", b"2").await;
        let a2 = submit(&queue, "A", b"3").await;
        queue.cancel(&a1).expect("cancel");

        let all: Vec<JobId> = queue.list(&JobFilter::default()).iter().map(|j| j.id).collect();
        assert_eq!(all, vec![a2, b1, a1]);

        let only_a = queue.list(&JobFilter {
            printer: Some("A".into()),
            ..Default::default()
        });
        assert_eq!(only_a.len(), 2);

        let queued = queue.list(&JobFilter {
            status: Some(JobStatus::Queued),
            ..Default::default()
        });
        assert_eq!(queued.iter().map(|j| j.id).collect::<Vec<_>>(), vec![a2, b1]);
    }

    #[tokio::test]
    async fn eviction_drops_oldest_terminal_jobs_only() {
        let (queue, _wake) = queue_with(&["A"], 2);
        let first = submit(&queue, "A", b"1").await;
        let second = submit(&queue, "A", b"2").await;
        queue.cancel(&first).expect("cancel");
        queue.cancel(&second).expect("cancel");

        let third = submit(&queue, "A", b"3").await;
        assert!(queue.status(&first).is_err(), "oldest terminal job evicted");
        assert!(queue.status(&second).is_ok());
        assert!(queue.status(&third).is_ok());

        // Live jobs are never evicted, even over the limit.
        let fourth = submit(&queue, "A", b"4").await;
        let fifth = submit(&queue, "A", b"5").await;
        for id in [third, fourth, fifth] {
            assert_eq!(queue.status(&id).expect("live").status, JobStatus::Queued);
        }
        assert_eq!(queue.stats().queued, 3);
    }

    #[tokio::test]
    async fn events_are_broadcast() {
        let (queue, _wake) = queue_with(&["A"], 10);
        let mut events = queue.subscribe();
        let id = submit(&queue, "A", b"1").await;
        queue.claim_next("A");

        assert_eq!(
            events.recv().await.expect("event"),
            QueueEvent::Submitted { id, printer: "A".into() }
        );
        assert_eq!(
            events.recv().await.expect("event"),
            QueueEvent::StatusChanged {
                id,
                printer: "A".into(),
                status: JobStatus::Dispatching
            }
        );
    }

    #[tokio::test]
    async fn history_restore_requeues_and_interrupts() {
        let store = HistoryStore::open_in_memory().expect("store");
        let sim = Arc::new(SimulatedPrinters::new(["A", "B"]));
        let registry = Arc::new(PrinterRegistry::new(
            sim as Arc<dyn PrinterBackend>,
            Duration::from_secs(60),
        ));

        let (queued_a1, queued_a2, dispatching, done) = {
            let (queue, _wake) =
                JobQueue::with_store(Arc::clone(&registry), 10, Arc::clone(&store)).expect("queue");
            let done = submit(&queue, "B", b"done").await;
            let dispatching = submit(&queue, "B", b"mid").await;
            let a1 = submit(&queue, "A", b"a1").await;
            let a2 = submit(&queue, "A", b"a2").await;

            queue.claim_next("B");
            queue.complete(&done).expect("complete");
            queue.claim_next("B");
            queue.flush_history().await;
            (a1, a2, dispatching, done)
        };

        let (restored, mut wake) =
            JobQueue::with_store(registry, 10, Arc::clone(&store)).expect("restore");

        assert_eq!(restored.status(&done).expect("done").status, JobStatus::Succeeded);
        let interrupted = restored.status(&dispatching).expect("interrupted");
        assert_eq!(interrupted.status, JobStatus::Failed);
        assert_eq!(interrupted.error_code, Some(ErrorCode::Interrupted));

        assert_eq!(wake.recv().await.as_deref(), Some("A"));
        assert_eq!(restored.claim_next("A").map(|j| j.id), Some(queued_a1));
        assert_eq!(restored.claim_next("A").map(|j| j.id), Some(queued_a2));
        assert!(restored.claim_next("B").is_none());

        // New jobs continue the sequence.
        let next = submit(&restored, "A", b"next").await;
        assert_eq!(restored.status(&next).expect("next").seq, 5);
    }

    #[tokio::test]
    async fn slow_history_does_not_block_the_queue() {
        let store = HistoryStore::open_in_memory().expect("store");
        let sim = Arc::new(SimulatedPrinters::new(["A"]));
        let registry = Arc::new(PrinterRegistry::new(
            sim as Arc<dyn PrinterBackend>,
            Duration::from_secs(60),
        ));
        let (queue, _wake) =
            JobQueue::with_store(registry, 10, Arc::clone(&store)).expect("queue");

        let held = store.hold();
        let id = tokio::time::timeout(Duration::from_secs(2), submit(&queue, "A", b"1"))
            .await
            .expect("enqueue not blocked by the database");
        queue.claim_next("A").expect("claim");
        queue.complete(&id).expect("complete");
        assert_eq!(queue.status(&id).expect("status").status, JobStatus::Succeeded);
        drop(held);

        queue.flush_history().await;
        let persisted = store.load_all().expect("load");
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].status, JobStatus::Succeeded);
        assert_eq!(persisted[0].attempts, 1);
    }
}
