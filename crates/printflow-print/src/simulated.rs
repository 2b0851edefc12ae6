// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory printers and spooler.
//
// Used by `--simulate` for demos and by the test suites: every submission is
// recorded in arrival order, and per-printer outcomes can be scripted.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use printflow_core::error::{PrintflowError, Result};
use printflow_core::types::{PrinterDevice, Reachability, SpoolError, SpoolErrorKind};

use crate::registry::PrinterBackend;
use crate::spooler::{SpoolRequest, Spooler};

/// What the simulated spooler does with the next submission.
#[derive(Debug, Clone)]
pub enum SimOutcome {
    Accept,
    Fail(SpoolError),
    /// Sleep before accepting; longer than the spool timeout simulates a hang.
    Stall(Duration),
}

/// A recorded submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub printer: String,
    pub data: Vec<u8>,
    pub raw: bool,
}

/// Simulated printing subsystem.
#[derive(Default)]
pub struct SimulatedPrinters {
    printers: Mutex<Vec<PrinterDevice>>,
    script: Mutex<HashMap<String, VecDeque<SimOutcome>>>,
    submissions: Mutex<Vec<Submission>>,
    latency: Mutex<Duration>,
    enumeration_delay: Mutex<Duration>,
    fail_enumeration: AtomicBool,
    enumerations: AtomicUsize,
}

impl SimulatedPrinters {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let sim = Self::default();
        for name in names {
            sim.add_printer(name);
        }
        sim
    }

    pub fn add_printer(&self, name: impl Into<String>) {
        let mut device = PrinterDevice::new(name, Reachability::Online);
        device.driver = Some("simulated".into());
        device.capabilities.supports_cut = true;
        lock(&self.printers).push(device);
    }

    pub fn remove_printer(&self, name: &str) {
        lock(&self.printers).retain(|p| p.name != name);
    }

    /// Queue outcomes for the next submissions to `printer`.  Once the
    /// script runs out, submissions are accepted.
    pub fn script(&self, printer: &str, outcomes: impl IntoIterator<Item = SimOutcome>) {
        lock(&self.script)
            .entry(printer.to_string())
            .or_default()
            .extend(outcomes);
    }

    /// Delay applied to every accepted submission.
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = latency;
    }

    /// Delay before enumeration answers; longer than the registry's
    /// enumeration timeout simulates a hung print subsystem.
    pub fn set_enumeration_delay(&self, delay: Duration) {
        *lock(&self.enumeration_delay) = delay;
    }

    pub fn set_enumeration_failure(&self, fail: bool) {
        self.fail_enumeration.store(fail, Ordering::SeqCst);
    }

    pub fn enumeration_count(&self) -> usize {
        self.enumerations.load(Ordering::SeqCst)
    }

    /// Every submission so far, in arrival order.
    pub fn submissions(&self) -> Vec<Submission> {
        lock(&self.submissions).clone()
    }

    /// Payloads submitted to one printer, in arrival order.
    pub fn submitted_to(&self, printer: &str) -> Vec<Vec<u8>> {
        lock(&self.submissions)
            .iter()
            .filter(|s| s.printer == printer)
            .map(|s| s.data.clone())
            .collect()
    }
}

#[async_trait]
impl PrinterBackend for SimulatedPrinters {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn enumerate(&self) -> Result<Vec<PrinterDevice>> {
        self.enumerations.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.enumeration_delay);
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }
        if self.fail_enumeration.load(Ordering::SeqCst) {
            return Err(PrintflowError::Io(std::io::Error::other(
                "simulated print subsystem unreachable",
            )));
        }
        Ok(lock(&self.printers).clone())
    }
}

#[async_trait]
impl Spooler for SimulatedPrinters {
    async fn submit(&self, request: SpoolRequest) -> std::result::Result<(), SpoolError> {
        lock(&self.submissions).push(Submission {
            printer: request.printer.clone(),
            data: request.data.clone(),
            raw: request.raw,
        });

        if !lock(&self.printers).iter().any(|p| p.name == request.printer) {
            return Err(SpoolError::new(
                SpoolErrorKind::PrinterNotFound,
                format!("lp: The printer or class does not exist: {}", request.printer),
            ));
        }

        let outcome = lock(&self.script)
            .get_mut(&request.printer)
            .and_then(VecDeque::pop_front)
            .unwrap_or(SimOutcome::Accept);
        debug!(printer = %request.printer, len = request.data.len(), ?outcome, "simulated submission");

        let latency = *lock(&self.latency);
        match outcome {
            SimOutcome::Accept => {
                if !latency.is_zero() {
                    tokio::time::sleep(latency).await;
                }
                Ok(())
            }
            SimOutcome::Fail(err) => Err(err),
            SimOutcome::Stall(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
