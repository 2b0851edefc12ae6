// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PrintFlow Print: everything between an accepted job and the OS spooler:
// the printer registry, the job queue (with optional SQLite history), the
// retry policy, and the per-printer dispatcher.  The spooler itself sits
// behind the `Spooler` trait with a CUPS and a simulated implementation.

pub mod cups;
pub mod dispatcher;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod simulated;
pub mod spooler;
pub mod store;

pub use cups::CupsBackend;
pub use dispatcher::Dispatcher;
pub use queue::{JobQueue, QueueEvent, QueueStats, TargetPolicy, WakeReceiver};
pub use registry::{PrinterBackend, PrinterRegistry};
pub use simulated::{SimOutcome, SimulatedPrinters};
pub use spooler::{SpoolRequest, Spooler};
pub use store::{HISTORY_FILE, HistoryStore, HistoryWriter};
