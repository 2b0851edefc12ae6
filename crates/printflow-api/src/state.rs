// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Shared handler state.

use std::sync::Arc;
use std::time::Instant;

use printflow_bridge::ControlBridge;
use printflow_print::{JobQueue, PrinterRegistry};

/// Handed to every handler via `State<ApiState>`.
///
/// The gateway holds no state of its own; jobs live in the queue, printers
/// in the registry, and configuration plus trust details in the bridge.
#[derive(Clone)]
pub struct ApiState {
    pub queue: Arc<JobQueue>,
    pub registry: Arc<PrinterRegistry>,
    pub bridge: Arc<ControlBridge>,
    pub started_at: Instant,
}

impl ApiState {
    pub fn new(
        queue: Arc<JobQueue>,
        registry: Arc<PrinterRegistry>,
        bridge: Arc<ControlBridge>,
    ) -> Self {
        Self {
            queue,
            registry,
            bridge,
            started_at: Instant::now(),
        }
    }
}
