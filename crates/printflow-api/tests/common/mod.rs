// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Shared fixture: a complete agent on simulated printers LAB1 and KITCHEN.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio_util::sync::CancellationToken;

use printflow_api::{ApiState, build_router};
use printflow_bridge::ControlBridge;
use printflow_core::AgentConfig;
use printflow_core::types::{JobId, JobStatus};
use printflow_print::{
    Dispatcher, JobQueue, PrinterBackend, PrinterRegistry, SimulatedPrinters, Spooler,
};

pub struct TestAgent {
    pub dir: tempfile::TempDir,
    pub sim: Arc<SimulatedPrinters>,
    pub queue: Arc<JobQueue>,
    pub bridge: Arc<ControlBridge>,
    pub router: Router,
    pub cancel: CancellationToken,
}

impl Drop for TestAgent {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl TestAgent {
    /// Poll until `id` reaches `status`.
    pub async fn wait_for_status(&self, id: &JobId, status: JobStatus) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if self.queue.status(id).map(|j| j.status).ok() == Some(status) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("job {id} never reached {status:?}"));
    }
}

/// An agent with the dispatcher running.
pub async fn agent(config: AgentConfig) -> TestAgent {
    build(config, true).await
}

/// An agent whose jobs stay Queued (no dispatcher).
pub async fn idle_agent(config: AgentConfig) -> TestAgent {
    build(config, false).await
}

async fn build(config: AgentConfig, dispatch: bool) -> TestAgent {
    let dir = tempfile::tempdir().expect("tempdir");
    let sim = Arc::new(SimulatedPrinters::new(["LAB1", "KITCHEN"]));
    let registry = Arc::new(PrinterRegistry::new(
        Arc::clone(&sim) as Arc<dyn PrinterBackend>,
        config.printer_poll_interval(),
    ));
    registry.refresh().await;

    let (queue, wake) = JobQueue::new(Arc::clone(&registry), config.history_limit);
    let queue = Arc::new(queue);
    let cancel = CancellationToken::new();

    let (bridge, _handle, commands) = ControlBridge::new(
        Arc::clone(&queue),
        Arc::clone(&registry),
        config.clone(),
        dir.path().to_path_buf(),
        cancel.clone(),
    );
    tokio::spawn(Arc::clone(&bridge).run(commands));

    if dispatch {
        let dispatcher = Dispatcher::new(
            Arc::clone(&queue),
            Arc::clone(&registry),
            Arc::clone(&sim) as Arc<dyn Spooler>,
            bridge.config_receiver(),
            cancel.clone(),
        );
        dispatcher.spawn(wake);
    }

    let state = ApiState::new(Arc::clone(&queue), registry, Arc::clone(&bridge));
    let router = build_router(state, &config);

    TestAgent {
        dir,
        sim,
        queue,
        bridge,
        router,
        cancel,
    }
}
