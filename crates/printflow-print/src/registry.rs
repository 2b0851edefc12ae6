// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer registry: cached view of the printers the OS can see.
//
// The cached list is an `Arc<Vec<_>>` replaced wholesale on refresh, so a
// reader holds either the old or the new list, never a half-updated one.
// Enumeration is lazy: `list_printers` refreshes at most once per polling
// interval, and concurrent callers that find the cache stale share a single
// enumeration.  Every enumeration is time-boxed, so a hung print subsystem
// degrades to an empty list like a failed one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use printflow_core::error::{PrintflowError, Result};
use printflow_core::types::PrinterDevice;

/// Source of printer enumeration (the OS printing subsystem).
#[async_trait]
pub trait PrinterBackend: Send + Sync {
    /// Short name for logs, e.g. `cups` or `simulated`.
    fn name(&self) -> &str;

    /// Enumerate the printers currently installed.
    async fn enumerate(&self) -> Result<Vec<PrinterDevice>>;
}

/// Upper bound for one backend enumeration.
pub const ENUMERATION_TIMEOUT: Duration = Duration::from_secs(15);

struct Cache {
    printers: Arc<Vec<PrinterDevice>>,
    refreshed_at: Option<Instant>,
}

/// Cached, lazily refreshed printer list.
pub struct PrinterRegistry {
    backend: Arc<dyn PrinterBackend>,
    poll_interval_ms: AtomicU64,
    enumeration_timeout: Duration,
    cache: RwLock<Cache>,
    /// Serialises enumerations; never held while readers use the cache.
    refresh_lock: tokio::sync::Mutex<()>,
}

impl PrinterRegistry {
    pub fn new(backend: Arc<dyn PrinterBackend>, poll_interval: Duration) -> Self {
        Self {
            backend,
            poll_interval_ms: AtomicU64::new(poll_interval.as_millis() as u64),
            enumeration_timeout: ENUMERATION_TIMEOUT,
            cache: RwLock::new(Cache {
                printers: Arc::new(Vec::new()),
                refreshed_at: None,
            }),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_enumeration_timeout(mut self, timeout: Duration) -> Self {
        self.enumeration_timeout = timeout;
        self
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn set_poll_interval(&self, interval: Duration) {
        self.poll_interval_ms
            .store(interval.as_millis() as u64, Ordering::Relaxed);
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.load(Ordering::Relaxed))
    }

    /// The current list without triggering enumeration.
    pub fn cached(&self) -> Arc<Vec<PrinterDevice>> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&cache.printers)
    }

    /// The cached list if it is younger than the polling interval.
    fn fresh(&self) -> Option<Arc<Vec<PrinterDevice>>> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        let refreshed_at = cache.refreshed_at?;
        (refreshed_at.elapsed() < self.poll_interval()).then(|| Arc::clone(&cache.printers))
    }

    /// All known printers, refreshing first if the cache is stale.
    pub async fn list_printers(&self) -> Arc<Vec<PrinterDevice>> {
        if let Some(printers) = self.fresh() {
            return printers;
        }

        let _guard = self.refresh_lock.lock().await;
        // Another caller may have refreshed while we waited.
        if let Some(printers) = self.fresh() {
            return printers;
        }
        self.enumerate_and_swap().await
    }

    /// Force an enumeration now, regardless of cache age.
    pub async fn refresh(&self) -> Arc<Vec<PrinterDevice>> {
        let _guard = self.refresh_lock.lock().await;
        self.enumerate_and_swap().await
    }

    /// Look a printer up by its OS name.
    ///
    /// A miss in the cached list forces one refresh before reporting
    /// `NotFound`, so printers installed since the last poll are found.
    #[instrument(skip(self))]
    pub async fn resolve(&self, name: &str) -> Result<PrinterDevice> {
        if let Some(device) = find(&self.list_printers().await, name) {
            return Ok(device);
        }
        debug!(printer = name, "printer not in cache, refreshing");
        find(&self.refresh().await, name)
            .ok_or_else(|| PrintflowError::NotFound(format!("printer {name}")))
    }

    /// Caller must hold `refresh_lock`.
    async fn enumerate_and_swap(&self) -> Arc<Vec<PrinterDevice>> {
        let enumeration = tokio::time::timeout(self.enumeration_timeout, self.backend.enumerate());
        let printers = match enumeration.await {
            Ok(Ok(printers)) => printers,
            Ok(Err(e)) => {
                warn!(
                    backend = self.backend.name(),
                    error = %e,
                    "printer enumeration failed, treating as no printers"
                );
                Vec::new()
            }
            Err(_) => {
                warn!(
                    backend = self.backend.name(),
                    timeout_ms = self.enumeration_timeout.as_millis() as u64,
                    "printer enumeration timed out, treating as no printers"
                );
                Vec::new()
            }
        };

        let printers = Arc::new(printers);
        let previous = {
            let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
            let previous = std::mem::replace(&mut cache.printers, Arc::clone(&printers));
            cache.refreshed_at = Some(Instant::now());
            previous
        };

        if names(&previous) != names(&printers) {
            info!(
                count = printers.len(),
                printers = ?names(&printers),
                "printer list changed"
            );
        }
        printers
    }
}

fn find(printers: &[PrinterDevice], name: &str) -> Option<PrinterDevice> {
    printers.iter().find(|p| p.name == name).cloned()
}

fn names(printers: &[PrinterDevice]) -> Vec<&str> {
    printers.iter().map(|p| p.name.as_str()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedPrinters;

    fn registry(sim: &Arc<SimulatedPrinters>, interval: Duration) -> PrinterRegistry {
        PrinterRegistry::new(Arc::clone(sim) as Arc<dyn PrinterBackend>, interval)
    }

    #[tokio::test]
    async fn list_is_cached_within_poll_interval() {
        let sim = Arc::new(SimulatedPrinters::new(["LAB1", "LAB2"]));
        let registry = registry(&sim, Duration::from_secs(60));

        assert_eq!(registry.list_printers().await.len(), 2);
        assert_eq!(registry.list_printers().await.len(), 2);
        assert_eq!(sim.enumeration_count(), 1);
    }

    #[tokio::test]
    async fn stale_cache_is_refreshed() {
        let sim = Arc::new(SimulatedPrinters::new(["LAB1"]));
        let registry = registry(&sim, Duration::ZERO);

        registry.list_printers().await;
        sim.add_printer("LAB2");
        let printers = registry.list_printers().await;
        assert_eq!(printers.len(), 2);
        assert_eq!(sim.enumeration_count(), 2);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_enumeration() {
        let sim = Arc::new(SimulatedPrinters::new(["LAB1"]));
        let registry = Arc::new(registry(&sim, Duration::from_secs(60)));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move { registry.list_printers().await.len() }));
        }
        for handle in handles {
            assert_eq!(handle.await.expect("join"), 1);
        }
        assert_eq!(sim.enumeration_count(), 1);
    }

    #[tokio::test]
    async fn resolve_finds_newly_installed_printer() {
        let sim = Arc::new(SimulatedPrinters::new(["LAB1"]));
        let registry = registry(&sim, Duration::from_secs(60));
        registry.list_printers().await;

        sim.add_printer("KITCHEN");
        let device = registry.resolve("KITCHEN").await.expect("resolve");
        assert_eq!(device.name, "KITCHEN");
    }

    #[tokio::test]
    async fn resolve_unknown_is_not_found() {
        let sim = Arc::new(SimulatedPrinters::new(["LAB1"]));
        let registry = registry(&sim, Duration::from_secs(60));
        assert!(matches!(
            registry.resolve("GHOST").await,
            Err(PrintflowError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn enumeration_failure_degrades_to_empty_list() {
        let sim = Arc::new(SimulatedPrinters::new(["LAB1"]));
        let registry = registry(&sim, Duration::ZERO);
        assert_eq!(registry.list_printers().await.len(), 1);

        sim.set_enumeration_failure(true);
        assert!(registry.list_printers().await.is_empty());

        sim.set_enumeration_failure(false);
        assert_eq!(registry.list_printers().await.len(), 1);
    }

    #[tokio::test]
    async fn hung_enumeration_degrades_to_empty_list() {
        let sim = Arc::new(SimulatedPrinters::new(["LAB1"]));
        sim.set_enumeration_delay(Duration::from_secs(30));
        let registry = Arc::new(
            registry(&sim, Duration::from_secs(60))
                .with_enumeration_timeout(Duration::from_millis(100)),
        );

        let resolved = tokio::time::timeout(Duration::from_secs(5), registry.resolve("LAB1"))
            .await
            .expect("resolve answered");
        assert!(matches!(resolved, Err(PrintflowError::NotFound(_))));

        // Concurrent listers queue behind the refresh lock but still get an answer.
        let listers: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.refresh().await.len() })
            })
            .collect();
        for lister in listers {
            let len = tokio::time::timeout(Duration::from_secs(5), lister)
                .await
                .expect("list answered")
                .expect("join");
            assert_eq!(len, 0);
        }

        sim.set_enumeration_delay(Duration::ZERO);
        assert_eq!(registry.refresh().await.len(), 1);
    }

    #[tokio::test]
    async fn readers_keep_their_snapshot_across_refresh() {
        let sim = Arc::new(SimulatedPrinters::new(["LAB1"]));
        let registry = registry(&sim, Duration::from_secs(60));
        let before = registry.list_printers().await;

        sim.remove_printer("LAB1");
        let after = registry.refresh().await;
        assert_eq!(before.len(), 1);
        assert!(after.is_empty());
        assert!(registry.cached().is_empty());
    }
}
