// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// CUPS backend (Linux, macOS) driven through the `lpstat` and `lp` commands.
//
// Enumeration merges `lpstat -p` (printer state) with `lpstat -v` (device
// URIs, used as the driver hint).  Submission pipes the rendered bytes to
// `lp` on stdin so no temporary file is left behind if the agent dies
// mid-job.  `lp`'s stderr is the only failure detail CUPS gives us; it is
// mapped onto `SpoolErrorKind` here and further classified by the retry
// policy.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use printflow_core::error::{PrintflowError, Result};
use printflow_core::types::{PrinterDevice, Reachability, SpoolError, SpoolErrorKind};

use crate::registry::PrinterBackend;
use crate::spooler::{SpoolRequest, Spooler};

/// Name fragments that identify receipt printers (which understand the
/// ESC/POS cut command).
const RECEIPT_HINTS: &[&str] = &["pos", "receipt", "thermal", "escpos", "tm-", "rp-"];

/// Upper bound for one `lpstat` run.  A stalled cupsd must not hold the
/// registry's refresh lock.
pub const LPSTAT_TIMEOUT: Duration = Duration::from_secs(5);

/// CUPS command-line backend.
#[derive(Debug, Clone)]
pub struct CupsBackend {
    lpstat: String,
    lp: String,
    lpstat_timeout: Duration,
}

impl Default for CupsBackend {
    fn default() -> Self {
        Self {
            lpstat: "lpstat".into(),
            lp: "lp".into(),
            lpstat_timeout: LPSTAT_TIMEOUT,
        }
    }
}

impl CupsBackend {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lpstat(&self, flag: &str) -> Result<String> {
        let mut cmd = Command::new(&self.lpstat);
        cmd.arg(flag)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            // Dropped on timeout; the child goes with it.
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.lpstat_timeout, cmd.output())
            .await
            .map_err(|_| {
                PrintflowError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!(
                        "{} {flag} did not answer within {}s",
                        self.lpstat,
                        self.lpstat_timeout.as_secs()
                    ),
                ))
            })?
            .map_err(|e| {
                PrintflowError::Io(std::io::Error::new(
                    e.kind(),
                    format!("failed to run {}: {e}", self.lpstat),
                ))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        // lpstat exits non-zero when no printer is installed at all.
        if stderr.to_ascii_lowercase().contains("no destinations") {
            return Ok(String::new());
        }
        Err(PrintflowError::Io(std::io::Error::other(format!(
            "{} {flag} failed: {}",
            self.lpstat,
            stderr.trim()
        ))))
    }
}

#[async_trait]
impl PrinterBackend for CupsBackend {
    fn name(&self) -> &str {
        "cups"
    }

    #[instrument(skip(self))]
    async fn enumerate(&self) -> Result<Vec<PrinterDevice>> {
        let states = self.lpstat("-p").await?;
        let mut printers = parse_lpstat_printers(&states);

        match self.lpstat("-v").await {
            Ok(devices) => {
                let uris = parse_lpstat_devices(&devices);
                for printer in &mut printers {
                    printer.driver = uris.get(&printer.name).cloned();
                }
            }
            // Device URIs are only a hint; keep the list without them.
            Err(e) => debug!(error = %e, "lpstat -v failed"),
        }

        for printer in &mut printers {
            printer.capabilities.supports_cut =
                looks_like_receipt_printer(&printer.name, printer.driver.as_deref());
        }

        debug!(count = printers.len(), "cups printers enumerated");
        Ok(printers)
    }
}

#[async_trait]
impl Spooler for CupsBackend {
    #[instrument(skip(self, request), fields(printer = %request.printer, len = request.data.len(), raw = request.raw))]
    async fn submit(&self, request: SpoolRequest) -> std::result::Result<(), SpoolError> {
        let mut cmd = Command::new(&self.lp);
        cmd.arg("-d").arg(&request.printer);
        if request.raw {
            cmd.arg("-o").arg("raw");
        }
        cmd.arg("-t")
            .arg(&request.title)
            .env("LC_ALL", "C")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A timed-out submission drops this future; take lp down with it.
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            SpoolError::new(
                SpoolErrorKind::Connectivity,
                format!("failed to start {}: {e}", self.lp),
            )
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(&request.data).await {
                // lp exited early; its stderr explains why.
                warn!(error = %e, "lp closed stdin early");
            }
            drop(stdin);
        }

        let output = child.wait_with_output().await.map_err(|e| {
            SpoolError::new(
                SpoolErrorKind::Connectivity,
                format!("waiting for {}: {e}", self.lp),
            )
        })?;

        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            info!(response = %stdout.trim(), "cups accepted job");
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("{} exited with {}", self.lp, output.status)
        } else {
            stderr
        };
        Err(SpoolError::new(classify_lp_stderr(&message), message))
    }
}

/// Parse `lpstat -p` output into devices (state only).
///
/// ```text
/// printer LAB1 is idle.  enabled since Mon 01 Jan 2026 09:00:00
/// printer KITCHEN now printing KITCHEN-12.  enabled since ...
/// printer OLD disabled since Mon 01 Jan 2026 09:00:00 -
///         reason unknown
/// ```
pub fn parse_lpstat_printers(output: &str) -> Vec<PrinterDevice> {
    output
        .lines()
        .filter_map(|line| {
            let rest = line.strip_prefix("printer ")?.trim_start();
            let (name, status) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            if name.is_empty() {
                return None;
            }
            let reachability = if status.contains("disabled") {
                Reachability::Offline
            } else if status.contains("is idle") || status.contains("now printing") {
                Reachability::Online
            } else {
                Reachability::Unknown
            };
            Some(PrinterDevice::new(name, reachability))
        })
        .collect()
}

/// Parse `lpstat -v` output into a name → device URI map.
///
/// ```text
/// device for LAB1: usb://EPSON/TM-T20II?serial=123
/// ```
pub fn parse_lpstat_devices(output: &str) -> HashMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let rest = line.strip_prefix("device for ")?;
            let (name, uri) = rest.split_once(':')?;
            Some((name.trim().to_string(), uri.trim().to_string()))
        })
        .collect()
}

/// Heuristic: receipt printers advertise themselves in name or URI.
pub fn looks_like_receipt_printer(name: &str, uri: Option<&str>) -> bool {
    let haystack = format!("{} {}", name, uri.unwrap_or_default()).to_ascii_lowercase();
    RECEIPT_HINTS.iter().any(|hint| haystack.contains(hint))
}

/// Map `lp` stderr onto a failure kind.
pub fn classify_lp_stderr(stderr: &str) -> SpoolErrorKind {
    let lower = stderr.to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["does not exist", "unknown destination", "not found"]) {
        SpoolErrorKind::PrinterNotFound
    } else if has(&["forbidden", "not authorized", "permission denied", "access denied"]) {
        SpoolErrorKind::AccessDenied
    } else if has(&["unsupported document-format", "unsupported format", "document format"]) {
        SpoolErrorKind::MalformedPayload
    } else if has(&["timed out", "timeout"]) {
        SpoolErrorKind::Timeout
    } else if has(&["busy", "not accepting jobs"]) {
        SpoolErrorKind::Busy
    } else if has(&[
        "unable to connect",
        "connection refused",
        "scheduler is not running",
        "no route to host",
    ]) {
        SpoolErrorKind::Connectivity
    } else {
        SpoolErrorKind::Other
    }
}
