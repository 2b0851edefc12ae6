// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Retry policy with exponential backoff + jitter for spooler submissions.
//
// Timeouts, a busy printer, and connectivity problems are transient and
// retried automatically; a missing printer, denied access, and malformed
// payloads are permanent.  Unrecognised spooler messages are classified by
// the configured pattern lists.

use std::time::Duration;

use tracing::{debug, info, warn};

use printflow_core::config::RetrySettings;
use printflow_core::types::{ErrorClass, SpoolError, SpoolErrorKind};

/// Result of evaluating whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-queue after this delay.
    RetryAfter(Duration),
    /// Do not retry: the failure is permanent.
    GiveUp,
    /// The attempt budget is spent.
    Exhausted,
}

/// Classify a spooler failure.
pub fn classify(err: &SpoolError, settings: &RetrySettings) -> ErrorClass {
    match err.kind {
        SpoolErrorKind::Timeout | SpoolErrorKind::Busy | SpoolErrorKind::Connectivity => {
            ErrorClass::Transient
        }
        SpoolErrorKind::PrinterNotFound
        | SpoolErrorKind::AccessDenied
        | SpoolErrorKind::MalformedPayload => ErrorClass::Permanent,
        SpoolErrorKind::Other => classify_detail(&err.message, settings),
    }
}

/// Classify a free-form spooler message.  Permanent patterns win over
/// transient ones; a message matching neither is retried.
fn classify_detail(detail: &str, settings: &RetrySettings) -> ErrorClass {
    let lower = detail.to_ascii_lowercase();

    if settings
        .permanent_patterns
        .iter()
        .any(|p| lower.contains(p.as_str()))
    {
        return ErrorClass::Permanent;
    }
    if settings
        .transient_patterns
        .iter()
        .any(|p| lower.contains(p.as_str()))
    {
        return ErrorClass::Transient;
    }

    // Optimistic: retry first, give up when the budget runs out.
    ErrorClass::Transient
}

/// Decide what happens after attempt number `attempts` (1-based) failed.
pub fn should_retry(err: &SpoolError, attempts: u32, settings: &RetrySettings) -> RetryDecision {
    match classify(err, settings) {
        ErrorClass::Permanent => {
            info!(kind = ?err.kind, "permanent spooler failure, not retrying");
            RetryDecision::GiveUp
        }
        ErrorClass::Transient => {
            if attempts >= settings.max_attempts {
                warn!(attempts, max = settings.max_attempts, "retry budget exhausted");
                RetryDecision::Exhausted
            } else {
                let delay = compute_delay(attempts.saturating_sub(1), settings);
                debug!(attempts, delay_ms = delay.as_millis() as u64, "scheduling retry");
                RetryDecision::RetryAfter(delay)
            }
        }
    }
}

/// Exponential backoff delay with jitter.
///
/// delay = min(base * 2^retry + jitter, max_delay), jitter in [0, base).
pub fn compute_delay(retry: u32, settings: &RetrySettings) -> Duration {
    let base_ms = settings.base_delay_ms;
    let exp_ms = base_ms.saturating_mul(1u64 << retry.min(10));
    let total_ms = exp_ms.saturating_add(jitter(base_ms, retry));
    Duration::from_millis(total_ms.min(settings.max_delay_ms))
}

/// Deterministic spread across [0, base).
fn jitter(base_ms: u64, retry: u32) -> u64 {
    let hash = u64::from(retry).wrapping_mul(6364136223846793005);
    hash % base_ms.max(1)
}
