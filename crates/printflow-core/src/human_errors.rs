// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Plain-language explanations of job failures for the tray tooltip and the
// preferences window.  The verbatim error stays on the job record; this is
// only what the operator at the counter gets to read.

use crate::types::ErrorCode;

/// Severity of a failure from the operator's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The agent is still retrying on its own.
    Transient,
    /// Someone has to look at the printer or its settings.
    ActionRequired,
    /// The job itself is unprintable; resubmitting the same payload won't help.
    Permanent,
}

/// A human-readable error with a short message and an actionable suggestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HumanError {
    pub message: String,
    pub suggestion: String,
    pub severity: Severity,
}

/// Explain a failed job.  `detail` is the verbatim spooler message.
pub fn humanize_job_error(code: Option<ErrorCode>, detail: &str) -> HumanError {
    match code {
        Some(ErrorCode::Cancelled) => HumanError {
            message: "The print job was cancelled.".into(),
            suggestion: "Send it again from the business application if it is still needed.".into(),
            severity: Severity::Permanent,
        },
        Some(ErrorCode::PrinterNotFound) => HumanError {
            message: "The printer is no longer installed on this computer.".into(),
            suggestion: "Check the printer name in the business application matches one listed in PrintFlow.".into(),
            severity: Severity::ActionRequired,
        },
        Some(ErrorCode::AccessDenied) => HumanError {
            message: "This computer is not allowed to print to that printer.".into(),
            suggestion: "Ask an administrator to grant printing rights for this user.".into(),
            severity: Severity::ActionRequired,
        },
        Some(ErrorCode::MalformedPayload) => HumanError {
            message: "The document could not be printed in the format it was sent.".into(),
            suggestion: "Check the document format chosen in the business application.".into(),
            severity: Severity::Permanent,
        },
        Some(ErrorCode::RetriesExhausted) => humanize_spooler_detail(detail, Severity::ActionRequired),
        Some(ErrorCode::Interrupted) => HumanError {
            message: "PrintFlow was restarted while this job was printing.".into(),
            suggestion: "Check whether the document came out; resend it if not.".into(),
            severity: Severity::ActionRequired,
        },
        Some(ErrorCode::Rejected) | None => humanize_spooler_detail(detail, Severity::Transient),
    }
}

/// Interpret a raw spooler message.
fn humanize_spooler_detail(detail: &str, fallback: Severity) -> HumanError {
    let lower = detail.to_ascii_lowercase();

    if lower.contains("timed out") || lower.contains("timeout") {
        HumanError {
            message: "The printer didn't respond in time.".into(),
            suggestion: "Check the printer is switched on and connected.".into(),
            severity: fallback,
        }
    } else if lower.contains("busy") {
        HumanError {
            message: "The printer is busy.".into(),
            suggestion: "Wait for the current print to finish.".into(),
            severity: fallback,
        }
    } else if lower.contains("paper") || lower.contains("media") {
        HumanError {
            message: "The printer may be out of paper.".into(),
            suggestion: "Load a new roll or paper stack, then resend the job.".into(),
            severity: Severity::ActionRequired,
        }
    } else {
        HumanError {
            message: "The printer had a problem.".into(),
            suggestion: format!("Try turning the printer off and on again. (Detail: {detail})"),
            severity: fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_is_permanent() {
        let human = humanize_job_error(Some(ErrorCode::Cancelled), "cancelled");
        assert_eq!(human.severity, Severity::Permanent);
    }

    #[test]
    fn exhausted_timeout_needs_action() {
        let human = humanize_job_error(Some(ErrorCode::RetriesExhausted), "lp timed out after 30s");
        assert_eq!(human.severity, Severity::ActionRequired);
        assert!(human.message.contains("respond"));
    }

    #[test]
    fn unknown_detail_is_quoted() {
        let human = humanize_job_error(Some(ErrorCode::Rejected), "filter failed");
        assert!(human.suggestion.contains("filter failed"));
    }
}
