// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the PrintFlow dispatch service.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle states of a print job.
///
/// Status only advances `Queued → Dispatching → {Succeeded | Failed}`.
/// `Dispatching → Queued` is the retry edge, `Queued → Failed` is
/// cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    /// Waiting for the printer's dispatch worker.
    Queued,
    /// Spooler submission in progress.
    Dispatching,
    /// The spooler accepted the job.
    Succeeded,
    /// Terminal failure; see `error` and `error_code`.
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Whether `self → next` is an edge of the job state machine.
    pub fn can_advance_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Dispatching)
                | (Self::Queued, Self::Failed)
                | (Self::Dispatching, Self::Queued)
                | (Self::Dispatching, Self::Succeeded)
                | (Self::Dispatching, Self::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "Queued",
            Self::Dispatching => "Dispatching",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
        }
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "queued" => Ok(Self::Queued),
            "dispatching" => Ok(Self::Dispatching),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Distinguishes why a job ended up `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Cancelled by the operator while still queued.
    Cancelled,
    /// The target printer vanished before dispatch.
    PrinterNotFound,
    AccessDenied,
    /// The payload could not be converted or was rejected as malformed.
    MalformedPayload,
    /// Transient failures used up the retry budget.
    RetriesExhausted,
    /// Any other permanent spooler rejection.
    Rejected,
    /// The agent restarted while the job was being dispatched.
    Interrupted,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cancelled => "Cancelled",
            Self::PrinterNotFound => "PrinterNotFound",
            Self::AccessDenied => "AccessDenied",
            Self::MalformedPayload => "MalformedPayload",
            Self::RetriesExhausted => "RetriesExhausted",
            Self::Rejected => "Rejected",
            Self::Interrupted => "Interrupted",
        }
    }
}

impl FromStr for ErrorCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Cancelled" => Ok(Self::Cancelled),
            "PrinterNotFound" => Ok(Self::PrinterNotFound),
            "AccessDenied" => Ok(Self::AccessDenied),
            "MalformedPayload" => Ok(Self::MalformedPayload),
            "RetriesExhausted" => Ok(Self::RetriesExhausted),
            "Rejected" => Ok(Self::Rejected),
            "Interrupted" => Ok(Self::Interrupted),
            other => Err(format!("unknown error code: {other}")),
        }
    }
}

/// Supported payload formats.  Closed set, validated at the API boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    /// Raw bytes (plain text or printer language), passed through.
    Raw,
    /// ESC/POS command stream, passed through.
    EscPos,
    /// Pre-rendered raster data, passed through.
    Raster,
    /// PNG/JPEG image, converted to an ESC/POS raster before spooling.
    Image,
    /// PDF document, filtered by the OS spooler.
    Pdf,
}

/// A parsed format tag: the format plus the `_cut` suffix flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatTag {
    pub format: PayloadFormat,
    pub cut: bool,
}

impl PayloadFormat {
    /// Parse a case-insensitive format tag such as `raster`, `text_cut`
    /// or `image_cut`.  Unknown tags yield `None`.
    pub fn parse_tag(tag: &str) -> Option<FormatTag> {
        let lower = tag.trim().to_ascii_lowercase();
        let (base, cut) = match lower.strip_suffix("_cut") {
            Some(base) => (base, true),
            None => (lower.as_str(), false),
        };

        let format = match base {
            "raw" | "text" => Self::Raw,
            "escpos" | "esc-pos" | "esc_pos" => Self::EscPos,
            "raster" => Self::Raster,
            "image" => Self::Image,
            "pdf" => Self::Pdf,
            _ => return None,
        };
        Some(FormatTag { format, cut })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::EscPos => "escpos",
            Self::Raster => "raster",
            Self::Image => "image",
            Self::Pdf => "pdf",
        }
    }

    /// Whether the spooler should receive the bytes unfiltered.
    pub fn is_raw(self) -> bool {
        !matches!(self, Self::Pdf)
    }

    /// Whether an auto-cut command can be appended to this format.
    pub fn supports_cut(self) -> bool {
        !matches!(self, Self::Pdf)
    }
}

/// Optional post-processing instructions bundled with a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFlags {
    /// Append a paper-cut command after the payload.
    #[serde(default)]
    pub auto_cut: bool,
}

/// Job payload: the raw bytes plus their declared format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    pub format: PayloadFormat,
    /// Size of `bytes` in bytes.
    pub size: u64,
    /// SHA-256 of `bytes`, lowercase hex.
    pub digest: String,
    /// Shared so snapshots stay cheap.
    #[serde(skip)]
    pub bytes: Arc<Vec<u8>>,
}

impl Payload {
    pub fn new(format: PayloadFormat, bytes: Vec<u8>, digest: String) -> Self {
        Self {
            format,
            size: bytes.len() as u64,
            digest,
            bytes: Arc::new(bytes),
        }
    }
}

/// A complete print job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintJob {
    pub id: JobId,
    /// Submission sequence number; defines FIFO order per printer.
    pub seq: u64,
    /// Target printer name.  Never rewritten after creation.
    pub printer: String,
    pub payload: Payload,
    pub flags: JobFlags,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: JobStatus,
    /// Spooler submissions attempted so far.
    pub attempts: u32,
    /// Times the job re-entered `Queued` after a transient failure.
    pub retry_count: u32,
    /// Last error message, verbatim.
    pub error: Option<String>,
    pub error_code: Option<ErrorCode>,
}

impl PrintJob {
    pub fn new(seq: u64, printer: String, payload: Payload, flags: JobFlags) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            seq,
            printer,
            payload,
            flags,
            submitted_at: now,
            updated_at: now,
            status: JobStatus::Queued,
            attempts: 0,
            retry_count: 0,
            error: None,
            error_code: None,
        }
    }
}

/// Filter for job listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub printer: Option<String>,
}

impl JobFilter {
    pub fn matches(&self, job: &PrintJob) -> bool {
        self.status.is_none_or(|s| s == job.status)
            && self.printer.as_deref().is_none_or(|p| p == job.printer)
    }
}

/// Best-effort reachability of a printer as last reported by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reachability {
    Online,
    Offline,
    Unknown,
}

/// Capability flags advertised for a printer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// The device understands the ESC/POS paper-cut command.
    pub supports_cut: bool,
}

/// A printer visible to the OS printing subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrinterDevice {
    /// OS-reported printer name; the printer's identity.
    pub name: String,
    /// Driver / device URI hint, if the OS reports one.
    pub driver: Option<String>,
    pub reachability: Reachability,
    pub capabilities: Capabilities,
    pub last_seen: DateTime<Utc>,
}

impl PrinterDevice {
    pub fn new(name: impl Into<String>, reachability: Reachability) -> Self {
        Self {
            name: name.into(),
            driver: None,
            reachability,
            capabilities: Capabilities::default(),
            last_seen: Utc::now(),
        }
    }
}

/// Retry classification of a dispatch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Timeout, busy printer, connectivity: safe to retry automatically.
    Transient,
    /// Not found, access denied, malformed payload: retrying cannot help.
    Permanent,
}

/// What the spooler (or payload preparation) reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpoolErrorKind {
    Timeout,
    Busy,
    Connectivity,
    PrinterNotFound,
    AccessDenied,
    MalformedPayload,
    /// Unrecognised; classified by configured message patterns.
    Other,
}

/// A failed spooler submission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SpoolError {
    pub kind: SpoolErrorKind,
    pub message: String,
}

impl SpoolError {
    pub fn new(kind: SpoolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The job error code a permanent failure of this kind maps to.
    pub fn error_code(&self) -> ErrorCode {
        match self.kind {
            SpoolErrorKind::PrinterNotFound => ErrorCode::PrinterNotFound,
            SpoolErrorKind::AccessDenied => ErrorCode::AccessDenied,
            SpoolErrorKind::MalformedPayload => ErrorCode::MalformedPayload,
            _ => ErrorCode::Rejected,
        }
    }
}
