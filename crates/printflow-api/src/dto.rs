// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Request and response bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use printflow_core::types::{
    Capabilities, ErrorCode, JobFlags, JobId, JobStatus, PrintJob, PrinterDevice, Reachability,
};

// -- Printers --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrinterResponse {
    pub name: String,
    pub status: Reachability,
    pub capabilities: Capabilities,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    pub last_seen: DateTime<Utc>,
}

impl From<&PrinterDevice> for PrinterResponse {
    fn from(device: &PrinterDevice) -> Self {
        Self {
            name: device.name.clone(),
            status: device.reachability,
            capabilities: device.capabilities,
            driver: device.driver.clone(),
            last_seen: device.last_seen,
        }
    }
}

// -- Jobs --

/// JSON job submission.  `payload` is base64.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobRequest {
    pub printer: String,
    pub format: String,
    pub payload: String,
    #[serde(default)]
    pub flags: JobFlags,
}

/// Query string of a binary submission (`POST /jobs?printer=..&format=..`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BinarySubmitQuery {
    pub printer: Option<String>,
    pub format: Option<String>,
    pub cut: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: JobId,
    pub status: JobStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResponse {
    pub id: JobId,
    pub printer: String,
    pub format: String,
    pub size: u64,
    pub digest: String,
    pub flags: JobFlags,
    pub status: JobStatus,
    pub attempts: u32,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<PrintJob> for JobResponse {
    fn from(job: PrintJob) -> Self {
        Self {
            id: job.id,
            printer: job.printer,
            format: job.payload.format.as_str().to_string(),
            size: job.payload.size,
            digest: job.payload.digest,
            flags: job.flags,
            status: job.status,
            attempts: job.attempts,
            retry_count: job.retry_count,
            error: job.error,
            error_code: job.error_code,
            submitted_at: job.submitted_at,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobListQuery {
    pub status: Option<String>,
    pub printer: Option<String>,
}

// -- Health --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateStatus {
    pub fingerprint: String,
    pub expires_at: DateTime<Utc>,
    pub days_remaining: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QueueSummary {
    pub queued: usize,
    pub dispatching: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub application: String,
    pub version: String,
    pub uptime_seconds: u64,
    /// Whether this listener is encrypted.
    pub tls: bool,
    /// `None` when serving without a certificate.
    pub certificate: Option<CertificateStatus>,
    /// Addresses to open once in a browser to trust the certificate.
    pub trust_urls: Vec<String>,
    pub spooler: String,
    pub printers: usize,
    pub queue: QueueSummary,
}

// -- Legacy endpoints --

/// `GET /status` body, as older business applications expect it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyStatusResponse {
    pub status: String,
    pub application: String,
    pub version: String,
    pub printers: Vec<String>,
    pub platform: String,
}

/// `POST /print_raw` body.  `raw_data` is base64.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintRawRequest {
    pub printer_name: String,
    #[serde(default = "default_raw_type")]
    pub raw_type: String,
    pub raw_data: String,
}

fn default_raw_type() -> String {
    "raw".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintRawResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
