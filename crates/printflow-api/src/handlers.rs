// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Endpoint handlers.
//
// Every handler is a thin translation between HTTP and the queue/registry
// contracts.  Format tags are validated here, before a job exists.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use tracing::{debug, instrument};

use printflow_core::error::{PrintflowError, Result};
use printflow_core::types::{JobFilter, JobFlags, JobId, JobStatus, PayloadFormat};
use printflow_core::{APP_TITLE, APP_VERSION};
use printflow_document::escpos::check_pdf;
use printflow_print::TargetPolicy;

use crate::dto::{
    BinarySubmitQuery, CertificateStatus, HealthResponse, JobListQuery, JobResponse,
    LegacyStatusResponse, PrintRawRequest, PrintRawResponse, PrinterResponse, QueueSummary,
    SubmitJobRequest, SubmitJobResponse,
};
use crate::error::{ApiError, ApiResult};
use crate::state::ApiState;

// -- Printers --

/// GET /printers
pub async fn list_printers(State(state): State<ApiState>) -> Json<Vec<PrinterResponse>> {
    let printers = state.registry.list_printers().await;
    Json(printers.iter().map(PrinterResponse::from).collect())
}

/// POST /printers/refresh
pub async fn refresh_printers(State(state): State<ApiState>) -> Json<Vec<PrinterResponse>> {
    let printers = state.registry.refresh().await;
    Json(printers.iter().map(PrinterResponse::from).collect())
}

// -- Jobs --

/// POST /jobs
///
/// A JSON body carries a base64 payload.  Any other content type is the
/// payload itself, with printer and format in the query string.
#[instrument(skip_all)]
pub async fn submit_job(
    State(state): State<ApiState>,
    Query(query): Query<BinarySubmitQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<SubmitJobResponse>)> {
    let (printer, format, bytes, requested) = if is_json(&headers) {
        let request: SubmitJobRequest = serde_json::from_slice(&body)
            .map_err(|e| PrintflowError::InvalidRequest(format!("malformed job request: {e}")))?;
        let bytes = decode_base64(&request.payload)?;
        (request.printer, request.format, bytes, request.flags)
    } else {
        let printer = query.printer.ok_or_else(|| {
            PrintflowError::InvalidRequest("binary submissions need ?printer=".into())
        })?;
        let format = query.format.ok_or_else(|| {
            PrintflowError::InvalidRequest("binary submissions need ?format=".into())
        })?;
        let flags = JobFlags {
            auto_cut: query.cut.unwrap_or(false),
        };
        (printer, format, body.to_vec(), flags)
    };

    let job_id = submit(&state, &printer, &format, bytes, requested).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            job_id,
            status: JobStatus::Queued,
        }),
    ))
}

/// GET /jobs
pub async fn list_jobs(
    State(state): State<ApiState>,
    Query(query): Query<JobListQuery>,
) -> ApiResult<Json<Vec<JobResponse>>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<JobStatus>)
        .transpose()
        .map_err(PrintflowError::InvalidRequest)?;
    let filter = JobFilter {
        status,
        printer: query.printer,
    };
    let jobs = state.queue.list(&filter);
    Ok(Json(jobs.into_iter().map(JobResponse::from).collect()))
}

/// GET /jobs/{id}
pub async fn get_job(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobResponse>> {
    let id = parse_job_id(&id)?;
    Ok(Json(state.queue.status(&id)?.into()))
}

/// POST /jobs/{id}/cancel
#[instrument(skip(state))]
pub async fn cancel_job(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobResponse>> {
    let id = parse_job_id(&id)?;
    Ok(Json(state.queue.cancel(&id)?.into()))
}

// -- Health --

/// GET /health
pub async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let trust = state.bridge.trust();
    let stats = state.queue.stats();
    let now = Utc::now();

    Json(HealthResponse {
        status: "ok".into(),
        application: APP_TITLE.into(),
        version: APP_VERSION.into(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        tls: trust.is_some(),
        certificate: trust.as_ref().map(|t| CertificateStatus {
            fingerprint: t.fingerprint.clone(),
            expires_at: t.expires_at,
            days_remaining: (t.expires_at - now).num_days(),
        }),
        trust_urls: trust.map(|t| t.urls).unwrap_or_default(),
        spooler: state.registry.backend_name().to_string(),
        printers: state.registry.cached().len(),
        queue: QueueSummary {
            queued: stats.queued,
            dispatching: stats.dispatching,
            succeeded: stats.succeeded,
            failed: stats.failed,
        },
    })
}

// -- Legacy --

/// GET /status
pub async fn legacy_status(State(state): State<ApiState>) -> Json<LegacyStatusResponse> {
    let printers = state.registry.list_printers().await;
    Json(LegacyStatusResponse {
        status: "online".into(),
        application: APP_TITLE.into(),
        version: APP_VERSION.into(),
        printers: printers.iter().map(|p| p.name.clone()).collect(),
        platform: std::env::consts::OS.into(),
    })
}

/// POST /print_raw
///
/// Failures keep the `{success: false, error}` shape older clients parse.
#[instrument(skip_all)]
pub async fn print_raw(
    State(state): State<ApiState>,
    body: Bytes,
) -> (StatusCode, Json<PrintRawResponse>) {
    let result = async {
        let request: PrintRawRequest = serde_json::from_slice(&body)
            .map_err(|e| PrintflowError::InvalidRequest(format!("malformed request: {e}")))?;
        let bytes = decode_base64(&request.raw_data)?;
        let id = submit(
            &state,
            &request.printer_name,
            &request.raw_type,
            bytes,
            JobFlags::default(),
        )
        .await?;
        Ok::<_, PrintflowError>((id, request.printer_name))
    }
    .await;

    match result {
        Ok((id, printer)) => (
            StatusCode::OK,
            Json(PrintRawResponse {
                success: true,
                job_id: Some(id),
                message: Some(format!("Print job queued for {printer}")),
                error: None,
            }),
        ),
        Err(e) => {
            let err = ApiError(e);
            (
                err.status(),
                Json(PrintRawResponse {
                    success: false,
                    job_id: None,
                    message: None,
                    error: Some(err.0.to_string()),
                }),
            )
        }
    }
}

// -- Helpers --

/// Validate and enqueue one submission.
///
/// The cut flag is the union of the request flag, a `_cut` format suffix,
/// and the configured default.
async fn submit(
    state: &ApiState,
    printer: &str,
    format: &str,
    bytes: Vec<u8>,
    requested: JobFlags,
) -> Result<JobId> {
    let tag = PayloadFormat::parse_tag(format).ok_or_else(|| {
        PrintflowError::InvalidRequest(format!("unsupported payload format {format:?}"))
    })?;
    if tag.format == PayloadFormat::Pdf {
        check_pdf(&bytes)?;
    }

    let config = state.bridge.config();
    let flags = JobFlags {
        auto_cut: requested.auto_cut || tag.cut || config.auto_cut,
    };
    debug!(printer, format = tag.format.as_str(), auto_cut = flags.auto_cut, "submission validated");

    state
        .queue
        .enqueue(
            printer,
            tag.format,
            bytes,
            flags,
            TargetPolicy::from_strict(config.strict_targets),
        )
        .await
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.trim_start().to_ascii_lowercase().starts_with("application/json"))
}

fn decode_base64(data: &str) -> Result<Vec<u8>> {
    let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| PrintflowError::InvalidRequest(format!("payload is not valid base64: {e}")))
}

/// Ids that do not parse were never issued.
fn parse_job_id(raw: &str) -> Result<JobId> {
    raw.parse()
        .map_err(|_| PrintflowError::NotFound(format!("job {raw}")))
}
