// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Maps `PrintflowError` onto HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use printflow_core::PrintflowError;

/// Error body returned by every endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    /// Machine-readable code, e.g. `InvalidTarget`.
    pub error: String,
    pub message: String,
}

/// Handler error.  Wraps the domain error so it can become a response.
#[derive(Debug)]
pub struct ApiError(pub PrintflowError);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl From<PrintflowError> for ApiError {
    fn from(err: PrintflowError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            PrintflowError::InvalidTarget(_) | PrintflowError::NotFound(_) => StatusCode::NOT_FOUND,
            PrintflowError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            PrintflowError::InvalidState(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> ApiErrorResponse {
        ApiErrorResponse {
            error: self.0.code().to_string(),
            message: self.0.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "internal error while handling request");
        }
        (status, Json(self.body())).into_response()
    }
}
