// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PrintFlow API: the HTTPS gateway business applications talk to.
//
// Routes:
//
//   GET  /printers              installed printers
//   POST /printers/refresh      force a printer enumeration
//   POST /jobs                  submit (JSON + base64, or binary + query)
//   GET  /jobs                  list, filter by ?status= and ?printer=
//   GET  /jobs/{id}             one job
//   POST /jobs/{id}/cancel      cancel a job that is still queued
//   GET  /health                service and certificate status
//   GET  /status                legacy status shape
//   POST /print_raw             legacy submission shape

pub mod dto;
pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod state;

pub use error::{ApiError, ApiErrorResponse};
pub use router::build_router;
pub use server::{Gateway, TlsReloader};
pub use state::ApiState;
