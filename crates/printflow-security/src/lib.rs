// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PrintFlow Security: trust bootstrap for the encrypted local endpoint.
//
// Owns the self-signed certificate (generated once, persisted, renewed
// before expiry), builds the rustls server context from it, and provides
// the SHA-256 helpers used for fingerprints and payload digests.

pub mod certificates;
pub mod integrity;
pub mod tls;

pub use certificates::{Certificate, CertificateInfo, CertificateStore, CertificateSubject};
pub use integrity::{fingerprint, hash_bytes};
pub use tls::server_config;
