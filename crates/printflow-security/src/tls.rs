// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// rustls server context for the HTTPS gateway.

use std::sync::Arc;

use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tracing::debug;

use printflow_core::error::{PrintflowError, Result};

use crate::certificates::Certificate;

/// Build a server context presenting `cert`.
///
/// TLS 1.2 and 1.3 with the ring provider, no client authentication, and
/// ALPN for both HTTP/2 and HTTP/1.1.
pub fn server_config(cert: &Certificate) -> Result<Arc<ServerConfig>> {
    let chain = vec![CertificateDer::from(cert.cert_der().to_vec())];
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.private_key_der().to_vec()));

    let mut config =
        ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| PrintflowError::Configuration(format!("tls protocol setup: {e}")))?
            .with_no_client_auth()
            .with_single_cert(chain, key)
            .map_err(|e| PrintflowError::Configuration(format!("tls certificate rejected: {e}")))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    debug!(fingerprint = %cert.info().fingerprint, "tls server context built");
    Ok(Arc::new(config))
}
