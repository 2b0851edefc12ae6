// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Certificate store: self-signed ECDSA P-256 certificate for the agent's
// HTTPS endpoint.
//
// `ring` generates the key pair (PKCS#8 DER); `rcgen` wraps it in a
// self-signed X.509 certificate.  Three files live in the store directory:
//
//   server.crt   PEM certificate (what the operator imports / trusts)
//   server.key   PEM PKCS#8 private key (0600 on unix)
//   server.json  metadata: subject, SANs, validity, fingerprint
//
// `server.json` is written last and acts as the commit marker: a store
// without it is treated as empty and regenerated.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use ring::rand::SystemRandom;
use ring::signature::{ECDSA_P256_SHA256_ASN1_SIGNING, EcdsaKeyPair};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use printflow_core::APP_TITLE;
use printflow_core::config::CertificateSettings;
use printflow_core::error::{PrintflowError, Result};

use crate::integrity::fingerprint;

const CERT_FILE: &str = "server.crt";
const KEY_FILE: &str = "server.key";
const META_FILE: &str = "server.json";

/// Who the certificate is issued to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateSubject {
    /// Subject CN, normally the machine hostname.
    pub common_name: String,
    /// DNS names and IP addresses the certificate must cover.
    pub alt_names: Vec<String>,
}

impl CertificateSubject {
    /// Subject for `hostname`, covering `localhost`, the hostname itself,
    /// loopback, and every address in `addresses`.
    pub fn for_host(hostname: &str, addresses: &[std::net::IpAddr]) -> Self {
        let mut alt_names = vec!["localhost".to_string(), "127.0.0.1".to_string()];
        if !hostname.is_empty() && hostname != "localhost" {
            alt_names.push(hostname.to_string());
        }
        for ip in addresses {
            let ip = ip.to_string();
            if !alt_names.contains(&ip) {
                alt_names.push(ip);
            }
        }
        Self {
            common_name: hostname.to_string(),
            alt_names,
        }
    }
}

/// Public summary of the certificate, safe to hand to the API and the
/// desktop surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub subject: String,
    pub subject_alt_names: Vec<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// SHA-256 of the DER certificate, colon-separated upper-case hex.
    pub fingerprint: String,
}

impl CertificateInfo {
    pub fn days_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_days()
    }
}

/// A loaded certificate and its private key.
pub struct Certificate {
    info: CertificateInfo,
    cert_pem: String,
    key_pem: String,
    cert_der: Vec<u8>,
    /// PKCS#8 v1 DER private key.
    key_der: Vec<u8>,
}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certificate")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

impl Certificate {
    pub fn info(&self) -> &CertificateInfo {
        &self.info
    }

    /// PEM certificate, as served to operators who want to trust it.
    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn cert_der(&self) -> &[u8] {
        &self.cert_der
    }

    pub fn private_key_der(&self) -> &[u8] {
        &self.key_der
    }

    /// Usable for `subject` at `now`: same CN, every requested SAN covered,
    /// and outside the renewal window.
    fn satisfies(
        &self,
        subject: &CertificateSubject,
        now: DateTime<Utc>,
        settings: &CertificateSettings,
    ) -> bool {
        if self.info.subject != subject.common_name {
            debug!(
                have = %self.info.subject,
                want = %subject.common_name,
                "certificate subject changed"
            );
            return false;
        }
        if let Some(missing) = subject
            .alt_names
            .iter()
            .find(|name| !self.info.subject_alt_names.contains(name))
        {
            debug!(missing = %missing, "certificate does not cover address");
            return false;
        }
        let renew_at = self.info.expires_at - Duration::days(i64::from(settings.renew_before_days));
        now < renew_at && now >= self.info.issued_at - Duration::minutes(5)
    }
}

/// Persisted, lazily generated certificate with a generate-once guarantee.
///
/// All callers go through one mutex, so concurrent `ensure_certificate`
/// calls observe a single generation per validity period.
pub struct CertificateStore {
    dir: PathBuf,
    settings: CertificateSettings,
    /// Single-flight guard and in-memory cache.
    current: Mutex<Option<Arc<Certificate>>>,
    generated: AtomicU32,
}

impl CertificateStore {
    pub fn new(dir: impl Into<PathBuf>, settings: CertificateSettings) -> Self {
        Self {
            dir: dir.into(),
            settings,
            current: Mutex::new(None),
            generated: AtomicU32::new(0),
        }
    }

    /// Directory holding the certificate files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the PEM certificate (for the operator's trust step).
    pub fn cert_path(&self) -> PathBuf {
        self.dir.join(CERT_FILE)
    }

    /// Number of certificates this store instance has generated.
    pub fn generated_count(&self) -> u32 {
        self.generated.load(Ordering::SeqCst)
    }

    /// Return the persisted certificate if it is present, unexpired, and
    /// issued to `subject`; otherwise generate, persist, and return a new one.
    ///
    /// Any failure is a `Configuration` error: the encrypted endpoint must
    /// not start without a certificate.
    #[instrument(skip_all, fields(subject = %subject.common_name))]
    pub fn ensure_certificate(&self, subject: &CertificateSubject) -> Result<Arc<Certificate>> {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Utc::now();

        if let Some(cert) = current.as_ref() {
            if cert.satisfies(subject, now, &self.settings) {
                return Ok(Arc::clone(cert));
            }
        }

        match self.load() {
            Ok(Some(cert)) if cert.satisfies(subject, now, &self.settings) => {
                info!(
                    fingerprint = %cert.info.fingerprint,
                    expires_at = %cert.info.expires_at,
                    "using existing certificate"
                );
                let cert = Arc::new(cert);
                *current = Some(Arc::clone(&cert));
                return Ok(cert);
            }
            Ok(Some(cert)) => {
                info!(
                    expires_at = %cert.info.expires_at,
                    "persisted certificate expired, near expiry, or issued for another subject"
                );
            }
            Ok(None) => debug!("no persisted certificate"),
            Err(e) => warn!(error = %e, "persisted certificate unreadable, regenerating"),
        }

        let cert = Arc::new(self.generate(subject, now)?);
        self.persist(&cert)?;
        self.generated.fetch_add(1, Ordering::SeqCst);
        info!(
            fingerprint = %cert.info.fingerprint,
            expires_at = %cert.info.expires_at,
            sans = ?cert.info.subject_alt_names,
            "certificate generated"
        );

        *current = Some(Arc::clone(&cert));
        Ok(cert)
    }

    /// Build a fresh self-signed certificate.
    fn generate(&self, subject: &CertificateSubject, now: DateTime<Utc>) -> Result<Certificate> {
        let key_der = generate_key_pkcs8()?;
        let key_pair = KeyPair::try_from(key_der.as_slice())
            .map_err(|e| cert_err(format!("key import failed: {e}")))?;

        let mut params = CertificateParams::new(subject.alt_names.clone())
            .map_err(|e| cert_err(format!("invalid subject alt name: {e}")))?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, subject.common_name.clone());
        dn.push(DnType::OrganizationName, APP_TITLE);
        params.distinguished_name = dn;

        let issued_at = now;
        let expires_at = now + Duration::days(i64::from(self.settings.validity_days));
        params.not_before = to_offset(issued_at)?;
        params.not_after = to_offset(expires_at)?;

        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| cert_err(format!("self-signing failed: {e}")))?;
        let cert_der = cert.der().to_vec();

        Ok(Certificate {
            cert_pem: cert.pem(),
            key_pem: key_pair.serialize_pem(),
            info: CertificateInfo {
                subject: subject.common_name.clone(),
                subject_alt_names: subject.alt_names.clone(),
                issued_at,
                expires_at,
                fingerprint: fingerprint(&cert_der),
            },
            cert_der,
            key_der,
        })
    }

    /// Write certificate, key, then metadata (commit marker).
    fn persist(&self, cert: &Certificate) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| cert_err(format!("create {}: {e}", self.dir.display())))?;

        let meta = serde_json::to_string_pretty(&cert.info)
            .map_err(|e| cert_err(format!("serialize metadata: {e}")))?;

        // Drop the marker first so a crash mid-write never pairs new files
        // with stale metadata.
        let meta_path = self.dir.join(META_FILE);
        if meta_path.exists() {
            std::fs::remove_file(&meta_path)
                .map_err(|e| cert_err(format!("remove {}: {e}", meta_path.display())))?;
        }

        write_atomic(&self.dir.join(CERT_FILE), cert.cert_pem.as_bytes(), false)?;
        write_atomic(&self.dir.join(KEY_FILE), cert.key_pem.as_bytes(), true)?;
        write_atomic(&meta_path, meta.as_bytes(), false)?;

        debug!(dir = %self.dir.display(), "certificate persisted");
        Ok(())
    }

    /// Load the persisted certificate, `None` if the store is empty.
    fn load(&self) -> Result<Option<Certificate>> {
        let meta_path = self.dir.join(META_FILE);
        if !meta_path.exists() {
            return Ok(None);
        }

        let meta = std::fs::read_to_string(&meta_path)?;
        let info: CertificateInfo = serde_json::from_str(&meta)?;

        let cert_pem = std::fs::read_to_string(self.dir.join(CERT_FILE))?;
        let key_pem = std::fs::read_to_string(self.dir.join(KEY_FILE))?;

        let cert = CertificateDer::from_pem_slice(cert_pem.as_bytes())
            .map_err(|e| cert_err(format!("parse {CERT_FILE}: {e}")))?;
        let key = PrivateKeyDer::from_pem_slice(key_pem.as_bytes())
            .map_err(|e| cert_err(format!("parse {KEY_FILE}: {e}")))?;
        let key_der = match key {
            PrivateKeyDer::Pkcs8(key) => key.secret_pkcs8_der().to_vec(),
            _ => return Err(cert_err("private key is not PKCS#8".into())),
        };

        let cert_der = cert.as_ref().to_vec();
        if fingerprint(&cert_der) != info.fingerprint {
            return Err(cert_err("certificate does not match its metadata".into()));
        }

        Ok(Some(Certificate {
            info,
            cert_pem,
            key_pem,
            cert_der,
            key_der,
        }))
    }
}

/// Generate a fresh ECDSA P-256 key pair using the OS CSPRNG, returned as
/// a PKCS#8 v1 DER document.
fn generate_key_pkcs8() -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng)
        .map_err(|e| cert_err(format!("key generation failed: {e}")))?;
    Ok(pkcs8.as_ref().to_vec())
}

fn to_offset(at: DateTime<Utc>) -> Result<time::OffsetDateTime> {
    time::OffsetDateTime::from_unix_timestamp(at.timestamp())
        .map_err(|e| cert_err(format!("timestamp out of range: {e}")))
}

fn write_atomic(path: &Path, data: &[u8], private: bool) -> Result<()> {
    use std::io::Write;

    let tmp = match path.extension() {
        Some(ext) => path.with_extension(format!("{}.tmp", ext.to_string_lossy())),
        None => path.with_extension("tmp"),
    };
    // A leftover temp file would keep its old mode; start from a new inode.
    match std::fs::remove_file(&tmp) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(cert_err(format!("remove {}: {e}", tmp.display()))),
    }

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    // The key is 0600 from the moment it exists.
    #[cfg(unix)]
    if private {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    #[cfg(not(unix))]
    let _ = private;

    let mut file = options
        .open(&tmp)
        .map_err(|e| cert_err(format!("create {}: {e}", tmp.display())))?;
    file.write_all(data)
        .and_then(|()| file.sync_all())
        .map_err(|e| cert_err(format!("write {}: {e}", tmp.display())))?;
    drop(file);

    std::fs::rename(&tmp, path).map_err(|e| cert_err(format!("rename {}: {e}", path.display())))
}

fn cert_err(detail: String) -> PrintflowError {
    PrintflowError::Configuration(format!("certificate: {detail}"))
}
