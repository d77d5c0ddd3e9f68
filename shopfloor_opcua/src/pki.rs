//! Self-signed certificate provisioning for the OPC UA endpoint.
//!
//! Certificates persist at `<pki_dir>/server.crt` and `<pki_dir>/server.key`
//! and are reused across restarts; the key pair is regenerated only when the
//! certificate file is missing.

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SanType};
use std::path::Path;
use thiserror::Error;
use tracing::info;

pub const CERT_FILE: &str = "server.crt";
pub const KEY_FILE: &str = "server.key";

#[derive(Debug, Error)]
pub enum PkiError {
    #[error("certificate generation failed: {0}")]
    Generation(String),

    #[error("pki io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Create the PKI directory and a self-signed certificate if none exists.
pub fn ensure_pki(pki_dir: &Path, application_name: &str) -> Result<(), PkiError> {
    let cert_path = pki_dir.join(CERT_FILE);
    let key_path = pki_dir.join(KEY_FILE);

    if cert_path.exists() {
        info!(cert = %cert_path.display(), "using existing PKI certificates");
        return Ok(());
    }

    info!("generating self-signed certificates for OPC UA server");
    std::fs::create_dir_all(pki_dir)?;

    let key_pair =
        KeyPair::generate().map_err(|e| PkiError::Generation(e.to_string()))?;

    let mut params = CertificateParams::new(vec![
        "localhost".to_string(),
        application_name.to_string(),
        "shopfloor-simulator".to_string(),
    ])
    .map_err(|e| PkiError::Generation(e.to_string()))?;

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, application_name);
    dn.push(DnType::OrganizationName, "Shopfloor Simulator");
    params.distinguished_name = dn;
    params
        .subject_alt_names
        .push(SanType::IpAddress(std::net::IpAddr::from([127, 0, 0, 1])));

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| PkiError::Generation(e.to_string()))?;

    std::fs::write(&cert_path, cert.pem())?;
    std::fs::write(&key_path, key_pair.serialize_pem())?;

    info!(
        cert = %cert_path.display(),
        key = %key_path.display(),
        "self-signed certificates generated"
    );
    Ok(())
}
