//! Server-side TLS setup.
//!
//! With `VIDALINK_RELAY_CERT` / `VIDALINK_RELAY_KEY` configured the relay
//! serves the operator's PEM pair; otherwise it generates a fresh self-signed
//! certificate at startup. Clients accept either trust-on-first-use.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tracing::info;
use vidalink_core::RelayConfig;

/// Build the TLS acceptor configuration for the relay listener.
pub fn server_config(config: &RelayConfig) -> anyhow::Result<Arc<rustls::ServerConfig>> {
    // Install ring crypto provider (ignored if already installed)
    let _ = rustls::crypto::ring::default_provider().install_default();

    let (certs, key) = match (&config.cert_path, &config.key_path) {
        (Some(cert_path), Some(key_path)) => load_pem(cert_path, key_path)?,
        _ => self_signed()?,
    };

    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("building TLS server config")?;
    Ok(Arc::new(server_config))
}

fn load_pem(
    cert_path: &Path,
    key_path: &Path,
) -> anyhow::Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let mut cert_reader = BufReader::new(
        File::open(cert_path)
            .with_context(|| format!("opening certificate {}", cert_path.display()))?,
    );
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<_, _>>()
        .with_context(|| format!("parsing certificate {}", cert_path.display()))?;
    if certs.is_empty() {
        anyhow::bail!("No certificates in {}", cert_path.display());
    }

    let mut key_reader = BufReader::new(
        File::open(key_path).with_context(|| format!("opening key {}", key_path.display()))?,
    );
    let key = rustls_pemfile::private_key(&mut key_reader)
        .with_context(|| format!("parsing key {}", key_path.display()))?
        .with_context(|| format!("no private key in {}", key_path.display()))?;

    info!("Loaded TLS certificate from {}", cert_path.display());
    Ok((certs, key))
}

fn self_signed() -> anyhow::Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let rcgen::CertifiedKey { cert, key_pair } = rcgen::generate_simple_self_signed(vec![
        "vidalink-relay".to_owned(),
        "localhost".to_owned(),
    ])
    .context("generating self-signed certificate")?;

    let cert_der = cert.der().clone();
    let key_der = PrivateKeyDer::Pkcs8(key_pair.serialize_der().into());

    info!("Generated self-signed TLS certificate (TOFU)");
    Ok((vec![cert_der], key_der))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_signed_yields_usable_server_config() {
        let config = RelayConfig::default();
        let server_config = server_config(&config).unwrap();
        assert!(server_config.alpn_protocols.is_empty());
    }
}
