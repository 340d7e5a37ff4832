//! TLS is the "external collaborator" described in spec §1: the wire
//! listener only ever needs an `AsyncRead + AsyncWrite` stream, so
//! certificate/key loading and the `rustls::ServerConfig` it produces live
//! here, wholly outside request handling.

use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use ridgeline_common::error::NetworkError;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsAcceptor;

/// Build a `TlsAcceptor` from a PEM certificate chain and private key file,
/// the same `tls_cert_path`/`tls_key_path` pair the teacher's
/// `SecurityConfig` names.
pub fn load_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, NetworkError> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| NetworkError::TlsError(e.to_string()))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, NetworkError> {
    let file = std::fs::File::open(path).map_err(|e| NetworkError::TlsError(e.to_string()))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| NetworkError::TlsError(e.to_string()))
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, NetworkError> {
    let file = std::fs::File::open(path).map_err(|e| NetworkError::TlsError(e.to_string()))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| NetworkError::TlsError(e.to_string()))?
        .ok_or_else(|| NetworkError::TlsError(format!("no private key found in {}", path.display())))
}
