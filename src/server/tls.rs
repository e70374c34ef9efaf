//! TLS acceptor construction

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsAcceptor;
use tracing::info;

use crate::config::TlsConfig;
use crate::{BloatError, Result};

/// ALPN identifier for HTTP/2
pub const ALPN_H2: &[u8] = b"h2";

/// ALPN identifier for HTTP/1.1
pub const ALPN_HTTP11: &[u8] = b"http/1.1";

/// Load PEM material and build an acceptor
///
/// HTTP/2 is advertised through ALPN only when `http2` is set.
///
/// # Errors
///
/// Returns `Tls` if the files are unreadable, contain no usable
/// certificate or key, or do not form a valid pair
pub fn load_acceptor(config: &TlsConfig, http2: bool) -> Result<TlsAcceptor> {
    let certs = load_certs(&config.cert_path)?;
    let key = load_key(&config.key_path)?;

    let mut server_config =
        rustls::ServerConfig::builder_with_provider(rustls::crypto::ring::default_provider().into())
            .with_safe_default_protocol_versions()
            .map_err(|e| BloatError::Tls(format!("Unsupported protocol versions: {e}")))?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| BloatError::Tls(format!("Invalid certificate or key: {e}")))?;

    server_config.alpn_protocols = if http2 {
        vec![ALPN_H2.to_vec(), ALPN_HTTP11.to_vec()]
    } else {
        vec![ALPN_HTTP11.to_vec()]
    };

    info!(
        "Loaded TLS certificate from {} (HTTP/2 {})",
        config.cert_path.display(),
        if http2 { "enabled" } else { "disabled" }
    );

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| BloatError::Tls(format!("Failed to open {}: {e}", path.display())))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| BloatError::Tls(format!("Failed to parse {}: {e}", path.display())))?;

    if certs.is_empty() {
        return Err(BloatError::Tls(format!(
            "No certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| BloatError::Tls(format!("Failed to parse {}: {e}", path.display())))?
        .ok_or_else(|| BloatError::Tls(format!("No private key found in {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn pem_files() -> (NamedTempFile, NamedTempFile) {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();

        let mut cert = NamedTempFile::new().unwrap();
        cert.write_all(certified.cert.pem().as_bytes()).unwrap();
        let mut key = NamedTempFile::new().unwrap();
        key.write_all(certified.key_pair.serialize_pem().as_bytes())
            .unwrap();

        (cert, key)
    }

    #[test]
    fn test_load_acceptor() {
        let (cert, key) = pem_files();
        let config = TlsConfig {
            cert_path: cert.path().to_path_buf(),
            key_path: key.path().to_path_buf(),
        };

        assert!(load_acceptor(&config, true).is_ok());
        assert!(load_acceptor(&config, false).is_ok());
    }

    #[test]
    fn test_missing_files() {
        let config = TlsConfig {
            cert_path: "/nonexistent/cert.pem".into(),
            key_path: "/nonexistent/key.pem".into(),
        };

        let err = load_acceptor(&config, false).err().expect("expected error");
        assert_eq!(err.kind(), "tls");
    }

    #[test]
    fn test_key_file_without_key() {
        let (cert, _key) = pem_files();
        let config = TlsConfig {
            cert_path: cert.path().to_path_buf(),
            key_path: cert.path().to_path_buf(),
        };

        let err = load_acceptor(&config, false).err().expect("expected error");
        assert!(err.to_string().contains("No private key"));
    }

    #[test]
    fn test_cert_file_without_cert() {
        let (_cert, key) = pem_files();
        let config = TlsConfig {
            cert_path: key.path().to_path_buf(),
            key_path: key.path().to_path_buf(),
        };

        let err = load_acceptor(&config, false).err().expect("expected error");
        assert!(err.to_string().contains("No certificates"));
    }
}
