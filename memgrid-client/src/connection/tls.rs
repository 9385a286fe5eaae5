//! TLS client setup for member connections.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, ServerName};
use rustls::RootCertStore;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

use memgrid_core::{GridError, Result};

use crate::config::TlsConfig;

/// Builds rustls connectors from client TLS settings.
#[derive(Clone)]
pub struct TlsConnector {
    inner: tokio_rustls::TlsConnector,
    server_name: Option<String>,
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector")
            .field("server_name", &self.server_name)
            .finish()
    }
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| {
        GridError::Configuration(format!("network.tls: cannot open {}: {}", path.display(), e))
    })?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(file))
        .filter_map(|r| r.ok())
        .collect();
    if certs.is_empty() {
        return Err(GridError::Configuration(format!(
            "network.tls: no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

impl TlsConnector {
    /// Builds a connector. Without a CA file the web PKI roots are trusted.
    pub fn new(config: &TlsConfig) -> Result<Self> {
        let mut roots = RootCertStore::empty();
        match config.ca_cert_path() {
            Some(ca_path) => {
                for cert in load_certs(ca_path)? {
                    roots.add(cert).map_err(|e| {
                        GridError::Configuration(format!("network.tls: invalid CA certificate: {}", e))
                    })?;
                }
            }
            None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
        }

        let builder = rustls::ClientConfig::builder().with_root_certificates(roots);
        let client_config = match (config.client_cert_path(), config.client_key_path()) {
            (Some(cert_path), Some(key_path)) => {
                let certs = load_certs(cert_path)?;
                let key_file = File::open(key_path).map_err(|e| {
                    GridError::Configuration(format!(
                        "network.tls: cannot open {}: {}",
                        key_path.display(),
                        e
                    ))
                })?;
                let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
                    .map_err(|e| {
                        GridError::Configuration(format!("network.tls: invalid private key: {}", e))
                    })?
                    .ok_or_else(|| {
                        GridError::Configuration("network.tls: no private key found".to_string())
                    })?;
                builder.with_client_auth_cert(certs, key).map_err(|e| {
                    GridError::Configuration(format!("network.tls: client certificate rejected: {}", e))
                })?
            }
            _ => builder.with_no_client_auth(),
        };

        Ok(Self {
            inner: tokio_rustls::TlsConnector::from(Arc::new(client_config)),
            server_name: config.server_name().map(str::to_string),
        })
    }

    /// Runs the TLS handshake over an established TCP stream.
    pub async fn connect(&self, host: &str, stream: TcpStream) -> Result<TlsStream<TcpStream>> {
        let name = self.server_name.as_deref().unwrap_or(host).to_string();
        let server_name = ServerName::try_from(name.clone()).map_err(|e| {
            GridError::Configuration(format!("network.tls: invalid server name '{}': {}", name, e))
        })?;

        self.inner
            .connect(server_name, stream)
            .await
            .map_err(|e| GridError::Connection(format!("TLS handshake with {} failed: {}", host, e)))
    }
}
