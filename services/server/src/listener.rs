// TLS listener for the HTTPS bind address, pluggable into axum's serve
// loop alongside the plain TCP and unix listeners.
use anyhow::{Context, Result};
use axum::serve::Listener;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig as RustlsConfig;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

pub struct TlsListener {
    inner: TcpListener,
    acceptor: TlsAcceptor,
}

impl TlsListener {
    pub async fn bind(addr: SocketAddr, cert_file: &Path, key_file: &Path) -> Result<Self> {
        let config = build_rustls_config(cert_file, key_file)?;
        let inner = TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind https listener: {addr}"))?;
        Ok(Self {
            inner,
            acceptor: TlsAcceptor::from(Arc::new(config)),
        })
    }
}

fn build_rustls_config(cert_file: &Path, key_file: &Path) -> Result<RustlsConfig> {
    let certs = load_certs(cert_file)?;
    let key = load_key(key_file)?;
    RustlsConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .with_context(|| "build tls config")
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let pem = std::fs::read(path).with_context(|| format!("read cert-file: {}", path.display()))?;
    let certs = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<io::Result<Vec<_>>>()
        .with_context(|| "parse cert-file")?;
    anyhow::ensure!(!certs.is_empty(), "cert-file contains no certificates");
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let pem = std::fs::read(path).with_context(|| format!("read key-file: {}", path.display()))?;
    rustls_pemfile::private_key(&mut pem.as_slice())
        .with_context(|| "parse key-file")?
        .ok_or_else(|| anyhow::anyhow!("key-file contains no private key"))
}

impl Listener for TlsListener {
    type Io = TlsStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        // Failed handshakes are not fatal; keep accepting.
        loop {
            let (stream, addr) = match self.inner.accept().await {
                Ok(conn) => conn,
                Err(err) => {
                    tracing::debug!(error = %err, "tcp accept failed");
                    continue;
                }
            };
            match self.acceptor.accept(stream).await {
                Ok(tls) => return (tls, addr),
                Err(err) => {
                    tracing::debug!(peer = %addr, error = %err, "tls handshake failed");
                }
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        self.inner.local_addr()
    }
}
