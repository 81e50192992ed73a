//! TLS termination for the edge.
//!
//! Certificates are issued and renewed by an external ACME client (webroot
//! mode, see `acme.rs`) which rewrites the PEM files in place. [`CertStore`]
//! re-reads them on an interval so renewals take effect without a restart.

use axum::extract::connect_info::Connected;
use axum::serve::{IncomingStream, Listener};
use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::fs::File;
use std::io::{self, BufReader};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;
use tracing::{debug, info, warn};

use crate::config::TlsConfig;
use crate::error::StackError;
use crate::middleware::PeerAddr;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const PENDING_CONNECTIONS: usize = 256;

/// Build a rustls server config from PEM files (ring provider).
pub fn load_server_config(cert_path: &Path, key_path: &Path) -> Result<Arc<ServerConfig>, StackError> {
    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
            .collect::<Result<_, _>>()?;
    if certs.is_empty() {
        return Err(StackError::Tls(format!(
            "no certificates found in {}",
            cert_path.display()
        )));
    }

    let key: PrivateKeyDer<'static> =
        rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?.ok_or_else(
            || StackError::Tls(format!("no private key found in {}", key_path.display())),
        )?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| StackError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| StackError::Tls(e.to_string()))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

/// Current certificate, swappable while connections are being accepted.
pub struct CertStore {
    cert_path: PathBuf,
    key_path: PathBuf,
    current: RwLock<Arc<ServerConfig>>,
}

impl CertStore {
    pub fn load(tls: &TlsConfig) -> Result<Arc<Self>, StackError> {
        let config = load_server_config(&tls.cert_path, &tls.key_path)?;
        info!(cert = %tls.cert_path.display(), "TLS certificate loaded");
        Ok(Arc::new(Self {
            cert_path: tls.cert_path.clone(),
            key_path: tls.key_path.clone(),
            current: RwLock::new(config),
        }))
    }

    pub fn acceptor(&self) -> TlsAcceptor {
        let config = self
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        TlsAcceptor::from(config)
    }

    /// Re-read the PEM files. On failure the previous certificate stays.
    pub fn reload(&self) -> Result<(), StackError> {
        let config = load_server_config(&self.cert_path, &self.key_path)?;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = config;
        Ok(())
    }

    pub fn spawn_reloader(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.tick().await;
            loop {
                tick.tick().await;
                let store = self.clone();
                match tokio::task::spawn_blocking(move || store.reload()).await {
                    Ok(Ok(())) => info!(cert = %self.cert_path.display(), "TLS certificate reloaded"),
                    Ok(Err(e)) => warn!(error = %e, "TLS reload failed; keeping previous certificate"),
                    Err(e) => warn!(error = %e, "TLS reload task panicked"),
                }
            }
        })
    }
}

/// Listener handing completed TLS sessions to `axum::serve`. Handshakes
/// run on their own tasks so a slow client cannot stall the accept loop.
pub struct TlsListener {
    incoming: mpsc::Receiver<(TlsStream<TcpStream>, SocketAddr)>,
    local_addr: SocketAddr,
}

impl TlsListener {
    pub async fn bind(addr: SocketAddr, certs: Arc<CertStore>) -> io::Result<Self> {
        let tcp = TcpListener::bind(addr).await?;
        let local_addr = tcp.local_addr()?;
        let (tx, incoming) = mpsc::channel(PENDING_CONNECTIONS);
        tokio::spawn(accept_loop(tcp, certs, tx));
        Ok(Self {
            incoming,
            local_addr,
        })
    }
}

async fn accept_loop(
    tcp: TcpListener,
    certs: Arc<CertStore>,
    tx: mpsc::Sender<(TlsStream<TcpStream>, SocketAddr)>,
) {
    loop {
        let (stream, peer) = match tcp.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "TLS listener accept failed");
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
        };
        if tx.is_closed() {
            break;
        }

        let acceptor = certs.acceptor();
        let tx = tx.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
                Ok(Ok(tls)) => {
                    let _ = tx.send((tls, peer)).await;
                }
                Ok(Err(e)) => debug!(%peer, error = %e, "TLS handshake failed"),
                Err(_) => debug!(%peer, "TLS handshake timed out"),
            }
        });
    }
}

impl Listener for TlsListener {
    type Io = TlsStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self.incoming.recv().await {
            Some(conn) => conn,
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}

impl Connected<IncomingStream<'_, TlsListener>> for PeerAddr {
    fn connect_info(stream: IncomingStream<'_, TlsListener>) -> Self {
        PeerAddr(*stream.remote_addr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::pki_types::ServerName;
    use tokio_rustls::TlsConnector;

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures/tls")
            .join(name)
    }

    fn pem_certs(path: &Path) -> Vec<CertificateDer<'static>> {
        rustls_pemfile::certs(&mut BufReader::new(File::open(path).unwrap()))
            .collect::<Result<_, _>>()
            .unwrap()
    }

    fn client_config() -> Arc<rustls::ClientConfig> {
        let mut roots = rustls::RootCertStore::empty();
        for ca in pem_certs(&fixture("ca.pem")) {
            roots.add(ca).unwrap();
        }
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        Arc::new(
            rustls::ClientConfig::builder_with_provider(provider)
                .with_safe_default_protocol_versions()
                .unwrap()
                .with_root_certificates(roots)
                .with_no_client_auth(),
        )
    }

    /// Complete a handshake against the store's current acceptor and
    /// return the leaf certificate the client was shown.
    async fn served_leaf(certs: &CertStore) -> CertificateDer<'static> {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let connector = TlsConnector::from(client_config());
        let name = ServerName::try_from("localhost").unwrap();
        let acceptor = certs.acceptor();
        let (client, server) = tokio::join!(
            connector.connect(name, client_io),
            acceptor.accept(server_io)
        );
        if let Err(e) = server {
            panic!("server handshake failed: {e}");
        }
        let client = client.unwrap_or_else(|e| panic!("client handshake failed: {e}"));
        client.get_ref().1.peer_certificates().unwrap()[0].clone()
    }

    fn install(dir: &Path, leaf: &str) -> TlsConfig {
        let cfg = TlsConfig {
            cert_path: dir.join("fullchain.pem"),
            key_path: dir.join("privkey.pem"),
            reload_interval_secs: 60,
        };
        std::fs::copy(fixture(&format!("{leaf}.pem")), &cfg.cert_path).unwrap();
        std::fs::copy(fixture(&format!("{leaf}.key")), &cfg.key_path).unwrap();
        cfg
    }

    #[test]
    fn valid_pem_pair_loads() {
        let config = load_server_config(&fixture("leaf-a.pem"), &fixture("leaf-a.key"))
            .expect("fixture pair loads");
        assert_eq!(config.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[tokio::test]
    async fn reload_picks_up_renewed_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = install(dir.path(), "leaf-a");
        let certs = CertStore::load(&cfg).unwrap();
        assert_eq!(served_leaf(&certs).await, pem_certs(&fixture("leaf-a.pem"))[0]);

        install(dir.path(), "leaf-b");
        certs.reload().expect("renewed pair reloads");
        assert_eq!(served_leaf(&certs).await, pem_certs(&fixture("leaf-b.pem"))[0]);
    }

    #[tokio::test]
    async fn failed_reload_keeps_previous_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = install(dir.path(), "leaf-a");
        let certs = CertStore::load(&cfg).unwrap();

        std::fs::write(&cfg.cert_path, "-----BEGIN CERTIFICATE-----\ntruncated\n").unwrap();
        std::fs::write(&cfg.key_path, "").unwrap();
        assert!(certs.reload().is_err());

        assert_eq!(served_leaf(&certs).await, pem_certs(&fixture("leaf-a.pem"))[0]);
    }

    #[test]
    fn missing_pem_files_fail_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("fullchain.pem");
        let key = dir.path().join("privkey.pem");
        assert!(matches!(
            load_server_config(&cert, &key),
            Err(StackError::Io(_))
        ));

        std::fs::write(&cert, "not a pem\n").unwrap();
        std::fs::write(&key, "").unwrap();
        assert!(matches!(
            load_server_config(&cert, &key),
            Err(StackError::Tls(_))
        ));
    }
}
