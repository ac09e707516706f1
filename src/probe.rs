//! TLS 1.2/1.3 capability probe.

use crate::config::ScanConfig;
use crate::error::{Result, ScanError};
use crate::types::{ProbeOutcome, ProbeTarget};
use async_trait::async_trait;
use native_tls::{Certificate, Protocol};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time;
use tokio_native_tls::{TlsConnector, TlsStream};
use tracing::{debug, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Anything that can turn a target into a pass/fail verdict.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, target: &ProbeTarget) -> ProbeOutcome;
}

#[derive(Debug, Error)]
enum HandshakeError {
    #[error("connect failed: {0}")]
    Connect(#[from] std::io::Error),
    #[error("handshake failed: {0}")]
    Tls(#[from] native_tls::Error),
}

/// Probes over real sockets with certificate verification on and a TLS 1.2 floor.
#[derive(Clone)]
pub struct TlsProbe {
    connector: TlsConnector,
    timeout: Duration,
    extra_roots: Vec<Certificate>,
    reachability: Option<reqwest::Client>,
}

impl TlsProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::with_roots(timeout, Vec::new())
    }

    /// Trust `extra_roots` in addition to the system store.
    pub fn with_roots(timeout: Duration, extra_roots: Vec<Certificate>) -> Result<Self> {
        let mut builder = native_tls::TlsConnector::builder();
        builder.min_protocol_version(Some(Protocol::Tlsv12));
        for root in &extra_roots {
            builder.add_root_certificate(root.clone());
        }
        let connector = builder.build()?;
        Ok(Self {
            connector: TlsConnector::from(connector),
            timeout,
            extra_roots,
            reachability: None,
        })
    }

    /// Require an HTTPS GET answering below 400 before the handshake is attempted.
    pub fn with_reachability_precheck(mut self) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .redirect(reqwest::redirect::Policy::limited(10));
        for root in &self.extra_roots {
            builder = builder.add_root_certificate(reqwest::Certificate::from_der(&root.to_der()?)?);
        }
        self.reachability = Some(builder.build()?);
        Ok(self)
    }

    pub fn from_config(config: &ScanConfig) -> Result<Self> {
        let roots = match &config.ca_file {
            Some(path) => vec![load_pem_certificate(path)?],
            None => Vec::new(),
        };
        let probe = Self::with_roots(config.timeout, roots)?;
        if config.reachability_precheck {
            probe.with_reachability_precheck()
        } else {
            Ok(probe)
        }
    }

    async fn handshake(&self, target: &ProbeTarget) -> std::result::Result<TlsStream<TcpStream>, HandshakeError> {
        let tcp = TcpStream::connect((target.host.as_str(), target.port)).await?;
        let tls = self.connector.connect(&target.host, tcp).await?;
        Ok(tls)
    }

    async fn is_reachable(&self, client: &reqwest::Client, target: &ProbeTarget) -> bool {
        let url = if target.port == ProbeTarget::DEFAULT_PORT {
            format!("https://{}/", target.host)
        } else {
            format!("https://{}:{}/", target.host, target.port)
        };
        match client.get(&url).send().await {
            Ok(resp) => {
                let status = resp.status();
                if status.as_u16() >= 400 {
                    debug!(%target, %status, "reachability check returned error status");
                }
                status.as_u16() < 400
            }
            Err(e) => {
                debug!(%target, error = %e, "reachability check failed");
                false
            }
        }
    }
}

#[async_trait]
impl Prober for TlsProbe {
    async fn probe(&self, target: &ProbeTarget) -> ProbeOutcome {
        if let Some(client) = &self.reachability {
            if !self.is_reachable(client, target).await {
                warn!(%target, "host unreachable, skipping TLS probe");
                return ProbeOutcome::Failing;
            }
        }

        match time::timeout(self.timeout, self.handshake(target)).await {
            Ok(Ok(stream)) => {
                log_peer_certificate(target, &stream);
                drop(stream);
                ProbeOutcome::Passing
            }
            Ok(Err(e)) => {
                warn!(%target, error = %e, "TLS check failed");
                ProbeOutcome::Failing
            }
            Err(_) => {
                warn!(%target, timeout_ms = self.timeout.as_millis() as u64, "TLS check timed out");
                ProbeOutcome::Failing
            }
        }
    }
}

fn load_pem_certificate(path: &Path) -> Result<Certificate> {
    let pem = std::fs::read(path)
        .map_err(|e| ScanError::Config(format!("failed to read CA file {}: {e}", path.display())))?;
    Ok(Certificate::from_pem(&pem)?)
}

fn log_peer_certificate(target: &ProbeTarget, stream: &TlsStream<TcpStream>) {
    let der = match stream.get_ref().peer_certificate() {
        Ok(Some(cert)) => match cert.to_der() {
            Ok(der) => der,
            Err(_) => return,
        },
        _ => return,
    };
    match x509_parser::parse_x509_certificate(&der) {
        Ok((_, cert)) => debug!(
            %target,
            subject = %cert.subject(),
            not_after = %cert.validity().not_after,
            "TLS handshake succeeded"
        ),
        Err(e) => debug!(%target, error = %e, "TLS handshake succeeded; leaf certificate unparseable"),
    }
}
