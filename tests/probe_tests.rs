use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use native_tls::{Certificate, Identity, Protocol, TlsAcceptor};
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair, KeyUsagePurpose};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use tls_checker_rs::probe::{Prober, TlsProbe};
use tls_checker_rs::types::{ProbeOutcome, ProbeTarget};

const TIMEOUT: Duration = Duration::from_secs(5);

/// A throwaway CA and a `localhost` leaf it signed.
struct TestPki {
    ca: Certificate,
    identity: Identity,
}

fn test_pki() -> TestPki {
    let now = time::OffsetDateTime::now_utc();

    let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    ca_params.distinguished_name.push(DnType::CommonName, "tls-checker test CA");
    ca_params.not_before = now - time::Duration::days(1);
    ca_params.not_after = now + time::Duration::days(30);
    let ca_key = KeyPair::generate().unwrap();
    let ca_cert = ca_params.self_signed(&ca_key).unwrap();

    let mut leaf_params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
    leaf_params.distinguished_name.push(DnType::CommonName, "localhost");
    leaf_params.not_before = now - time::Duration::days(1);
    leaf_params.not_after = now + time::Duration::days(30);
    let leaf_key = KeyPair::generate().unwrap();
    let leaf = leaf_params.signed_by(&leaf_key, &ca_cert, &ca_key).unwrap();

    TestPki {
        ca: Certificate::from_pem(ca_cert.pem().as_bytes()).unwrap(),
        identity: Identity::from_pkcs8(leaf.pem().as_bytes(), leaf_key.serialize_pem().as_bytes())
            .unwrap(),
    }
}

fn modern_acceptor(pki: &TestPki) -> TlsAcceptor {
    TlsAcceptor::builder(pki.identity.clone()).build().unwrap()
}

/// Serve TLS on an ephemeral port and count accepted connections.
///
/// HTTP requests to `/` get `root_status` (302 redirects to `/landing`, which
/// answers 200). Connections that only handshake are closed quietly.
async fn spawn_tls_server(acceptor: TlsAcceptor, root_status: u16) -> (u16, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let acceptor = tokio_native_tls::TlsAcceptor::from(acceptor);
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();

    tokio::spawn(async move {
        while let Ok((sock, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let Ok(mut tls) = acceptor.accept(sock).await else {
                    return;
                };
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match tls.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                let request = String::from_utf8_lossy(&head);
                let response = if request.starts_with("GET /landing ") {
                    "HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n".to_string()
                } else if root_status == 302 {
                    "HTTP/1.1 302 Found\r\nlocation: /landing\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                        .to_string()
                } else {
                    format!("HTTP/1.1 {root_status} Status\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                };
                let _ = tls.write_all(response.as_bytes()).await;
                let _ = tls.shutdown().await;
            });
        }
    });
    (port, accepted)
}

fn localhost(port: u16) -> ProbeTarget {
    ProbeTarget::new("localhost", Some(port))
}

#[tokio::test]
async fn untrusted_issuer_fails() {
    let pki = test_pki();
    let (port, accepted) = spawn_tls_server(modern_acceptor(&pki), 200).await;

    let probe = TlsProbe::new(TIMEOUT).unwrap();
    assert_eq!(probe.probe(&localhost(port)).await, ProbeOutcome::Failing);
    assert!(accepted.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn trusted_root_passes() {
    let pki = test_pki();
    let (port, _) = spawn_tls_server(modern_acceptor(&pki), 200).await;

    let probe = TlsProbe::with_roots(TIMEOUT, vec![pki.ca.clone()]).unwrap();
    assert_eq!(probe.probe(&localhost(port)).await, ProbeOutcome::Passing);
}

#[tokio::test]
async fn hostname_mismatch_fails_even_when_trusted() {
    let pki = test_pki();
    let (port, _) = spawn_tls_server(modern_acceptor(&pki), 200).await;

    // The leaf only names `localhost`.
    let probe = TlsProbe::with_roots(TIMEOUT, vec![pki.ca.clone()]).unwrap();
    let target = ProbeTarget::new("127.0.0.1", Some(port));
    assert_eq!(probe.probe(&target).await, ProbeOutcome::Failing);
}

#[tokio::test]
async fn tls10_only_server_fails_even_when_trusted() {
    let pki = test_pki();
    let acceptor = TlsAcceptor::builder(pki.identity.clone())
        .min_protocol_version(Some(Protocol::Tlsv10))
        .max_protocol_version(Some(Protocol::Tlsv10))
        .build()
        .unwrap();
    let (port, _) = spawn_tls_server(acceptor, 200).await;

    let probe = TlsProbe::with_roots(TIMEOUT, vec![pki.ca.clone()]).unwrap();
    assert_eq!(probe.probe(&localhost(port)).await, ProbeOutcome::Failing);
}

#[tokio::test]
async fn error_status_fails_before_any_handshake() {
    let pki = test_pki();
    let (port, accepted) = spawn_tls_server(modern_acceptor(&pki), 500).await;

    let probe = TlsProbe::with_roots(TIMEOUT, vec![pki.ca.clone()])
        .unwrap()
        .with_reachability_precheck()
        .unwrap();
    assert_eq!(probe.probe(&localhost(port)).await, ProbeOutcome::Failing);
    // Only the HTTP request connected; the TLS check never ran.
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn status_400_counts_as_unreachable() {
    let pki = test_pki();
    let (port, accepted) = spawn_tls_server(modern_acceptor(&pki), 400).await;

    let probe = TlsProbe::with_roots(TIMEOUT, vec![pki.ca.clone()])
        .unwrap()
        .with_reachability_precheck()
        .unwrap();
    assert_eq!(probe.probe(&localhost(port)).await, ProbeOutcome::Failing);
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn redirect_is_followed_before_the_handshake() {
    let pki = test_pki();
    let (port, accepted) = spawn_tls_server(modern_acceptor(&pki), 302).await;

    let probe = TlsProbe::with_roots(TIMEOUT, vec![pki.ca.clone()])
        .unwrap()
        .with_reachability_precheck()
        .unwrap();
    assert_eq!(probe.probe(&localhost(port)).await, ProbeOutcome::Passing);
    assert!(accepted.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
#[ignore = "requires network access"]
async fn legacy_protocols_fail_live() {
    let probe = TlsProbe::new(Duration::from_secs(10)).unwrap();
    for (host, port) in [("tls-v1-0.badssl.com", 1010), ("tls-v1-1.badssl.com", 1011)] {
        let outcome = probe.probe(&ProbeTarget::new(host, Some(port))).await;
        assert_eq!(outcome, ProbeOutcome::Failing, "{host}");
    }
}

#[tokio::test]
#[ignore = "requires network access"]
async fn tls12_host_passes_live() {
    let probe = TlsProbe::new(Duration::from_secs(10)).unwrap();
    let outcome = probe.probe(&ProbeTarget::new("tls-v1-2.badssl.com", Some(1012))).await;
    assert_eq!(outcome, ProbeOutcome::Passing);
}

#[tokio::test]
#[ignore = "requires network access"]
async fn untrusted_certificates_fail_live() {
    let probe = TlsProbe::new(Duration::from_secs(10)).unwrap();
    for host in ["expired.badssl.com", "self-signed.badssl.com", "wrong.host.badssl.com"] {
        let outcome = probe.probe(&ProbeTarget::new(host, None)).await;
        assert_eq!(outcome, ProbeOutcome::Failing, "{host}");
    }
}
