//! Notifications against a real TLS listener signed by a private CA.

use bitbucket_notifier::credentials::CredentialEntry;
use bitbucket_notifier::logging::BuildConsole;
use bitbucket_notifier::{
    Build, BuildData, BuildState, GlobalSettings, HostEnvironment, Notifier, NotifierConfig,
};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Once};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

const CA_CERT: &[u8] = include_bytes!("fixtures/tls/ca.pem");
const SERVER_CERT: &[u8] = include_bytes!("fixtures/tls/server.pem");
const SERVER_KEY: &[u8] = include_bytes!("fixtures/tls/server.key");
const KEYSTORE_PASSWORD: &str = "changeit";

static CRYPTO_INIT: Once = Once::new();

fn init_crypto() {
    CRYPTO_INIT.call_once(|| {
        rustls::crypto::ring::default_provider()
            .install_default()
            .expect("failed to install crypto provider");
    });
}

/// A Bitbucket stand-in that answers every request with 200 over TLS
struct TlsBitbucket {
    url: String,
    bodies: Arc<Mutex<Vec<String>>>,
}

impl TlsBitbucket {
    async fn start(require_client_cert: bool) -> Self {
        init_crypto();

        let certs = CertificateDer::pem_slice_iter(SERVER_CERT)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        let key = PrivateKeyDer::from_pem_slice(SERVER_KEY).unwrap();

        let config = if require_client_cert {
            let mut roots = RootCertStore::empty();
            for ca in CertificateDer::pem_slice_iter(CA_CERT) {
                roots.add(ca.unwrap()).unwrap();
            }
            let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                .build()
                .unwrap();
            ServerConfig::builder()
                .with_client_cert_verifier(verifier)
                .with_single_cert(certs, key)
                .unwrap()
        } else {
            ServerConfig::builder()
                .with_no_client_auth()
                .with_single_cert(certs, key)
                .unwrap()
        };
        let acceptor = TlsAcceptor::from(Arc::new(config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let bodies = Arc::new(Mutex::new(Vec::new()));

        let received = bodies.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let acceptor = acceptor.clone();
                let received = received.clone();
                tokio::spawn(async move {
                    let Ok(mut tls) = acceptor.accept(stream).await else {
                        return;
                    };
                    let Some(body) = read_request(&mut tls).await else {
                        return;
                    };
                    received.lock().unwrap().push(body);
                    let _ = tls
                        .write_all(
                            b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                        )
                        .await;
                    let _ = tls.shutdown().await;
                });
            }
        });

        Self {
            url: format!("https://127.0.0.1:{}", port),
            bodies,
        }
    }

    fn bodies(&self) -> Vec<String> {
        self.bodies.lock().unwrap().clone()
    }
}

/// Read one HTTP/1.1 request and return its body
async fn read_request<S: AsyncRead + Unpin>(stream: &mut S) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
    let length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Some(String::from_utf8_lossy(&buf[header_end..header_end + length]).into_owned())
}

fn config(base_url: &str, ignore_unverified_ssl: bool) -> NotifierConfig {
    NotifierConfig {
        global: GlobalSettings {
            base_url: Some(base_url.to_string()),
            ignore_unverified_ssl,
            ..Default::default()
        },
        environment: HostEnvironment {
            root_url: Some("https://ci.example.com/".to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn with_client_certificate(mut config: NotifierConfig) -> NotifierConfig {
    config.global.credentials_id = Some("client-cert".into());
    config.credentials = vec![CredentialEntry::Certificate {
        id: "client-cert".into(),
        keystore_path: PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures/tls/client.p12"),
        password: KEYSTORE_PASSWORD.into(),
    }];
    config
}

fn build() -> Build {
    Build::new("app", 7).with_build_data(BuildData {
        last_built_revision: Some("abc123".to_string()),
        marked_revision: None,
    })
}

#[tokio::test]
async fn untrusted_server_certificate_is_reported_as_unverified_peer() {
    let server = TlsBitbucket::start(false).await;
    let notifier = Notifier::from_config(config(&server.url, false));
    let console = BuildConsole::new();

    let report = notifier
        .dispatch(&build(), BuildState::Successful, &console)
        .await;

    assert!(!report.all_succeeded());
    let line = console
        .lines()
        .into_iter()
        .find(|line| line.starts_with("SSL peer unverified"))
        .expect("unverified peer line");
    assert!(line.contains("abc123"));
    assert!(line.contains("Ignore unverifiable SSL certificate"));
    assert!(server.bodies().is_empty());
}

#[tokio::test]
async fn ignoring_unverified_ssl_reaches_the_server() {
    let server = TlsBitbucket::start(false).await;
    let notifier = Notifier::from_config(config(&server.url, true));
    let console = BuildConsole::new();

    let report = notifier
        .dispatch(&build(), BuildState::Successful, &console)
        .await;

    assert!(report.all_succeeded());
    assert!(console.contains("Notified Bitbucket for commit with id abc123"));
    let bodies = server.bodies();
    assert_eq!(bodies.len(), 1);
    assert!(bodies[0].contains("\"state\":\"SUCCESSFUL\""));
}

#[tokio::test]
async fn client_certificate_passes_mutual_tls() {
    let server = TlsBitbucket::start(true).await;
    let notifier = Notifier::from_config(with_client_certificate(config(&server.url, true)));
    let console = BuildConsole::new();

    let report = notifier
        .dispatch(&build(), BuildState::Successful, &console)
        .await;

    assert!(report.all_succeeded());
    assert!(console.contains("Notified Bitbucket for commit with id abc123"));
    assert_eq!(server.bodies().len(), 1);
}

#[tokio::test]
async fn missing_client_certificate_is_rejected_without_failing_the_build() {
    let server = TlsBitbucket::start(true).await;
    let notifier = Notifier::from_config(config(&server.url, true));
    let console = BuildConsole::new();

    assert!(notifier.post_build(&build(), &console).await);
    assert!(console.contains("Caught exception while notifying Bitbucket with id abc123"));
    assert!(server.bodies().is_empty());
}

#[tokio::test]
async fn client_certificate_keeps_default_trust() {
    let server = TlsBitbucket::start(true).await;
    let notifier = Notifier::from_config(with_client_certificate(config(&server.url, false)));
    let console = BuildConsole::new();

    let report = notifier
        .dispatch(&build(), BuildState::Successful, &console)
        .await;

    assert!(!report.all_succeeded());
    assert!(console.contains("SSL peer unverified while notifying Bitbucket for commit abc123"));
    assert!(server.bodies().is_empty());
}
