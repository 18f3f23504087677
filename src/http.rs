//! HTTP client construction for the Bitbucket build status API.
//!
//! A fresh client is built for every commit notification and dropped right
//! after its request, which releases its connection pool.

use reqwest::{Client, ClientBuilder, Identity, Proxy};
use std::error::Error as StdError;
use std::fmt;
use tracing::debug;
use url::Url;

use crate::NotifierConfig;
use crate::credentials::Credential;
use crate::error::{NotifierError, Result};
use crate::proxy::{ProxyRoute, ProxySettings};

/// Connection settings resolved for a single notification attempt
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
    /// Base URL without trailing slash
    pub base_url: Option<String>,
    pub credentials_id: Option<String>,
    pub ignore_unverified_ssl: bool,
    pub proxy: Option<ProxySettings>,
}

impl ConnectionConfig {
    pub fn resolve(config: &NotifierConfig) -> Self {
        Self {
            base_url: config.effective_base_url(),
            credentials_id: config.effective_credentials_id(),
            ignore_unverified_ssl: config.ignore_unverified_ssl(),
            proxy: config.environment.proxy.clone(),
        }
    }

    fn base_url(&self) -> Result<&str> {
        self.base_url
            .as_deref()
            .ok_or_else(|| NotifierError::Config("No Bitbucket base URL configured".to_string()))
    }

    pub fn parsed_base_url(&self) -> Result<Url> {
        parse_base_url(self.base_url()?)
    }

    /// `<base_url>/commit/<sha1>/statuses/build`
    pub fn status_endpoint(&self, commit_sha1: &str) -> Result<String> {
        let base_url = self.base_url()?;
        parse_base_url(base_url)?;
        Ok(format!("{}/commit/{}/statuses/build", base_url, commit_sha1))
    }
}

fn parse_base_url(base_url: &str) -> Result<Url> {
    Url::parse(base_url).map_err(|source| NotifierError::InvalidBaseUrl {
        url: base_url.to_string(),
        source,
    })
}

/// Client certificate presented for mutual TLS
#[derive(Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    /// PKCS#12 archive
    pub keystore: Vec<u8>,
    pub password: String,
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("keystore_len", &self.keystore.len())
            .finish_non_exhaustive()
    }
}

/// How the TLS session to Bitbucket is set up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsPolicy {
    /// Platform trust store with hostname verification
    PlatformDefault,
    /// Custom context; identity and relaxed trust may be combined
    Custom {
        identity: Option<ClientIdentity>,
        trust_all: bool,
    },
}

impl TlsPolicy {
    /// A custom context is only needed for `https` targets that either skip
    /// peer verification or authenticate with a client certificate.
    pub fn resolve(url: &Url, ignore_unverified_ssl: bool, credential: Option<&Credential>) -> Self {
        let identity = match credential {
            Some(Credential::Certificate { keystore, password }) => Some(ClientIdentity {
                keystore: keystore.clone(),
                password: password.clone(),
            }),
            Some(Credential::UsernamePassword { .. }) | None => None,
        };

        if url.scheme() == "https" && (ignore_unverified_ssl || identity.is_some()) {
            TlsPolicy::Custom {
                identity,
                trust_all: ignore_unverified_ssl,
            }
        } else {
            TlsPolicy::PlatformDefault
        }
    }

    pub fn installs_identity(&self) -> bool {
        matches!(self, TlsPolicy::Custom { identity: Some(_), .. })
    }

    pub fn trusts_all(&self) -> bool {
        matches!(self, TlsPolicy::Custom { trust_all: true, .. })
    }

    fn apply(&self, builder: ClientBuilder) -> Result<ClientBuilder> {
        match self {
            TlsPolicy::PlatformDefault => Ok(builder),
            TlsPolicy::Custom {
                identity,
                trust_all,
            } => {
                let mut builder = builder.use_native_tls();
                if let Some(identity) = identity {
                    let identity = Identity::from_pkcs12_der(&identity.keystore, &identity.password)
                        .map_err(|e| {
                            NotifierError::Tls(format!("Couldn't load client certificate: {}", e))
                        })?;
                    builder = builder.identity(identity);
                }
                if *trust_all {
                    builder = builder
                        .danger_accept_invalid_certs(true)
                        .danger_accept_invalid_hostnames(true);
                }
                Ok(builder)
            }
        }
    }
}

/// Basic auth is only sent for username/password credentials; certificates
/// authenticate at the TLS layer instead.
pub fn basic_auth(credential: Option<&Credential>) -> Option<(&str, &str)> {
    match credential {
        Some(Credential::UsernamePassword { username, password }) => {
            Some((username.as_str(), password.as_str()))
        }
        Some(Credential::Certificate { .. }) | None => None,
    }
}

/// HTTP client configured for one notification
pub struct NotifierClient {
    client: Client,
    tls: TlsPolicy,
    proxy: Option<ProxyRoute>,
}

impl NotifierClient {
    /// Build a client for `config`.
    ///
    /// Fails if the base URL is missing or unparsable, or the client
    /// certificate cannot be loaded.
    pub fn build(config: &ConnectionConfig, credential: Option<&Credential>) -> Result<Self> {
        let url = config.parsed_base_url()?;
        let tls = TlsPolicy::resolve(&url, config.ignore_unverified_ssl, credential);

        let proxy = match (&config.proxy, url.host_str()) {
            (Some(settings), Some(host)) => settings.route_for(host),
            _ => None,
        };

        // only the CI host's proxy applies, never the process environment's
        let mut builder = tls.apply(Client::builder())?.no_proxy();
        if let Some(route) = &proxy {
            let mut reqwest_proxy = Proxy::all(&route.url)?;
            if let Some((user, pass)) = &route.credentials {
                reqwest_proxy = reqwest_proxy.basic_auth(user, pass);
            }
            builder = builder.proxy(reqwest_proxy);
        }

        debug!(
            base_url = %url,
            custom_tls = !matches!(tls, TlsPolicy::PlatformDefault),
            proxied = proxy.is_some(),
            "Built Bitbucket HTTP client"
        );

        Ok(Self {
            client: builder.build()?,
            tls,
            proxy,
        })
    }

    pub fn http(&self) -> &Client {
        &self.client
    }

    pub fn tls_policy(&self) -> &TlsPolicy {
        &self.tls
    }

    pub fn proxy_route(&self) -> Option<&ProxyRoute> {
        self.proxy.as_ref()
    }
}

const PEER_VERIFICATION_MARKERS: &[&str] = &[
    "certificate verify failed",
    "self signed certificate",
    "self-signed certificate",
    "unable to get local issuer",
    "unknownissuer",
    "invalid peer certificate",
    "certificate is not trusted",
    "hostname mismatch",
    "certificate has expired",
];

/// True if any error in the chain reports that the server's certificate
/// could not be verified.
pub fn is_peer_verification_failure(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        let message = e.to_string().to_lowercase();
        if PEER_VERIFICATION_MARKERS
            .iter()
            .any(|marker| message.contains(marker))
        {
            return true;
        }
        current = e.source();
    }
    false
}
