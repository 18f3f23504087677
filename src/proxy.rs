//! Outbound proxy settings of the CI host.

use regex::Regex;
use serde::Deserialize;
use tracing::warn;

/// Proxy configured on the CI host
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProxySettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Host patterns that bypass the proxy; `*` matches any run of characters
    #[serde(default)]
    pub no_proxy_hosts: Vec<String>,
}

/// Proxy to use for one target host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRoute {
    pub url: String,
    pub credentials: Option<(String, String)>,
}

impl ProxySettings {
    /// Returns the proxy to use for `target_host`, or `None` when the host is
    /// excluded by a no-proxy pattern or no proxy host is configured.
    pub fn route_for(&self, target_host: &str) -> Option<ProxyRoute> {
        if self.host.trim().is_empty() {
            return None;
        }
        if self.bypasses(target_host) {
            return None;
        }

        let credentials = self
            .username
            .as_ref()
            .filter(|user| !user.is_empty())
            .map(|user| (user.clone(), self.password.clone().unwrap_or_default()));

        Some(ProxyRoute {
            url: format!("http://{}:{}", self.host.trim(), self.port),
            credentials,
        })
    }

    fn bypasses(&self, target_host: &str) -> bool {
        self.no_proxy_patterns()
            .iter()
            .any(|pattern| pattern.is_match(target_host))
    }

    /// Entries may themselves hold several patterns separated by commas,
    /// pipes or whitespace.
    fn no_proxy_patterns(&self) -> Vec<Regex> {
        self.no_proxy_hosts
            .iter()
            .flat_map(|entry| entry.split(|c: char| c == ',' || c == '|' || c.is_whitespace()))
            .filter(|pattern| !pattern.is_empty())
            .filter_map(|pattern| {
                let body = regex::escape(pattern).replace("\\*", ".*");
                match Regex::new(&format!("(?i)^{}$", body)) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        warn!("Ignoring invalid no-proxy pattern '{}': {}", pattern, e);
                        None
                    }
                }
            })
            .collect()
    }
}
