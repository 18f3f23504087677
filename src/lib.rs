//! Notifies a Bitbucket server of CI build results through its build status
//! API.
//!
//! A build lifecycle event (pre-build or post-build) is turned into one
//! `POST {base_url}/commit/{sha1}/statuses/build` per commit the build
//! covers. Notification problems are reported on the build console and never
//! fail the build.

pub mod commits;
pub mod credentials;
pub mod dispatcher;
pub mod error;
pub mod fields;
pub mod http;
pub mod job;
pub mod key;
pub mod logging;
pub mod payload;
pub mod proxy;
pub mod template;

use serde::Deserialize;
use std::path::Path;
use url::Url;

use crate::credentials::CredentialEntry;
use crate::error::{NotifierError, Result};
use crate::fields::is_blank;
use crate::proxy::ProxySettings;

pub use dispatcher::{CommitOutcome, DispatchReport, NotificationResult, Notifier};
pub use http::{ConnectionConfig, NotifierClient, TlsPolicy};
pub use job::{Build, BuildData, BuildResult, BuildState};
pub use payload::NotificationRequest;

const DEFAULT_CI_NAME: &str = "Jenkins";

/// Whole configuration file
#[derive(Debug, Deserialize, Clone, Default)]
pub struct NotifierConfig {
    #[serde(default)]
    pub global: GlobalSettings,
    #[serde(default)]
    pub job: JobSettings,
    #[serde(default)]
    pub environment: HostEnvironment,
    #[serde(default)]
    pub credentials: Vec<CredentialEntry>,
}

/// Defaults shared by every job
#[derive(Debug, Deserialize, Clone, Default)]
pub struct GlobalSettings {
    pub base_url: Option<String>,
    pub credentials_id: Option<String>,
    #[serde(default)]
    pub ignore_unverified_ssl: bool,
    #[serde(default)]
    pub include_build_number_in_key: bool,
    pub project_key: Option<String>,
    #[serde(default)]
    pub prepend_parent_project_key: bool,
    #[serde(default)]
    pub disable_in_progress_notification: bool,
}

/// Per-job overrides; blank strings and `false` defer to [`GlobalSettings`]
#[derive(Debug, Deserialize, Clone, Default)]
pub struct JobSettings {
    pub base_url: Option<String>,
    pub credentials_id: Option<String>,
    #[serde(default)]
    pub ignore_unverified_ssl: bool,
    /// Template naming the commit(s) to notify instead of the SCM data
    pub commit_sha1: Option<String>,
    #[serde(default)]
    pub include_build_number_in_key: bool,
    pub project_key: Option<String>,
    #[serde(default)]
    pub prepend_parent_project_key: bool,
    #[serde(default)]
    pub disable_in_progress_notification: bool,
}

/// What the notifier needs to know about the CI host itself
#[derive(Debug, Deserialize, Clone)]
pub struct HostEnvironment {
    /// Public root URL of the CI server; builds link back to it
    pub root_url: Option<String>,
    #[serde(default = "default_ci_name")]
    pub ci_name: String,
    pub proxy: Option<ProxySettings>,
}

fn default_ci_name() -> String {
    DEFAULT_CI_NAME.to_string()
}

impl Default for HostEnvironment {
    fn default() -> Self {
        Self {
            root_url: None,
            ci_name: default_ci_name(),
            proxy: None,
        }
    }
}

impl HostEnvironment {
    /// The configured root URL, or `None` if unset or blank
    pub fn root_url(&self) -> Option<&str> {
        self.root_url.as_deref().filter(|url| !url.trim().is_empty())
    }
}

/// Two-tier setting resolution: a non-blank local value wins, otherwise the
/// global value if it is non-blank.
pub fn effective(local: Option<&str>, global: Option<&str>) -> Option<String> {
    if !is_blank(local) {
        return local.map(str::to_string);
    }
    if !is_blank(global) {
        return global.map(str::to_string);
    }
    None
}

/// Two-tier resolution for switches: enabled if either tier enables it.
pub fn effective_flag(local: bool, global: bool) -> bool {
    local || global
}

fn strip_trailing_slash(url: &str) -> String {
    url.strip_suffix('/').unwrap_or(url).to_string()
}

impl NotifierConfig {
    pub fn effective_base_url(&self) -> Option<String> {
        effective(
            self.job.base_url.as_deref(),
            self.global.base_url.as_deref(),
        )
        .map(|url| strip_trailing_slash(url.trim()))
    }

    pub fn effective_credentials_id(&self) -> Option<String> {
        effective(
            self.job.credentials_id.as_deref(),
            self.global.credentials_id.as_deref(),
        )
    }

    pub fn ignore_unverified_ssl(&self) -> bool {
        effective_flag(
            self.job.ignore_unverified_ssl,
            self.global.ignore_unverified_ssl,
        )
    }

    pub fn include_build_number_in_key(&self) -> bool {
        effective_flag(
            self.job.include_build_number_in_key,
            self.global.include_build_number_in_key,
        )
    }

    pub fn prepend_parent_project_key(&self) -> bool {
        effective_flag(
            self.job.prepend_parent_project_key,
            self.global.prepend_parent_project_key,
        )
    }

    pub fn disable_in_progress_notification(&self) -> bool {
        effective_flag(
            self.job.disable_in_progress_notification,
            self.global.disable_in_progress_notification,
        )
    }

    /// Template overriding the default build key, if any
    pub fn project_key_template(&self) -> Option<String> {
        effective(
            self.job.project_key.as_deref(),
            self.global.project_key.as_deref(),
        )
    }

    /// Problems a user should fix in the settings. None of them stops a
    /// notification from being attempted.
    pub fn validate(&self) -> Vec<NotifierError> {
        let mut problems = Vec::new();
        if let Err(e) = check_base_url(
            self.job.base_url.as_deref(),
            self.global.base_url.as_deref(),
        ) {
            problems.push(e);
        }
        // an id that is set on some tier must resolve to a usable one
        if self.job.credentials_id.is_some() || self.global.credentials_id.is_some() {
            let id = self.effective_credentials_id().unwrap_or_default();
            if let Err(e) = check_credentials_id(&id) {
                problems.push(e);
            }
        }
        problems
    }

    /// Template naming commits explicitly; only configurable per job
    pub fn commit_sha1_template(&self) -> Option<&str> {
        self.job
            .commit_sha1
            .as_deref()
            .filter(|template| !template.trim().is_empty())
    }
}

/// Load and parse the configuration file
pub fn load_config(path: impl AsRef<Path>) -> Result<NotifierConfig> {
    let path = path.as_ref();
    let config_str = std::fs::read_to_string(path).map_err(|e| {
        NotifierError::Config(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    let config: NotifierConfig = toml::from_str(&config_str).map_err(|e| {
        NotifierError::Config(format!(
            "Failed to parse config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    Ok(config)
}

/// Checks that a job's base URL, or the global one it falls back to, is a
/// valid URL.
pub fn check_base_url(value: Option<&str>, global: Option<&str>) -> Result<()> {
    let url = effective(value, global).map(|url| url.trim().to_string());
    match url {
        None => Err(NotifierError::Config(
            "Please specify a valid URL here or in the global configuration".to_string(),
        )),
        Some(url) => Url::parse(&url)
            .map(|_| ())
            .map_err(|source| NotifierError::InvalidBaseUrl { url, source }),
    }
}

pub fn check_credentials_id(value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(NotifierError::Config(
            "Please specify the credentials to use".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_value_wins_when_present() {
        assert_eq!(effective(Some("l"), Some("g")).as_deref(), Some("l"));
        assert_eq!(effective(Some(" "), Some("g")).as_deref(), Some("g"));
        assert_eq!(effective(None, Some("g")).as_deref(), Some("g"));
        assert_eq!(effective(None, Some("")), None);
    }

    #[test]
    fn blank_local_credentials_id_falls_back_to_global() {
        let config = NotifierConfig {
            job: JobSettings {
                credentials_id: Some(String::new()),
                ..Default::default()
            },
            global: GlobalSettings {
                credentials_id: Some("g1".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(config.effective_credentials_id().as_deref(), Some("g1"));
    }

    #[test]
    fn flags_are_or_ed() {
        let mut config = NotifierConfig::default();
        assert!(!config.ignore_unverified_ssl());
        config.global.ignore_unverified_ssl = true;
        assert!(config.ignore_unverified_ssl());
        config.global.ignore_unverified_ssl = false;
        config.job.ignore_unverified_ssl = true;
        assert!(config.ignore_unverified_ssl());
    }

    #[test]
    fn base_url_trailing_slash_is_stripped() {
        let config = NotifierConfig {
            global: GlobalSettings {
                base_url: Some("https://bitbucket.example.com/".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(
            config.effective_base_url().as_deref(),
            Some("https://bitbucket.example.com")
        );
    }

    #[test]
    fn base_url_validation() {
        assert!(check_base_url(Some("https://bb.example.com"), None).is_ok());
        assert!(check_base_url(Some(""), Some("http://global:7990")).is_ok());
        assert!(matches!(
            check_base_url(None, None),
            Err(NotifierError::Config(_))
        ));
        assert!(matches!(
            check_base_url(Some("not a url"), None),
            Err(NotifierError::InvalidBaseUrl { .. })
        ));
    }

    #[test]
    fn credentials_id_validation() {
        assert!(check_credentials_id("g1").is_ok());
        assert!(check_credentials_id("  ").is_err());
    }

    #[test]
    fn validate_reports_unusable_settings() {
        let mut config = NotifierConfig::default();
        config.job.credentials_id = Some(" ".into());
        let problems = config.validate();
        assert_eq!(problems.len(), 2);
        assert!(problems[0].to_string().contains("valid URL"));
        assert!(problems[1].to_string().contains("credentials"));

        config.global.base_url = Some("https://bb.example.com/".into());
        config.global.credentials_id = Some("g1".into());
        assert!(config.validate().is_empty());

        // credentials are optional
        let config = NotifierConfig {
            global: GlobalSettings {
                base_url: Some("https://bb.example.com".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_empty());
    }

    #[test]
    fn config_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notifier.toml");
        std::fs::write(
            &path,
            r#"
            [global]
            base_url = "https://bitbucket.example.com"
            credentials_id = "g1"
            include_build_number_in_key = true

            [job]
            commit_sha1 = "${GIT_COMMIT}"

            [environment]
            root_url = "https://ci.example.com/"

            [environment.proxy]
            host = "proxy.corp"
            port = 3128
            no_proxy_hosts = ["*.internal"]

            [[credentials]]
            kind = "username_password"
            id = "g1"
            username = "ci"
            password = "pw"
            "#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.environment.ci_name, "Jenkins");
        assert_eq!(config.environment.root_url(), Some("https://ci.example.com/"));
        assert_eq!(config.commit_sha1_template(), Some("${GIT_COMMIT}"));
        assert!(config.include_build_number_in_key());
        assert_eq!(config.credentials.len(), 1);
        assert_eq!(config.environment.proxy.unwrap().port, 3128);
    }

    #[test]
    fn missing_config_file_is_config_error() {
        let err = load_config("/nonexistent/notifier.toml").unwrap_err();
        assert!(matches!(err, NotifierError::Config(_)));
    }
}
