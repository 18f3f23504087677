//! Sends build status notifications for every commit of a build.
//!
//! Nothing here can fail a build: every problem ends up as a line on the
//! build console and the lifecycle hooks always return `true`.

use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::NotifierConfig;
use crate::commits::resolve_commits;
use crate::credentials::{ConfigCredentialStore, Credential, CredentialStore};
use crate::error::{NotifierError, Result};
use crate::http::{ConnectionConfig, NotifierClient, basic_auth, is_peer_verification_failure};
use crate::job::{Build, BuildResult, BuildState};
use crate::key::build_key;
use crate::logging::{BuildLog, LogLevel};
use crate::payload::build_payload;
use crate::template::{TemplateExpander, VariableExpander};

/// Outcome of one commit notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationResult {
    pub success: bool,
    /// Response body or error text when `success` is false
    pub message: Option<String>,
}

impl NotificationResult {
    pub fn new_success() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn new_failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    pub commit_sha1: String,
    pub result: NotificationResult,
}

/// What a dispatch did; it has no error variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchReport {
    /// The CI root URL is unset, so no build link can be sent
    RootUrlMissing,
    /// The build carries no commit information
    NoCommitInfo,
    Notified(Vec<CommitOutcome>),
}

impl DispatchReport {
    pub fn outcomes(&self) -> &[CommitOutcome] {
        match self {
            DispatchReport::Notified(outcomes) => outcomes,
            _ => &[],
        }
    }

    pub fn all_succeeded(&self) -> bool {
        matches!(self, DispatchReport::Notified(outcomes) if outcomes.iter().all(|o| o.result.success))
    }
}

/// Bitbucket build status notifier for one job
pub struct Notifier {
    config: NotifierConfig,
    credentials: Arc<dyn CredentialStore>,
    expander: Arc<dyn TemplateExpander>,
}

impl Notifier {
    pub fn new(config: NotifierConfig, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            config,
            credentials,
            expander: Arc::new(VariableExpander),
        }
    }

    /// Use the `[[credentials]]` of the configuration as credential store
    pub fn from_config(config: NotifierConfig) -> Self {
        let store = ConfigCredentialStore::new(config.credentials.clone());
        Self::new(config, Arc::new(store))
    }

    pub fn with_expander(mut self, expander: Arc<dyn TemplateExpander>) -> Self {
        self.expander = expander;
        self
    }

    pub fn config(&self) -> &NotifierConfig {
        &self.config
    }

    /// Before the build runs: report INPROGRESS unless disabled.
    pub async fn pre_build(&self, build: &Build, log: &dyn BuildLog) -> bool {
        if self.config.disable_in_progress_notification() {
            info!(project = %build.project_name, "In-progress notification disabled");
            return true;
        }
        self.dispatch(build, BuildState::Inprogress, log).await;
        true
    }

    /// After the build ran: SUCCESSFUL for a clean success, FAILED otherwise.
    pub async fn post_build(&self, build: &Build, log: &dyn BuildLog) -> bool {
        let state = BuildResult::to_state(build.result);
        self.dispatch(build, state, log).await;
        true
    }

    /// Notify Bitbucket of `state` for every commit of `build`.
    pub async fn dispatch(&self, build: &Build, state: BuildState, log: &dyn BuildLog) -> DispatchReport {
        let span = info_span!(
            "dispatch",
            attempt = %Uuid::now_v7(),
            project = %build.project_name,
            build = build.number,
            %state
        );
        self.dispatch_commits(build, state, log).instrument(span).await
    }

    async fn dispatch_commits(&self, build: &Build, state: BuildState, log: &dyn BuildLog) -> DispatchReport {
        // the build API requires a link back to the build
        let Some(root_url) = self.config.environment.root_url() else {
            warn!("CI root URL not configured; skipping notification");
            log.log(
                LogLevel::WARN,
                "Cannot notify Bitbucket! (CI root URL not configured)",
            );
            return DispatchReport::RootUrlMissing;
        };

        let commits = resolve_commits(
            build,
            self.config.commit_sha1_template(),
            self.expander.as_ref(),
            log,
        );
        if commits.is_empty() {
            info!("No commit info found");
            log.println("found no commit info");
            return DispatchReport::NoCommitInfo;
        }

        let mut outcomes = Vec::with_capacity(commits.len());
        for commit_sha1 in commits {
            let result = match self.notify_commit(build, root_url, &commit_sha1, state, log).await {
                Ok(result) => {
                    if result.success {
                        info!(commit = %commit_sha1, "Notified Bitbucket");
                        log.println(&format!(
                            "Notified Bitbucket for commit with id {}",
                            commit_sha1
                        ));
                    } else {
                        let message = result.message.as_deref().unwrap_or_default();
                        warn!(commit = %commit_sha1, response = message, "Bitbucket rejected notification");
                        log.log(
                            LogLevel::WARN,
                            &format!(
                                "Failed to notify Bitbucket for commit {} ({})",
                                commit_sha1, message
                            ),
                        );
                    }
                    result
                }
                Err(e) if is_unverified_peer(&e) => {
                    error!(commit = %commit_sha1, error = %e, "Bitbucket TLS peer not verified");
                    log.log(
                        LogLevel::ERROR,
                        &format!(
                            "SSL peer unverified while notifying Bitbucket for commit {}. \
                             Make sure your SSL certificate on your Bitbucket server is valid \
                             or enable 'Ignore unverifiable SSL certificate' in the Bitbucket \
                             notifier configuration of this job. ({})",
                            commit_sha1, e
                        ),
                    );
                    NotificationResult::new_failure(e.to_string())
                }
                Err(e) => {
                    error!(commit = %commit_sha1, error = %e, "Failed to notify Bitbucket");
                    log.log(
                        LogLevel::ERROR,
                        &format!(
                            "Caught exception while notifying Bitbucket with id {}: {}",
                            commit_sha1, e
                        ),
                    );
                    NotificationResult::new_failure(e.to_string())
                }
            };
            outcomes.push(CommitOutcome { commit_sha1, result });
        }

        DispatchReport::Notified(outcomes)
    }

    async fn notify_commit(
        &self,
        build: &Build,
        root_url: &str,
        commit_sha1: &str,
        state: BuildState,
        log: &dyn BuildLog,
    ) -> Result<NotificationResult> {
        let key = build_key(build, &self.config, root_url, self.expander.as_ref(), log);
        let request = build_payload(
            build,
            state,
            &key,
            root_url,
            &self.config.environment.ci_name,
            commit_sha1,
        );

        let connection = ConnectionConfig::resolve(&self.config);
        let credential = self.lookup_credential(&connection)?;
        let endpoint = connection.status_endpoint(commit_sha1)?;

        // dropped on every return path below, releasing its connections
        let client = NotifierClient::build(&connection, credential.as_ref())?;

        let mut req = client
            .http()
            .post(&endpoint)
            .header(CONTENT_TYPE, "application/json")
            .json(&request);
        if let Some((username, password)) = basic_auth(credential.as_ref()) {
            req = req.basic_auth(username, Some(password));
        }

        let response = req.send().await?;
        let status = response.status().as_u16();
        if status == 200 || status == 201 {
            Ok(NotificationResult::new_success())
        } else {
            let body = response.text().await?;
            Ok(NotificationResult::new_failure(body))
        }
    }

    fn lookup_credential(&self, connection: &ConnectionConfig) -> Result<Option<Credential>> {
        let Some(id) = connection.credentials_id.as_deref() else {
            return Ok(None);
        };
        let credential = self.credentials.lookup(id)?;
        if credential.is_none() {
            warn!(credentials_id = id, "No credential found; sending unauthenticated");
        }
        Ok(credential)
    }
}

fn is_unverified_peer(err: &NotifierError) -> bool {
    match err {
        NotifierError::Http(e) => is_peer_verification_failure(e),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HostEnvironment;
    use crate::job::BuildData;
    use crate::logging::BuildConsole;

    fn build_with_commit(sha: &str) -> Build {
        Build::new("app", 1).with_build_data(BuildData {
            last_built_revision: Some(sha.to_string()),
            marked_revision: None,
        })
    }

    #[tokio::test]
    async fn missing_root_url_stops_before_commits() {
        let notifier = Notifier::from_config(NotifierConfig::default());
        let console = BuildConsole::new();

        let report = notifier
            .dispatch(&build_with_commit("abc123"), BuildState::Successful, &console)
            .await;
        assert_eq!(report, DispatchReport::RootUrlMissing);
        assert!(console.contains("Cannot notify Bitbucket!"));
        assert!(!console.contains("found no commit info"));
    }

    #[tokio::test]
    async fn no_commits_is_logged() {
        let config = NotifierConfig {
            environment: HostEnvironment {
                root_url: Some("https://ci.example.com/".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let notifier = Notifier::from_config(config);
        let console = BuildConsole::new();

        let report = notifier
            .dispatch(&Build::new("app", 1), BuildState::Failed, &console)
            .await;
        assert_eq!(report, DispatchReport::NoCommitInfo);
        assert_eq!(console.lines(), vec!["found no commit info"]);
    }

    #[tokio::test]
    async fn missing_base_url_fails_per_commit_only() {
        let config = NotifierConfig {
            environment: HostEnvironment {
                root_url: Some("https://ci.example.com/".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let notifier = Notifier::from_config(config);
        let console = BuildConsole::new();

        let ok = notifier.post_build(&build_with_commit("abc123"), &console).await;
        assert!(ok);
        assert!(console.contains("Caught exception while notifying Bitbucket with id abc123"));
    }

    #[tokio::test]
    async fn disabled_in_progress_sends_nothing() {
        let mut config = NotifierConfig::default();
        config.global.disable_in_progress_notification = true;
        let notifier = Notifier::from_config(config);
        let console = BuildConsole::new();

        assert!(notifier.pre_build(&build_with_commit("abc"), &console).await);
        assert!(console.lines().is_empty());
    }

    #[test]
    fn report_helpers() {
        let report = DispatchReport::Notified(vec![CommitOutcome {
            commit_sha1: "a".into(),
            result: NotificationResult::new_failure("nope"),
        }]);
        assert_eq!(report.outcomes().len(), 1);
        assert!(!report.all_succeeded());
        assert!(!DispatchReport::NoCommitInfo.all_succeeded());
    }
}
