use serde::Serialize;

use crate::fields::{MAX_FIELD_LENGTH, MAX_URL_FIELD_LENGTH, abbreviate, escape_display_name};
use crate::job::{Build, BuildState};

/// Body of a build status update for one commit
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NotificationRequest {
    #[serde(skip)]
    pub commit_sha1: String,
    pub state: BuildState,
    pub key: String,
    pub name: String,
    pub description: String,
    pub url: String,
}

impl NotificationRequest {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Human-readable description: the build's own, or a default naming the CI
/// server.
pub fn build_description(build: &Build, state: BuildState, ci_name: &str, root_url: &str) -> String {
    if let Some(description) = build
        .description
        .as_deref()
        .filter(|d| !d.trim().is_empty())
    {
        return description.to_string();
    }

    match state {
        BuildState::Inprogress => format!("building on {} @ {}", ci_name, root_url),
        _ => format!("built by {} @ {}", ci_name, root_url),
    }
}

/// Assemble the status update for `commit_sha1`, bounding every field.
///
/// `key` must already be escaped (see [`crate::key::build_key`]).
pub fn build_payload(
    build: &Build,
    state: BuildState,
    key: &str,
    root_url: &str,
    ci_name: &str,
    commit_sha1: &str,
) -> NotificationRequest {
    let name = escape_display_name(&build.full_display_name);
    let description = build_description(build, state, ci_name, root_url);
    let url = format!("{}{}", root_url, build.url);

    NotificationRequest {
        commit_sha1: commit_sha1.to_string(),
        state,
        key: abbreviate(key, MAX_FIELD_LENGTH),
        name: abbreviate(&name, MAX_FIELD_LENGTH),
        description: abbreviate(&description, MAX_FIELD_LENGTH),
        url: abbreviate(&url, MAX_URL_FIELD_LENGTH),
    }
}
