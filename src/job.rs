use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Build states understood by the Bitbucket build status API
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum BuildState {
    Successful,
    Failed,
    Inprogress,
}

impl BuildState {
    /// Name sent on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildState::Successful => "SUCCESSFUL",
            BuildState::Failed => "FAILED",
            BuildState::Inprogress => "INPROGRESS",
        }
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result the host CI system recorded for a finished build
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BuildResult {
    Success,
    Unstable,
    Failure,
    NotBuilt,
    Aborted,
}

impl BuildResult {
    /// Only a clean success is reported as SUCCESSFUL; everything else,
    /// including a missing result, is a failure.
    pub fn to_state(result: Option<BuildResult>) -> BuildState {
        match result {
            Some(BuildResult::Success) => BuildState::Successful,
            _ => BuildState::Failed,
        }
    }
}

/// SCM revision information attached to a build.
///
/// Builds using several repositories carry one record per repository.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuildData {
    /// SHA of the revision that was actually built
    pub last_built_revision: Option<String>,
    /// SHA picked for the build before any merge-before-build step
    pub marked_revision: Option<String>,
}

/// A build of a job as seen by the notifier
#[derive(Debug, Clone, Deserialize)]
pub struct Build {
    pub project_name: String,
    pub full_display_name: String,
    pub number: u64,
    /// URL of the build relative to the CI root URL, e.g. `job/app/42/`
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parent_full_name: Option<String>,
    #[serde(default)]
    pub result: Option<BuildResult>,
    #[serde(default)]
    pub build_data: Vec<BuildData>,
    /// Variables available to template expansion
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

impl Build {
    /// Create a build with no SCM data, description or parent
    pub fn new(project_name: impl Into<String>, number: u64) -> Self {
        let project_name = project_name.into();
        Self {
            full_display_name: format!("{} #{}", project_name, number),
            url: format!("job/{}/{}/", project_name, number),
            project_name,
            number,
            description: None,
            parent_full_name: None,
            result: None,
            build_data: Vec::new(),
            variables: HashMap::new(),
        }
    }

    /// Attach an SCM revision record
    pub fn with_build_data(mut self, data: BuildData) -> Self {
        self.build_data.push(data);
        self
    }

    /// Set the parent project (folder) full name
    pub fn with_parent(mut self, parent_full_name: impl Into<String>) -> Self {
        self.parent_full_name = Some(parent_full_name.into());
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Look up a variable, falling back to the build's own built-ins
    pub fn variable(&self, name: &str) -> Option<String> {
        if let Some(value) = self.variables.get(name) {
            return Some(value.clone());
        }
        match name {
            "BUILD_NUMBER" => Some(self.number.to_string()),
            "JOB_NAME" => Some(self.project_name.clone()),
            "BUILD_DISPLAY_NAME" => Some(self.full_display_name.clone()),
            "BUILD_URL" => Some(self.url.clone()),
            _ => None,
        }
    }
}
