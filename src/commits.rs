use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::job::Build;
use crate::logging::{BuildLog, LogLevel};
use crate::template::TemplateExpander;

/// Determines the commits a build should be reported against.
///
/// A non-blank `explicit_sha_template` takes precedence and is expanded
/// against the build; if expansion fails no commit is notified. Otherwise
/// every SCM record contributes both its built and its marked revision, which
/// differ when the build merged before building. Blank SHAs are skipped and
/// duplicates collapse.
pub fn resolve_commits(
    build: &Build,
    explicit_sha_template: Option<&str>,
    expander: &dyn TemplateExpander,
    log: &dyn BuildLog,
) -> BTreeSet<String> {
    if let Some(template) = explicit_sha_template.filter(|t| !t.trim().is_empty()) {
        return match expander.expand(template, build) {
            Ok(values) => values
                .into_iter()
                .map(|sha| sha.trim().to_string())
                .filter(|sha| !sha.is_empty())
                .collect(),
            Err(e) => {
                warn!(template, error = %e, "Unable to expand commit SHA value");
                log.log(
                    LogLevel::WARN,
                    &format!("Unable to expand commit SHA value: {}", e),
                );
                BTreeSet::new()
            }
        };
    }

    let mut sha1s = BTreeSet::new();
    for data in &build.build_data {
        let revisions = [&data.last_built_revision, &data.marked_revision];
        for sha in revisions.into_iter().flatten() {
            if !sha.trim().is_empty() {
                sha1s.insert(sha.trim().to_string());
            }
        }
    }
    debug!(count = sha1s.len(), "Resolved commits from build data");
    sha1s
}
