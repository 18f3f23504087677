use tracing::warn;

use crate::NotifierConfig;
use crate::fields::escape_js;
use crate::job::Build;
use crate::logging::{BuildLog, LogLevel};
use crate::template::TemplateExpander;

/// Key used when no override template applies:
/// `<project>[-<number>]-<root_url>`.
///
/// The CI root URL keeps keys from different CI servers building the same
/// repository apart.
pub fn default_build_key(build: &Build, include_build_number: bool, root_url: &str) -> String {
    let mut key = build.project_name.clone();
    if include_build_number {
        key.push('-');
        key.push_str(&build.number.to_string());
    }
    key.push('-');
    key.push_str(root_url);
    key
}

/// Builds the escaped key identifying this build's status on a commit.
///
/// The result is not yet bounded; the payload truncates it.
pub fn build_key(
    build: &Build,
    config: &NotifierConfig,
    root_url: &str,
    expander: &dyn TemplateExpander,
    log: &dyn BuildLog,
) -> String {
    let mut key = String::new();

    if config.prepend_parent_project_key() {
        if let Some(parent) = build.parent_full_name.as_deref() {
            key.push_str(parent);
            key.push('-');
        }
    }

    let default_key = || default_build_key(build, config.include_build_number_in_key(), root_url);

    match config.project_key_template() {
        Some(template) => match expander.expand(&template, build) {
            Ok(values) => key.push_str(&values.concat()),
            Err(e) => {
                warn!(template = %template, error = %e, "Falling back to default build key");
                log.log(
                    LogLevel::WARN,
                    &format!(
                        "Cannot expand build key from parameter. Processing with default build key ({})",
                        e
                    ),
                );
                key.push_str(&default_key());
            }
        },
        None => key.push_str(&default_key()),
    }

    escape_js(&key)
}
