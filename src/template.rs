//! Template expansion for commit SHA and build key templates.

use crate::error::{NotifierError, Result};
use crate::job::Build;

/// Expands a template string against a build.
///
/// An expansion may produce several strings, e.g. one per sub-build.
pub trait TemplateExpander: Send + Sync {
    fn expand(&self, template: &str, build: &Build) -> Result<Vec<String>>;
}

/// Expands `$NAME` and `${NAME}` references from the build's variables.
///
/// `$$` is a literal dollar sign. Unknown variables and an unterminated
/// `${` are errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct VariableExpander;

impl TemplateExpander for VariableExpander {
    fn expand(&self, template: &str, build: &Build) -> Result<Vec<String>> {
        Ok(vec![expand_variables(template, build)?])
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn expand_variables(template: &str, build: &Build) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        let name = match chars.peek() {
            Some('$') => {
                chars.next();
                out.push('$');
                continue;
            }
            Some('{') => {
                chars.next();
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => name.push(ch),
                        None => {
                            return Err(NotifierError::Expansion(format!(
                                "unterminated '${{' in template '{}'",
                                template
                            )));
                        }
                    }
                }
                name
            }
            Some(&ch) if is_name_char(ch) => {
                let mut name = String::new();
                while let Some(&ch) = chars.peek() {
                    if !is_name_char(ch) {
                        break;
                    }
                    name.push(ch);
                    chars.next();
                }
                name
            }
            _ => {
                out.push('$');
                continue;
            }
        };

        match build.variable(&name) {
            Some(value) => out.push_str(&value),
            None => {
                return Err(NotifierError::Expansion(format!(
                    "unknown variable '{}' in template '{}'",
                    name, template
                )));
            }
        }
    }

    Ok(out)
}
