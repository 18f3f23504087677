//! Credential lookup.
//!
//! Only two kinds are usable against Bitbucket: username/password for HTTP
//! Basic auth and PKCS#12 certificates for mutual TLS.

use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;

use crate::error::{NotifierError, Result};

/// A resolved credential
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    UsernamePassword { username: String, password: String },
    Certificate { keystore: Vec<u8>, password: String },
}

impl Credential {
    pub fn is_certificate(&self) -> bool {
        matches!(self, Credential::Certificate { .. })
    }
}

// Keep secrets out of logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::UsernamePassword { username, .. } => f
                .debug_struct("UsernamePassword")
                .field("username", username)
                .finish_non_exhaustive(),
            Credential::Certificate { keystore, .. } => f
                .debug_struct("Certificate")
                .field("keystore_len", &keystore.len())
                .finish_non_exhaustive(),
        }
    }
}

/// Resolves credential ids to credentials
pub trait CredentialStore: Send + Sync {
    /// Returns `Ok(None)` when no credential has this id
    fn lookup(&self, id: &str) -> Result<Option<Credential>>;
}

/// A `[[credentials]]` entry of the configuration file
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CredentialEntry {
    UsernamePassword {
        id: String,
        username: String,
        password: String,
    },
    Certificate {
        id: String,
        keystore_path: PathBuf,
        password: String,
    },
}

impl CredentialEntry {
    pub fn id(&self) -> &str {
        match self {
            CredentialEntry::UsernamePassword { id, .. } => id,
            CredentialEntry::Certificate { id, .. } => id,
        }
    }

    fn resolve(&self) -> Result<Credential> {
        match self {
            CredentialEntry::UsernamePassword {
                username, password, ..
            } => Ok(Credential::UsernamePassword {
                username: username.clone(),
                password: password.clone(),
            }),
            CredentialEntry::Certificate {
                id,
                keystore_path,
                password,
            } => {
                let keystore = std::fs::read(keystore_path).map_err(|e| {
                    NotifierError::Credential(format!(
                        "Failed to read keystore '{}' for credential '{}': {}",
                        keystore_path.display(),
                        id,
                        e
                    ))
                })?;
                Ok(Credential::Certificate {
                    keystore,
                    password: password.clone(),
                })
            }
        }
    }
}

/// Credential store backed by the configuration file.
///
/// Keystore files are read on every lookup so rotated certificates are
/// picked up without a restart.
#[derive(Debug, Clone, Default)]
pub struct ConfigCredentialStore {
    entries: Vec<CredentialEntry>,
}

impl ConfigCredentialStore {
    pub fn new(entries: Vec<CredentialEntry>) -> Self {
        Self { entries }
    }
}

impl CredentialStore for ConfigCredentialStore {
    fn lookup(&self, id: &str) -> Result<Option<Credential>> {
        self.entries
            .iter()
            .find(|entry| entry.id() == id)
            .map(CredentialEntry::resolve)
            .transpose()
    }
}
