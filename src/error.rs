use std::io;

/// Custom error type for bitbucket_notifier operations
#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid Bitbucket base URL '{url}': {source}")]
    InvalidBaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Template expansion failed: {0}")]
    Expansion(String),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

/// Helper type for Results that use NotifierError
pub type Result<T> = std::result::Result<T, NotifierError>;
