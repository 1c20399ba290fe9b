use std::path::PathBuf;

/// Startup configuration errors. All of them are fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingKey(String),

    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    #[error("failed to read credentials from {}: {source}", path.display())]
    Credentials {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed credentials in {}: {source}", path.display())]
    CredentialsFormat {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("credentials in {} have an empty openai_api_key", path.display())]
    EmptyApiKey { path: PathBuf },
}

/// Failures talking to the completion API.
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("completion request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("completion API returned {status}: {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },
}
