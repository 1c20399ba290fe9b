use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_MODEL_NAME: &str = "gpt-3.5-turbo";
pub const DEFAULT_HISTORY_LENGTH: usize = 20;
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_CREDENTIALS_PATH: &str = "credentials.json";
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Process-wide settings, read once at startup and never mutated.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub bot_token: String,
    pub model_name: String,
    pub history_length: usize,
    pub log_level: String,
    pub credentials_path: PathBuf,
    pub api_base: String,
}

impl BotConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Blank values are
    /// treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let bot_token = get("BOT_TOKEN").ok_or_else(|| ConfigError::MissingKey("BOT_TOKEN".into()))?;

        let history_length = match get("BOT_HISTORY_LENGTH") {
            Some(raw) => parse_history_length(&raw)?,
            None => DEFAULT_HISTORY_LENGTH,
        };

        Ok(Self {
            bot_token,
            model_name: get("MODEL_NAME").unwrap_or_else(|| DEFAULT_MODEL_NAME.to_string()),
            history_length,
            log_level: get("LOG_LEVEL").unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            credentials_path: get("CREDENTIALS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CREDENTIALS_PATH)),
            api_base: get("OPENAI_API_BASE")
                .map(|base| base.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
        })
    }
}

fn parse_history_length(raw: &str) -> Result<usize, ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid {
        key: "BOT_HISTORY_LENGTH".into(),
        value: raw.to_string(),
        reason: reason.to_string(),
    };

    match raw.trim().parse::<usize>() {
        Ok(0) => Err(invalid("must be at least 1")),
        Ok(length) => Ok(length),
        Err(error) => Err(invalid(&error.to_string())),
    }
}

/// Secrets for the completion API, loaded from a local JSON file.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub openai_api_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("openai_api_key", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Credentials {
            path: path.to_path_buf(),
            source,
        })?;

        let credentials: Credentials =
            serde_json::from_str(&raw).map_err(|source| ConfigError::CredentialsFormat {
                path: path.to_path_buf(),
                source,
            })?;

        if credentials.openai_api_key.trim().is_empty() {
            return Err(ConfigError::EmptyApiKey {
                path: path.to_path_buf(),
            });
        }

        Ok(credentials)
    }
}
