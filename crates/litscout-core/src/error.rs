use std::path::PathBuf;

use thiserror::Error;

/// Core error type for litscout.
#[derive(Debug, Error)]
pub enum LitScoutError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("missing environment variable: {0}")]
    MissingSecret(String),
    #[error("I/O error while accessing {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("tool not found: {0}")]
    NotFound(String),
    #[error("invalid arguments for tool `{tool}`: {reason}")]
    Validation { tool: String, reason: String },
    #[error("provider `{provider}` unavailable: {reason}")]
    ProviderUnavailable { provider: String, reason: String },
    #[error("all providers unavailable: {}", providers.join(", "))]
    AllProvidersUnavailable { providers: Vec<String> },
    #[error("claim `{claim_id}` has no supporting source above the citation threshold")]
    VerificationFailed { claim_id: String },
    #[error("illegal pipeline transition from {from} to {to}")]
    IllegalTransition { from: String, to: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LitScoutError {
    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }

    pub fn validation(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    pub fn provider(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error ends the current conversational turn.
    pub fn is_turn_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::MissingSecret(_)
                | Self::ConfigIo { .. }
                | Self::AllProvidersUnavailable { .. }
        )
    }
}

pub type Result<T, E = LitScoutError> = std::result::Result<T, E>;
