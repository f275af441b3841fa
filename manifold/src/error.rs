//! Crate-level error hierarchy.
//!
//! Each subsystem defines its own error enum ([`ProviderError`],
//! [`ThreadError`], [`ToolError`]); this module folds them into a single
//! [`Error`] for callers that cross subsystem boundaries, and defines
//! [`ConfigError`] for startup failures that must abort the process.

use crate::conversation::ThreadError;
use crate::providers::ProviderError;
use crate::tools::ToolError;

/// A type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The top-level error type for server operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid configuration detected at startup. Fatal.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Upstream provider failure.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Conversation memory failure.
    #[error(transparent)]
    Thread(#[from] ThreadError),

    /// Tool dispatch or execution failure.
    #[error(transparent)]
    Tool(#[from] ToolError),
}

/// Invalid configuration detected at startup.
///
/// These abort startup; the binary prints them to stderr and exits
/// non-zero. Every variant names the offending file, entry, or variable.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// Failed to read a manifest or env file.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that could not be read.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Malformed JSON in a manifest.
    #[error("malformed JSON in {path}: {source}")]
    Json {
        /// Path of the malformed file.
        path: String,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// A manifest entry is missing the mandatory `model_name`.
    #[error("{path}: model entry #{index} is missing `model_name`")]
    MissingModelName {
        /// Manifest path.
        path: String,
        /// Zero-based entry index within the `models` array.
        index: usize,
    },

    /// An Azure manifest entry is missing its deployment id.
    #[error("{path}: model '{model}' is missing `deployment` (required for Azure)")]
    MissingDeployment {
        /// Manifest path.
        path: String,
        /// Offending model name.
        model: String,
    },

    /// `intelligence_score` outside the 1..=20 range.
    #[error("{path}: model '{model}' has intelligence_score {score}, expected 1..=20")]
    IntelligenceScoreOutOfRange {
        /// Manifest path.
        path: String,
        /// Offending model name.
        model: String,
        /// The out-of-range score.
        score: u8,
    },

    /// The same name or alias maps to two models within one provider.
    #[error("{path}: alias '{alias}' maps to both '{first}' and '{second}'")]
    DuplicateAlias {
        /// Manifest path.
        path: String,
        /// The ambiguous alias (lowercased).
        alias: String,
        /// First model claiming the alias.
        first: String,
        /// Second model claiming the alias.
        second: String,
    },

    /// `max_output_tokens` larger than the context window.
    #[error(
        "{path}: model '{model}' declares max_output_tokens {max_output} \
         above its context window {context}"
    )]
    OutputExceedsContext {
        /// Manifest path.
        path: String,
        /// Offending model name.
        model: String,
        /// Declared output limit.
        max_output: u64,
        /// Declared context window.
        context: u64,
    },

    /// A required environment variable is missing.
    #[error("missing environment variable {0}")]
    MissingEnv(&'static str),

    /// An environment variable holds an unusable value.
    #[error("invalid value for {var}: {message}")]
    InvalidEnv {
        /// Variable name.
        var: String,
        /// What was wrong with it.
        message: String,
    },

    /// Failed to construct an HTTP client for a provider.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),

    /// No provider has an API key configured.
    #[error("no providers configured; set at least one provider API key")]
    NoProvidersConfigured,
}

impl ConfigError {
    /// Create an [`ConfigError::Io`] with the offending path attached.
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create an [`ConfigError::InvalidEnv`].
    pub fn invalid_env(var: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEnv {
            var: var.into(),
            message: message.into(),
        }
    }
}
