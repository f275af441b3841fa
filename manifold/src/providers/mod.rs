//! Upstream LLM providers.
//!
//! The [`Provider`] trait is the seam every upstream implementation
//! satisfies: alias resolution and capability lookup come from the model
//! catalog, while [`Provider::generate`] owns request shaping, the shared
//! retry policy, and normalisation into [`ModelResponse`]. The
//! [`registry::ProviderRegistry`] walks providers in priority order to map
//! a model name onto an instance.

pub mod chat_api;
pub mod error;
pub mod gemini;
pub mod mock;
pub mod registry;
pub mod responses_api;
pub mod retry;

mod http;
mod images;

pub use chat_api::{AuthScheme, ChatApiConfig, ChatApiProvider};
pub use error::ProviderError;
pub use gemini::{GeminiConfig, GeminiProvider};
pub use registry::{ProviderRegistry, RankedModel};
pub use retry::RetryPolicy;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::catalog::{ModelCapabilities, ProviderKind};
use crate::tokens::estimate_tokens;

/// Default per-request soft timeout, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Extended-thinking effort requested by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingMode {
    /// Bare minimum reasoning budget.
    Minimal,
    /// Small budget for quick checks.
    Low,
    /// Default budget.
    #[default]
    Medium,
    /// Large budget for hard problems.
    High,
    /// Everything the model offers.
    Max,
}

impl ThinkingMode {
    /// Thinking-token budget used by providers with an explicit budget
    /// field (Gemini).
    #[must_use]
    pub const fn budget_tokens(self) -> u32 {
        match self {
            Self::Minimal => 128,
            Self::Low => 2_048,
            Self::Medium => 8_192,
            Self::High => 16_384,
            Self::Max => 32_768,
        }
    }

    /// The `reasoning_effort` keyword used by OpenAI-shaped APIs.
    #[must_use]
    pub const fn reasoning_effort(self) -> &'static str {
        match self {
            Self::Minimal | Self::Low => "low",
            Self::Medium => "medium",
            Self::High | Self::Max => "high",
        }
    }

    /// Lowercase keyword as it appears in tool schemas.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Max => "max",
        }
    }
}

impl FromStr for ThinkingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "minimal" => Ok(Self::Minimal),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "max" => Ok(Self::Max),
            other => Err(format!(
                "unknown thinking mode '{other}' (expected minimal|low|medium|high|max)"
            )),
        }
    }
}

/// Model category a tool declares for auto-mode selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelCategory {
    /// No particular preference.
    #[default]
    Balanced,
    /// Latency matters more than depth.
    FastResponse,
    /// Deep multi-step reasoning; prefers extended-thinking models.
    ExtendedReasoning,
}

/// Token accounting for one upstream call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens consumed by the prompt.
    pub input_tokens: u64,
    /// Tokens produced by the model.
    pub output_tokens: u64,
    /// Total billed tokens as reported upstream.
    pub total_tokens: u64,
    /// True when the upstream reported nothing and the counts were
    /// estimated locally.
    #[serde(default)]
    pub estimated: bool,
}

impl Usage {
    /// Usage estimated locally from prompt and completion text.
    #[must_use]
    pub fn estimated(prompt: &str, completion: &str) -> Self {
        let input_tokens = estimate_tokens(prompt);
        let output_tokens = estimate_tokens(completion);
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            estimated: true,
        }
    }
}

/// A function/tool declaration forwarded to upstreams that support
/// function calling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDecl {
    /// Function name.
    pub name: String,
    /// What the function does.
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: serde_json::Value,
}

/// A normalized generation request, provider-agnostic.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    /// Model alias or canonical name; the provider resolves it.
    pub model: String,
    /// User prompt text.
    pub prompt: String,
    /// Optional system prompt.
    pub system_prompt: Option<String>,
    /// Requested sampling temperature; constrained per capability.
    pub temperature: Option<f32>,
    /// Output token cap.
    pub max_output_tokens: Option<u32>,
    /// Extended-thinking effort.
    pub thinking: Option<ThinkingMode>,
    /// Absolute paths of image attachments.
    pub images: Vec<PathBuf>,
    /// Ask for a JSON-object response when the model supports it.
    pub json_mode: bool,
    /// Function declarations for tool-calling upstreams.
    pub functions: Vec<FunctionDecl>,
}

impl GenerateRequest {
    /// Create a request for `model` with `prompt`.
    #[must_use]
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    /// Set the system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    /// Set the temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the thinking mode.
    #[must_use]
    pub const fn with_thinking(mut self, mode: ThinkingMode) -> Self {
        self.thinking = Some(mode);
        self
    }

    /// Set the output token cap.
    #[must_use]
    pub const fn with_max_output_tokens(mut self, max: u32) -> Self {
        self.max_output_tokens = Some(max);
        self
    }

    /// Attach image paths.
    #[must_use]
    pub fn with_images(mut self, images: Vec<PathBuf>) -> Self {
        self.images = images;
        self
    }
}

/// Normalized result returned by every provider.
#[derive(Debug, Clone, Serialize)]
pub struct ModelResponse {
    /// Generated text.
    pub content: String,
    /// Token accounting.
    pub usage: Usage,
    /// Canonical model name that served the request.
    pub model_name: String,
    /// Human-readable model name.
    pub friendly_name: String,
    /// Provider that served the request.
    pub provider: ProviderKind,
    /// Upstream finish reason, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    /// Provider-specific extras: reasoning token counts, temperature
    /// adjustment diagnostics, and similar.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// The contract every upstream provider satisfies.
#[async_trait]
pub trait Provider: Send + Sync + std::fmt::Debug {
    /// Which provider family this is.
    fn kind(&self) -> ProviderKind;

    /// Capability descriptors keyed by canonical model name.
    fn capabilities_map(&self) -> &HashMap<String, ModelCapabilities>;

    /// Resolve an alias or canonical name to the canonical name.
    ///
    /// # Errors
    ///
    /// [`ProviderError::UnknownModel`] when nothing matches.
    fn resolve(&self, name: &str) -> Result<String, ProviderError> {
        self.capabilities_map()
            .values()
            .find(|cap| cap.matches(name))
            .map(|cap| cap.model_name.clone())
            .ok_or_else(|| ProviderError::unknown_model(name, self.capabilities_map()))
    }

    /// Capability descriptor for an alias or canonical name.
    ///
    /// # Errors
    ///
    /// [`ProviderError::UnknownModel`] when nothing matches.
    fn capabilities(&self, name: &str) -> Result<&ModelCapabilities, ProviderError> {
        let canonical = self.resolve(name)?;
        self.capabilities_map()
            .get(&canonical)
            .ok_or_else(|| ProviderError::unknown_model(name, self.capabilities_map()))
    }

    /// Whether this provider recognises `name`.
    fn validate(&self, name: &str) -> bool {
        self.resolve(name).is_ok()
    }

    /// Execute one generation request.
    ///
    /// # Errors
    ///
    /// Any [`ProviderError`]; retryable upstream failures are retried
    /// internally per the shared policy before surfacing.
    async fn generate(&self, request: GenerateRequest) -> Result<ModelResponse, ProviderError>;

    /// Count tokens for budgeting. The default is the shared heuristic;
    /// providers with an accurate tokenizer override this.
    fn count_tokens(&self, text: &str, model: &str) -> u64 {
        let _ = model;
        estimate_tokens(text)
    }
}

/// Map a requested temperature onto what the capability accepts.
///
/// Returns the value to put on the wire (`None` when the model takes no
/// sampling parameters) and an optional diagnostic for the response
/// metadata when the request was adjusted or dropped.
#[must_use]
pub(crate) fn effective_temperature(
    cap: &ModelCapabilities,
    requested: Option<f32>,
) -> (Option<f32>, Option<String>) {
    if !cap.supports_temperature {
        let diag = requested.map(|t| {
            format!("temperature {t} omitted: {} does not accept sampling parameters", cap.model_name)
        });
        return (None, diag);
    }
    match (&cap.temperature_constraint, requested) {
        (None, any) => (any, None),
        (Some(constraint), None) => (Some(constraint.fallback()), None),
        (Some(constraint), Some(requested)) => {
            let (effective, adjusted) = constraint.apply(requested);
            let diag = adjusted.then(|| {
                format!("temperature adjusted from {requested} to {effective} for {}", cap.model_name)
            });
            (Some(effective), diag)
        }
    }
}
