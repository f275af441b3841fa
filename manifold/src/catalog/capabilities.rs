//! Immutable per-model capability descriptors.

use serde::{Deserialize, Serialize};

/// What one model supports and how it may be addressed.
///
/// Loaded from the provider manifests at startup and never mutated.
/// `model_name` is the canonical identifier used on the upstream wire;
/// `aliases` are lowercase synonyms accepted from callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCapabilities {
    /// Canonical model identifier (unique within its provider).
    pub model_name: String,
    /// Human-readable name shown in listings and responses.
    #[serde(default)]
    pub friendly_name: String,
    /// Context window in tokens.
    pub context_window: u64,
    /// Maximum output tokens. Defaults to the context window when absent.
    #[serde(default)]
    pub max_output_tokens: u64,
    /// Relative capability score, 1..=20. Drives auto-mode ranking.
    #[serde(default = "default_intelligence_score")]
    pub intelligence_score: u8,
    /// Supports an extended-thinking / reasoning budget.
    #[serde(default)]
    pub supports_extended_thinking: bool,
    /// Supports a JSON-object response format.
    #[serde(default)]
    pub supports_json_mode: bool,
    /// Supports function/tool calling.
    #[serde(default)]
    pub supports_function_calling: bool,
    /// Accepts image parts in the prompt.
    #[serde(default)]
    pub supports_images: bool,
    /// Accepts sampling parameters (temperature / top_p).
    #[serde(default = "default_true")]
    pub supports_temperature: bool,
    /// Accepts a dedicated system role.
    #[serde(default = "default_true")]
    pub supports_system_prompts: bool,
    /// Constraint on the temperature values the upstream accepts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_constraint: Option<TemperatureConstraint>,
    /// Lowercase alias names accepted from callers.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Azure deployment id; mandatory for Azure entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<String>,
    /// Route this model through the OpenAI Responses API.
    #[serde(default)]
    pub use_openai_responses_api: bool,
    /// Per-model override allowing generated-code artifacts.
    #[serde(default)]
    pub allow_code_generation: bool,
}

const fn default_true() -> bool {
    true
}

const fn default_intelligence_score() -> u8 {
    10
}

impl ModelCapabilities {
    /// Whether `name` addresses this model (canonical or alias,
    /// case-insensitive).
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.model_name.to_lowercase() == lower || self.aliases.iter().any(|a| *a == lower)
    }

    /// Canonical name plus all aliases.
    pub fn all_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.model_name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

/// Constraint on the temperature a model accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TemperatureConstraint {
    /// The upstream accepts exactly one value.
    Fixed {
        /// The only accepted value.
        value: f32,
    },
    /// The upstream accepts a discrete set of values.
    Discrete {
        /// Accepted values, in no particular order.
        values: Vec<f32>,
    },
    /// The upstream accepts any value in `[min, max]`.
    Range {
        /// Inclusive lower bound.
        min: f32,
        /// Inclusive upper bound.
        max: f32,
        /// Value used when the caller passes none.
        default: f32,
    },
}

impl TemperatureConstraint {
    /// Map a requested temperature onto an accepted one.
    ///
    /// Returns the effective value and whether the request was adjusted:
    /// fixed constraints substitute silently, discrete sets snap to the
    /// nearest value, ranges clamp.
    #[must_use]
    pub fn apply(&self, requested: f32) -> (f32, bool) {
        match self {
            Self::Fixed { value } => (*value, (requested - value).abs() > f32::EPSILON),
            Self::Discrete { values } => {
                let nearest = values
                    .iter()
                    .copied()
                    .min_by(|a, b| {
                        (a - requested)
                            .abs()
                            .partial_cmp(&(b - requested).abs())
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .unwrap_or(requested);
                (nearest, (nearest - requested).abs() > f32::EPSILON)
            }
            Self::Range { min, max, .. } => {
                let clamped = requested.clamp(*min, *max);
                (clamped, (clamped - requested).abs() > f32::EPSILON)
            }
        }
    }

    /// The value to use when the caller passes no temperature.
    #[must_use]
    pub fn fallback(&self) -> f32 {
        match self {
            Self::Fixed { value } => *value,
            Self::Discrete { values } => values.first().copied().unwrap_or(0.5),
            Self::Range { default, .. } => *default,
        }
    }
}

/// Rank a model for auto-mode listings, clamped to `0..=100`.
///
/// Intelligence dominates; a logarithmic context-window bonus and small
/// feature bonuses break ties between models of similar capability.
#[must_use]
pub fn effective_rank(cap: &ModelCapabilities) -> u32 {
    let mut score = (f64::from(cap.intelligence_score) * 5.0).clamp(0.0, 100.0);
    if cap.context_window >= 1_000 {
        score += (cap.context_window as f64 / 1_000.0).log10() * 2.5;
    }
    if cap.supports_extended_thinking {
        score += 2.0;
    }
    if cap.supports_function_calling {
        score += 1.0;
    }
    if cap.supports_images {
        score += 1.0;
    }
    score.clamp(0.0, 100.0).round() as u32
}
