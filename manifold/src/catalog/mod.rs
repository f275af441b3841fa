//! Model catalog: capability descriptors, manifest loading, and the
//! operator restriction policy.
//!
//! Everything in this module is built once at startup and read-only
//! afterwards; the router and the tools only ever borrow from it.

mod capabilities;
mod manifest;
mod restriction;

pub use capabilities::{ModelCapabilities, TemperatureConstraint, effective_rank};
pub use manifest::{load_manifest, manifest_path};
pub use restriction::RestrictionPolicy;

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::settings::EnvSource;

/// Upstream provider families known to the router.
///
/// The variant order is not meaningful; routing priority is defined by
/// [`ProviderKind::PRIORITY`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI (chat-completions and responses APIs).
    Openai,
    /// Google Gemini (native endpoint).
    Google,
    /// X.AI Grok (OpenAI-compatible).
    Xai,
    /// Azure OpenAI (deployment-routed, OpenAI-compatible).
    Azure,
    /// OpenRouter aggregator (OpenAI-compatible).
    Openrouter,
    /// DIAL gateway (OpenAI-compatible, `Api-Key` auth).
    Dial,
    /// Operator-supplied OpenAI-compatible endpoint (local or proxy).
    Custom,
}

impl ProviderKind {
    /// Routing priority: the first provider in this order that recognises a
    /// model name and passes the restriction policy wins. Native providers
    /// come before gateways so aliases resolve to the cheapest direct path;
    /// OpenRouter is last because it claims almost everything.
    pub const PRIORITY: [Self; 7] = [
        Self::Google,
        Self::Openai,
        Self::Xai,
        Self::Azure,
        Self::Dial,
        Self::Custom,
        Self::Openrouter,
    ];

    /// Short lowercase tag used in logs and serialized payloads.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Openai => "openai",
            Self::Google => "google",
            Self::Xai => "xai",
            Self::Azure => "azure",
            Self::Openrouter => "openrouter",
            Self::Dial => "dial",
            Self::Custom => "custom",
        }
    }

    /// Human-readable provider name.
    #[must_use]
    pub const fn friendly_name(self) -> &'static str {
        match self {
            Self::Openai => "OpenAI",
            Self::Google => "Google Gemini",
            Self::Xai => "X.AI",
            Self::Azure => "Azure OpenAI",
            Self::Openrouter => "OpenRouter",
            Self::Dial => "DIAL",
            Self::Custom => "Custom endpoint",
        }
    }

    /// Environment variable holding this provider's API key.
    #[must_use]
    pub const fn api_key_var(self) -> &'static str {
        match self {
            Self::Openai => "OPENAI_API_KEY",
            Self::Google => "GEMINI_API_KEY",
            Self::Xai => "XAI_API_KEY",
            Self::Azure => "AZURE_OPENAI_API_KEY",
            Self::Openrouter => "OPENROUTER_API_KEY",
            Self::Dial => "DIAL_API_KEY",
            Self::Custom => "CUSTOM_API_KEY",
        }
    }

    /// Environment variable holding this provider's model allow-list, if
    /// the provider participates in the restriction service.
    #[must_use]
    pub const fn allowed_models_var(self) -> Option<&'static str> {
        match self {
            Self::Openai => Some("OPENAI_ALLOWED_MODELS"),
            Self::Google => Some("GOOGLE_ALLOWED_MODELS"),
            Self::Xai => Some("XAI_ALLOWED_MODELS"),
            Self::Azure => Some("AZURE_OPENAI_ALLOWED_MODELS"),
            Self::Openrouter => Some("OPENROUTER_ALLOWED_MODELS"),
            Self::Dial => Some("DIAL_ALLOWED_MODELS"),
            Self::Custom => None,
        }
    }

    /// Default manifest file name for this provider.
    #[must_use]
    pub const fn manifest_file(self) -> &'static str {
        match self {
            Self::Openai => "openai_models.json",
            Self::Google => "gemini_models.json",
            Self::Xai => "xai_models.json",
            Self::Azure => "azure_models.json",
            Self::Openrouter => "openrouter_models.json",
            Self::Dial => "dial_models.json",
            Self::Custom => "custom_models.json",
        }
    }

    /// Environment variable overriding the manifest path.
    #[must_use]
    pub const fn manifest_override_var(self) -> &'static str {
        match self {
            Self::Openai => "OPENAI_MODELS_CONFIG_PATH",
            Self::Google => "GEMINI_MODELS_CONFIG_PATH",
            Self::Xai => "XAI_MODELS_CONFIG_PATH",
            Self::Azure => "AZURE_MODELS_CONFIG_PATH",
            Self::Openrouter => "OPENROUTER_MODELS_CONFIG_PATH",
            Self::Dial => "DIAL_MODELS_CONFIG_PATH",
            Self::Custom => "CUSTOM_MODELS_CONFIG_PATH",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The full model catalog: one capability list per provider, loaded from
/// the JSON manifests at startup.
#[derive(Debug, Default)]
pub struct Catalog {
    per_provider: HashMap<ProviderKind, Vec<ModelCapabilities>>,
}

impl Catalog {
    /// Create an empty catalog. Mostly useful in tests.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every provider manifest that exists on disk.
    ///
    /// Missing manifest files are tolerated (the provider simply has no
    /// models); malformed manifests are fatal.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a manifest exists but fails to parse or
    /// validate.
    pub fn load(env: &EnvSource) -> Result<Self, ConfigError> {
        let mut per_provider = HashMap::new();
        for kind in ProviderKind::PRIORITY {
            let path = manifest_path(kind, env);
            if !path.exists() {
                tracing::debug!(provider = %kind, path = %path.display(), "no manifest file");
                continue;
            }
            let models = load_manifest(&path, kind)?;
            tracing::info!(
                provider = %kind,
                path = %path.display(),
                models = models.len(),
                "loaded model manifest"
            );
            per_provider.insert(kind, models);
        }
        Ok(Self { per_provider })
    }

    /// Insert (or replace) the model list for one provider.
    pub fn insert(&mut self, kind: ProviderKind, models: Vec<ModelCapabilities>) {
        self.per_provider.insert(kind, models);
    }

    /// The models declared for `kind`, or an empty slice.
    #[must_use]
    pub fn models(&self, kind: ProviderKind) -> &[ModelCapabilities] {
        self.per_provider.get(&kind).map_or(&[], Vec::as_slice)
    }

    /// Whether any models are declared for `kind`.
    #[must_use]
    pub fn has_models(&self, kind: ProviderKind) -> bool {
        !self.models(kind).is_empty()
    }

    /// All lowercased names (canonical and aliases) declared for `kind`.
    /// Used to make the custom provider refuse OpenRouter-declared models.
    #[must_use]
    pub fn all_names(&self, kind: ProviderKind) -> Vec<String> {
        let mut names = Vec::new();
        for cap in self.models(kind) {
            names.push(cap.model_name.to_lowercase());
            names.extend(cap.aliases.iter().map(|a| a.to_lowercase()));
        }
        names
    }
}
