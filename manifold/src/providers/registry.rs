//! Provider registry and priority router.
//!
//! Providers are registered as factories (a startup-time table, no
//! reflection) and instantiated lazily on first use behind an init lock.
//! Model-name routing walks [`ProviderKind::PRIORITY`] and caches each
//! decision for the process lifetime. The restriction policy is enforced
//! here so no code path can reach a disallowed model.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, warn};

use super::chat_api::{AuthScheme, ChatApiConfig, ChatApiProvider};
use super::error::ProviderError;
use super::gemini::{GeminiConfig, GeminiProvider};
use super::{ModelCategory, Provider};
use crate::catalog::{Catalog, ProviderKind, RestrictionPolicy, effective_rank};
use crate::error::ConfigError;
use crate::settings::EnvSource;

/// OpenAI API endpoint.
pub const OPENAI_API_BASE_URL: &str = "https://api.openai.com/v1";
/// X.AI API endpoint.
pub const XAI_API_BASE_URL: &str = "https://api.x.ai/v1";
/// OpenRouter API endpoint.
pub const OPENROUTER_API_BASE_URL: &str = "https://openrouter.ai/api/v1";
/// Default DIAL gateway endpoint; override with `DIAL_API_URL`.
pub const DIAL_API_BASE_URL: &str = "https://core.dialx.ai";
/// Azure API version used when `AZURE_OPENAI_API_VERSION` is unset.
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-10-21";

/// Rank penalty applied to custom-endpoint models in auto-mode listings.
const CUSTOM_RANK_PENALTY: u32 = 10;

/// Builds one provider instance on demand.
pub type ProviderFactory = Box<dyn Fn() -> Result<Arc<dyn Provider>, ConfigError> + Send + Sync>;

/// A catalog entry ranked for auto-mode selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedModel {
    /// Canonical model name.
    pub canonical: String,
    /// Provider that would serve it.
    pub kind: ProviderKind,
    /// Effective rank, 0..=100, custom penalty applied.
    pub rank: u32,
}

/// The process-wide provider registry.
pub struct ProviderRegistry {
    factories: HashMap<ProviderKind, ProviderFactory>,
    /// Lazily created instances; the mutex doubles as the init lock.
    instances: Mutex<HashMap<ProviderKind, Arc<dyn Provider>>>,
    /// `lowercased name -> provider` routing decisions.
    route_cache: RwLock<HashMap<String, ProviderKind>>,
    restrictions: RestrictionPolicy,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("configured", &self.configured_kinds())
            .finish_non_exhaustive()
    }
}

impl ProviderRegistry {
    /// An empty registry with the given restriction policy.
    #[must_use]
    pub fn new(restrictions: RestrictionPolicy) -> Self {
        Self {
            factories: HashMap::new(),
            instances: Mutex::new(HashMap::new()),
            route_cache: RwLock::new(HashMap::new()),
            restrictions,
        }
    }

    /// Build the registry from the environment and the loaded catalog.
    ///
    /// A provider is configured when its API key (plus any mandatory
    /// companion variables) is present *and* its manifest declares models.
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingEnv`] when a provider is half-configured
    /// (e.g. an Azure key without an endpoint) and
    /// [`ConfigError::NoProvidersConfigured`] when nothing is usable.
    pub fn from_env(env: &EnvSource, catalog: &Catalog) -> Result<Self, ConfigError> {
        let mut registry = Self::new(RestrictionPolicy::from_env(env));
        registry.restrictions.warn_unknown_tokens(catalog);

        for kind in ProviderKind::PRIORITY {
            let Some(factory) = build_factory(kind, env, catalog)? else {
                continue;
            };
            registry.register(kind, factory);
        }

        if registry.factories.is_empty() {
            return Err(ConfigError::NoProvidersConfigured);
        }
        Ok(registry)
    }

    /// Register a factory for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: ProviderKind, factory: ProviderFactory) {
        self.factories.insert(kind, factory);
    }

    /// Providers with a registered factory, in priority order.
    #[must_use]
    pub fn configured_kinds(&self) -> Vec<ProviderKind> {
        ProviderKind::PRIORITY
            .into_iter()
            .filter(|kind| self.factories.contains_key(kind))
            .collect()
    }

    /// The restriction policy in effect.
    #[must_use]
    pub const fn restrictions(&self) -> &RestrictionPolicy {
        &self.restrictions
    }

    /// The instance for `kind`, created on first use.
    ///
    /// # Errors
    ///
    /// [`ProviderError::Internal`] when the factory fails.
    pub fn provider(&self, kind: ProviderKind) -> Result<Arc<dyn Provider>, ProviderError> {
        let mut instances = self
            .instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(instance) = instances.get(&kind) {
            return Ok(Arc::clone(instance));
        }
        let factory = self.factories.get(&kind).ok_or_else(|| {
            ProviderError::Internal(format!("provider {kind} is not configured"))
        })?;
        let instance = factory()
            .map_err(|e| ProviderError::Internal(format!("failed to initialise {kind}: {e}")))?;
        debug!(provider = %kind, "initialised provider");
        instances.insert(kind, Arc::clone(&instance));
        Ok(instance)
    }

    /// Route a model name (alias or canonical) to the provider that serves
    /// it, honouring priority order and the restriction policy.
    ///
    /// # Errors
    ///
    /// [`ProviderError::Restricted`] when some provider recognised the name
    /// but policy refused it everywhere; [`ProviderError::UnknownModel`]
    /// when nothing recognised it.
    pub fn get_provider_for_model(&self, name: &str) -> Result<Arc<dyn Provider>, ProviderError> {
        let key = name.to_lowercase();
        if let Some(kind) = self.cached_route(&key) {
            return self.provider(kind);
        }

        let mut restricted: Option<(ProviderKind, String)> = None;
        for kind in self.configured_kinds() {
            let provider = match self.provider(kind) {
                Ok(provider) => provider,
                Err(err) => {
                    warn!(provider = %kind, error = %err, "skipping provider during routing");
                    continue;
                }
            };
            let Ok(canonical) = provider.resolve(name) else {
                continue;
            };
            let aliases = provider
                .capabilities_map()
                .get(&canonical)
                .map(|cap| cap.aliases.clone())
                .unwrap_or_default();
            if self.restrictions.is_allowed(kind, &canonical, &aliases) {
                self.route_cache
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(key, kind);
                debug!(model = name, provider = %kind, canonical = %canonical, "routed model");
                return Ok(provider);
            }
            if restricted.is_none() {
                restricted = Some((kind, canonical));
            }
        }

        match restricted {
            Some((kind, canonical)) => Err(ProviderError::Restricted {
                provider: kind.as_str(),
                model: canonical,
                allowed: self.restrictions.allowed_tokens(kind),
            }),
            None => Err(ProviderError::UnknownModel {
                model: name.to_owned(),
                suggestions: self
                    .list_for_tool(ModelCategory::Balanced, 8)
                    .into_iter()
                    .map(|m| m.canonical)
                    .collect(),
            }),
        }
    }

    /// Models available for auto-mode selection, best first.
    ///
    /// Entries are sorted by effective rank descending with an alphabetic
    /// tie-break on the canonical name; custom-endpoint models carry a
    /// rank penalty. Restrictions apply.
    #[must_use]
    pub fn list_for_tool(&self, category: ModelCategory, top_n: usize) -> Vec<RankedModel> {
        let mut ranked = Vec::new();
        for kind in self.configured_kinds() {
            let Ok(provider) = self.provider(kind) else {
                continue;
            };
            for cap in provider.capabilities_map().values() {
                if !self
                    .restrictions
                    .is_allowed(kind, &cap.model_name, &cap.aliases)
                {
                    continue;
                }
                let mut rank = effective_rank(cap);
                if kind == ProviderKind::Custom {
                    rank = rank.saturating_sub(CUSTOM_RANK_PENALTY);
                }
                ranked.push((cap.supports_extended_thinking, RankedModel {
                    canonical: cap.model_name.clone(),
                    kind,
                    rank,
                }));
            }
        }

        if category == ModelCategory::ExtendedReasoning
            && ranked.iter().any(|(thinking, _)| *thinking)
        {
            ranked.retain(|(thinking, _)| *thinking);
        }

        let mut models: Vec<RankedModel> = ranked.into_iter().map(|(_, m)| m).collect();
        models.sort_by(|a, b| b.rank.cmp(&a.rank).then_with(|| a.canonical.cmp(&b.canonical)));
        models.truncate(top_n);
        models
    }

    fn cached_route(&self, key: &str) -> Option<ProviderKind> {
        self.route_cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
    }
}

/// Build the factory for `kind` when its configuration is present.
fn build_factory(
    kind: ProviderKind,
    env: &EnvSource,
    catalog: &Catalog,
) -> Result<Option<ProviderFactory>, ConfigError> {
    if !catalog.has_models(kind) {
        return Ok(None);
    }
    let models = catalog.models(kind).to_vec();

    let factory: ProviderFactory = match kind {
        ProviderKind::Openai => {
            let Some(key) = env.get(kind.api_key_var()) else {
                return Ok(None);
            };
            let config = ChatApiConfig::bearer(OPENAI_API_BASE_URL, key);
            Box::new(move || {
                Ok(Arc::new(ChatApiProvider::new(
                    ProviderKind::Openai,
                    config.clone(),
                    models.clone(),
                )?) as Arc<dyn Provider>)
            })
        }
        ProviderKind::Google => {
            let Some(key) = env.get(kind.api_key_var()) else {
                return Ok(None);
            };
            let mut config = GeminiConfig::new(key);
            if let Some(url) = env.get("GEMINI_API_URL") {
                config = config.base_url(url);
            }
            Box::new(move || {
                Ok(Arc::new(GeminiProvider::new(config.clone(), models.clone())?)
                    as Arc<dyn Provider>)
            })
        }
        ProviderKind::Xai => {
            let Some(key) = env.get(kind.api_key_var()) else {
                return Ok(None);
            };
            let config = ChatApiConfig::bearer(XAI_API_BASE_URL, key);
            Box::new(move || {
                Ok(Arc::new(ChatApiProvider::new(
                    ProviderKind::Xai,
                    config.clone(),
                    models.clone(),
                )?) as Arc<dyn Provider>)
            })
        }
        ProviderKind::Azure => {
            let Some(key) = env.get(kind.api_key_var()) else {
                return Ok(None);
            };
            let endpoint = env
                .get("AZURE_OPENAI_ENDPOINT")
                .ok_or(ConfigError::MissingEnv("AZURE_OPENAI_ENDPOINT"))?;
            let config = ChatApiConfig {
                base_url: endpoint,
                auth: AuthScheme::Header {
                    name: "api-key".to_owned(),
                    value: key,
                },
                timeout_secs: super::DEFAULT_TIMEOUT_SECS,
                azure_api_version: Some(
                    env.get_or("AZURE_OPENAI_API_VERSION", DEFAULT_AZURE_API_VERSION),
                ),
            };
            Box::new(move || {
                Ok(Arc::new(ChatApiProvider::new(
                    ProviderKind::Azure,
                    config.clone(),
                    models.clone(),
                )?) as Arc<dyn Provider>)
            })
        }
        ProviderKind::Dial => {
            let Some(key) = env.get(kind.api_key_var()) else {
                return Ok(None);
            };
            let config = ChatApiConfig {
                base_url: env.get_or("DIAL_API_URL", DIAL_API_BASE_URL),
                auth: AuthScheme::Header {
                    name: "Api-Key".to_owned(),
                    value: key,
                },
                timeout_secs: super::DEFAULT_TIMEOUT_SECS,
                azure_api_version: None,
            };
            Box::new(move || {
                Ok(Arc::new(ChatApiProvider::new(
                    ProviderKind::Dial,
                    config.clone(),
                    models.clone(),
                )?) as Arc<dyn Provider>)
            })
        }
        ProviderKind::Custom => {
            let Some(base_url) = env.get("CUSTOM_API_URL") else {
                return Ok(None);
            };
            let auth = env
                .get(kind.api_key_var())
                .filter(|key| !key.is_empty())
                .map_or(AuthScheme::None, AuthScheme::Bearer);
            let config = ChatApiConfig {
                base_url,
                auth,
                timeout_secs: super::DEFAULT_TIMEOUT_SECS,
                azure_api_version: None,
            };
            // Names declared by the OpenRouter manifest are refused here so
            // such requests fall through to OpenRouter in priority order.
            let refusals = catalog.all_names(ProviderKind::Openrouter);
            Box::new(move || {
                Ok(Arc::new(
                    ChatApiProvider::new(ProviderKind::Custom, config.clone(), models.clone())?
                        .with_refusals(refusals.clone()),
                ) as Arc<dyn Provider>)
            })
        }
        ProviderKind::Openrouter => {
            let Some(key) = env.get(kind.api_key_var()) else {
                return Ok(None);
            };
            let config = ChatApiConfig::bearer(OPENROUTER_API_BASE_URL, key);
            Box::new(move || {
                Ok(Arc::new(ChatApiProvider::new(
                    ProviderKind::Openrouter,
                    config.clone(),
                    models.clone(),
                )?) as Arc<dyn Provider>)
            })
        }
    };
    Ok(Some(factory))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::providers::mock::MockProvider;

    fn mock_factory(kind: ProviderKind, models: Vec<&str>) -> ProviderFactory {
        let caps: Vec<_> = models
            .iter()
            .map(|name| MockProvider::capability(name, 10))
            .collect();
        Box::new(move || Ok(Arc::new(MockProvider::new(kind, caps.clone())) as Arc<dyn Provider>))
    }

    fn mock_factory_with_caps(
        kind: ProviderKind,
        caps: Vec<crate::catalog::ModelCapabilities>,
    ) -> ProviderFactory {
        Box::new(move || Ok(Arc::new(MockProvider::new(kind, caps.clone())) as Arc<dyn Provider>))
    }

    #[test]
    fn routes_to_the_first_provider_in_priority_order() {
        let mut registry = ProviderRegistry::new(RestrictionPolicy::unrestricted());
        registry.register(ProviderKind::Openai, mock_factory(ProviderKind::Openai, vec!["shared-model"]));
        registry.register(
            ProviderKind::Openrouter,
            mock_factory(ProviderKind::Openrouter, vec!["shared-model"]),
        );

        let provider = registry.get_provider_for_model("shared-model").unwrap();
        assert_eq!(provider.kind(), ProviderKind::Openai);
    }

    #[test]
    fn routing_decisions_are_cached() {
        let mut registry = ProviderRegistry::new(RestrictionPolicy::unrestricted());
        registry.register(ProviderKind::Openai, mock_factory(ProviderKind::Openai, vec!["gpt-5-mini"]));

        assert!(registry.cached_route("gpt-5-mini").is_none());
        registry.get_provider_for_model("GPT-5-Mini").unwrap();
        assert_eq!(registry.cached_route("gpt-5-mini"), Some(ProviderKind::Openai));
    }

    #[test]
    fn alias_resolves_through_the_registry() {
        // Property 1: routed alias resolves to a canonical that declares it.
        let mut cap = MockProvider::capability("gpt-5-mini", 12);
        cap.aliases = vec!["mini".to_owned()];
        let mut registry = ProviderRegistry::new(RestrictionPolicy::unrestricted());
        registry.register(
            ProviderKind::Openai,
            mock_factory_with_caps(ProviderKind::Openai, vec![cap]),
        );

        let provider = registry.get_provider_for_model("mini").unwrap();
        let canonical = provider.resolve("mini").unwrap();
        assert_eq!(canonical, "gpt-5-mini");
        let declared = &provider.capabilities_map()[&canonical];
        assert!(declared.aliases.contains(&"mini".to_owned()));
    }

    #[test]
    fn restriction_blocks_with_allow_list_in_error() {
        // S2: restricted model reports the allow-list.
        let mut registry =
            ProviderRegistry::new(RestrictionPolicy::with(ProviderKind::Openai, &["o4-mini"]));
        registry.register(
            ProviderKind::Openai,
            mock_factory(ProviderKind::Openai, vec!["gpt-5", "o4-mini"]),
        );

        let err = registry.get_provider_for_model("gpt-5").unwrap_err();
        match err {
            ProviderError::Restricted { provider, model, allowed } => {
                assert_eq!(provider, "openai");
                assert_eq!(model, "gpt-5");
                assert_eq!(allowed, vec!["o4-mini".to_owned()]);
            }
            other => panic!("unexpected: {other:?}"),
        }

        // The allowed model still routes.
        assert!(registry.get_provider_for_model("o4-mini").is_ok());
    }

    #[test]
    fn restricted_model_falls_through_to_a_later_provider() {
        let mut registry =
            ProviderRegistry::new(RestrictionPolicy::with(ProviderKind::Openai, &["o4-mini"]));
        registry.register(ProviderKind::Openai, mock_factory(ProviderKind::Openai, vec!["gpt-5"]));
        registry.register(
            ProviderKind::Openrouter,
            mock_factory(ProviderKind::Openrouter, vec!["gpt-5"]),
        );

        let provider = registry.get_provider_for_model("gpt-5").unwrap();
        assert_eq!(provider.kind(), ProviderKind::Openrouter);
    }

    #[test]
    fn unknown_model_carries_suggestions() {
        let mut registry = ProviderRegistry::new(RestrictionPolicy::unrestricted());
        registry.register(ProviderKind::Openai, mock_factory(ProviderKind::Openai, vec!["gpt-5"]));

        match registry.get_provider_for_model("gpt-99").unwrap_err() {
            ProviderError::UnknownModel { model, suggestions } => {
                assert_eq!(model, "gpt-99");
                assert_eq!(suggestions, vec!["gpt-5".to_owned()]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn listing_orders_by_rank_with_alphabetic_tie_break() {
        // Property 7.
        let caps = vec![
            MockProvider::capability("bravo", 10),
            MockProvider::capability("alpha", 10),
            MockProvider::capability("strongest", 18),
            MockProvider::capability("weak", 3),
        ];
        let mut registry = ProviderRegistry::new(RestrictionPolicy::unrestricted());
        registry.register(
            ProviderKind::Openai,
            mock_factory_with_caps(ProviderKind::Openai, caps),
        );

        let listed = registry.list_for_tool(ModelCategory::Balanced, 10);
        let names: Vec<&str> = listed.iter().map(|m| m.canonical.as_str()).collect();
        assert_eq!(names, vec!["strongest", "alpha", "bravo", "weak"]);
        for pair in listed.windows(2) {
            assert!(pair[0].rank >= pair[1].rank);
        }
    }

    #[test]
    fn listing_honours_restrictions_and_top_n() {
        let mut registry =
            ProviderRegistry::new(RestrictionPolicy::with(ProviderKind::Openai, &["alpha"]));
        registry.register(
            ProviderKind::Openai,
            mock_factory(ProviderKind::Openai, vec!["alpha", "bravo", "charlie"]),
        );

        let listed = registry.list_for_tool(ModelCategory::Balanced, 10);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].canonical, "alpha");

        let mut registry = ProviderRegistry::new(RestrictionPolicy::unrestricted());
        registry.register(
            ProviderKind::Openai,
            mock_factory(ProviderKind::Openai, vec!["alpha", "bravo", "charlie"]),
        );
        assert_eq!(registry.list_for_tool(ModelCategory::Balanced, 2).len(), 2);
    }

    #[test]
    fn extended_reasoning_prefers_thinking_models() {
        let mut thinking = MockProvider::capability("deep-thinker", 10);
        thinking.supports_extended_thinking = true;
        let plain = MockProvider::capability("plain", 18);
        let mut registry = ProviderRegistry::new(RestrictionPolicy::unrestricted());
        registry.register(
            ProviderKind::Openai,
            mock_factory_with_caps(ProviderKind::Openai, vec![thinking, plain]),
        );

        let listed = registry.list_for_tool(ModelCategory::ExtendedReasoning, 10);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].canonical, "deep-thinker");
    }

    #[test]
    fn custom_models_carry_a_rank_penalty() {
        let mut registry = ProviderRegistry::new(RestrictionPolicy::unrestricted());
        registry.register(
            ProviderKind::Custom,
            mock_factory(ProviderKind::Custom, vec!["local-llama"]),
        );
        registry.register(ProviderKind::Openai, mock_factory(ProviderKind::Openai, vec!["gpt-5"]));

        let listed = registry.list_for_tool(ModelCategory::Balanced, 10);
        let local = listed.iter().find(|m| m.canonical == "local-llama").unwrap();
        let hosted = listed.iter().find(|m| m.canonical == "gpt-5").unwrap();
        assert!(local.rank < hosted.rank);
    }

    #[test]
    fn empty_registry_from_env_is_a_config_error() {
        let env = EnvSource::fixed(std::collections::HashMap::new());
        let catalog = Catalog::new();
        let err = ProviderRegistry::from_env(&env, &catalog).unwrap_err();
        assert!(matches!(err, ConfigError::NoProvidersConfigured));
    }

    #[test]
    fn azure_key_without_endpoint_is_a_config_error() {
        let env = EnvSource::fixed(
            [(
                "AZURE_OPENAI_API_KEY".to_owned(),
                "key".to_owned(),
            )]
            .into(),
        );
        let mut catalog = Catalog::new();
        let mut cap = MockProvider::capability("gpt-4o", 12);
        cap.deployment = Some("prod-gpt4o".to_owned());
        catalog.insert(ProviderKind::Azure, vec![cap]);
        let err = ProviderRegistry::from_env(&env, &catalog).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv("AZURE_OPENAI_ENDPOINT")));
    }

    #[test]
    fn from_env_configures_providers_with_keys_and_models() {
        let env = EnvSource::fixed(
            [
                ("OPENAI_API_KEY".to_owned(), "sk-test".to_owned()),
                ("CUSTOM_API_URL".to_owned(), "http://localhost:11434/v1".to_owned()),
            ]
            .into(),
        );
        let mut catalog = Catalog::new();
        catalog.insert(ProviderKind::Openai, vec![MockProvider::capability("gpt-5", 15)]);
        catalog.insert(ProviderKind::Custom, vec![MockProvider::capability("llama", 8)]);
        // OpenRouter declares a model, but no key is set: not configured.
        catalog.insert(ProviderKind::Openrouter, vec![MockProvider::capability("gpt-5", 15)]);

        let registry = ProviderRegistry::from_env(&env, &catalog).unwrap();
        assert_eq!(
            registry.configured_kinds(),
            vec![ProviderKind::Openai, ProviderKind::Custom]
        );
    }

    #[test]
    fn custom_refuses_openrouter_declared_models() {
        let env = EnvSource::fixed(
            [("CUSTOM_API_URL".to_owned(), "http://localhost:11434/v1".to_owned())].into(),
        );
        let mut catalog = Catalog::new();
        let mut shadowed = MockProvider::capability("remote-only", 8);
        shadowed.aliases = vec!["remote".to_owned()];
        catalog.insert(ProviderKind::Custom, vec![MockProvider::capability("remote-only", 8)]);
        catalog.insert(ProviderKind::Openrouter, vec![shadowed]);

        let registry = ProviderRegistry::from_env(&env, &catalog).unwrap();
        // OpenRouter has no key, custom refuses the name: nothing serves it.
        let err = registry.get_provider_for_model("remote-only").unwrap_err();
        assert!(matches!(err, ProviderError::UnknownModel { .. }));
    }
}
