//! Operator restriction policy.
//!
//! `*_ALLOWED_MODELS` environment variables limit which models each
//! provider may serve. An empty or unset variable means "all allowed".
//! Restrictions apply to every code path, including `listmodels` output and
//! auto-mode selection.

use std::collections::{HashMap, HashSet};

use super::{Catalog, ProviderKind};
use crate::settings::EnvSource;

/// Per-provider allow-lists, parsed once at startup.
#[derive(Debug, Clone, Default)]
pub struct RestrictionPolicy {
    allowed: HashMap<ProviderKind, HashSet<String>>,
}

impl RestrictionPolicy {
    /// An empty policy: everything allowed.
    #[must_use]
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// Parse the `*_ALLOWED_MODELS` variables from `env`.
    ///
    /// Tokens are trimmed, lowercased, and split on commas. A variable that
    /// is set but contains only separators behaves like an unset one.
    #[must_use]
    pub fn from_env(env: &EnvSource) -> Self {
        let mut allowed = HashMap::new();
        for kind in ProviderKind::PRIORITY {
            let Some(var) = kind.allowed_models_var() else {
                continue;
            };
            let Some(raw) = env.get(var) else { continue };
            let tokens: HashSet<String> = raw
                .split(',')
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect();
            if !tokens.is_empty() {
                allowed.insert(kind, tokens);
            }
        }
        Self { allowed }
    }

    /// Whether `canonical` (or any of its `aliases`) is allowed for `kind`.
    #[must_use]
    pub fn is_allowed(&self, kind: ProviderKind, canonical: &str, aliases: &[String]) -> bool {
        let Some(set) = self.allowed.get(&kind) else {
            return true;
        };
        if set.contains(&canonical.to_lowercase()) {
            return true;
        }
        aliases.iter().any(|a| set.contains(&a.to_lowercase()))
    }

    /// Whether `kind` has no allow-list at all.
    #[must_use]
    pub fn is_unrestricted(&self, kind: ProviderKind) -> bool {
        !self.allowed.contains_key(&kind)
    }

    /// The raw allow-list tokens for `kind`, sorted, for error messages.
    #[must_use]
    pub fn allowed_tokens(&self, kind: ProviderKind) -> Vec<String> {
        let mut tokens: Vec<String> = self
            .allowed
            .get(&kind)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        tokens.sort();
        tokens
    }

    /// Log a warning for every allow-list token that matches nothing in the
    /// catalog. Unknown tokens never fail startup; they are usually typos
    /// or models removed from a manifest.
    pub fn warn_unknown_tokens(&self, catalog: &Catalog) {
        for (kind, set) in &self.allowed {
            let known: HashSet<String> = catalog.all_names(*kind).into_iter().collect();
            for token in set {
                if !known.contains(token) {
                    tracing::warn!(
                        provider = %kind,
                        token = %token,
                        "allow-list token does not match any declared model or alias"
                    );
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn with(kind: ProviderKind, tokens: &[&str]) -> Self {
        let mut allowed = HashMap::new();
        allowed.insert(
            kind,
            tokens.iter().map(|t| t.to_lowercase()).collect::<HashSet<_>>(),
        );
        Self { allowed }
    }
}
