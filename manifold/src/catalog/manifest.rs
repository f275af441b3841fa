//! JSON manifest loading and validation.
//!
//! Each provider ships a manifest of shape
//! `{"_README": {...}, "models": [...]}`. The `_README` block is operator
//! documentation and is ignored; every entry in `models` must validate or
//! startup aborts with the offending file and entry named.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::capabilities::ModelCapabilities;
use super::ProviderKind;
use crate::error::ConfigError;
use crate::settings::EnvSource;

/// Directory searched for manifests when no override variable is set.
pub const DEFAULT_CONF_DIR: &str = "conf";

#[derive(Debug, Deserialize)]
struct ManifestFile {
    #[serde(default)]
    models: Vec<RawEntry>,
}

/// A raw manifest entry: `model_name` is optional here so the loader can
/// report *which* entry forgot it instead of a generic serde error.
#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(default)]
    model_name: Option<String>,
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
}

/// Resolve the manifest path for `kind`: the `*_MODELS_CONFIG_PATH`
/// override when set, otherwise `conf/<provider>_models.json` relative to
/// `MANIFOLD_CONF_DIR` or the working directory.
#[must_use]
pub fn manifest_path(kind: ProviderKind, env: &EnvSource) -> PathBuf {
    if let Some(path) = env.get(kind.manifest_override_var()) {
        return PathBuf::from(path);
    }
    let dir = env
        .get("MANIFOLD_CONF_DIR")
        .unwrap_or_else(|| DEFAULT_CONF_DIR.to_owned());
    Path::new(&dir).join(kind.manifest_file())
}

/// Load and validate one provider manifest.
///
/// Validation: every entry needs a `model_name`; Azure entries need a
/// `deployment`; `intelligence_score` must be in 1..=20 (default 10);
/// `max_output_tokens` may not exceed the context window (0 means "use the
/// context window"); aliases are normalized to lowercase and must be
/// unambiguous within the file.
///
/// # Errors
///
/// Returns [`ConfigError`] naming the file and entry on any violation.
pub fn load_manifest(path: &Path, kind: ProviderKind) -> Result<Vec<ModelCapabilities>, ConfigError> {
    let display = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::io(&display, e))?;
    let file: ManifestFile = serde_json::from_str(&raw).map_err(|e| ConfigError::Json {
        path: display.clone(),
        source: e,
    })?;

    let mut models = Vec::with_capacity(file.models.len());
    for (index, entry) in file.models.into_iter().enumerate() {
        let Some(model_name) = entry.model_name.filter(|n| !n.is_empty()) else {
            return Err(ConfigError::MissingModelName {
                path: display.clone(),
                index,
            });
        };
        // Re-assemble the entry now that model_name is known to be present,
        // so serde fills the remaining defaults.
        let mut value = serde_json::Value::Object(entry.rest);
        value["model_name"] = serde_json::Value::String(model_name);
        let cap: ModelCapabilities =
            serde_json::from_value(value).map_err(|e| ConfigError::Json {
                path: display.clone(),
                source: e,
            })?;
        models.push(normalize(cap, kind, &display)?);
    }

    check_alias_uniqueness(&models, &display)?;
    Ok(models)
}

fn normalize(
    mut cap: ModelCapabilities,
    kind: ProviderKind,
    path: &str,
) -> Result<ModelCapabilities, ConfigError> {
    if kind == ProviderKind::Azure && cap.deployment.as_deref().is_none_or(str::is_empty) {
        return Err(ConfigError::MissingDeployment {
            path: path.to_owned(),
            model: cap.model_name,
        });
    }
    if !(1..=20).contains(&cap.intelligence_score) {
        return Err(ConfigError::IntelligenceScoreOutOfRange {
            path: path.to_owned(),
            model: cap.model_name,
            score: cap.intelligence_score,
        });
    }
    if cap.max_output_tokens == 0 {
        cap.max_output_tokens = cap.context_window;
    }
    if cap.max_output_tokens > cap.context_window {
        return Err(ConfigError::OutputExceedsContext {
            path: path.to_owned(),
            model: cap.model_name,
            max_output: cap.max_output_tokens,
            context: cap.context_window,
        });
    }
    if cap.friendly_name.is_empty() {
        cap.friendly_name = format!("{} ({})", kind.friendly_name(), cap.model_name);
    }
    for alias in &mut cap.aliases {
        *alias = alias.trim().to_lowercase();
    }
    cap.aliases.retain(|a| !a.is_empty());
    Ok(cap)
}

fn check_alias_uniqueness(models: &[ModelCapabilities], path: &str) -> Result<(), ConfigError> {
    let mut owners: HashMap<String, &str> = HashMap::new();
    for cap in models {
        for name in cap.all_names() {
            let lower = name.to_lowercase();
            if let Some(first) = owners.get(lower.as_str()) {
                if *first != cap.model_name {
                    return Err(ConfigError::DuplicateAlias {
                        path: path.to_owned(),
                        alias: lower,
                        first: (*first).to_owned(),
                        second: cap.model_name.clone(),
                    });
                }
            } else {
                owners.insert(lower, &cap.model_name);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use assert_fs::TempDir;
    use assert_fs::prelude::*;

    fn write_manifest(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let file = dir.child(name);
        file.write_str(body).unwrap();
        file.path().to_path_buf()
    }

    #[test]
    fn loads_models_and_ignores_readme() {
        let dir = TempDir::new().unwrap();
        let path = write_manifest(
            &dir,
            "openai_models.json",
            r#"{
                "_README": {"note": "operator docs"},
                "models": [
                    {
                        "model_name": "gpt-5-mini",
                        "context_window": 400000,
                        "max_output_tokens": 128000,
                        "intelligence_score": 12,
                        "aliases": ["Mini", " gpt5mini "]
                    }
                ]
            }"#,
        );
        let models = load_manifest(&path, ProviderKind::Openai).unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].model_name, "gpt-5-mini");
        assert_eq!(models[0].aliases, vec!["mini", "gpt5mini"]);
        assert_eq!(models[0].friendly_name, "OpenAI (gpt-5-mini)");
    }

    #[test]
    fn missing_model_name_is_fatal_with_index() {
        let dir = TempDir::new().unwrap();
        let path = write_manifest(
            &dir,
            "openai_models.json",
            r#"{"models": [{"context_window": 1000}]}"#,
        );
        let err = load_manifest(&path, ProviderKind::Openai).unwrap_err();
        assert!(matches!(err, ConfigError::MissingModelName { index: 0, .. }));
    }

    #[test]
    fn azure_entry_without_deployment_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = write_manifest(
            &dir,
            "azure_models.json",
            r#"{"models": [{"model_name": "gpt-4o", "context_window": 128000}]}"#,
        );
        let err = load_manifest(&path, ProviderKind::Azure).unwrap_err();
        assert!(matches!(err, ConfigError::MissingDeployment { .. }));
    }

    #[test]
    fn azure_entry_with_deployment_loads() {
        let dir = TempDir::new().unwrap();
        let path = write_manifest(
            &dir,
            "azure_models.json",
            r#"{"models": [{
                "model_name": "gpt-4o",
                "deployment": "prod-gpt4o",
                "context_window": 128000
            }]}"#,
        );
        let models = load_manifest(&path, ProviderKind::Azure).unwrap();
        assert_eq!(models[0].deployment.as_deref(), Some("prod-gpt4o"));
    }

    #[test]
    fn intelligence_score_out_of_range_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = write_manifest(
            &dir,
            "openai_models.json",
            r#"{"models": [{"model_name": "m", "context_window": 1000, "intelligence_score": 25}]}"#,
        );
        let err = load_manifest(&path, ProviderKind::Openai).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::IntelligenceScoreOutOfRange { score: 25, .. }
        ));
    }

    #[test]
    fn intelligence_score_defaults_to_ten() {
        let dir = TempDir::new().unwrap();
        let path = write_manifest(
            &dir,
            "openai_models.json",
            r#"{"models": [{"model_name": "m", "context_window": 1000}]}"#,
        );
        let models = load_manifest(&path, ProviderKind::Openai).unwrap();
        assert_eq!(models[0].intelligence_score, 10);
    }

    #[test]
    fn duplicate_alias_across_models_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = write_manifest(
            &dir,
            "openai_models.json",
            r#"{"models": [
                {"model_name": "gpt-5", "context_window": 1000, "aliases": ["best"]},
                {"model_name": "gpt-5-pro", "context_window": 1000, "aliases": ["best"]}
            ]}"#,
        );
        let err = load_manifest(&path, ProviderKind::Openai).unwrap_err();
        match err {
            ConfigError::DuplicateAlias { alias, first, second, .. } => {
                assert_eq!(alias, "best");
                assert_eq!(first, "gpt-5");
                assert_eq!(second, "gpt-5-pro");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn output_above_context_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = write_manifest(
            &dir,
            "openai_models.json",
            r#"{"models": [{"model_name": "m", "context_window": 1000, "max_output_tokens": 2000}]}"#,
        );
        let err = load_manifest(&path, ProviderKind::Openai).unwrap_err();
        assert!(matches!(err, ConfigError::OutputExceedsContext { .. }));
    }

    #[test]
    fn zero_output_defaults_to_context_window() {
        let dir = TempDir::new().unwrap();
        let path = write_manifest(
            &dir,
            "openai_models.json",
            r#"{"models": [{"model_name": "m", "context_window": 4096}]}"#,
        );
        let models = load_manifest(&path, ProviderKind::Openai).unwrap();
        assert_eq!(models[0].max_output_tokens, 4096);
    }

    #[test]
    fn malformed_json_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = write_manifest(&dir, "openai_models.json", "{not json");
        let err = load_manifest(&path, ProviderKind::Openai).unwrap_err();
        assert!(matches!(err, ConfigError::Json { .. }));
    }

    #[test]
    fn serialized_capabilities_reload_equal() {
        let dir = TempDir::new().unwrap();
        let path = write_manifest(
            &dir,
            "openai_models.json",
            r#"{"models": [{
                "model_name": "gpt-5",
                "context_window": 400000,
                "max_output_tokens": 128000,
                "intelligence_score": 16,
                "supports_extended_thinking": true,
                "supports_json_mode": true,
                "aliases": ["gpt5"],
                "temperature_constraint": {"type": "fixed", "value": 1.0}
            }]}"#,
        );
        let models = load_manifest(&path, ProviderKind::Openai).unwrap();

        // Round-trip: serialize what we loaded, reload it, compare.
        let body = serde_json::json!({
            "_README": {"regenerated": true},
            "models": models,
        });
        let path2 = write_manifest(&dir, "round_trip.json", &body.to_string());
        let reloaded = load_manifest(&path2, ProviderKind::Openai).unwrap();
        assert_eq!(models, reloaded);
    }

    #[test]
    fn manifest_path_honours_override_var() {
        let env = EnvSource::fixed(
            [(
                "OPENAI_MODELS_CONFIG_PATH".to_owned(),
                "/etc/manifold/openai.json".to_owned(),
            )]
            .into(),
        );
        assert_eq!(
            manifest_path(ProviderKind::Openai, &env),
            PathBuf::from("/etc/manifold/openai.json")
        );
    }

    #[test]
    fn manifest_path_defaults_to_conf_dir() {
        let env = EnvSource::fixed(std::collections::HashMap::new());
        assert_eq!(
            manifest_path(ProviderKind::Google, &env),
            PathBuf::from("conf/gemini_models.json")
        );
    }
}
