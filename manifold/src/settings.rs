//! Environment-driven server settings.
//!
//! Configuration comes from the process environment, optionally overlaid
//! with a `.env` file. `MANIFOLD_FORCE_ENV_OVERRIDE` controls precedence:
//! when set truthy the process environment wins for keys defined in both
//! places; otherwise the `.env` file wins for the keys it defines. The
//! overlay never mutates the process environment.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::providers::ThinkingMode;

/// Variable controlling `.env` / process-env precedence.
pub const FORCE_ENV_OVERRIDE_VAR: &str = "MANIFOLD_FORCE_ENV_OVERRIDE";

/// Read-only view over configuration variables.
#[derive(Debug, Clone)]
pub struct EnvSource {
    file: HashMap<String, String>,
    force_env: bool,
    use_process: bool,
}

impl EnvSource {
    /// Plain process environment, no `.env` overlay.
    #[must_use]
    pub fn process() -> Self {
        Self {
            file: HashMap::new(),
            force_env: false,
            use_process: true,
        }
    }

    /// Process environment overlaid with a parsed `.env` file.
    ///
    /// Lines are `KEY=VALUE`; blank lines and `#` comments are skipped;
    /// surrounding single or double quotes on values are stripped.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the file cannot be read.
    pub fn with_env_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::io(path.display().to_string(), e))?;
        let mut file = HashMap::new();
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            file.insert(key.trim().to_owned(), value.to_owned());
        }
        let force_env = std::env::var(FORCE_ENV_OVERRIDE_VAR)
            .map(|v| truthy(&v))
            .unwrap_or(false);
        Ok(Self {
            file,
            force_env,
            use_process: true,
        })
    }

    /// A hermetic source that reads only the given map. For tests and
    /// embedded setups that must not consult the process environment.
    #[must_use]
    pub fn fixed(vars: HashMap<String, String>) -> Self {
        Self {
            file: vars,
            force_env: false,
            use_process: false,
        }
    }

    /// Look up `key` with the configured precedence.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        if !self.use_process {
            return self.file.get(key).cloned();
        }
        if self.force_env {
            std::env::var(key)
                .ok()
                .filter(|v| !v.is_empty())
                .or_else(|| self.file.get(key).cloned())
        } else {
            self.file
                .get(key)
                .cloned()
                .or_else(|| std::env::var(key).ok())
        }
    }

    /// Look up `key`, falling back to `default`.
    #[must_use]
    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_owned())
    }
}

fn truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Server-wide settings parsed once at startup.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Model used when a tool call passes none; `"auto"` selects by rank.
    pub default_model: String,
    /// Maximum turns per conversation thread (user + assistant each count).
    pub max_conversation_turns: usize,
    /// Idle lifetime of a conversation thread.
    pub conversation_timeout: Duration,
    /// Thinking mode used by `thinkdeep` when the caller passes none.
    pub default_thinking_mode_thinkdeep: ThinkingMode,
    /// Tool names removed from the published descriptor list.
    pub disabled_tools: HashSet<String>,
    /// Upper bound on prompt/step text accepted from the transport, in
    /// characters.
    pub prompt_size_limit: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            default_model: "auto".to_owned(),
            max_conversation_turns: 20,
            conversation_timeout: Duration::from_secs(5 * 3600),
            default_thinking_mode_thinkdeep: ThinkingMode::High,
            disabled_tools: HashSet::new(),
            prompt_size_limit: 50_000,
        }
    }
}

impl ServerSettings {
    /// Parse settings from `env`, applying defaults for unset variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] when a variable is set but
    /// unparseable.
    pub fn from_env(env: &EnvSource) -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        if let Some(model) = env.get("DEFAULT_MODEL") {
            let model = model.trim();
            if !model.is_empty() {
                settings.default_model = model.to_owned();
            }
        }
        if let Some(raw) = env.get("MAX_CONVERSATION_TURNS") {
            settings.max_conversation_turns = parse_var("MAX_CONVERSATION_TURNS", &raw)?;
        }
        if let Some(raw) = env.get("CONVERSATION_TIMEOUT_HOURS") {
            let hours: u64 = parse_var("CONVERSATION_TIMEOUT_HOURS", &raw)?;
            settings.conversation_timeout = Duration::from_secs(hours * 3600);
        }
        if let Some(raw) = env.get("DEFAULT_THINKING_MODE_THINKDEEP") {
            settings.default_thinking_mode_thinkdeep =
                raw.trim().parse().map_err(|message: String| {
                    ConfigError::invalid_env("DEFAULT_THINKING_MODE_THINKDEEP", message)
                })?;
        }
        if let Some(raw) = env.get("DISABLED_TOOLS") {
            settings.disabled_tools = raw
                .split(',')
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect();
        }
        if let Some(raw) = env.get("PROMPT_SIZE_LIMIT") {
            settings.prompt_size_limit = parse_var("PROMPT_SIZE_LIMIT", &raw)?;
        }
        Ok(settings)
    }
}

fn parse_var<T: std::str::FromStr>(var: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid_env(var, e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn fixed(pairs: &[(&str, &str)]) -> EnvSource {
        EnvSource::fixed(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
        )
    }

    mod env_source {
        use super::*;

        #[test]
        fn fixed_source_never_reads_process_env() {
            let env = fixed(&[("A", "1")]);
            assert_eq!(env.get("A").as_deref(), Some("1"));
            assert_eq!(env.get("PATH"), None);
        }

        #[test]
        fn env_file_parsing_strips_comments_and_quotes() {
            use assert_fs::prelude::*;

            let dir = assert_fs::TempDir::new().unwrap();
            let file = dir.child(".env");
            file.write_str(
                "# comment\nOPENAI_API_KEY=\"sk-test\"\nDEFAULT_MODEL='mini'\n\nBROKEN LINE\n",
            )
            .unwrap();
            let env = EnvSource::with_env_file(file.path()).unwrap();
            assert_eq!(env.file.get("OPENAI_API_KEY").map(String::as_str), Some("sk-test"));
            assert_eq!(env.file.get("DEFAULT_MODEL").map(String::as_str), Some("mini"));
            assert!(!env.file.contains_key("BROKEN LINE"));
        }
    }

    mod server_settings {
        use super::*;

        #[test]
        fn defaults_match_contract() {
            let s = ServerSettings::default();
            assert_eq!(s.default_model, "auto");
            assert_eq!(s.max_conversation_turns, 20);
            assert_eq!(s.conversation_timeout, Duration::from_secs(5 * 3600));
            assert_eq!(s.default_thinking_mode_thinkdeep, ThinkingMode::High);
            assert!(s.disabled_tools.is_empty());
        }

        #[test]
        fn variables_override_defaults() {
            let env = fixed(&[
                ("DEFAULT_MODEL", "gpt-5-mini"),
                ("MAX_CONVERSATION_TURNS", "6"),
                ("CONVERSATION_TIMEOUT_HOURS", "1"),
                ("DEFAULT_THINKING_MODE_THINKDEEP", "max"),
                ("DISABLED_TOOLS", "planner, Debug"),
            ]);
            let s = ServerSettings::from_env(&env).unwrap();
            assert_eq!(s.default_model, "gpt-5-mini");
            assert_eq!(s.max_conversation_turns, 6);
            assert_eq!(s.conversation_timeout, Duration::from_secs(3600));
            assert_eq!(s.default_thinking_mode_thinkdeep, ThinkingMode::Max);
            assert!(s.disabled_tools.contains("planner"));
            assert!(s.disabled_tools.contains("debug"));
        }

        #[test]
        fn invalid_number_is_config_error() {
            let env = fixed(&[("MAX_CONVERSATION_TURNS", "many")]);
            let err = ServerSettings::from_env(&env).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidEnv { .. }));
        }

        #[test]
        fn invalid_thinking_mode_is_config_error() {
            let env = fixed(&[("DEFAULT_THINKING_MODE_THINKDEEP", "ultra")]);
            assert!(ServerSettings::from_env(&env).is_err());
        }
    }
}
