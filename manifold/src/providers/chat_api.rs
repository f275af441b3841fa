//! OpenAI-compatible Chat Completions wire.
//!
//! One implementation serves OpenAI, X.AI, OpenRouter, DIAL, custom
//! endpoints, and the Azure chat path; they differ only in base URL, auth
//! scheme, and (for Azure) deployment-based routing. Models whose
//! capability sets `use_openai_responses_api` are transparently routed
//! through the Responses wire instead.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::error::ProviderError;
use super::http::error_from_response;
use super::images::encode_image;
use super::retry::RetryPolicy;
use super::{
    DEFAULT_TIMEOUT_SECS, FunctionDecl, GenerateRequest, ModelResponse, Provider, Usage,
    effective_temperature,
};
use crate::catalog::{ModelCapabilities, ProviderKind};
use crate::error::ConfigError;

/// How requests authenticate against the endpoint.
#[derive(Clone)]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>` (OpenAI, X.AI, OpenRouter, custom).
    Bearer(String),
    /// A custom header such as `api-key` (Azure) or `Api-Key` (DIAL).
    Header {
        /// Header name.
        name: String,
        /// Header value.
        value: String,
    },
    /// No authentication (local endpoints).
    None,
}

impl std::fmt::Debug for AuthScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bearer(_) => f.write_str("Bearer([REDACTED])"),
            Self::Header { name, .. } => write!(f, "Header({name}: [REDACTED])"),
            Self::None => f.write_str("None"),
        }
    }
}

/// Endpoint configuration for one chat-completions provider.
#[derive(Debug, Clone)]
pub struct ChatApiConfig {
    /// Base URL up to but excluding `/chat/completions`.
    pub base_url: String,
    /// Auth scheme applied to every request.
    pub auth: AuthScheme,
    /// Per-request soft timeout in seconds.
    pub timeout_secs: u64,
    /// When set, route Azure-style: the URL embeds the capability's
    /// `deployment` and this API version instead of the model name.
    pub azure_api_version: Option<String>,
}

impl ChatApiConfig {
    /// Config with the default timeout and bearer auth.
    #[must_use]
    pub fn bearer(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth: AuthScheme::Bearer(api_key.into()),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            azure_api_version: None,
        }
    }
}

/// A provider speaking the OpenAI chat-completions dialect.
pub struct ChatApiProvider {
    kind: ProviderKind,
    pub(crate) config: ChatApiConfig,
    caps: HashMap<String, ModelCapabilities>,
    /// Lowercased names this provider must refuse even though the caller
    /// may ask for them (custom endpoints refuse OpenRouter models so the
    /// router falls through).
    refusals: HashSet<String>,
    pub(crate) http: reqwest::Client,
    pub(crate) retry: RetryPolicy,
}

impl std::fmt::Debug for ChatApiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatApiProvider")
            .field("kind", &self.kind)
            .field("base_url", &self.config.base_url)
            .field("models", &self.caps.len())
            .finish_non_exhaustive()
    }
}

impl ChatApiProvider {
    /// Create a provider over `models`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::HttpClient`] when the HTTP client cannot be built.
    pub fn new(
        kind: ProviderKind,
        config: ChatApiConfig,
        models: Vec<ModelCapabilities>,
    ) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        let caps = models
            .into_iter()
            .map(|cap| (cap.model_name.clone(), cap))
            .collect();
        Ok(Self {
            kind,
            config,
            caps,
            refusals: HashSet::new(),
            http,
            retry: RetryPolicy::default(),
        })
    }

    /// Refuse the given lowercased names even if a caller asks for them.
    #[must_use]
    pub fn with_refusals(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.refusals = names.into_iter().map(|n| n.to_lowercase()).collect();
        self
    }

    /// Override the retry policy (tests and latency-sensitive setups).
    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The URL a request for `cap` is posted to.
    ///
    /// Azure routes through the deployment id, never the model name.
    pub(crate) fn request_url(&self, cap: &ModelCapabilities) -> String {
        match (&self.config.azure_api_version, cap.deployment.as_deref()) {
            (Some(version), Some(deployment)) => format!(
                "{}/openai/deployments/{deployment}/chat/completions?api-version={version}",
                self.config.base_url.trim_end_matches('/')
            ),
            _ => format!(
                "{}/chat/completions",
                self.config.base_url.trim_end_matches('/')
            ),
        }
    }

    pub(crate) fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.auth {
            AuthScheme::Bearer(key) => request.bearer_auth(key),
            AuthScheme::Header { name, value } => request.header(name.as_str(), value.as_str()),
            AuthScheme::None => request,
        }
    }

    /// Build the wire body for `request` against `cap`.
    ///
    /// Returns the body plus metadata diagnostics (temperature adjustments,
    /// dropped options).
    pub(crate) async fn build_body(
        &self,
        cap: &ModelCapabilities,
        request: &GenerateRequest,
    ) -> Result<(ChatCompletionRequest, BTreeMap<String, serde_json::Value>), ProviderError> {
        let mut metadata = BTreeMap::new();

        let (temperature, diagnostic) = effective_temperature(cap, request.temperature);
        if let Some(diag) = diagnostic {
            metadata.insert("temperature_note".to_owned(), serde_json::Value::String(diag));
        }

        let mut messages = Vec::new();
        let mut prompt = request.prompt.clone();
        if let Some(system) = &request.system_prompt {
            if cap.supports_system_prompts {
                messages.push(WireMessage {
                    role: "system",
                    content: WireContent::Text(system.clone()),
                });
            } else {
                // Models without a system role get the instructions inlined
                // ahead of the user text.
                prompt = format!("{system}\n\n{prompt}");
            }
        }

        let content = if request.images.is_empty() {
            WireContent::Text(prompt)
        } else if !cap.supports_images {
            return Err(ProviderError::InvalidArgument(format!(
                "model '{}' does not accept image input",
                cap.model_name
            )));
        } else {
            let mut parts = vec![WirePart::Text { text: prompt }];
            for path in &request.images {
                let image = encode_image(path).await?;
                parts.push(WirePart::ImageUrl {
                    image_url: WireImageUrl {
                        url: image.data_url(),
                    },
                });
            }
            WireContent::Parts(parts)
        };
        messages.push(WireMessage {
            role: "user",
            content,
        });

        let (max_tokens, max_completion_tokens) = match request.max_output_tokens {
            Some(max) if requires_max_completion_tokens(&cap.model_name) => (None, Some(max)),
            Some(max) => (Some(max), None),
            None => (None, None),
        };

        let reasoning_effort = request
            .thinking
            .filter(|_| cap.supports_extended_thinking)
            .map(super::ThinkingMode::reasoning_effort);

        let response_format = if request.json_mode {
            if cap.supports_json_mode {
                Some(ResponseFormat {
                    format_type: "json_object",
                })
            } else {
                metadata.insert(
                    "json_mode_note".to_owned(),
                    serde_json::Value::String(format!(
                        "json mode requested but '{}' does not support it",
                        cap.model_name
                    )),
                );
                None
            }
        } else {
            None
        };

        let tools = (!request.functions.is_empty() && cap.supports_function_calling).then(|| {
            request
                .functions
                .iter()
                .cloned()
                .map(|function| WireTool {
                    tool_type: "function",
                    function,
                })
                .collect()
        });

        Ok((
            ChatCompletionRequest {
                model: cap.model_name.clone(),
                messages,
                temperature,
                max_tokens,
                max_completion_tokens,
                reasoning_effort,
                response_format,
                tools,
            },
            metadata,
        ))
    }

    fn parse_response(
        &self,
        cap: &ModelCapabilities,
        response: ChatCompletionResponse,
        prompt: &str,
        mut metadata: BTreeMap<String, serde_json::Value>,
    ) -> Result<ModelResponse, ProviderError> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Internal("no choices in response".to_owned()))?;
        let content = choice.message.content.unwrap_or_default();
        if content.is_empty() && choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(ProviderError::Refused(
                "completion blocked by upstream content filter".to_owned(),
            ));
        }

        let usage = response.usage.map_or_else(
            || Usage::estimated(prompt, &content),
            |usage| {
                if let Some(details) = &usage.completion_tokens_details
                    && details.reasoning_tokens > 0
                {
                    metadata.insert(
                        "reasoning_tokens".to_owned(),
                        serde_json::Value::from(details.reasoning_tokens),
                    );
                }
                Usage {
                    input_tokens: usage.prompt_tokens,
                    output_tokens: usage.completion_tokens,
                    total_tokens: usage.total_tokens,
                    estimated: false,
                }
            },
        );

        Ok(ModelResponse {
            content,
            usage,
            model_name: cap.model_name.clone(),
            friendly_name: cap.friendly_name.clone(),
            provider: self.kind,
            finish_reason: choice.finish_reason,
            metadata,
        })
    }
}

#[async_trait]
impl Provider for ChatApiProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn capabilities_map(&self) -> &HashMap<String, ModelCapabilities> {
        &self.caps
    }

    fn resolve(&self, name: &str) -> Result<String, ProviderError> {
        if self.refusals.contains(&name.to_lowercase()) {
            return Err(ProviderError::unknown_model(name, &self.caps));
        }
        self.caps
            .values()
            .find(|cap| cap.matches(name))
            .map(|cap| cap.model_name.clone())
            .ok_or_else(|| ProviderError::unknown_model(name, &self.caps))
    }

    #[instrument(skip(self, request), fields(provider = %self.kind, model = %request.model))]
    async fn generate(&self, request: GenerateRequest) -> Result<ModelResponse, ProviderError> {
        let canonical = self.resolve(&request.model)?;
        let cap = self
            .caps
            .get(&canonical)
            .ok_or_else(|| ProviderError::unknown_model(&request.model, &self.caps))?;

        if cap.use_openai_responses_api {
            return self.generate_responses(cap, &request).await;
        }

        let (body, metadata) = self.build_body(cap, &request).await?;
        let url = self.request_url(cap);
        debug!(url = %url, "sending chat-completions request");

        let response = self
            .retry
            .run(&canonical, |_attempt| {
                let body = &body;
                let url = &url;
                async move {
                    let response = self
                        .apply_auth(self.http.post(url.as_str()))
                        .json(body)
                        .send()
                        .await?;
                    if !response.status().is_success() {
                        return Err(error_from_response(response).await);
                    }
                    response
                        .json::<ChatCompletionResponse>()
                        .await
                        .map_err(|e| ProviderError::Internal(format!("undecodable response: {e}")))
                }
            })
            .await?;

        self.parse_response(cap, response, &request.prompt, metadata)
    }
}

/// `max_completion_tokens` replaces `max_tokens` for the o-series and
/// gpt-5 family; the old field is rejected there.
#[must_use]
pub(crate) fn requires_max_completion_tokens(model_name: &str) -> bool {
    let name = model_name.split('/').next_back().unwrap_or(model_name);
    name.starts_with("o1") || name.starts_with("o3") || name.starts_with("o4") || name.starts_with("gpt-5")
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Chat-completions request body.
#[derive(Debug, Serialize)]
pub(crate) struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<WireTool>>,
}

#[derive(Debug, Serialize)]
pub(crate) struct WireMessage {
    pub role: &'static str,
    pub content: WireContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(crate) enum WireContent {
    Text(String),
    Parts(Vec<WirePart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum WirePart {
    Text { text: String },
    ImageUrl { image_url: WireImageUrl },
}

#[derive(Debug, Serialize)]
pub(crate) struct WireImageUrl {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct ResponseFormat {
    #[serde(rename = "type")]
    pub format_type: &'static str,
}

#[derive(Debug, Serialize)]
pub(crate) struct WireTool {
    #[serde(rename = "type")]
    pub tool_type: &'static str,
    pub function: FunctionDecl,
}

/// Chat-completions response body (only the fields the core reads).
#[derive(Debug, Deserialize)]
pub(crate) struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<WireChoice>,
    pub usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireChoice {
    pub message: WireResponseMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireResponseMessage {
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    pub completion_tokens_details: Option<WireTokenDetails>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireTokenDetails {
    #[serde(default)]
    pub reasoning_tokens: u64,
}
