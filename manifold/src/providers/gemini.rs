//! Native Google Gemini wire.
//!
//! Request shape: `contents` with typed `parts`, a `systemInstruction`
//! block, and `generationConfig` carrying sampling plus the
//! extended-thinking budget derived from the caller's thinking mode.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::error::ProviderError;
use super::http::error_from_response;
use super::images::encode_image;
use super::retry::RetryPolicy;
use super::{
    DEFAULT_TIMEOUT_SECS, GenerateRequest, ModelResponse, Provider, Usage, effective_temperature,
};
use crate::catalog::{ModelCapabilities, ProviderKind};
use crate::error::ConfigError;

/// Default Gemini endpoint; override with `GEMINI_API_URL`.
pub const GEMINI_API_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Configuration for the Gemini provider.
#[derive(Clone)]
pub struct GeminiConfig {
    /// API key sent in the `x-goog-api-key` header.
    pub api_key: String,
    /// Endpoint base URL.
    pub base_url: String,
    /// Per-request soft timeout in seconds.
    pub timeout_secs: u64,
}

impl std::fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl GeminiConfig {
    /// Config with the default endpoint and timeout.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: GEMINI_API_BASE_URL.to_owned(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Point at a different endpoint (proxies, regional hosts).
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

/// The Google Gemini provider.
pub struct GeminiProvider {
    config: GeminiConfig,
    caps: HashMap<String, ModelCapabilities>,
    http: reqwest::Client,
    retry: RetryPolicy,
}

impl std::fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("base_url", &self.config.base_url)
            .field("models", &self.caps.len())
            .finish_non_exhaustive()
    }
}

impl GeminiProvider {
    /// Create a provider over `models`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::HttpClient`] when the HTTP client cannot be built.
    pub fn new(config: GeminiConfig, models: Vec<ModelCapabilities>) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        let caps = models
            .into_iter()
            .map(|cap| (cap.model_name.clone(), cap))
            .collect();
        Ok(Self {
            config,
            caps,
            http,
            retry: RetryPolicy::default(),
        })
    }

    fn request_url(&self, canonical: &str) -> String {
        format!(
            "{}/v1beta/models/{canonical}:generateContent",
            self.config.base_url.trim_end_matches('/')
        )
    }

    pub(crate) async fn build_body(
        &self,
        cap: &ModelCapabilities,
        request: &GenerateRequest,
    ) -> Result<(GeminiRequest, BTreeMap<String, serde_json::Value>), ProviderError> {
        let mut metadata = BTreeMap::new();

        let (temperature, diagnostic) = effective_temperature(cap, request.temperature);
        if let Some(diag) = diagnostic {
            metadata.insert("temperature_note".to_owned(), serde_json::Value::String(diag));
        }

        let mut parts = Vec::new();
        let mut prompt = request.prompt.clone();
        let system_instruction = match &request.system_prompt {
            Some(system) if cap.supports_system_prompts => Some(GeminiContent {
                role: None,
                parts: vec![GeminiPart::Text {
                    text: system.clone(),
                }],
            }),
            Some(system) => {
                prompt = format!("{system}\n\n{prompt}");
                None
            }
            None => None,
        };
        parts.push(GeminiPart::Text { text: prompt });

        if !request.images.is_empty() {
            if !cap.supports_images {
                return Err(ProviderError::InvalidArgument(format!(
                    "model '{}' does not accept image input",
                    cap.model_name
                )));
            }
            for path in &request.images {
                let image = encode_image(path).await?;
                parts.push(GeminiPart::InlineData {
                    inline_data: GeminiBlob {
                        mime_type: image.mime,
                        data: image.data,
                    },
                });
            }
        }

        let thinking_config = request
            .thinking
            .filter(|_| cap.supports_extended_thinking)
            .map(|mode| ThinkingConfig {
                thinking_budget: mode.budget_tokens(),
            });

        let response_mime_type = (request.json_mode && cap.supports_json_mode)
            .then(|| "application/json".to_owned());

        Ok((
            GeminiRequest {
                contents: vec![GeminiContent {
                    role: Some("user"),
                    parts,
                }],
                system_instruction,
                generation_config: GenerationConfig {
                    temperature,
                    max_output_tokens: request.max_output_tokens,
                    thinking_config,
                    response_mime_type,
                },
            },
            metadata,
        ))
    }

    fn parse_response(
        &self,
        cap: &ModelCapabilities,
        response: GeminiResponse,
        prompt: &str,
        mut metadata: BTreeMap<String, serde_json::Value>,
    ) -> Result<ModelResponse, ProviderError> {
        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| match response.prompt_feedback {
                Some(feedback) if feedback.block_reason.is_some() => ProviderError::Refused(
                    format!(
                        "prompt blocked upstream: {}",
                        feedback.block_reason.unwrap_or_default()
                    ),
                ),
                _ => ProviderError::Internal("no candidates in response".to_owned()),
            })?;

        let content: String = candidate
            .content
            .map(|c| c.parts.into_iter().map(|p| p.text).collect::<Vec<_>>().join(""))
            .unwrap_or_default();
        if content.is_empty() && candidate.finish_reason.as_deref() == Some("SAFETY") {
            return Err(ProviderError::Refused(
                "completion blocked by upstream safety filter".to_owned(),
            ));
        }

        let usage = response.usage_metadata.map_or_else(
            || Usage::estimated(prompt, &content),
            |usage| {
                if usage.thoughts_token_count > 0 {
                    metadata.insert(
                        "reasoning_tokens".to_owned(),
                        serde_json::Value::from(usage.thoughts_token_count),
                    );
                }
                Usage {
                    input_tokens: usage.prompt_token_count,
                    output_tokens: usage.candidates_token_count,
                    total_tokens: usage.total_token_count,
                    estimated: false,
                }
            },
        );

        Ok(ModelResponse {
            content,
            usage,
            model_name: cap.model_name.clone(),
            friendly_name: cap.friendly_name.clone(),
            provider: ProviderKind::Google,
            finish_reason: candidate.finish_reason,
            metadata,
        })
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    fn capabilities_map(&self) -> &HashMap<String, ModelCapabilities> {
        &self.caps
    }

    #[instrument(skip(self, request), fields(provider = "google", model = %request.model))]
    async fn generate(&self, request: GenerateRequest) -> Result<ModelResponse, ProviderError> {
        let canonical = self.resolve(&request.model)?;
        let cap = self
            .caps
            .get(&canonical)
            .ok_or_else(|| ProviderError::unknown_model(&request.model, &self.caps))?;

        let (body, metadata) = self.build_body(cap, &request).await?;
        let url = self.request_url(&canonical);
        debug!(url = %url, "sending generateContent request");

        let response = self
            .retry
            .run(&canonical, |_attempt| {
                let body = &body;
                let url = &url;
                async move {
                    let response = self
                        .http
                        .post(url.as_str())
                        .header("x-goog-api-key", &self.config.api_key)
                        .json(body)
                        .send()
                        .await?;
                    if !response.status().is_success() {
                        return Err(error_from_response(response).await);
                    }
                    response
                        .json::<GeminiResponse>()
                        .await
                        .map_err(|e| ProviderError::Internal(format!("undecodable response: {e}")))
                }
            })
            .await?;

        self.parse_response(cap, response, &request.prompt, metadata)
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// `generateContent` request body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GeminiRequest {
    pub contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<GeminiContent>,
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
pub(crate) struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<&'static str>,
    pub parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(crate) enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiBlob,
    },
}

#[derive(Debug, Serialize)]
pub(crate) struct GeminiBlob {
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_config: Option<ThinkingConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ThinkingConfig {
    pub thinking_budget: u32,
}

/// `generateContent` response body (only the fields the core reads).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GeminiResponse {
    #[serde(default)]
    pub candidates: Vec<GeminiCandidate>,
    pub usage_metadata: Option<GeminiUsageMetadata>,
    pub prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GeminiCandidate {
    pub content: Option<GeminiResponseContent>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GeminiResponseContent {
    #[serde(default)]
    pub parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GeminiResponsePart {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GeminiUsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u64,
    #[serde(default)]
    pub candidates_token_count: u64,
    #[serde(default)]
    pub total_token_count: u64,
    #[serde(default)]
    pub thoughts_token_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GeminiPromptFeedback {
    pub block_reason: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::providers::ThinkingMode;

    fn cap(name: &str) -> ModelCapabilities {
        ModelCapabilities {
            model_name: name.to_owned(),
            friendly_name: name.to_owned(),
            context_window: 1_000_000,
            max_output_tokens: 65_000,
            intelligence_score: 16,
            supports_extended_thinking: true,
            supports_json_mode: true,
            supports_function_calling: true,
            supports_images: true,
            supports_temperature: true,
            supports_system_prompts: true,
            temperature_constraint: None,
            aliases: vec!["pro".to_owned()],
            deployment: None,
            use_openai_responses_api: false,
            allow_code_generation: false,
        }
    }

    fn provider() -> GeminiProvider {
        GeminiProvider::new(GeminiConfig::new("test-key"), vec![cap("gemini-2.5-pro")]).unwrap()
    }

    #[test]
    fn url_targets_generate_content_for_canonical_name() {
        let p = provider();
        assert_eq!(
            p.request_url("gemini-2.5-pro"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-pro:generateContent"
        );
    }

    #[test]
    fn custom_endpoint_is_honoured() {
        let p = GeminiProvider::new(
            GeminiConfig::new("k").base_url("https://proxy.internal/gemini/"),
            vec![cap("gemini-2.5-flash")],
        )
        .unwrap();
        assert!(
            p.request_url("gemini-2.5-flash")
                .starts_with("https://proxy.internal/gemini/v1beta/")
        );
    }

    #[test]
    fn body_carries_contents_system_instruction_and_thinking_budget() {
        let p = provider();
        let req = GenerateRequest::new("pro", "summarize this")
            .with_system_prompt("be short")
            .with_thinking(ThinkingMode::Low)
            .with_temperature(0.4)
            .with_max_output_tokens(2048);
        let (body, _) =
            tokio_test::block_on(p.build_body(p.capabilities("pro").unwrap(), &req)).unwrap();
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "summarize this");
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "be short");
        assert_eq!(json["generationConfig"]["temperature"], 0.4);
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 2048);
        assert_eq!(
            json["generationConfig"]["thinkingConfig"]["thinkingBudget"],
            2048
        );
    }

    #[test]
    fn images_become_inline_data_parts() {
        let p = provider();
        let req = GenerateRequest::new("pro", "what is this")
            .with_images(vec!["data:image/png;base64,QUJD".into()]);
        let (body, _) =
            tokio_test::block_on(p.build_body(p.capabilities("pro").unwrap(), &req)).unwrap();
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json["contents"][0]["parts"][1]["inlineData"]["mimeType"],
            "image/png"
        );
        assert_eq!(json["contents"][0]["parts"][1]["inlineData"]["data"], "QUJD");
    }

    #[test]
    fn json_mode_sets_response_mime_type() {
        let p = provider();
        let mut req = GenerateRequest::new("pro", "emit json");
        req.json_mode = true;
        let (body, _) =
            tokio_test::block_on(p.build_body(p.capabilities("pro").unwrap(), &req)).unwrap();
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json["generationConfig"]["responseMimeType"],
            "application/json"
        );
    }

    #[test]
    fn parses_candidates_and_usage() {
        let p = provider();
        let response: GeminiResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{
                "content": {"parts": [{"text": "Answer: "}, {"text": "42"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {
                "promptTokenCount": 12,
                "candidatesTokenCount": 3,
                "totalTokenCount": 15,
                "thoughtsTokenCount": 7
            }
        }))
        .unwrap();
        let parsed = p
            .parse_response(&cap("gemini-2.5-pro"), response, "q", BTreeMap::new())
            .unwrap();
        assert_eq!(parsed.content, "Answer: 42");
        assert_eq!(parsed.usage.total_tokens, 15);
        assert_eq!(parsed.metadata["reasoning_tokens"], 7);
        assert_eq!(parsed.provider, ProviderKind::Google);
    }

    #[test]
    fn blocked_prompt_is_refused() {
        let p = provider();
        let response: GeminiResponse = serde_json::from_value(serde_json::json!({
            "candidates": [],
            "promptFeedback": {"blockReason": "SAFETY"}
        }))
        .unwrap();
        let err = p
            .parse_response(&cap("gemini-2.5-pro"), response, "q", BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, ProviderError::Refused(_)));
    }

    #[test]
    fn safety_finish_without_content_is_refused() {
        let p = provider();
        let response: GeminiResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{"finishReason": "SAFETY"}]
        }))
        .unwrap();
        let err = p
            .parse_response(&cap("gemini-2.5-pro"), response, "q", BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, ProviderError::Refused(_)));
    }
}
