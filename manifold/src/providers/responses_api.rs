//! OpenAI Responses API wire.
//!
//! Reasoning models such as `o3-pro`, `gpt-5-pro`, and `gpt-5-codex` are
//! served here instead of chat-completions: the request wraps content
//! under `input`, effort rides in a `reasoning` object, and the output is
//! a list of typed items whose `message` entries carry the text.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::chat_api::ChatApiProvider;
use super::error::ProviderError;
use super::http::error_from_response;
use super::images::encode_image;
use super::{GenerateRequest, ModelResponse, Usage, effective_temperature};
use crate::catalog::ModelCapabilities;

impl ChatApiProvider {
    /// Serve `request` through the Responses API.
    pub(crate) async fn generate_responses(
        &self,
        cap: &ModelCapabilities,
        request: &GenerateRequest,
    ) -> Result<ModelResponse, ProviderError> {
        let (body, metadata) = build_body(cap, request).await?;
        let url = format!(
            "{}/responses",
            self.config.base_url.trim_end_matches('/')
        );
        debug!(url = %url, "sending responses-api request");

        let response = self
            .retry
            .run(&cap.model_name, |_attempt| {
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
                        .json::<ResponsesResponse>()
                        .await
                        .map_err(|e| ProviderError::Internal(format!("undecodable response: {e}")))
                }
            })
            .await?;

        parse_response(self, cap, response, &request.prompt, metadata)
    }
}

/// Build the Responses API body for `request` against `cap`.
pub(crate) async fn build_body(
    cap: &ModelCapabilities,
    request: &GenerateRequest,
) -> Result<(ResponsesRequest, BTreeMap<String, serde_json::Value>), ProviderError> {
    let mut metadata = BTreeMap::new();

    let (temperature, diagnostic) = effective_temperature(cap, request.temperature);
    if let Some(diag) = diagnostic {
        metadata.insert("temperature_note".to_owned(), serde_json::Value::String(diag));
    }

    let mut input = Vec::new();
    if let Some(system) = &request.system_prompt
        && cap.supports_system_prompts
    {
        input.push(ResponsesMessage {
            role: "developer",
            content: vec![ResponsesPart::InputText {
                text: system.clone(),
            }],
        });
    }

    let mut parts = Vec::new();
    let mut prompt = request.prompt.clone();
    if let Some(system) = &request.system_prompt
        && !cap.supports_system_prompts
    {
        prompt = format!("{system}\n\n{prompt}");
    }
    parts.push(ResponsesPart::InputText { text: prompt });
    if !request.images.is_empty() {
        if !cap.supports_images {
            return Err(ProviderError::InvalidArgument(format!(
                "model '{}' does not accept image input",
                cap.model_name
            )));
        }
        for path in &request.images {
            let image = encode_image(path).await?;
            parts.push(ResponsesPart::InputImage {
                image_url: image.data_url(),
            });
        }
    }
    input.push(ResponsesMessage {
        role: "user",
        content: parts,
    });

    let reasoning = request
        .thinking
        .filter(|_| cap.supports_extended_thinking)
        .map(|mode| Reasoning {
            effort: mode.reasoning_effort(),
        });

    Ok((
        ResponsesRequest {
            model: cap.model_name.clone(),
            input,
            max_output_tokens: request.max_output_tokens,
            temperature,
            reasoning,
        },
        metadata,
    ))
}

fn parse_response(
    provider: &ChatApiProvider,
    cap: &ModelCapabilities,
    response: ResponsesResponse,
    prompt: &str,
    mut metadata: BTreeMap<String, serde_json::Value>,
) -> Result<ModelResponse, ProviderError> {
    let mut content = String::new();
    for item in &response.output {
        if item.kind == "message" {
            for part in &item.content {
                content.push_str(&part.text);
            }
        }
    }
    if content.is_empty() && response.output.is_empty() {
        return Err(ProviderError::Internal(
            "responses payload contained no output items".to_owned(),
        ));
    }

    let usage = response.usage.map_or_else(
        || Usage::estimated(prompt, &content),
        |usage| {
            if let Some(details) = &usage.output_tokens_details
                && details.reasoning_tokens > 0
            {
                metadata.insert(
                    "reasoning_tokens".to_owned(),
                    serde_json::Value::from(details.reasoning_tokens),
                );
            }
            Usage {
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
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
        provider: super::Provider::kind(provider),
        finish_reason: response.status,
        metadata,
    })
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Responses API request body.
#[derive(Debug, Serialize)]
pub(crate) struct ResponsesRequest {
    pub model: String,
    pub input: Vec<ResponsesMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<Reasoning>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ResponsesMessage {
    pub role: &'static str,
    pub content: Vec<ResponsesPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ResponsesPart {
    InputText { text: String },
    InputImage { image_url: String },
}

#[derive(Debug, Serialize)]
pub(crate) struct Reasoning {
    pub effort: &'static str,
}

/// Responses API response body (only the fields the core reads).
#[derive(Debug, Deserialize)]
pub(crate) struct ResponsesResponse {
    #[serde(default)]
    pub output: Vec<ResponsesOutputItem>,
    pub usage: Option<ResponsesUsage>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponsesOutputItem {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub content: Vec<ResponsesOutputPart>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponsesOutputPart {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponsesUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    pub output_tokens_details: Option<ResponsesTokenDetails>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponsesTokenDetails {
    #[serde(default)]
    pub reasoning_tokens: u64,
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
            context_window: 200_000,
            max_output_tokens: 100_000,
            intelligence_score: 15,
            supports_extended_thinking: true,
            supports_json_mode: false,
            supports_function_calling: true,
            supports_images: false,
            supports_temperature: false,
            supports_system_prompts: true,
            temperature_constraint: None,
            aliases: vec![],
            deployment: None,
            use_openai_responses_api: true,
            allow_code_generation: false,
        }
    }

    #[test]
    fn body_wraps_content_under_input() {
        let req = GenerateRequest::new("o3-pro", "prove it")
            .with_system_prompt("be rigorous")
            .with_thinking(ThinkingMode::High);
        let (body, _) = tokio_test::block_on(build_body(&cap("o3-pro"), &req)).unwrap();
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["model"], "o3-pro");
        assert_eq!(json["input"][0]["role"], "developer");
        assert_eq!(json["input"][1]["role"], "user");
        assert_eq!(json["input"][1]["content"][0]["type"], "input_text");
        assert_eq!(json["input"][1]["content"][0]["text"], "prove it");
        assert_eq!(json["reasoning"]["effort"], "high");
        // Reasoning models take no sampling parameters.
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn output_items_are_concatenated_from_message_entries() {
        let response: ResponsesResponse = serde_json::from_value(serde_json::json!({
            "status": "completed",
            "output": [
                {"type": "reasoning", "content": []},
                {"type": "message", "content": [{"type": "output_text", "text": "part one "}]},
                {"type": "message", "content": [{"type": "output_text", "text": "part two"}]}
            ],
            "usage": {
                "input_tokens": 20,
                "output_tokens": 400,
                "total_tokens": 420,
                "output_tokens_details": {"reasoning_tokens": 350}
            }
        }))
        .unwrap();

        let provider = ChatApiProvider::new(
            crate::catalog::ProviderKind::Openai,
            super::super::chat_api::ChatApiConfig::bearer("https://api.example.com/v1", "k"),
            vec![cap("o3-pro")],
        )
        .unwrap();
        let parsed = parse_response(
            &provider,
            &cap("o3-pro"),
            response,
            "prove it",
            BTreeMap::new(),
        )
        .unwrap();

        assert_eq!(parsed.content, "part one part two");
        assert_eq!(parsed.usage.total_tokens, 420);
        assert_eq!(parsed.metadata["reasoning_tokens"], 350);
        assert_eq!(parsed.finish_reason.as_deref(), Some("completed"));
    }

    #[test]
    fn empty_output_is_internal_error() {
        let response: ResponsesResponse =
            serde_json::from_value(serde_json::json!({"output": []})).unwrap();
        let provider = ChatApiProvider::new(
            crate::catalog::ProviderKind::Openai,
            super::super::chat_api::ChatApiConfig::bearer("https://api.example.com/v1", "k"),
            vec![cap("o3-pro")],
        )
        .unwrap();
        let err = parse_response(&provider, &cap("o3-pro"), response, "p", BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, ProviderError::Internal(_)));
    }
}
