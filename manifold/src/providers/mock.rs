//! Scripted provider for tests.
//!
//! [`MockProvider`] answers from a canned list of responses, records every
//! request it sees, and can be told to fail. Dispatcher, tool, and
//! workflow tests use it to assert on provider traffic without a network.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::error::ProviderError;
use super::{GenerateRequest, ModelResponse, Provider, Usage};
use crate::catalog::{ModelCapabilities, ProviderKind};

/// A provider that replays scripted responses.
#[derive(Debug)]
pub struct MockProvider {
    kind: ProviderKind,
    caps: HashMap<String, ModelCapabilities>,
    responses: Vec<String>,
    next_response: AtomicUsize,
    fail_with: Option<ProviderError>,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl MockProvider {
    /// A mock OpenAI-flavoured provider serving `models`.
    #[must_use]
    pub fn new(kind: ProviderKind, models: Vec<ModelCapabilities>) -> Self {
        let caps = models
            .into_iter()
            .map(|cap| (cap.model_name.clone(), cap))
            .collect();
        Self {
            kind,
            caps,
            responses: vec!["mock response".to_owned()],
            next_response: AtomicUsize::new(0),
            fail_with: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Replace the scripted responses (cycled when exhausted).
    #[must_use]
    pub fn with_responses(mut self, responses: Vec<String>) -> Self {
        if !responses.is_empty() {
            self.responses = responses;
        }
        self
    }

    /// Fail every generate call with `error`.
    #[must_use]
    pub fn failing_with(mut self, error: ProviderError) -> Self {
        self.fail_with = Some(error);
        self
    }

    /// Requests seen so far, in order.
    #[must_use]
    pub fn recorded_requests(&self) -> Vec<GenerateRequest> {
        self.requests
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Number of generate calls made.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    /// A minimal capability descriptor for mock models.
    #[must_use]
    pub fn capability(name: &str, intelligence_score: u8) -> ModelCapabilities {
        ModelCapabilities {
            model_name: name.to_owned(),
            friendly_name: name.to_owned(),
            context_window: 128_000,
            max_output_tokens: 16_000,
            intelligence_score,
            supports_extended_thinking: false,
            supports_json_mode: true,
            supports_function_calling: true,
            supports_images: false,
            supports_temperature: true,
            supports_system_prompts: true,
            temperature_constraint: None,
            aliases: Vec::new(),
            deployment: None,
            use_openai_responses_api: false,
            allow_code_generation: false,
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn capabilities_map(&self) -> &HashMap<String, ModelCapabilities> {
        &self.caps
    }

    async fn generate(&self, request: GenerateRequest) -> Result<ModelResponse, ProviderError> {
        let canonical = self.resolve(&request.model)?;
        let cap = self
            .caps
            .get(&canonical)
            .ok_or_else(|| ProviderError::unknown_model(&request.model, &self.caps))?;
        let prompt = request.prompt.clone();
        if let Ok(mut guard) = self.requests.lock() {
            guard.push(request);
        }
        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }
        let index = self.next_response.fetch_add(1, Ordering::SeqCst);
        let content = self.responses[index % self.responses.len()].clone();
        Ok(ModelResponse {
            usage: Usage::estimated(&prompt, &content),
            content,
            model_name: canonical,
            friendly_name: cap.friendly_name.clone(),
            provider: self.kind,
            finish_reason: Some("stop".to_owned()),
            metadata: std::collections::BTreeMap::new(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cycles_scripted_responses_and_records_requests() {
        let mock = MockProvider::new(
            ProviderKind::Openai,
            vec![MockProvider::capability("test-model", 10)],
        )
        .with_responses(vec!["one".to_owned(), "two".to_owned()]);

        let first = mock
            .generate(GenerateRequest::new("test-model", "a"))
            .await
            .unwrap();
        let second = mock
            .generate(GenerateRequest::new("test-model", "b"))
            .await
            .unwrap();
        let third = mock
            .generate(GenerateRequest::new("test-model", "c"))
            .await
            .unwrap();

        assert_eq!(first.content, "one");
        assert_eq!(second.content, "two");
        assert_eq!(third.content, "one");
        assert_eq!(mock.call_count(), 3);
        assert_eq!(mock.recorded_requests()[1].prompt, "b");
    }

    #[tokio::test]
    async fn failing_mock_returns_the_injected_error() {
        let mock = MockProvider::new(
            ProviderKind::Openai,
            vec![MockProvider::capability("test-model", 10)],
        )
        .failing_with(ProviderError::RateLimited { retry_after: Some(3) });

        let err = mock
            .generate(GenerateRequest::new("test-model", "a"))
            .await
            .unwrap_err();
        assert_eq!(err.retry_after(), Some(3));
    }
}
