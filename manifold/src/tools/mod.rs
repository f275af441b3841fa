//! The tool contract and the simple tools.
//!
//! A tool is a strategy over the shared [`ToolContext`]: it declares a
//! name, a description, and an input schema, and turns validated arguments
//! into content blocks. Multi-step tools are built on
//! [`crate::workflow`] instead of implementing this trait directly.

pub mod chat;
pub mod listmodels;
pub mod schema;
pub mod version;

pub use schema::{SchemaBuilder, validate_input};

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversation::{ConversationStore, ThreadError, Turn};
use crate::providers::{ModelCategory, Provider, ProviderError, ProviderRegistry, ThinkingMode};
use crate::settings::ServerSettings;

/// Error type for tool dispatch and execution.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ToolError {
    /// No such tool (or it is disabled).
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    /// The arguments failed schema validation.
    #[error("invalid arguments at '{path}': {message}")]
    SchemaInvalid {
        /// Path of the offending field.
        path: String,
        /// What was wrong with it.
        message: String,
    },

    /// The prompt text exceeds the transport limit.
    #[error("prompt is too large ({chars} chars, limit {limit})")]
    PromptTooLarge {
        /// Characters received.
        chars: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Upstream provider failure.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Conversation memory failure.
    #[error(transparent)]
    Thread(#[from] ThreadError),

    /// Anything else, tagged with a correlation id for the logs.
    #[error("internal error [{correlation_id}]: {message}")]
    Internal {
        /// Correlation id echoed in the logs.
        correlation_id: Uuid,
        /// Failure description.
        message: String,
    },
}

impl ToolError {
    /// Create an [`ToolError::Internal`] with a fresh correlation id.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        let correlation_id = Uuid::new_v4();
        let message = message.into();
        tracing::error!(%correlation_id, %message, "internal tool error");
        Self::Internal {
            correlation_id,
            message,
        }
    }

    /// Short tag used in structured error payloads.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UnknownTool(_) => "unknown_tool",
            Self::SchemaInvalid { .. } => "schema_invalid",
            Self::PromptTooLarge { .. } => "prompt_too_large",
            Self::Provider(err) => err.kind(),
            Self::Thread(err) => err.kind(),
            Self::Internal { .. } => "internal",
        }
    }
}

/// One element of a tool's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text shown to the host.
    Text {
        /// The text.
        text: String,
    },
    /// Reference to a file the tool wrote (generated code artifacts).
    FileReference {
        /// Absolute path of the artifact.
        path: String,
    },
}

impl ContentBlock {
    /// A text block.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Workflow progression advertised in tool output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// The host must investigate and call again with the next step.
    PauseForInvestigation,
    /// Findings are complete; expert analysis is running.
    ExpertAnalysisPending,
    /// The workflow is finished.
    Complete,
}

/// What a tool returns to the dispatcher.
#[derive(Debug, Clone, Serialize)]
pub struct ToolOutput {
    /// Content blocks, in display order.
    pub blocks: Vec<ContentBlock>,
    /// Workflow status, for multi-step tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<WorkflowStatus>,
    /// Thread id the host should pass back to continue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuation_id: Option<Uuid>,
    /// Model/usage details for the host's bookkeeping.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ToolOutput {
    /// A plain text output.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            blocks: vec![ContentBlock::text(text)],
            status: None,
            continuation_id: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Attach a continuation id.
    #[must_use]
    pub fn with_continuation(mut self, id: Uuid) -> Self {
        self.continuation_id = Some(id);
        self
    }

    /// Attach a workflow status.
    #[must_use]
    pub const fn with_status(mut self, status: WorkflowStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Shared state handed to every tool invocation.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// The provider registry.
    pub registry: Arc<ProviderRegistry>,
    /// The conversation store.
    pub store: Arc<ConversationStore>,
    /// Server settings.
    pub settings: Arc<ServerSettings>,
}

impl ToolContext {
    /// Bundle the process-wide singletons.
    #[must_use]
    pub fn new(
        registry: Arc<ProviderRegistry>,
        store: Arc<ConversationStore>,
        settings: Arc<ServerSettings>,
    ) -> Self {
        Self {
            registry,
            store,
            settings,
        }
    }

    /// Resolve the model a call should use: the explicit request, the
    /// configured default, or, for `"auto"`, the best-ranked model in
    /// the tool's category.
    ///
    /// # Errors
    ///
    /// [`ToolError::Provider`] when nothing routes.
    pub fn resolve_model(
        &self,
        requested: Option<&str>,
        category: ModelCategory,
    ) -> Result<(Arc<dyn Provider>, String), ToolError> {
        let mut name = requested
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.settings.default_model)
            .to_owned();
        if name.eq_ignore_ascii_case("auto") {
            name = self
                .registry
                .list_for_tool(category, 1)
                .into_iter()
                .next()
                .map(|m| m.canonical)
                .ok_or_else(|| {
                    ProviderError::UnknownModel {
                        model: "auto".to_owned(),
                        suggestions: Vec::new(),
                    }
                })?;
        }
        let provider = self.registry.get_provider_for_model(&name)?;
        let canonical = provider.resolve(&name)?;
        Ok((provider, canonical))
    }

    /// Reject prompt text beyond the transport limit.
    ///
    /// # Errors
    ///
    /// [`ToolError::PromptTooLarge`].
    pub fn check_prompt_size(&self, text: &str) -> Result<(), ToolError> {
        let chars = text.chars().count();
        let limit = self.settings.prompt_size_limit;
        if chars > limit {
            return Err(ToolError::PromptTooLarge { chars, limit });
        }
        Ok(())
    }
}

/// Arguments every tool accepts alongside its own.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommonArgs {
    /// Model alias, canonical name, or `"auto"`.
    #[serde(default)]
    pub model: Option<String>,
    /// Sampling temperature.
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Extended-thinking effort.
    #[serde(default)]
    pub thinking_mode: Option<ThinkingMode>,
    /// Thread to continue.
    #[serde(default)]
    pub continuation_id: Option<Uuid>,
    /// Absolute paths of relevant files.
    #[serde(default)]
    pub files: Vec<String>,
    /// Absolute paths of image attachments.
    #[serde(default)]
    pub images: Vec<String>,
    /// Directory for generated artifacts.
    #[serde(default)]
    pub working_directory: Option<String>,
}

/// A published tool descriptor.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    /// Tool name as addressed by `call_tool`.
    pub name: String,
    /// One-paragraph description shown to the host.
    pub description: String,
    /// Input JSON Schema.
    pub input_schema: serde_json::Value,
}

/// The contract every tool satisfies.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name.
    fn name(&self) -> &'static str;

    /// Description published in the descriptor list.
    fn description(&self) -> &'static str;

    /// Input schema published in the descriptor list.
    fn input_schema(&self) -> serde_json::Value;

    /// Model category used for auto-mode selection.
    fn category(&self) -> ModelCategory {
        ModelCategory::Balanced
    }

    /// Execute with schema-validated arguments.
    ///
    /// # Errors
    ///
    /// Any [`ToolError`]; the dispatcher converts it into a structured
    /// error block.
    async fn execute(&self, ctx: &ToolContext, args: serde_json::Value)
    -> Result<ToolOutput, ToolError>;
}

/// Render reconstructed turns into the history block prepended to prompts.
#[must_use]
pub(crate) fn render_history(turns: &[Turn]) -> String {
    let mut out = String::from("=== CONVERSATION HISTORY ===\n");
    for turn in turns {
        let role = match turn.role {
            crate::conversation::Role::User => "user",
            crate::conversation::Role::Assistant => "assistant",
            crate::conversation::Role::System => "system",
        };
        match &turn.tool_name {
            Some(tool) => out.push_str(&format!("[{role} via {tool}] {}\n", turn.content)),
            None => out.push_str(&format!("[{role}] {}\n", turn.content)),
        }
    }
    out.push_str("=== END HISTORY ===\n");
    out
}

/// Map a `ToolError` onto the structured error payload returned to hosts.
#[must_use]
pub fn error_payload(err: &ToolError) -> serde_json::Value {
    let mut payload = serde_json::json!({
        "error": {
            "kind": err.kind(),
            "message": err.to_string(),
        }
    });
    match err {
        ToolError::Provider(ProviderError::UnknownModel { suggestions, .. }) => {
            payload["error"]["suggested_models"] = serde_json::json!(suggestions);
        }
        ToolError::Provider(ProviderError::Restricted { allowed, .. }) => {
            payload["error"]["allowed_models"] = serde_json::json!(allowed);
        }
        ToolError::Provider(ProviderError::RateLimited { retry_after }) => {
            if let Some(secs) = retry_after {
                payload["error"]["retry_after"] = serde_json::json!(secs);
            }
        }
        ToolError::SchemaInvalid { path, .. } => {
            payload["error"]["path"] = serde_json::json!(path);
        }
        _ => {}
    }
    payload
}
