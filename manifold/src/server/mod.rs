//! Tool dispatch over an opaque transport.
//!
//! The transport (owned by the server binary) turns its framing into two
//! entry points: `list_tools` → [`Dispatcher::descriptors`] and
//! `call_tool` → [`Dispatcher::dispatch`]. The dispatcher validates
//! arguments against the published schema, runs the tool, and converts
//! failures into structured error blocks rather than transport errors.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::tools::chat::ChatTool;
use crate::tools::listmodels::ListModelsTool;
use crate::tools::version::VersionTool;
use crate::tools::{
    ContentBlock, Tool, ToolContext, ToolDescriptor, ToolError, ToolOutput, WorkflowStatus,
    error_payload, validate_input,
};
use crate::workflow::{DebugWorkflow, PlannerWorkflow, ThinkDeepWorkflow, WorkflowEngine};

/// What `call_tool` hands back to the transport.
#[derive(Debug, Clone, Serialize)]
pub struct CallResult {
    /// Content blocks in display order.
    pub content: Vec<ContentBlock>,
    /// True when the blocks describe a failure.
    #[serde(rename = "isError")]
    pub is_error: bool,
    /// Workflow status, for multi-step tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<WorkflowStatus>,
    /// Thread id the host passes back to continue the conversation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuation_id: Option<Uuid>,
}

impl CallResult {
    fn from_output(output: ToolOutput) -> Self {
        Self {
            content: output.blocks,
            is_error: false,
            status: output.status,
            continuation_id: output.continuation_id,
        }
    }

    fn from_error(err: &ToolError) -> Self {
        let payload = error_payload(err);
        let text = serde_json::to_string_pretty(&payload).unwrap_or_else(|_| err.to_string());
        Self {
            content: vec![ContentBlock::text(text)],
            is_error: true,
            status: None,
            continuation_id: None,
        }
    }
}

/// Routes `call_tool` requests onto tool strategies.
pub struct Dispatcher {
    tools: Vec<Arc<dyn Tool>>,
    ctx: ToolContext,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("tools", &self.tool_names())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Build the dispatcher with the default toolset, honouring
    /// `DISABLED_TOOLS`.
    #[must_use]
    pub fn new(ctx: ToolContext) -> Self {
        let tools: Vec<Arc<dyn Tool>> = builtin_tools()
            .into_iter()
            .filter(|tool| {
                let disabled = ctx.settings.disabled_tools.contains(tool.name());
                if disabled {
                    info!(tool = tool.name(), "tool disabled by configuration");
                }
                !disabled
            })
            .collect();
        info!(tools = tools.len(), "dispatcher ready");
        Self { tools, ctx }
    }

    /// The published descriptor list.
    #[must_use]
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools
            .iter()
            .map(|tool| ToolDescriptor {
                name: tool.name().to_owned(),
                description: tool.description().to_owned(),
                input_schema: tool.input_schema(),
            })
            .collect()
    }

    /// Names of the published tools, in registration order.
    #[must_use]
    pub fn tool_names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|tool| tool.name()).collect()
    }

    /// The shared context (for the binary's background tasks).
    #[must_use]
    pub const fn context(&self) -> &ToolContext {
        &self.ctx
    }

    /// Execute `name` with `arguments`, converting failures into error
    /// blocks the host can render.
    #[instrument(skip(self, arguments), fields(tool = name))]
    pub async fn dispatch(&self, name: &str, arguments: serde_json::Value) -> CallResult {
        match self.call(name, arguments).await {
            Ok(output) => CallResult::from_output(output),
            Err(err) => {
                tracing::warn!(tool = name, error = %err, "tool call failed");
                CallResult::from_error(&err)
            }
        }
    }

    async fn call(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self
            .tools
            .iter()
            .find(|tool| tool.name() == name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_owned()))?;
        validate_input(&tool.input_schema(), &arguments)?;
        tool.execute(&self.ctx, arguments).await
    }
}

fn builtin_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(ChatTool),
        Arc::new(WorkflowEngine::new(ThinkDeepWorkflow)),
        Arc::new(WorkflowEngine::new(DebugWorkflow)),
        Arc::new(WorkflowEngine::new(PlannerWorkflow)),
        Arc::new(ListModelsTool),
        Arc::new(VersionTool),
    ]
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::catalog::{ProviderKind, RestrictionPolicy};
    use crate::conversation::{ConversationStore, StoreConfig};
    use crate::providers::mock::MockProvider;
    use crate::providers::{Provider, ProviderRegistry};
    use crate::settings::ServerSettings;

    fn context(settings: ServerSettings) -> ToolContext {
        let mut registry = ProviderRegistry::new(RestrictionPolicy::unrestricted());
        registry.register(
            ProviderKind::Openai,
            Box::new(|| {
                Ok(Arc::new(MockProvider::new(
                    ProviderKind::Openai,
                    vec![MockProvider::capability("test-model", 12)],
                )) as Arc<dyn Provider>)
            }),
        );
        ToolContext::new(
            Arc::new(registry),
            Arc::new(ConversationStore::new(StoreConfig::default())),
            Arc::new(settings),
        )
    }

    #[test]
    fn publishes_the_default_toolset() {
        let dispatcher = Dispatcher::new(context(ServerSettings::default()));
        let names = dispatcher.tool_names();
        assert_eq!(
            names,
            vec!["chat", "thinkdeep", "debug", "planner", "listmodels", "version"]
        );
        let descriptors = dispatcher.descriptors();
        assert!(descriptors.iter().all(|d| !d.description.is_empty()));
        assert!(
            descriptors
                .iter()
                .all(|d| d.input_schema["type"] == "object")
        );
    }

    #[test]
    fn disabled_tools_are_not_published() {
        let mut settings = ServerSettings::default();
        settings.disabled_tools.insert("planner".to_owned());
        settings.disabled_tools.insert("debug".to_owned());
        let dispatcher = Dispatcher::new(context(settings));
        let names = dispatcher.tool_names();
        assert!(!names.contains(&"planner"));
        assert!(!names.contains(&"debug"));
        assert!(names.contains(&"chat"));
    }

    #[tokio::test]
    async fn unknown_tool_yields_an_error_block() {
        let dispatcher = Dispatcher::new(context(ServerSettings::default()));
        let result = dispatcher.dispatch("nonexistent", serde_json::json!({})).await;
        assert!(result.is_error);
        let ContentBlock::Text { text } = &result.content[0] else {
            panic!("expected text block");
        };
        let payload: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(payload["error"]["kind"], "unknown_tool");
    }

    #[tokio::test]
    async fn schema_violations_name_the_field() {
        let dispatcher = Dispatcher::new(context(ServerSettings::default()));
        let result = dispatcher
            .dispatch("chat", serde_json::json!({"model": "test-model"}))
            .await;
        assert!(result.is_error);
        let ContentBlock::Text { text } = &result.content[0] else {
            panic!("expected text block");
        };
        let payload: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(payload["error"]["kind"], "schema_invalid");
        assert_eq!(payload["error"]["path"], "prompt");
    }

    #[tokio::test]
    async fn successful_chat_round_trip() {
        let dispatcher = Dispatcher::new(context(ServerSettings::default()));
        let result = dispatcher
            .dispatch(
                "chat",
                serde_json::json!({"prompt": "hello", "model": "test-model"}),
            )
            .await;
        assert!(!result.is_error);
        assert!(result.continuation_id.is_some());
        assert_eq!(result.content.len(), 1);
    }

    #[tokio::test]
    async fn restricted_model_produces_structured_error() {
        let mut registry =
            ProviderRegistry::new(RestrictionPolicy::with(ProviderKind::Openai, &["o4-mini"]));
        registry.register(
            ProviderKind::Openai,
            Box::new(|| {
                Ok(Arc::new(MockProvider::new(
                    ProviderKind::Openai,
                    vec![
                        MockProvider::capability("gpt-5", 16),
                        MockProvider::capability("o4-mini", 9),
                    ],
                )) as Arc<dyn Provider>)
            }),
        );
        let ctx = ToolContext::new(
            Arc::new(registry),
            Arc::new(ConversationStore::new(StoreConfig::default())),
            Arc::new(ServerSettings::default()),
        );
        let dispatcher = Dispatcher::new(ctx);
        let result = dispatcher
            .dispatch("chat", serde_json::json!({"prompt": "hi", "model": "gpt-5"}))
            .await;
        assert!(result.is_error);
        let ContentBlock::Text { text } = &result.content[0] else {
            panic!("expected text block");
        };
        let payload: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(payload["error"]["kind"], "restricted");
        assert_eq!(payload["error"]["allowed_models"][0], "o4-mini");
    }
}
