//! The `chat` tool: one provider call with conversation continuity.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;

use super::schema::{SchemaBuilder, string_prop};
use super::{CommonArgs, Tool, ToolContext, ToolError, ToolOutput, render_history};
use crate::conversation::Turn;
use crate::providers::{GenerateRequest, ModelCategory};

const CHAT_SYSTEM_PROMPT: &str = "You are a senior engineering thought partner. Be direct, \
technically precise, and grounded in the files and context the user shares. Say so when you \
are unsure instead of guessing.";

/// Share of the model's context window offered to reconstructed history.
const HISTORY_BUDGET_PERCENT: u64 = 60;

#[derive(Debug, Deserialize)]
struct ChatArgs {
    prompt: String,
    #[serde(flatten)]
    common: CommonArgs,
}

/// General-purpose conversation tool.
#[derive(Debug, Default)]
pub struct ChatTool;

#[async_trait]
impl Tool for ChatTool {
    fn name(&self) -> &'static str {
        "chat"
    }

    fn description(&self) -> &'static str {
        "General chat and collaborative thinking: questions, brainstorming, second opinions, \
         and explanations, with optional file and image context. Returns a continuation_id so \
         any tool can pick up the conversation."
    }

    fn input_schema(&self) -> serde_json::Value {
        SchemaBuilder::new()
            .required_field("prompt", string_prop("The question or message for the model."))
            .common_fields()
            .build()
    }

    fn category(&self) -> ModelCategory {
        ModelCategory::Balanced
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        args: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let args: ChatArgs = serde_json::from_value(args).map_err(|e| ToolError::SchemaInvalid {
            path: "$".to_owned(),
            message: e.to_string(),
        })?;
        ctx.check_prompt_size(&args.prompt)?;

        let (provider, canonical) =
            ctx.resolve_model(args.common.model.as_deref(), self.category())?;
        let cap = provider.capabilities(&canonical)?.clone();

        // History must be reconstructed before the new turn is appended so
        // a continued thread shows exactly the prior conversation.
        let history = match args.common.continuation_id {
            Some(id) => {
                let budget = cap.context_window * HISTORY_BUDGET_PERCENT / 100;
                Some(ctx.store.reconstruct(id, budget).await?)
            }
            None => None,
        };

        let user_turn = Turn::user(&args.prompt)
            .with_tool(self.name())
            .with_files(args.common.files.clone());
        let thread_id = match args.common.continuation_id {
            Some(id) => {
                ctx.store.append_turn(id, user_turn).await?;
                id
            }
            None => ctx.store.create_thread(self.name(), user_turn, None).await,
        };

        let prompt = match &history {
            Some(turns) if !turns.is_empty() => {
                format!(
                    "{}\n=== NEW MESSAGE ===\n{}",
                    render_history(turns),
                    args.prompt
                )
            }
            _ => args.prompt.clone(),
        };

        let mut request = GenerateRequest::new(&canonical, prompt)
            .with_system_prompt(CHAT_SYSTEM_PROMPT)
            .with_images(args.common.images.iter().map(PathBuf::from).collect());
        request.temperature = args.common.temperature;
        request.thinking = args.common.thinking_mode;

        let response = provider.generate(request).await?;

        ctx.store
            .append_turn(
                thread_id,
                Turn::assistant(&response.content)
                    .with_tool(self.name())
                    .with_model(&response.model_name),
            )
            .await?;

        let mut metadata = BTreeMap::new();
        metadata.insert(
            "model".to_owned(),
            serde_json::Value::String(response.model_name.clone()),
        );
        metadata.insert(
            "provider".to_owned(),
            serde_json::Value::String(response.provider.to_string()),
        );
        metadata.insert(
            "total_tokens".to_owned(),
            serde_json::Value::from(response.usage.total_tokens),
        );

        let mut output = ToolOutput::text(response.content).with_continuation(thread_id);
        output.metadata = metadata;
        Ok(output)
    }
}
