//! The `version` tool.

use async_trait::async_trait;

use super::schema::SchemaBuilder;
use super::{Tool, ToolContext, ToolError, ToolOutput};

/// Reports the server version and configured providers.
#[derive(Debug, Default)]
pub struct VersionTool;

#[async_trait]
impl Tool for VersionTool {
    fn name(&self) -> &'static str {
        "version"
    }

    fn description(&self) -> &'static str {
        "Show the server version and which providers are configured."
    }

    fn input_schema(&self) -> serde_json::Value {
        SchemaBuilder::new().build()
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        _args: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let providers: Vec<String> = ctx
            .registry
            .configured_kinds()
            .iter()
            .map(ToString::to_string)
            .collect();
        Ok(ToolOutput::text(format!(
            "manifold {}\nproviders: {}\ndefault model: {}",
            env!("CARGO_PKG_VERSION"),
            if providers.is_empty() {
                "(none)".to_owned()
            } else {
                providers.join(", ")
            },
            ctx.settings.default_model,
        )))
    }
}
