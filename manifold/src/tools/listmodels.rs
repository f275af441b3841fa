//! The `listmodels` tool: a catalog dump grouped by provider.
//!
//! Never calls upstream. Restrictions apply, so the listing shows exactly
//! what the router would actually serve.

use async_trait::async_trait;

use super::schema::SchemaBuilder;
use super::{Tool, ToolContext, ToolError, ToolOutput};
use crate::catalog::effective_rank;

/// Lists configured providers, their models, aliases, and ranks.
#[derive(Debug, Default)]
pub struct ListModelsTool;

#[async_trait]
impl Tool for ListModelsTool {
    fn name(&self) -> &'static str {
        "listmodels"
    }

    fn description(&self) -> &'static str {
        "List the configured providers and every model the operator policy allows, with \
         aliases, context windows, and capability ranks. Makes no upstream calls."
    }

    fn input_schema(&self) -> serde_json::Value {
        SchemaBuilder::new().build()
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        _args: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let mut out = String::from("# Available models\n");
        for kind in ctx.registry.configured_kinds() {
            let provider = ctx.registry.provider(kind)?;
            out.push_str(&format!("\n## {} ({kind})\n", kind.friendly_name()));

            let mut caps: Vec<_> = provider.capabilities_map().values().collect();
            caps.sort_by(|a, b| {
                effective_rank(b)
                    .cmp(&effective_rank(a))
                    .then_with(|| a.model_name.cmp(&b.model_name))
            });

            let mut shown = 0_usize;
            for cap in caps {
                if !ctx
                    .registry
                    .restrictions()
                    .is_allowed(kind, &cap.model_name, &cap.aliases)
                {
                    continue;
                }
                shown += 1;
                out.push_str(&format!(
                    "- `{}` rank {} context {}k",
                    cap.model_name,
                    effective_rank(cap),
                    cap.context_window / 1000
                ));
                if !cap.aliases.is_empty() {
                    out.push_str(&format!(" aliases: {}", cap.aliases.join(", ")));
                }
                if cap.supports_extended_thinking {
                    out.push_str(" [thinking]");
                }
                out.push('\n');
            }
            if shown == 0 {
                out.push_str("- (all models excluded by restriction policy)\n");
            }
            if !ctx.registry.restrictions().is_unrestricted(kind) {
                out.push_str(&format!(
                    "Restricted to: {}\n",
                    ctx.registry.restrictions().allowed_tokens(kind).join(", ")
                ));
            }
        }
        Ok(ToolOutput::text(out))
    }
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
    use crate::tools::ContentBlock;

    fn context(policy: RestrictionPolicy) -> ToolContext {
        let mut registry = ProviderRegistry::new(policy);
        registry.register(
            ProviderKind::Openai,
            Box::new(|| {
                let mut strong = MockProvider::capability("gpt-5", 16);
                strong.aliases = vec!["best".to_owned()];
                strong.supports_extended_thinking = true;
                let weak = MockProvider::capability("o4-mini", 9);
                Ok(Arc::new(MockProvider::new(ProviderKind::Openai, vec![strong, weak]))
                    as Arc<dyn Provider>)
            }),
        );
        ToolContext::new(
            Arc::new(registry),
            Arc::new(ConversationStore::new(StoreConfig::default())),
            Arc::new(ServerSettings::default()),
        )
    }

    fn rendered(output: &ToolOutput) -> &str {
        match &output.blocks[0] {
            ContentBlock::Text { text } => text,
            ContentBlock::FileReference { .. } => panic!("expected text"),
        }
    }

    #[tokio::test]
    async fn lists_models_with_aliases_and_ranks() {
        let ctx = context(RestrictionPolicy::unrestricted());
        let output = ListModelsTool
            .execute(&ctx, serde_json::json!({}))
            .await
            .unwrap();
        let text = rendered(&output);
        assert!(text.contains("OpenAI"));
        assert!(text.contains("`gpt-5`"));
        assert!(text.contains("aliases: best"));
        assert!(text.contains("[thinking]"));
        assert!(text.contains("`o4-mini`"));
    }

    #[tokio::test]
    async fn restricted_models_are_hidden() {
        let ctx = context(RestrictionPolicy::with(ProviderKind::Openai, &["o4-mini"]));
        let output = ListModelsTool
            .execute(&ctx, serde_json::json!({}))
            .await
            .unwrap();
        let text = rendered(&output);
        assert!(!text.contains("`gpt-5`"));
        assert!(text.contains("`o4-mini`"));
        assert!(text.contains("Restricted to: o4-mini"));
    }
}
