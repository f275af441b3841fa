//! The `thinkdeep` workflow: staged deep reasoning with expert validation.

use super::{WorkflowSpec, WorkflowState};
use crate::providers::{ModelCategory, ThinkingMode};
use crate::settings::ServerSettings;

const EXPERT_PROMPT: &str = "You are a senior engineering collaborator performing a final \
review of an investigation. Challenge the reasoning, surface alternative interpretations of \
the evidence, and state clearly which conclusions are solid and which need more work.";

/// Multi-step extended reasoning for design decisions and hard problems.
#[derive(Debug, Default)]
pub struct ThinkDeepWorkflow;

impl WorkflowSpec for ThinkDeepWorkflow {
    fn name(&self) -> &'static str {
        "thinkdeep"
    }

    fn description(&self) -> &'static str {
        "Structured multi-step investigation for complex problems: architecture decisions, \
         performance questions, and anything needing systematic hypothesis testing. Each step \
         records findings; the final step is validated by an expert model."
    }

    fn category(&self) -> ModelCategory {
        ModelCategory::ExtendedReasoning
    }

    fn required_actions(&self, state: &WorkflowState) -> Vec<String> {
        let mut actions = vec![
            "Examine the code and context areas named in the current findings".to_owned(),
            "Look for evidence that contradicts the current working theory".to_owned(),
        ];
        if state.relevant_files.is_empty() {
            actions.push("Identify which files are actually relevant to the question".to_owned());
        }
        actions.push(format!(
            "Report step {} with updated findings and confidence",
            state.step_number + 1
        ));
        actions
    }

    fn expert_system_prompt(&self) -> &'static str {
        EXPERT_PROMPT
    }

    fn default_thinking_mode(&self, settings: &ServerSettings) -> ThinkingMode {
        settings.default_thinking_mode_thinkdeep
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_thinking_mode_comes_from_settings() {
        let settings = ServerSettings {
            default_thinking_mode_thinkdeep: ThinkingMode::Max,
            ..ServerSettings::default()
        };
        assert_eq!(
            ThinkDeepWorkflow.default_thinking_mode(&settings),
            ThinkingMode::Max
        );
    }

    #[test]
    fn asks_for_relevant_files_until_some_are_named() {
        let state = WorkflowState::default();
        let actions = ThinkDeepWorkflow.required_actions(&state);
        assert!(actions.iter().any(|a| a.contains("relevant")));

        let mut with_files = WorkflowState::default();
        with_files.relevant_files.push("/srv/app/main.rs".to_owned());
        let actions = ThinkDeepWorkflow.required_actions(&with_files);
        assert!(!actions.iter().any(|a| a.contains("actually relevant")));
    }
}
