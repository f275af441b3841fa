//! The `debug` workflow: root-cause analysis driven by hypotheses.

use super::{Confidence, WorkflowSpec, WorkflowState};
use crate::providers::ModelCategory;
use crate::tools::schema::{SchemaBuilder, string_prop};

const EXPERT_PROMPT: &str = "You are a debugging expert reviewing an investigation. Judge \
whether the evidence actually supports the hypothesis, name the minimal fix, and call out \
any plausible alternative root causes the investigator should rule out.";

/// Systematic root-cause investigation with a tracked hypothesis.
#[derive(Debug, Default)]
pub struct DebugWorkflow;

impl WorkflowSpec for DebugWorkflow {
    fn name(&self) -> &'static str {
        "debug"
    }

    fn description(&self) -> &'static str {
        "Step-by-step root-cause analysis for bugs, crashes, and unexpected behavior. Track a \
         hypothesis across steps, record the files you rule in and out, and finish with an \
         expert review of the diagnosis."
    }

    fn category(&self) -> ModelCategory {
        ModelCategory::ExtendedReasoning
    }

    fn required_actions(&self, state: &WorkflowState) -> Vec<String> {
        let mut actions = Vec::new();
        if state.confidence < Confidence::Medium {
            actions.push("Reproduce the failure and capture the exact error output".to_owned());
            actions.push("Trace the failing code path and note every file touched".to_owned());
        } else {
            actions.push(
                "Test the current hypothesis directly: add logging or a targeted check".to_owned(),
            );
            actions.push("Rule out the nearest alternative explanation".to_owned());
        }
        actions.push(format!(
            "Report step {} with findings and an updated hypothesis",
            state.step_number + 1
        ));
        actions
    }

    fn expert_system_prompt(&self) -> &'static str {
        EXPERT_PROMPT
    }

    fn extra_schema(&self, builder: SchemaBuilder) -> SchemaBuilder {
        builder.field(
            "hypothesis",
            string_prop("Current best explanation of the root cause."),
        )
    }
}
