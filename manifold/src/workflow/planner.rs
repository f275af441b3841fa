//! The `planner` workflow: interactive plan building, no expert close.

use super::{WorkflowSpec, WorkflowState};
use crate::providers::ModelCategory;

/// Sequential planning tool. Pauses between steps like every workflow but
/// never makes a provider call; the plan is the host's own work product.
#[derive(Debug, Default)]
pub struct PlannerWorkflow;

impl WorkflowSpec for PlannerWorkflow {
    fn name(&self) -> &'static str {
        "planner"
    }

    fn description(&self) -> &'static str {
        "Break a task into an ordered, revisable plan one step at a time. Steps accumulate in \
         the conversation thread so other tools can pick the plan up later."
    }

    fn category(&self) -> ModelCategory {
        ModelCategory::Balanced
    }

    fn required_actions(&self, state: &WorkflowState) -> Vec<String> {
        vec![
            "Review the plan so far for gaps, ordering problems, and missing dependencies"
                .to_owned(),
            format!(
                "Draft step {} of the plan (or revise an earlier step)",
                state.step_number + 1
            ),
        ]
    }

    fn uses_expert_analysis(&self) -> bool {
        false
    }
}
