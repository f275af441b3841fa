//! Step-state machine for multi-step tools.
//!
//! A workflow tool alternates between the host (which investigates) and
//! this engine (which accumulates findings inside the conversation thread
//! and decides what happens next). While `next_step_required` is true the
//! engine answers with a pause instructing the host what to do; on the
//! final step it optionally hands the consolidated findings to an expert
//! model for a closing analysis. Because state lives in the thread, a
//! workflow resumes across tools and host processes sharing the store.

mod debug;
mod planner;
mod thinkdeep;

pub use debug::DebugWorkflow;
pub use planner::PlannerWorkflow;
pub use thinkdeep::ThinkDeepWorkflow;

use std::fmt::Write as _;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversation::Turn;
use crate::providers::{GenerateRequest, ModelCategory, ThinkingMode};
use crate::settings::ServerSettings;
use crate::tools::schema::{
    SchemaBuilder, boolean_prop, enum_prop, integer_prop, string_array_prop, string_prop,
};
use crate::tools::{CommonArgs, Tool, ToolContext, ToolError, ToolOutput, WorkflowStatus};

/// How sure the investigator is about the current hypothesis.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Still mapping the problem.
    #[default]
    Exploring,
    /// A hunch, little evidence.
    Low,
    /// Some supporting evidence.
    Medium,
    /// Strong evidence.
    High,
    /// Very strong evidence.
    VeryHigh,
    /// Nearly confirmed.
    AlmostCertain,
    /// Confirmed; expert analysis adds nothing.
    Certain,
}

/// Consolidated state of one workflow, persisted inside its thread.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Last completed step.
    pub step_number: u32,
    /// Current estimate of total steps.
    pub total_steps: u32,
    /// Investigator confidence after the last step.
    pub confidence: Confidence,
    /// Findings accumulated across steps.
    pub findings: String,
    /// Every file examined so far.
    pub files_checked: Vec<String>,
    /// Files implicated in the answer.
    pub relevant_files: Vec<String>,
    /// Structured issues collected along the way.
    pub issues_found: Vec<serde_json::Value>,
    /// Whether the host has more steps planned.
    pub next_step_required: bool,
    /// The expert model's closing analysis, once produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expert_analysis: Option<serde_json::Value>,
}

impl WorkflowState {
    fn merge_step(&mut self, args: &WorkflowArgs) {
        self.step_number = args.step_number;
        self.total_steps = args.total_steps.max(args.step_number);
        self.next_step_required = args.next_step_required;
        self.confidence = args.confidence;
        if !args.findings.is_empty() {
            if !self.findings.is_empty() {
                let _ = write!(self.findings, "\n\n--- Step {} ---\n", args.step_number);
            }
            self.findings.push_str(&args.findings);
        }
        if let Some(hypothesis) = &args.hypothesis {
            let _ = write!(self.findings, "\nHypothesis: {hypothesis}");
        }
        merge_unique(&mut self.files_checked, &args.files_checked);
        merge_unique(&mut self.relevant_files, &args.relevant_files);
        self.issues_found.extend(args.issues_found.iter().cloned());
    }
}

fn merge_unique(into: &mut Vec<String>, from: &[String]) {
    for item in from {
        if !into.contains(item) {
            into.push(item.clone());
        }
    }
}

/// Arguments shared by every workflow tool.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowArgs {
    /// Narrative for this step: what was done or will be done.
    pub step: String,
    /// One-based step index.
    pub step_number: u32,
    /// Current estimate of steps needed.
    pub total_steps: u32,
    /// True when the host plans another step.
    pub next_step_required: bool,
    /// Discoveries made during this step.
    #[serde(default)]
    pub findings: String,
    /// Confidence after this step.
    #[serde(default)]
    pub confidence: Confidence,
    /// Files examined during this step.
    #[serde(default)]
    pub files_checked: Vec<String>,
    /// Files implicated in the answer.
    #[serde(default)]
    pub relevant_files: Vec<String>,
    /// Structured issues found during this step.
    #[serde(default)]
    pub issues_found: Vec<serde_json::Value>,
    /// Current hypothesis, for diagnostic workflows.
    #[serde(default)]
    pub hypothesis: Option<String>,
    /// Set false to skip the closing expert analysis.
    #[serde(default)]
    pub use_assistant_model: Option<bool>,
    /// Common tool arguments.
    #[serde(flatten)]
    pub common: CommonArgs,
}

/// Strategy hooks a concrete workflow tool provides.
pub trait WorkflowSpec: Send + Sync {
    /// Tool name.
    fn name(&self) -> &'static str;

    /// Tool description for the descriptor list.
    fn description(&self) -> &'static str;

    /// Model category for auto-mode selection.
    fn category(&self) -> ModelCategory {
        ModelCategory::ExtendedReasoning
    }

    /// Actions the host should perform before the next step.
    fn required_actions(&self, state: &WorkflowState) -> Vec<String>;

    /// Whether this workflow closes with an expert-analysis call at all.
    fn uses_expert_analysis(&self) -> bool {
        true
    }

    /// System prompt for the closing expert call.
    fn expert_system_prompt(&self) -> &'static str {
        ""
    }

    /// Thinking mode for the expert call when the caller passes none.
    fn default_thinking_mode(&self, settings: &ServerSettings) -> ThinkingMode {
        let _ = settings;
        ThinkingMode::Medium
    }

    /// Extra tool-specific schema fields.
    fn extra_schema(&self, builder: SchemaBuilder) -> SchemaBuilder {
        builder
    }
}

/// The engine that turns a [`WorkflowSpec`] into a [`Tool`].
pub struct WorkflowEngine {
    spec: Box<dyn WorkflowSpec>,
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("tool", &self.spec.name())
            .finish()
    }
}

impl WorkflowEngine {
    /// Wrap a workflow strategy.
    #[must_use]
    pub fn new(spec: impl WorkflowSpec + 'static) -> Self {
        Self {
            spec: Box::new(spec),
        }
    }

    async fn load_state(
        &self,
        ctx: &ToolContext,
        args: &WorkflowArgs,
    ) -> Result<(Uuid, WorkflowState), ToolError> {
        let user_turn = Turn::user(&args.step)
            .with_tool(self.spec.name())
            .with_files(args.relevant_files.clone());
        match args.common.continuation_id {
            Some(id) => {
                ctx.store.append_turn(id, user_turn).await?;
                let state = ctx
                    .store
                    .workflow_state(id)
                    .await?
                    .map(serde_json::from_value)
                    .transpose()
                    .map_err(|e| ToolError::internal(format!("corrupt workflow state: {e}")))?
                    .unwrap_or_default();
                Ok((id, state))
            }
            None => {
                let id = ctx
                    .store
                    .create_thread(self.spec.name(), user_turn, None)
                    .await;
                Ok((id, WorkflowState::default()))
            }
        }
    }

    async fn save(
        &self,
        ctx: &ToolContext,
        id: Uuid,
        state: &WorkflowState,
        summary: String,
        model_used: Option<&str>,
    ) -> Result<(), ToolError> {
        let mut turn = Turn::assistant(summary).with_tool(self.spec.name());
        if let Some(model) = model_used {
            turn = turn.with_model(model);
        }
        ctx.store.append_turn(id, turn).await?;
        let value = serde_json::to_value(state)
            .map_err(|e| ToolError::internal(format!("unserializable workflow state: {e}")))?;
        ctx.store.set_workflow_state(id, value).await?;
        Ok(())
    }

    async fn expert_analysis(
        &self,
        ctx: &ToolContext,
        args: &WorkflowArgs,
        state: &WorkflowState,
    ) -> Result<(serde_json::Value, String), ToolError> {
        let (provider, canonical) =
            ctx.resolve_model(args.common.model.as_deref(), self.spec.category())?;
        let thinking = args
            .common
            .thinking_mode
            .unwrap_or_else(|| self.spec.default_thinking_mode(&ctx.settings));

        let mut request = GenerateRequest::new(&canonical, render_expert_prompt(state))
            .with_thinking(thinking);
        if !self.spec.expert_system_prompt().is_empty() {
            request = request.with_system_prompt(self.spec.expert_system_prompt());
        }
        request.temperature = args.common.temperature;

        // Expert calls are never retried here; the provider layer already
        // applied the shared retry policy, and the host decides what to do
        // with a failure.
        let response = provider.generate(request).await?;
        Ok((
            serde_json::json!({
                "model": response.model_name,
                "provider": response.provider,
                "analysis": response.content,
            }),
            canonical,
        ))
    }
}

#[async_trait]
impl Tool for WorkflowEngine {
    fn name(&self) -> &'static str {
        self.spec.name()
    }

    fn description(&self) -> &'static str {
        self.spec.description()
    }

    fn input_schema(&self) -> serde_json::Value {
        let builder = SchemaBuilder::new()
            .required_field(
                "step",
                string_prop("What was done or is planned in this step."),
            )
            .required_field("step_number", integer_prop("One-based step index."))
            .required_field("total_steps", integer_prop("Current estimate of steps needed."))
            .required_field(
                "next_step_required",
                boolean_prop("True when another investigation step follows."),
            )
            .field("findings", string_prop("Discoveries made during this step."))
            .field(
                "confidence",
                enum_prop(
                    "Confidence after this step.",
                    &[
                        "exploring",
                        "low",
                        "medium",
                        "high",
                        "very_high",
                        "almost_certain",
                        "certain",
                    ],
                ),
            )
            .field("files_checked", string_array_prop("Files examined during this step."))
            .field("relevant_files", string_array_prop("Files implicated in the answer."))
            .field(
                "issues_found",
                serde_json::json!({
                    "type": "array",
                    "items": {"type": "object"},
                    "description": "Structured issues found so far.",
                }),
            )
            .field(
                "use_assistant_model",
                boolean_prop("Set false to skip the closing expert analysis."),
            );
        self.spec.extra_schema(builder).common_fields().build()
    }

    fn category(&self) -> ModelCategory {
        self.spec.category()
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        args: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let args: WorkflowArgs =
            serde_json::from_value(args).map_err(|e| ToolError::SchemaInvalid {
                path: "$".to_owned(),
                message: e.to_string(),
            })?;
        if args.step_number == 0 || args.total_steps == 0 {
            return Err(ToolError::SchemaInvalid {
                path: "step_number".to_owned(),
                message: "step_number and total_steps are one-based".to_owned(),
            });
        }
        ctx.check_prompt_size(&args.step)?;

        let (thread_id, mut state) = self.load_state(ctx, &args).await?;
        state.merge_step(&args);

        // Host still investigating: pause without touching any provider.
        if args.next_step_required && args.step_number < args.total_steps {
            let required_actions = self.spec.required_actions(&state);
            let payload = serde_json::json!({
                "status": WorkflowStatus::PauseForInvestigation,
                "step_number": state.step_number,
                "total_steps": state.total_steps,
                "confidence": state.confidence,
                "required_actions": required_actions,
                "continuation_id": thread_id,
            });
            self.save(
                ctx,
                thread_id,
                &state,
                format!(
                    "Paused after step {} of {}; awaiting investigation.",
                    state.step_number, state.total_steps
                ),
                None,
            )
            .await?;
            return Ok(render_payload(&payload)
                .with_status(WorkflowStatus::PauseForInvestigation)
                .with_continuation(thread_id));
        }

        // Final step: optionally close with an expert analysis.
        let wants_expert = self.spec.uses_expert_analysis()
            && args.use_assistant_model.unwrap_or(true)
            && state.confidence < Confidence::Certain;
        let mut expert_model = None;
        if wants_expert {
            let (analysis, model) = self.expert_analysis(ctx, &args, &state).await?;
            state.expert_analysis = Some(analysis);
            expert_model = Some(model);
        }

        let mut payload = serde_json::json!({
            "status": WorkflowStatus::Complete,
            "step_number": state.step_number,
            "total_steps": state.total_steps,
            "confidence": state.confidence,
            "findings": state.findings,
            "relevant_files": state.relevant_files,
            "issues_found": state.issues_found,
            "continuation_id": thread_id,
        });
        if let Some(analysis) = &state.expert_analysis {
            payload["expert_analysis"] = analysis.clone();
        }

        self.save(
            ctx,
            thread_id,
            &state,
            format!("Workflow complete after step {}.", state.step_number),
            expert_model.as_deref(),
        )
        .await?;

        Ok(render_payload(&payload)
            .with_status(WorkflowStatus::Complete)
            .with_continuation(thread_id))
    }
}

fn render_payload(payload: &serde_json::Value) -> ToolOutput {
    let text = serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string());
    ToolOutput::text(text)
}

fn render_expert_prompt(state: &WorkflowState) -> String {
    let mut prompt = format!(
        "=== CONSOLIDATED FINDINGS (after {} of {} steps) ===\n{}\n",
        state.step_number, state.total_steps, state.findings
    );
    if !state.relevant_files.is_empty() {
        prompt.push_str("\nRelevant files:\n");
        for file in &state.relevant_files {
            let _ = writeln!(prompt, "- {file}");
        }
    }
    if !state.issues_found.is_empty() {
        let _ = writeln!(
            prompt,
            "\nIssues found:\n{}",
            serde_json::to_string_pretty(&state.issues_found).unwrap_or_default()
        );
    }
    prompt.push_str(
        "\nProvide your final analysis: validate or refute the findings, point out anything \
         missed, and give concrete next actions.",
    );
    prompt
}
