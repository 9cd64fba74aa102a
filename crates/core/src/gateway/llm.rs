//! OpenAI-compatible Gateway
//!
//! Implements [`GenerativeContentGateway`] on top of any chat-completions API
//! that speaks the OpenAI protocol (OpenAI itself, or Gemini's compatibility
//! endpoint). Prompts are Markdown templates with `{placeholder}` slots,
//! loaded once at startup and keyed by file stem.

use anyhow::{Context, Result};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::{
    EvaluationPayload, EvaluationRequest, GatewayError, GatewayResult, GenerativeContentGateway,
    InitialAssessment, PerformanceSummary, ScenarioDraft, SkillFeedbackRequest, StepContentDraft,
    parse_structured,
};
use crate::scenario::{Scenario, UserContext};
use crate::step::{Evaluation, StepType};

const SYSTEM_PROMPT: &str = "You are an expert coach who designs and grades realistic workplace \
soft-skills practice. When asked for JSON, reply with a single JSON object and nothing else.";

/// A gateway backed by an OpenAI-compatible chat-completions API.
pub struct LlmContentGateway {
    client: Client<OpenAIConfig>,
    model: String,
    prompts: HashMap<String, String>,
    timeout: Duration,
}

impl LlmContentGateway {
    /// Creates a new gateway.
    ///
    /// # Arguments
    ///
    /// * `config` - API key and base URL for the provider.
    /// * `model` - Chat model identifier (e.g. "gpt-4o-mini").
    /// * `prompts` - Templates keyed by name: `generate_scenario`,
    ///   `initial_assessment`, `step_content`, `evaluate_response`,
    ///   `narrative_feedback`, `skill_feedback` and `overall_feedback`.
    /// * `timeout` - Upper bound for a single call.
    pub fn new(
        config: OpenAIConfig,
        model: String,
        prompts: HashMap<String, String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: Client::with_config(config),
            model,
            prompts,
            timeout,
        }
    }

    fn render(&self, key: &str, slots: &[(&str, String)]) -> GatewayResult<String> {
        let template = self
            .prompts
            .get(key)
            .ok_or_else(|| GatewayError::MissingPrompt(key.to_string()))?;
        Ok(fill_template(template, slots))
    }

    async fn chat(&self, prompt: String) -> Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(SYSTEM_PROMPT)
                    .build()?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(prompt)
                    .build()?
                    .into(),
            ])
            .build()?;

        let response = self.client.chat().create(request).await?;

        let answer = response
            .choices
            .first()
            .context("No response choice from LLM")?
            .message
            .content
            .clone()
            .context("No content in LLM response")?;
        Ok(answer)
    }

    /// Sends one prompt, bounded by the configured timeout.
    async fn complete(&self, prompt: String) -> GatewayResult<String> {
        debug!(model = %self.model, prompt_len = prompt.len(), "Sending prompt");
        match tokio::time::timeout(self.timeout, self.chat(prompt)).await {
            Err(_) => Err(GatewayError::Timeout(self.timeout)),
            Ok(Err(e)) => Err(GatewayError::Transport(format!("{e:#}"))),
            Ok(Ok(text)) if text.trim().is_empty() => Err(GatewayError::MalformedPayload(
                "empty response".to_string(),
            )),
            Ok(Ok(text)) => Ok(text),
        }
    }
}

/// Replaces every `{name}` slot in `template` in a single pass.
///
/// Substituted values are copied as they are, so a value that itself
/// contains `{name}` is never expanded. Unknown slots stay in place.
pub fn fill_template(template: &str, slots: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let slot = after.find('}').and_then(|close| {
            let name = &after[..close];
            slots
                .iter()
                .find(|(slot, _)| *slot == name)
                .map(|(_, value)| (value, close))
        });
        match slot {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return "None identified".to_string();
    }
    items.join(", ")
}

fn json_schema<T: schemars::JsonSchema>() -> String {
    serde_json::to_string_pretty(&schemars::schema_for!(T)).unwrap_or_default()
}

#[async_trait]
impl GenerativeContentGateway for LlmContentGateway {
    async fn generate_scenario(
        &self,
        skill: &str,
        difficulty: u8,
        user_context: &UserContext,
    ) -> GatewayResult<ScenarioDraft> {
        let prompt = self.render(
            "generate_scenario",
            &[
                ("skill", skill.to_string()),
                ("difficulty", difficulty.to_string()),
                (
                    "specialization",
                    user_context.technical_specialization.clone(),
                ),
                ("seniority", user_context.seniority_level.clone()),
                ("schema", json_schema::<ScenarioDraft>()),
            ],
        )?;
        parse_structured(&self.complete(prompt).await?)
    }

    async fn generate_initial_assessment(
        &self,
        scenario: &Scenario,
        user_context: &UserContext,
    ) -> GatewayResult<InitialAssessment> {
        let prompt = self.render(
            "initial_assessment",
            &[
                ("skill", scenario.skill.clone()),
                ("title", scenario.title.clone()),
                ("description", scenario.description.clone()),
                ("situation", scenario.initial_situation.clone()),
                ("difficulty", scenario.difficulty_level.to_string()),
                (
                    "specialization",
                    user_context.technical_specialization.clone(),
                ),
                ("seniority", user_context.seniority_level.clone()),
                ("schema", json_schema::<InitialAssessment>()),
            ],
        )?;
        parse_structured(&self.complete(prompt).await?)
    }

    async fn generate_step_content(
        &self,
        scenario: &Scenario,
        step_number: u32,
    ) -> GatewayResult<StepContentDraft> {
        let prompt = self.render(
            "step_content",
            &[
                ("skill", scenario.skill.clone()),
                ("title", scenario.title.clone()),
                ("situation", scenario.initial_situation.clone()),
                ("step_number", step_number.to_string()),
                ("schema", json_schema::<StepContentDraft>()),
            ],
        )?;
        parse_structured(&self.complete(prompt).await?)
    }

    async fn generate_evaluation(
        &self,
        request: &EvaluationRequest,
    ) -> GatewayResult<EvaluationPayload> {
        let kind = match request.step_type {
            StepType::PreTest => "initial self-assessment",
            StepType::Simulation | StepType::Feedback => "practice scenario response",
        };
        let extra = if request.wants_recommended_difficulty {
            "Also include \"experience_level\" and a \"recommended_difficulty\" from 1 to 5."
        } else {
            ""
        };
        let prompt = self.render(
            "evaluate_response",
            &[
                ("kind", kind.to_string()),
                ("skill", request.skill.clone()),
                ("scenario_context", request.scenario_context.clone()),
                ("question", request.question.clone()),
                ("context", request.context.clone()),
                ("user_response", request.user_response.clone()),
                ("criteria", request.criteria.join(", ")),
                ("extra", extra.to_string()),
                ("schema", json_schema::<EvaluationPayload>()),
            ],
        )?;
        parse_structured(&self.complete(prompt).await?)
    }

    async fn generate_narrative_feedback(&self, evaluation: &Evaluation) -> GatewayResult<String> {
        let prompt = self.render(
            "narrative_feedback",
            &[
                ("score", evaluation.overall_score.to_string()),
                ("strengths", bullet_list(&evaluation.strengths)),
                (
                    "improvements",
                    bullet_list(&evaluation.areas_for_improvement),
                ),
            ],
        )?;
        Ok(self.complete(prompt).await?.trim().to_string())
    }

    async fn generate_skill_feedback(
        &self,
        request: &SkillFeedbackRequest,
    ) -> GatewayResult<String> {
        let prompt = self.render(
            "skill_feedback",
            &[
                ("skill", request.skill_name.clone()),
                ("score", format!("{:.1}", request.score)),
                ("strengths", bullet_list(&request.strengths)),
                ("improvements", bullet_list(&request.improvements)),
            ],
        )?;
        Ok(self.complete(prompt).await?.trim().to_string())
    }

    async fn generate_overall_feedback(
        &self,
        summary: &PerformanceSummary,
    ) -> GatewayResult<String> {
        let prompt = self.render(
            "overall_feedback",
            &[
                ("skill", summary.skill.clone()),
                ("title", summary.scenario_title.clone()),
                ("answered", summary.answered_steps.to_string()),
                ("total", summary.total_steps.to_string()),
                ("score", format!("{:.1}", summary.overall_score)),
                ("minutes", summary.total_time_minutes.to_string()),
                ("confidence", summary.confidence_level.clone()),
            ],
        )?;
        Ok(self.complete(prompt).await?.trim().to_string())
    }
}
