//! Generative Content Gateway
//!
//! The boundary to the external AI-backed service that writes scenario text,
//! step prompts and evaluations. Every method returns an explicit
//! [`GatewayError`] on failure; callers recover with [`recover`] and a pure
//! fallback from [`crate::fallback`] so a degraded service never stalls a
//! session.

pub mod llm;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

use crate::scenario::{DEFAULT_STEP_COUNT, Scenario, UserContext};
use crate::step::{Evaluation, StepType};

/// Why a generative call produced nothing usable.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("generative service unavailable: {0}")]
    Unavailable(String),
    #[error("generative service timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("missing prompt template: '{0}'")]
    MissingPrompt(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Generated scenario content.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ScenarioDraft {
    pub title: String,
    pub description: String,
    pub difficulty_level: u8,
    #[serde(alias = "estimated_duration")]
    pub estimated_duration_minutes: u32,
    #[serde(alias = "steps", default = "default_step_count")]
    pub step_count: u32,
    pub initial_situation: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_step_count() -> u32 {
    DEFAULT_STEP_COUNT
}

/// The opening pre-test question of a session.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct InitialAssessment {
    pub question: String,
    pub context: String,
    pub instructions: String,
    #[serde(default)]
    pub expected_skills: Vec<String>,
    #[serde(default)]
    pub evaluation_criteria: Vec<String>,
    #[serde(default = "default_assessment_minutes")]
    pub estimated_time_minutes: u32,
}

fn default_assessment_minutes() -> u32 {
    5
}

/// Content for a follow-up simulation step.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct StepContentDraft {
    pub prompt: String,
    pub question: String,
    pub context: String,
    #[serde(default)]
    pub expected_response_type: String,
}

/// Everything the service needs to grade one response.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationRequest {
    pub step_type: StepType,
    pub skill: String,
    pub scenario_context: String,
    pub question: String,
    pub context: String,
    pub user_response: String,
    pub criteria: Vec<String>,
    /// Ask the service for a difficulty recommendation as well.
    pub wants_recommended_difficulty: bool,
}

/// The structured record an evaluation must parse into.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct EvaluationPayload {
    /// 0 to 100.
    pub overall_score: f64,
    #[serde(default)]
    pub criteria_scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub areas_for_improvement: Vec<String>,
    #[serde(default)]
    pub specific_feedback: String,
    #[serde(default)]
    pub recommended_difficulty: Option<u8>,
    #[serde(default)]
    pub experience_level: Option<String>,
}

impl EvaluationPayload {
    /// Validates score ranges and converts into a domain [`Evaluation`].
    pub fn into_evaluation(self) -> GatewayResult<Evaluation> {
        let overall_score = bounded_score(self.overall_score).ok_or_else(|| {
            GatewayError::MalformedPayload(format!(
                "overall_score {} outside 0..=100",
                self.overall_score
            ))
        })?;
        let criteria_scores = self
            .criteria_scores
            .into_iter()
            .map(|(name, score)| {
                bounded_score(score).map(|s| (name.clone(), s)).ok_or_else(|| {
                    GatewayError::MalformedPayload(format!(
                        "criterion '{name}' score {score} outside 0..=100"
                    ))
                })
            })
            .collect::<GatewayResult<BTreeMap<_, _>>>()?;

        Ok(Evaluation {
            overall_score,
            criteria_scores,
            strengths: self.strengths,
            areas_for_improvement: self.areas_for_improvement,
            rationale: self.specific_feedback,
            recommended_difficulty: self.recommended_difficulty.map(|d| d.clamp(1, 5)),
            experience_level: self.experience_level,
            is_fallback: false,
        })
    }
}

fn bounded_score(score: f64) -> Option<u32> {
    (score.is_finite() && (0.0..=100.0).contains(&score)).then(|| score.round() as u32)
}

/// Inputs for a per-skill narrative in the completion report.
#[derive(Debug, Clone, PartialEq)]
pub struct SkillFeedbackRequest {
    pub skill_name: String,
    pub score: f64,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
}

/// Inputs for the overall narrative in the completion report.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceSummary {
    pub skill: String,
    pub scenario_title: String,
    pub answered_steps: usize,
    pub total_steps: u32,
    pub overall_score: f64,
    pub total_time_minutes: u32,
    pub confidence_level: String,
}

/// Contract for the external generative content service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerativeContentGateway: Send + Sync {
    async fn generate_scenario(
        &self,
        skill: &str,
        difficulty: u8,
        user_context: &UserContext,
    ) -> GatewayResult<ScenarioDraft>;

    async fn generate_initial_assessment(
        &self,
        scenario: &Scenario,
        user_context: &UserContext,
    ) -> GatewayResult<InitialAssessment>;

    async fn generate_step_content(
        &self,
        scenario: &Scenario,
        step_number: u32,
    ) -> GatewayResult<StepContentDraft>;

    async fn generate_evaluation(
        &self,
        request: &EvaluationRequest,
    ) -> GatewayResult<EvaluationPayload>;

    async fn generate_narrative_feedback(&self, evaluation: &Evaluation) -> GatewayResult<String>;

    async fn generate_skill_feedback(&self, request: &SkillFeedbackRequest)
    -> GatewayResult<String>;

    async fn generate_overall_feedback(
        &self,
        summary: &PerformanceSummary,
    ) -> GatewayResult<String>;
}

/// Returns the generated value, or logs the failure and substitutes `fallback`.
pub fn recover<T>(
    operation: &'static str,
    result: GatewayResult<T>,
    fallback: impl FnOnce() -> T,
) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            warn!(operation, error = %err, "Generative call failed; using fallback");
            fallback()
        }
    }
}

/// Removes Markdown code fences and surrounding chatter from a model reply.
pub fn strip_formatting(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        // Drop the info string ("json") on the opening fence line.
        text = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    }
    if let Some(rest) = text.trim_end().strip_suffix("```") {
        text = rest;
    }
    let text = text.trim();
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}

/// Parses a model reply into a structured payload.
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> GatewayResult<T> {
    serde_json::from_str(strip_formatting(raw))
        .map_err(|e| GatewayError::MalformedPayload(e.to_string()))
}
