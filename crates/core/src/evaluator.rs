//! Response Evaluation
//!
//! Grades a learner's answer to the current step. The generative service does
//! the grading; when it fails or replies with something that does not parse
//! into a well-formed evaluation, a fixed fallback evaluation is used instead,
//! so [`ResponseEvaluator::evaluate`] never fails because of the service.

use anyhow::anyhow;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{PracticeError, Result};
use crate::fallback;
use crate::gateway::{EvaluationRequest, GenerativeContentGateway, recover};
use crate::scenario::Scenario;
use crate::session::Session;
use crate::step::{Evaluation, InteractionMetrics, ResponseAnalysis, Step, StepType};

/// Criteria graded on the opening self-assessment.
pub const PRE_TEST_CRITERIA: &[&str] = &[
    "experience_demonstration",
    "self_awareness",
    "reflection_ability",
    "concrete_examples",
];

/// Criteria graded on every simulation step.
pub const SIMULATION_CRITERIA: &[&str] = &[
    "skill_application",
    "communication_clarity",
    "stakeholder_consideration",
    "solution_viability",
    "professionalism",
];

/// A learner's answer together with how it was produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub text: String,
    pub response_time_seconds: Option<u32>,
    pub help_requested: bool,
}

pub struct ResponseEvaluator {
    gateway: Arc<dyn GenerativeContentGateway>,
}

impl ResponseEvaluator {
    pub fn new(gateway: Arc<dyn GenerativeContentGateway>) -> Self {
        Self { gateway }
    }

    /// Builds the grading request for `step`.
    ///
    /// Feedback steps never accept responses, so asking to grade one is an
    /// error.
    pub fn build_request(
        &self,
        session: &Session,
        step: &Step,
        scenario: &Scenario,
        response_text: &str,
    ) -> Result<EvaluationRequest> {
        let criteria = match step.step_type {
            StepType::PreTest => PRE_TEST_CRITERIA,
            StepType::Simulation => SIMULATION_CRITERIA,
            StepType::Feedback => {
                return Err(PracticeError::Internal(anyhow!(
                    "step {} of session {} is a feedback step and cannot be graded",
                    step.step_number,
                    session.id
                )));
            }
        };

        Ok(EvaluationRequest {
            step_type: step.step_type,
            skill: session.skill.clone(),
            scenario_context: format!(
                "Scenario: {}\nDescription: {}\nInitial situation: {}\nTarget skill: {}\nDifficulty level: {}/5",
                scenario.title,
                scenario.description,
                scenario.initial_situation,
                session.skill,
                session.difficulty_level
            ),
            question: step.content.question.clone(),
            context: step.content.context.clone(),
            user_response: response_text.to_string(),
            criteria: criteria.iter().map(|c| c.to_string()).collect(),
            wants_recommended_difficulty: step.step_type == StepType::PreTest,
        })
    }

    /// Grades `response_text` as the answer to `step`.
    ///
    /// Only fails when called with a step that already has a response or that
    /// cannot be graded; service failures yield [`fallback::evaluation`].
    pub async fn evaluate(
        &self,
        session: &Session,
        step: &Step,
        scenario: &Scenario,
        response_text: &str,
    ) -> Result<Evaluation> {
        if step.is_answered() {
            return Err(PracticeError::Internal(anyhow!(
                "step {} of session {} has already been answered",
                step.step_number,
                session.id
            )));
        }
        let request = self.build_request(session, step, scenario, response_text)?;

        let generated = match self.gateway.generate_evaluation(&request).await {
            Ok(payload) => payload.into_evaluation(),
            Err(e) => Err(e),
        };
        let evaluation = recover("generate_evaluation", generated, fallback::evaluation);

        debug!(
            session_id = %session.id,
            step_number = step.step_number,
            score = evaluation.overall_score,
            fallback = evaluation.is_fallback,
            "Response evaluated"
        );
        Ok(evaluation)
    }

    /// Turns an evaluation into a short mentor-style comment.
    pub async fn narrate_feedback(&self, evaluation: &Evaluation) -> String {
        let generated = self
            .gateway
            .generate_narrative_feedback(evaluation)
            .await
            .and_then(|text| {
                if text.trim().is_empty() {
                    Err(crate::gateway::GatewayError::MalformedPayload(
                        "empty narrative".to_string(),
                    ))
                } else {
                    Ok(text)
                }
            });
        recover("generate_narrative_feedback", generated, || {
            fallback::narrative_feedback(evaluation.overall_score)
        })
    }

    /// Grades a submission and records the response, evaluation and narrative
    /// on `step`.
    ///
    /// This is the only place a step's evaluation is written.
    pub async fn assess(
        &self,
        session: &Session,
        step: &mut Step,
        scenario: &Scenario,
        submission: &Submission,
    ) -> Result<Evaluation> {
        let evaluation = self
            .evaluate(session, step, scenario, &submission.text)
            .await?;
        let narrative = self.narrate_feedback(&evaluation).await;

        step.content.user_response = Some(submission.text.clone());
        step.content.narrative_feedback = Some(narrative);
        step.metrics = InteractionMetrics {
            response_latency_seconds: submission.response_time_seconds,
            response_length: submission.text.chars().count(),
            help_requested: submission.help_requested,
        };
        step.analysis = Some(ResponseAnalysis::from_text(&submission.text));
        step.evaluation = Some(evaluation.clone());

        info!(
            session_id = %session.id,
            step_number = step.step_number,
            score = evaluation.overall_score,
            "Step assessed"
        );
        Ok(evaluation)
    }
}
