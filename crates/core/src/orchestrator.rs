//! Step sequencing.
//!
//! Deciding what comes next and materializing it are two separate calls:
//! [`StepOrchestrator::decide_next`] is pure, and
//! [`StepOrchestrator::create_next_step`] only talks to the generative service
//! when there actually is a next step to write.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::fallback;
use crate::gateway::{GatewayError, GenerativeContentGateway, recover};
use crate::scenario::{Scenario, UserContext};
use crate::session::Session;
use crate::step::{Evaluation, Step, StepContent, StepType};

/// Outcome of [`StepOrchestrator::decide_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextStepDecision {
    pub step_type: StepType,
    pub step_number: u32,
    /// When set no further step is created and the session completes.
    pub is_completed: bool,
}

pub struct StepOrchestrator {
    gateway: Arc<dyn GenerativeContentGateway>,
}

impl StepOrchestrator {
    pub fn new(gateway: Arc<dyn GenerativeContentGateway>) -> Self {
        Self { gateway }
    }

    /// Creates step 1, the pre-test self-assessment.
    pub async fn create_initial_step(
        &self,
        session: &Session,
        scenario: &Scenario,
        user_context: &UserContext,
    ) -> Step {
        let generated = self
            .gateway
            .generate_initial_assessment(scenario, user_context)
            .await
            .and_then(|assessment| {
                if assessment.question.trim().is_empty() {
                    Err(GatewayError::MalformedPayload(
                        "initial assessment without a question".to_string(),
                    ))
                } else {
                    Ok(assessment)
                }
            });
        let assessment = recover("generate_initial_assessment", generated, || {
            fallback::initial_assessment(scenario)
        });

        let content = StepContent {
            prompt: None,
            question: assessment.question,
            context: assessment.context,
            instructions: Some(assessment.instructions),
            estimated_minutes: Some(assessment.estimated_time_minutes),
            ..StepContent::default()
        };
        info!(session_id = %session.id, "Initial step created");
        Step::new(session.id, 1, StepType::PreTest, content)
    }

    /// Decides what follows the step that was just answered.
    pub fn decide_next(
        &self,
        session: &Session,
        current_step: &Step,
        evaluation: &Evaluation,
    ) -> NextStepDecision {
        let next_number = current_step.step_number + 1;
        let decision = match current_step.step_type {
            StepType::PreTest => NextStepDecision {
                step_type: StepType::Simulation,
                step_number: next_number,
                is_completed: false,
            },
            StepType::Simulation
                if current_step.step_number < session.total_steps.saturating_sub(1) =>
            {
                NextStepDecision {
                    step_type: StepType::Simulation,
                    step_number: next_number,
                    is_completed: false,
                }
            }
            StepType::Simulation => NextStepDecision {
                step_type: StepType::Feedback,
                step_number: next_number,
                is_completed: true,
            },
            StepType::Feedback => NextStepDecision {
                step_type: StepType::Feedback,
                step_number: current_step.step_number,
                is_completed: true,
            },
        };
        debug!(
            session_id = %session.id,
            answered = current_step.step_number,
            score = evaluation.overall_score,
            next = decision.step_number,
            completed = decision.is_completed,
            "Next step decided"
        );
        decision
    }

    /// Materializes the step described by `decision`, or returns `None` when
    /// the session is complete.
    pub async fn create_next_step(
        &self,
        session: &Session,
        scenario: &Scenario,
        decision: &NextStepDecision,
    ) -> Option<Step> {
        if decision.is_completed {
            return None;
        }

        let generated = self
            .gateway
            .generate_step_content(scenario, decision.step_number)
            .await
            .and_then(|draft| {
                if draft.question.trim().is_empty() {
                    Err(GatewayError::MalformedPayload(
                        "step content without a question".to_string(),
                    ))
                } else {
                    Ok(draft)
                }
            });
        let draft = recover("generate_step_content", generated, || {
            fallback::step_content(scenario, decision.step_number)
        });

        let content = StepContent {
            prompt: Some(draft.prompt),
            question: draft.question,
            context: draft.context,
            ..StepContent::default()
        };
        Some(Step::new(
            session.id,
            decision.step_number,
            decision.step_type,
            content,
        ))
    }
}
