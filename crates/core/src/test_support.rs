//! Fixtures shared by the unit tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

use crate::gateway::{
    EvaluationPayload, EvaluationRequest, GatewayError, GatewayResult, GenerativeContentGateway,
    InitialAssessment, PerformanceSummary, ScenarioDraft, SkillFeedbackRequest, StepContentDraft,
};
use crate::scenario::{Scenario, UserContext};
use crate::session::Session;
use crate::step::{Evaluation, ResponseAnalysis, Step, StepContent, StepType};

pub(crate) fn scenario() -> Scenario {
    Scenario {
        id: Uuid::new_v4(),
        skill: "negotiation".into(),
        title: "Client Escalation".into(),
        description: "A key client is unhappy with a late delivery.".into(),
        difficulty_level: 3,
        estimated_duration_minutes: 20,
        initial_situation: "The client's director calls you directly, upset.".into(),
        step_count: Some(5),
        tags: vec!["client".into()],
        ai_generated: false,
        created_at: Utc::now(),
    }
}

pub(crate) fn session_for(scenario: &Scenario, total_steps: u32) -> Session {
    Session::new("user-1", scenario, total_steps, 3)
}

pub(crate) fn step_of(session: &Session, step_number: u32, step_type: StepType) -> Step {
    Step::new(
        session.id,
        step_number,
        step_type,
        StepContent {
            question: format!("Question {step_number}"),
            context: "Context".into(),
            ..StepContent::default()
        },
    )
}

pub(crate) fn payload(score: u32) -> EvaluationPayload {
    EvaluationPayload {
        overall_score: f64::from(score),
        criteria_scores: BTreeMap::from([("skill_application".to_string(), f64::from(score))]),
        strengths: vec!["Clear".into()],
        areas_for_improvement: vec!["More detail".into()],
        specific_feedback: "Reasonable answer".into(),
        recommended_difficulty: None,
        experience_level: None,
    }
}

pub(crate) fn evaluation_with(score: u32, criteria: &[(&str, u32)], strengths: &[&str]) -> Evaluation {
    Evaluation {
        overall_score: score,
        criteria_scores: criteria
            .iter()
            .map(|(name, s)| (name.to_string(), *s))
            .collect(),
        strengths: strengths.iter().map(|s| s.to_string()).collect(),
        areas_for_improvement: vec![],
        rationale: String::new(),
        recommended_difficulty: None,
        experience_level: None,
        is_fallback: false,
    }
}

/// An answered and evaluated step.
pub(crate) fn answered(session: &Session, step_number: u32, text: &str, score: u32) -> Step {
    let step_type = if step_number == 1 {
        StepType::PreTest
    } else {
        StepType::Simulation
    };
    let mut step = step_of(session, step_number, step_type);
    step.content.user_response = Some(text.to_string());
    step.analysis = Some(ResponseAnalysis::from_text(text));
    step.evaluation = Some(evaluation_with(score, &[], &[]));
    step
}

/// Deterministic gateway for end-to-end tests of the manager.
pub(crate) struct StubGateway {
    scores: Vec<u32>,
    calls: AtomicUsize,
    delay: Duration,
    fail: bool,
    recommended_difficulty: Option<u8>,
}

impl StubGateway {
    pub(crate) fn scoring(score: u32) -> Self {
        Self::with_scores(vec![score])
    }

    /// Evaluations return `scores` in order, cycling.
    pub(crate) fn with_scores(scores: Vec<u32>) -> Self {
        Self {
            scores,
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            fail: false,
            recommended_difficulty: None,
        }
    }

    /// Every call fails as if the service were down.
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::scoring(0)
        }
    }

    /// Evaluations sleep for `delay` before answering.
    pub(crate) fn with_delay(self, delay: Duration) -> Self {
        Self { delay, ..self }
    }

    pub(crate) fn recommending(self, difficulty: u8) -> Self {
        Self {
            recommended_difficulty: Some(difficulty),
            ..self
        }
    }

    fn check(&self) -> GatewayResult<()> {
        if self.fail {
            Err(GatewayError::Unavailable("stubbed outage".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl GenerativeContentGateway for StubGateway {
    async fn generate_scenario(
        &self,
        skill: &str,
        difficulty: u8,
        _user_context: &UserContext,
    ) -> GatewayResult<ScenarioDraft> {
        self.check()?;
        Ok(ScenarioDraft {
            title: format!("{skill} drill"),
            description: "Generated".into(),
            difficulty_level: difficulty,
            estimated_duration_minutes: 10,
            step_count: 4,
            initial_situation: "Something happened.".into(),
            tags: vec![],
        })
    }

    async fn generate_initial_assessment(
        &self,
        scenario: &Scenario,
        _user_context: &UserContext,
    ) -> GatewayResult<InitialAssessment> {
        self.check()?;
        Ok(InitialAssessment {
            question: format!("What do you know about {}?", scenario.skill),
            context: "Warm-up".into(),
            instructions: "Be honest".into(),
            expected_skills: vec![scenario.skill.clone()],
            evaluation_criteria: vec![],
            estimated_time_minutes: 5,
        })
    }

    async fn generate_step_content(
        &self,
        _scenario: &Scenario,
        step_number: u32,
    ) -> GatewayResult<StepContentDraft> {
        self.check()?;
        Ok(StepContentDraft {
            prompt: format!("Development {step_number}"),
            question: format!("What now at step {step_number}?"),
            context: "Ongoing".into(),
            expected_response_type: "practice".into(),
        })
    }

    async fn generate_evaluation(
        &self,
        _request: &EvaluationRequest,
    ) -> GatewayResult<EvaluationPayload> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.check()?;
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let score = self.scores[call % self.scores.len()];
        Ok(EvaluationPayload {
            recommended_difficulty: self.recommended_difficulty,
            ..payload(score)
        })
    }

    async fn generate_narrative_feedback(&self, _evaluation: &Evaluation) -> GatewayResult<String> {
        self.check()?;
        Ok("Good work. The key point is that you listened first.".into())
    }

    async fn generate_skill_feedback(
        &self,
        request: &SkillFeedbackRequest,
    ) -> GatewayResult<String> {
        self.check()?;
        Ok(format!("Solid {}.", request.skill_name))
    }

    async fn generate_overall_feedback(
        &self,
        summary: &PerformanceSummary,
    ) -> GatewayResult<String> {
        self.check()?;
        Ok(format!("Well done on {}.", summary.scenario_title))
    }
}
