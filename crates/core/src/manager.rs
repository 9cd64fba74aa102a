//! Session Manager
//!
//! The aggregate root of the engine. It owns session creation and status
//! transitions and runs the respond cycle:
//!
//! 1. load the session and its current, unanswered step
//! 2. grade the response ([`ResponseEvaluator`])
//! 3. decide what follows ([`StepOrchestrator`])
//! 4. either materialize the next step or complete the session, build the
//!    [`CompletionReport`] and publish a [`SimulationFinished`] event
//!
//! A respond cycle holds a per-session lock for its whole duration, and every
//! session write is version checked, so two concurrent responses to the same
//! session can never both create a next step. The session and its step writes
//! of one cycle are stored as a single [`SessionTransition`]; a failed write
//! leaves the session where it was, ready for the same response again.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{PracticeError, Result};
use crate::evaluator::{ResponseEvaluator, Submission};
use crate::fallback;
use crate::gateway::{GenerativeContentGateway, recover};
use crate::notify::{CompletionNotifier, SimulationFinished};
use crate::orchestrator::StepOrchestrator;
use crate::report::{CompletionReport, CompletionReportBuilder};
use crate::repository::{
    ScenarioRepository, SessionRepository, SessionTransition, StepRepository,
    TransitionRepository,
};
use crate::scenario::{
    DEFAULT_DIFFICULTY, DEFAULT_STEP_COUNT, MIN_STEP_COUNT, Scenario, StartRequest, UserContext,
};
use crate::scoring::{ScoreAggregator, round1};
use crate::session::{Session, SessionStatus};
use crate::step::{Evaluation, Step, StepType};

/// Minutes budgeted for each step that is still to be answered.
const MINUTES_PER_REMAINING_STEP: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Step count for scenarios that do not define one.
    pub default_total_steps: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_total_steps: DEFAULT_STEP_COUNT,
        }
    }
}

/// The repositories a [`SessionManager`] persists through.
#[derive(Clone)]
pub struct Repositories {
    pub sessions: Arc<dyn SessionRepository>,
    pub steps: Arc<dyn StepRepository>,
    pub scenarios: Arc<dyn ScenarioRepository>,
    pub transitions: Arc<dyn TransitionRepository>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RespondRequest {
    pub response_text: String,
    #[serde(default)]
    pub response_time_seconds: Option<u32>,
    #[serde(default)]
    pub help_requested: bool,
    /// Step the client believes it is answering.
    #[serde(default)]
    pub expected_step_number: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StartedSession {
    pub session: Session,
    pub scenario: Scenario,
    pub initial_step: Step,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RespondOutcome {
    Continued {
        answered_step: Step,
        evaluation: Evaluation,
        feedback: String,
        next_step: Step,
        message: String,
    },
    Completed {
        answered_step: Step,
        evaluation: Evaluation,
        feedback: String,
        final_score: u32,
        report: Box<CompletionReport>,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScenarioSummary {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub skill: String,
    pub difficulty_level: u8,
    pub estimated_duration_minutes: u32,
}

impl From<&Scenario> for ScenarioSummary {
    fn from(scenario: &Scenario) -> Self {
        Self {
            id: scenario.id,
            title: scenario.title.clone(),
            description: scenario.description.clone(),
            skill: scenario.skill.clone(),
            difficulty_level: scenario.difficulty_level,
            estimated_duration_minutes: scenario.estimated_duration_minutes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressSummary {
    pub completed_steps: usize,
    pub total_steps: u32,
    pub progress_percentage: f64,
    pub average_score: f64,
    pub estimated_minutes_remaining: u32,
    pub minutes_spent: u32,
    pub status_description: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionStatusView {
    pub session: Session,
    pub scenario: ScenarioSummary,
    pub answered_steps: Vec<Step>,
    pub current_step: Option<Step>,
    pub progress: ProgressSummary,
}

pub struct SessionManager {
    repos: Repositories,
    gateway: Arc<dyn GenerativeContentGateway>,
    evaluator: ResponseEvaluator,
    orchestrator: StepOrchestrator,
    reports: CompletionReportBuilder,
    notifier: Arc<dyn CompletionNotifier>,
    settings: EngineSettings,
    locks: LockRegistry,
}

type LockRegistry = StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>;

/// A held session lock. Dropping it releases the lock and removes the
/// registry entry once no other request is waiting on it.
struct SessionLock<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    registry: &'a LockRegistry,
    session_id: Uuid,
}

impl Drop for SessionLock<'_> {
    fn drop(&mut self) {
        self.guard.take();
        forget_if_idle(self.registry, self.session_id);
    }
}

fn forget_if_idle(registry: &LockRegistry, session_id: Uuid) {
    let mut locks = registry.lock().unwrap_or_else(PoisonError::into_inner);
    if locks
        .get(&session_id)
        .is_some_and(|lock| Arc::strong_count(lock) == 1)
    {
        locks.remove(&session_id);
    }
}

impl SessionManager {
    pub fn new(
        repos: Repositories,
        gateway: Arc<dyn GenerativeContentGateway>,
        notifier: Arc<dyn CompletionNotifier>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            evaluator: ResponseEvaluator::new(gateway.clone()),
            orchestrator: StepOrchestrator::new(gateway.clone()),
            reports: CompletionReportBuilder::new(gateway.clone()),
            repos,
            gateway,
            notifier,
            settings,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Creates and persists a session over an existing scenario.
    pub async fn create(
        &self,
        user_id: &str,
        scenario_id: Uuid,
        difficulty_override: Option<u8>,
    ) -> Result<Session> {
        let scenario = self.find_scenario(scenario_id).await?;
        let session = self.new_session(user_id, &scenario, difficulty_override)?;
        self.repos.sessions.create(&session).await?;
        info!(
            session_id = %session.id,
            user_id,
            scenario_id = %scenario.id,
            total_steps = session.total_steps,
            "Session created"
        );
        Ok(session)
    }

    /// Builds an unsaved session over `scenario`.
    fn new_session(
        &self,
        user_id: &str,
        scenario: &Scenario,
        difficulty_override: Option<u8>,
    ) -> Result<Session> {
        if let Some(count) = scenario.step_count.filter(|&c| c < MIN_STEP_COUNT) {
            return Err(PracticeError::validation(format!(
                "scenario {} has {count} steps; at least {MIN_STEP_COUNT} are required",
                scenario.id
            )));
        }
        let total_steps = scenario.total_steps(self.settings.default_total_steps);
        let difficulty = difficulty_override
            .map(|d| d.clamp(1, 5))
            .unwrap_or(scenario.difficulty_level);
        Ok(Session::new(user_id, scenario, total_steps, difficulty))
    }

    /// Starts a practice session and creates its pre-test step.
    pub async fn start(&self, request: StartRequest) -> Result<StartedSession> {
        let user_id = request.user_id().trim();
        if user_id.is_empty() {
            return Err(PracticeError::validation("user_id must not be empty"));
        }

        let scenario = match &request {
            StartRequest::ByScenario { scenario_id, .. } => {
                self.find_scenario(*scenario_id).await?
            }
            StartRequest::BySkill {
                skill,
                user_context,
                difficulty_override,
                ..
            } => {
                self.generate_scenario(skill, *difficulty_override, user_context)
                    .await?
            }
        };

        let mut session = self.new_session(user_id, &scenario, request.difficulty_override())?;
        let initial_step = self
            .orchestrator
            .create_initial_step(&session, &scenario, request.user_context())
            .await;

        session.status = SessionStatus::PreTest;
        session.version = self
            .repos
            .transitions
            .apply(SessionTransition::start(&session, &initial_step))
            .await?;
        info!(
            session_id = %session.id,
            user_id,
            scenario_id = %scenario.id,
            total_steps = session.total_steps,
            "Session started"
        );

        Ok(StartedSession {
            session,
            scenario,
            initial_step,
        })
    }

    async fn generate_scenario(
        &self,
        skill: &str,
        difficulty_override: Option<u8>,
        user_context: &UserContext,
    ) -> Result<Scenario> {
        let skill = skill.trim();
        if skill.is_empty() {
            return Err(PracticeError::validation("skill must not be empty"));
        }
        let difficulty = difficulty_override
            .unwrap_or(DEFAULT_DIFFICULTY)
            .clamp(1, 5);
        let generated = self
            .gateway
            .generate_scenario(skill, difficulty, user_context)
            .await;
        let draft = recover("generate_scenario", generated, || {
            fallback::scenario(skill, difficulty)
        });

        let scenario = Scenario::from_draft(skill, draft);
        self.repos.scenarios.create(&scenario).await?;
        info!(scenario_id = %scenario.id, skill, "Scenario generated");
        Ok(scenario)
    }

    /// Grades the response to the current step and advances the session.
    #[instrument(skip_all, fields(session_id = %session_id))]
    pub async fn respond(
        &self,
        session_id: Uuid,
        request: RespondRequest,
    ) -> Result<RespondOutcome> {
        if request.response_text.trim().is_empty() {
            return Err(PracticeError::validation("response_text must not be empty"));
        }
        let lock = self.acquire(session_id)?;

        let mut session = self.find_session(session_id).await?;
        if session.status.is_terminal() {
            return Err(PracticeError::validation(format!(
                "session {session_id} is not active ({})",
                session.status
            )));
        }
        match request.expected_step_number {
            Some(expected) if expected != session.current_step => {
                return Err(PracticeError::ConcurrencyConflict(format!(
                    "step {expected} is not the current step of session {session_id} (current is {})",
                    session.current_step
                )));
            }
            _ => {}
        }

        let scenario = self.find_scenario(session.scenario_id).await?;
        let mut current = self
            .repos
            .steps
            .find_by_session(session_id)
            .await?
            .into_iter()
            .find(|s| s.step_number == session.current_step && !s.is_answered())
            .ok_or_else(|| {
                PracticeError::not_found("step", format!("{session_id}/{}", session.current_step))
            })?;

        let submission = Submission {
            text: request.response_text,
            response_time_seconds: request.response_time_seconds,
            help_requested: request.help_requested,
        };
        let evaluation = self
            .evaluator
            .assess(&session, &mut current, &scenario, &submission)
            .await?;
        ScoreAggregator::record_step_score(&mut session, evaluation.overall_score);
        if current.step_type == StepType::PreTest {
            if let Some(difficulty) = evaluation.recommended_difficulty {
                session.difficulty_level = difficulty;
            }
        }
        let feedback = current
            .content
            .narrative_feedback
            .clone()
            .unwrap_or_default();

        let decision = self.orchestrator.decide_next(&session, &current, &evaluation);
        if decision.is_completed {
            let final_score = ScoreAggregator::final_score(&session.step_scores);
            session.status = SessionStatus::Completed;
            session.current_step = decision.step_number;
            session.final_score = Some(final_score);
            session.completed_at = Some(Utc::now());

            session.version = self
                .repos
                .transitions
                .apply(SessionTransition::finish(&session, &current))
                .await?;
            drop(lock);
            info!(final_score, "Session completed");

            let steps = self.repos.steps.find_by_session(session_id).await?;
            let report = self.reports.build(&session, &steps).await;
            if let Err(e) = self
                .notifier
                .publish(SimulationFinished::for_session(&session))
                .await
            {
                warn!(error = %e, "Failed to publish completion event");
            }

            return Ok(RespondOutcome::Completed {
                answered_step: current,
                evaluation,
                feedback,
                final_score,
                report: Box::new(report),
                message: format!("Simulation completed! Final score: {final_score}/100."),
            });
        }

        let next_step = self
            .orchestrator
            .create_next_step(&session, &scenario, &decision)
            .await
            .ok_or_else(|| {
                PracticeError::Internal(anyhow::anyhow!(
                    "no step materialized for step {} of session {session_id}",
                    decision.step_number
                ))
            })?;
        session.current_step = next_step.step_number;
        session.status = SessionStatus::Simulation;

        session.version = self
            .repos
            .transitions
            .apply(SessionTransition::advance(&session, &current, &next_step))
            .await?;
        drop(lock);
        info!(
            score = evaluation.overall_score,
            next_step = next_step.step_number,
            "Response recorded"
        );

        let message = match current.step_type {
            StepType::PreTest => format!(
                "Initial test completed (score: {}/100). Continuing with the simulation.",
                evaluation.overall_score
            ),
            _ => format!(
                "Response evaluated (score: {}/100). Proceeding to the next step.",
                evaluation.overall_score
            ),
        };
        Ok(RespondOutcome::Continued {
            answered_step: current,
            evaluation,
            feedback,
            next_step,
            message,
        })
    }

    pub async fn session(&self, session_id: Uuid) -> Result<Session> {
        self.find_session(session_id).await
    }

    /// Where a session stands, with its answered and current steps.
    pub async fn status(&self, session_id: Uuid) -> Result<SessionStatusView> {
        let session = self.find_session(session_id).await?;
        let scenario = self.find_scenario(session.scenario_id).await?;
        let steps = self.repos.steps.find_by_session(session_id).await?;

        let last_created = steps.iter().map(|s| s.created_at).max();
        let (answered_steps, pending): (Vec<Step>, Vec<Step>) =
            steps.into_iter().partition(Step::is_answered);
        let current_step = if session.is_active() {
            pending.into_iter().next()
        } else {
            None
        };

        let completed_steps = answered_steps.len();
        let scores: Vec<u32> = answered_steps.iter().filter_map(Step::score).collect();
        let average_score = if scores.is_empty() {
            0.0
        } else {
            scores.iter().map(|&s| f64::from(s)).sum::<f64>() / scores.len() as f64
        };
        let remaining = session.total_steps.saturating_sub(completed_steps as u32);

        let progress = ProgressSummary {
            completed_steps,
            total_steps: session.total_steps,
            progress_percentage: round1(ScoreAggregator::completion_percentage(
                completed_steps,
                session.total_steps,
            )),
            average_score: round1(average_score),
            estimated_minutes_remaining: remaining * MINUTES_PER_REMAINING_STEP,
            minutes_spent: last_created
                .map(|last| (last - session.started_at).num_minutes().max(1) as u32)
                .unwrap_or(0),
            status_description: session.status_description(completed_steps),
            is_active: session.is_active(),
        };

        Ok(SessionStatusView {
            scenario: ScenarioSummary::from(&scenario),
            session,
            answered_steps,
            current_step,
            progress,
        })
    }

    /// Moves a non-terminal session to [`SessionStatus::Abandoned`].
    pub async fn abandon(&self, session_id: Uuid) -> Result<Session> {
        let _lock = self.acquire(session_id)?;
        let mut session = self.find_session(session_id).await?;
        if session.status.is_terminal() {
            return Err(PracticeError::validation(format!(
                "session {session_id} is already {}",
                session.status
            )));
        }
        session.status = SessionStatus::Abandoned;
        session.completed_at = Some(Utc::now());
        session.version = self.repos.sessions.update(&session).await?;
        info!(session_id = %session_id, "Session abandoned");
        Ok(session)
    }

    /// Rebuilds the completion report of a completed session.
    pub async fn completion_report(&self, session_id: Uuid) -> Result<CompletionReport> {
        let session = self.find_session(session_id).await?;
        if session.status != SessionStatus::Completed {
            return Err(PracticeError::validation(format!(
                "session {session_id} is not completed ({})",
                session.status
            )));
        }
        let steps = self.repos.steps.find_by_session(session_id).await?;
        Ok(self.reports.build(&session, &steps).await)
    }

    async fn find_session(&self, id: Uuid) -> Result<Session> {
        self.repos
            .sessions
            .find_by_id(id)
            .await?
            .ok_or_else(|| PracticeError::not_found("session", id))
    }

    async fn find_scenario(&self, id: Uuid) -> Result<Scenario> {
        self.repos
            .scenarios
            .find_by_id(id)
            .await?
            .ok_or_else(|| PracticeError::not_found("scenario", id))
    }

    /// Takes the session's lock without waiting.
    fn acquire(&self, session_id: Uuid) -> Result<SessionLock<'_>> {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(session_id)
            .or_default()
            .clone();
        match lock.try_lock_owned() {
            Ok(guard) => Ok(SessionLock {
                guard: Some(guard),
                registry: &self.locks,
                session_id,
            }),
            Err(_) => {
                forget_if_idle(&self.locks, session_id);
                Err(PracticeError::ConcurrencyConflict(format!(
                    "session {session_id} is already processing a request"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::MockCompletionNotifier;
    use crate::report::CompletionStatus;
    use crate::error::StoreError;
    use crate::repository::StoreResult;
    use crate::repository::memory;
    use crate::test_support::{StubGateway, scenario};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct Harness {
        manager: Arc<SessionManager>,
        repos: Repositories,
        scenario: Scenario,
    }

    /// Fails the next transition once when armed.
    struct FlakyTransitions {
        inner: Arc<dyn TransitionRepository>,
        fail_next: AtomicBool,
    }

    #[async_trait]
    impl TransitionRepository for FlakyTransitions {
        async fn apply(&self, transition: SessionTransition<'_>) -> StoreResult<i64> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(StoreError::Backend(anyhow::anyhow!("transient db error")));
            }
            self.inner.apply(transition).await
        }
    }

    async fn harness_with(
        gateway: StubGateway,
        notifier: Arc<dyn CompletionNotifier>,
    ) -> Harness {
        harness_over(memory::repositories(), gateway, notifier).await
    }

    /// A harness whose transitions can be made to fail once.
    async fn flaky_harness() -> (Harness, Arc<FlakyTransitions>) {
        let mut repos = memory::repositories();
        let flaky = Arc::new(FlakyTransitions {
            inner: repos.transitions.clone(),
            fail_next: AtomicBool::new(false),
        });
        repos.transitions = flaky.clone();
        let h = harness_over(
            repos,
            StubGateway::scoring(80),
            Arc::new(crate::notify::NoopNotifier),
        )
        .await;
        (h, flaky)
    }

    async fn harness_over(
        repos: Repositories,
        gateway: StubGateway,
        notifier: Arc<dyn CompletionNotifier>,
    ) -> Harness {
        let scenario = scenario();
        repos.scenarios.create(&scenario).await.unwrap();
        let manager = SessionManager::new(
            repos.clone(),
            Arc::new(gateway),
            notifier,
            EngineSettings::default(),
        );
        Harness {
            manager: Arc::new(manager),
            repos,
            scenario,
        }
    }

    async fn harness() -> Harness {
        harness_with(StubGateway::scoring(80), Arc::new(crate::notify::NoopNotifier)).await
    }

    fn by_scenario(id: Uuid) -> StartRequest {
        StartRequest::ByScenario {
            user_id: "user-1".into(),
            scenario_id: id,
            user_context: UserContext::default(),
            difficulty_override: None,
        }
    }

    fn answer(text: &str) -> RespondRequest {
        RespondRequest {
            response_text: text.into(),
            response_time_seconds: Some(40),
            ..RespondRequest::default()
        }
    }

    #[tokio::test]
    async fn test_start_by_scenario_creates_pre_test() {
        let h = harness().await;
        let started = h.manager.start(by_scenario(h.scenario.id)).await.unwrap();

        assert_eq!(started.session.status, SessionStatus::PreTest);
        assert_eq!(started.session.current_step, 1);
        assert_eq!(started.session.total_steps, 5);
        assert_eq!(started.session.difficulty_level, h.scenario.difficulty_level);
        assert_eq!(started.session.final_score, None);
        assert_eq!(started.initial_step.step_type, StepType::PreTest);
        assert_eq!(started.initial_step.step_number, 1);

        let stored = h.repos.sessions.find_by_id(started.session.id).await.unwrap().unwrap();
        assert_eq!(stored.version, started.session.version);
    }

    #[tokio::test]
    async fn test_start_with_unknown_scenario_is_not_found() {
        let h = harness().await;
        let err = h.manager.start(by_scenario(Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err, PracticeError::NotFound { entity: "scenario", .. }));
    }

    #[tokio::test]
    async fn test_start_rejects_blank_user() {
        let h = harness().await;
        let request = StartRequest::ByScenario {
            user_id: "  ".into(),
            scenario_id: h.scenario.id,
            user_context: UserContext::default(),
            difficulty_override: None,
        };
        assert!(matches!(
            h.manager.start(request).await,
            Err(PracticeError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_start_by_skill_with_degraded_service() {
        let h = harness_with(StubGateway::failing(), Arc::new(crate::notify::NoopNotifier)).await;
        let started = h
            .manager
            .start(StartRequest::BySkill {
                user_id: "user-1".into(),
                skill: "empathy".into(),
                user_context: UserContext::default(),
                difficulty_override: None,
            })
            .await
            .unwrap();

        assert!(started.scenario.ai_generated);
        assert!(started.scenario.title.contains("empathy"));
        assert_eq!(started.session.total_steps, DEFAULT_STEP_COUNT);
        assert_eq!(started.session.difficulty_level, DEFAULT_DIFFICULTY);
        assert!(started.initial_step.content.question.contains("empathy"));
        assert!(
            h.repos
                .scenarios
                .find_by_id(started.scenario.id)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_start_by_skill_rejects_blank_skill() {
        let h = harness().await;
        let err = h
            .manager
            .start(StartRequest::BySkill {
                user_id: "user-1".into(),
                skill: "".into(),
                user_context: UserContext::default(),
                difficulty_override: Some(2),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PracticeError::Validation(_)));
    }

    #[tokio::test]
    async fn test_create_applies_difficulty_override() {
        let h = harness().await;
        let session = h
            .manager
            .create("user-1", h.scenario.id, Some(9))
            .await
            .unwrap();
        assert_eq!(session.status, SessionStatus::Started);
        assert_eq!(session.difficulty_level, 5);
    }

    #[tokio::test]
    async fn test_full_session_runs_to_completion() {
        let mut notifier = MockCompletionNotifier::new();
        notifier
            .expect_publish()
            .withf(|event| event.event == "simulation_finished" && event.points_earned == 80)
            .times(1)
            .returning(|_| Ok(()));
        let h = harness_with(StubGateway::scoring(80), Arc::new(notifier)).await;
        let started = h.manager.start(by_scenario(h.scenario.id)).await.unwrap();
        let id = started.session.id;

        for expected_next in 2..=4 {
            let outcome = h.manager.respond(id, answer("I would listen.")).await.unwrap();
            match outcome {
                RespondOutcome::Continued { next_step, .. } => {
                    assert_eq!(next_step.step_number, expected_next);
                    assert_eq!(next_step.step_type, StepType::Simulation);
                }
                other => panic!("expected to continue, got {other:?}"),
            }
            let session = h.manager.session(id).await.unwrap();
            assert_eq!(session.status, SessionStatus::Simulation);
            assert_eq!(session.final_score, None);
        }

        let outcome = h.manager.respond(id, answer("Final answer.")).await.unwrap();
        let RespondOutcome::Completed {
            final_score,
            report,
            ..
        } = outcome
        else {
            panic!("expected completion");
        };
        assert_eq!(final_score, 80);
        assert_eq!(report.completion_status, CompletionStatus::PartiallyCompleted);

        let session = h.manager.session(id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.final_score, Some(80));
        assert_eq!(session.step_scores, vec![80, 80, 80, 80]);
        assert_eq!(session.current_step, 5);
        assert!(session.completed_at.is_some());

        let numbers: Vec<u32> = h
            .repos
            .steps
            .find_by_session(id)
            .await
            .unwrap()
            .iter()
            .map(|s| s.step_number)
            .collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);

        let err = h.manager.respond(id, answer("More?")).await.unwrap_err();
        assert!(matches!(err, PracticeError::Validation(_)));
    }

    #[tokio::test]
    async fn test_at_most_one_unanswered_step() {
        let h = harness().await;
        let started = h.manager.start(by_scenario(h.scenario.id)).await.unwrap();
        let id = started.session.id;

        for _ in 0..3 {
            h.manager.respond(id, answer("Answer.")).await.unwrap();
            let steps = h.repos.steps.find_by_session(id).await.unwrap();
            assert_eq!(steps.iter().filter(|s| !s.is_answered()).count(), 1);
            let session = h.manager.session(id).await.unwrap();
            assert!(session.current_step <= session.total_steps + 1);
            assert!(session.step_scores.len() as u32 <= session.total_steps);
        }
    }

    #[tokio::test]
    async fn test_final_score_is_truncated_mean() {
        let h = harness_with(
            StubGateway::with_scores(vec![80, 91, 70, 100]),
            Arc::new(crate::notify::NoopNotifier),
        )
        .await;
        let id = h.manager.start(by_scenario(h.scenario.id)).await.unwrap().session.id;
        let mut last = None;
        for _ in 0..4 {
            last = Some(h.manager.respond(id, answer("Answer.")).await.unwrap());
        }
        assert!(matches!(
            last,
            Some(RespondOutcome::Completed { final_score: 85, .. })
        ));
    }

    #[tokio::test]
    async fn test_pre_test_recommendation_adjusts_difficulty() {
        let h = harness_with(
            StubGateway::scoring(70).recommending(1),
            Arc::new(crate::notify::NoopNotifier),
        )
        .await;
        let id = h.manager.start(by_scenario(h.scenario.id)).await.unwrap().session.id;
        h.manager.respond(id, answer("Some experience.")).await.unwrap();
        assert_eq!(h.manager.session(id).await.unwrap().difficulty_level, 1);
    }

    #[tokio::test]
    async fn test_respond_validations() {
        let h = harness().await;
        let id = h.manager.start(by_scenario(h.scenario.id)).await.unwrap().session.id;

        let err = h.manager.respond(id, answer("   ")).await.unwrap_err();
        assert!(matches!(err, PracticeError::Validation(_)));

        let err = h.manager.respond(Uuid::new_v4(), answer("x")).await.unwrap_err();
        assert!(matches!(err, PracticeError::NotFound { entity: "session", .. }));

        let stale = RespondRequest {
            expected_step_number: Some(3),
            ..answer("x")
        };
        let err = h.manager.respond(id, stale).await.unwrap_err();
        assert!(err.is_retryable());

        let current = RespondRequest {
            expected_step_number: Some(1),
            ..answer("x")
        };
        assert!(h.manager.respond(id, current).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_responds_do_not_both_advance() {
        let h = harness_with(
            StubGateway::scoring(80).with_delay(Duration::from_millis(200)),
            Arc::new(crate::notify::NoopNotifier),
        )
        .await;
        let id = h.manager.start(by_scenario(h.scenario.id)).await.unwrap().session.id;

        let (a, b) = tokio::join!(
            h.manager.respond(id, answer("First")),
            h.manager.respond(id, answer("Second")),
        );
        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(PracticeError::ConcurrencyConflict(_))))
        );

        let steps = h.repos.steps.find_by_session(id).await.unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(h.manager.session(id).await.unwrap().current_step, 2);
        assert!(h.manager.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_session_resumable() {
        let (h, flaky) = flaky_harness().await;
        let id = h.manager.start(by_scenario(h.scenario.id)).await.unwrap().session.id;

        flaky.fail_next.store(true, Ordering::SeqCst);
        let err = h.manager.respond(id, answer("First try.")).await.unwrap_err();
        assert!(matches!(err, PracticeError::Internal(_)));

        let session = h.manager.session(id).await.unwrap();
        assert_eq!(session.status, SessionStatus::PreTest);
        assert_eq!(session.current_step, 1);
        assert!(session.step_scores.is_empty());
        let steps = h.repos.steps.find_by_session(id).await.unwrap();
        assert_eq!(steps.len(), 1);
        assert!(!steps[0].is_answered());

        let outcome = h.manager.respond(id, answer("Second try.")).await.unwrap();
        assert!(matches!(
            outcome,
            RespondOutcome::Continued { ref next_step, .. } if next_step.step_number == 2
        ));
        let session = h.manager.session(id).await.unwrap();
        assert_eq!(session.current_step, 2);
        assert_eq!(session.step_scores, vec![80]);
    }

    #[tokio::test]
    async fn test_failed_completion_write_can_be_retried() {
        let (h, flaky) = flaky_harness().await;
        let id = h.manager.start(by_scenario(h.scenario.id)).await.unwrap().session.id;
        for _ in 0..3 {
            h.manager.respond(id, answer("Answer.")).await.unwrap();
        }

        flaky.fail_next.store(true, Ordering::SeqCst);
        assert!(h.manager.respond(id, answer("Last.")).await.is_err());
        let session = h.manager.session(id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Simulation);
        assert_eq!(session.current_step, 4);
        assert_eq!(session.final_score, None);

        assert!(matches!(
            h.manager.respond(id, answer("Last.")).await,
            Ok(RespondOutcome::Completed { final_score: 80, .. })
        ));
        let steps = h.repos.steps.find_by_session(id).await.unwrap();
        assert!(steps.iter().all(Step::is_answered));
    }

    #[tokio::test]
    async fn test_failed_start_stores_nothing_half_done() {
        let (h, flaky) = flaky_harness().await;
        flaky.fail_next.store(true, Ordering::SeqCst);
        let err = h.manager.start(by_scenario(h.scenario.id)).await.unwrap_err();
        assert!(matches!(err, PracticeError::Internal(_)));

        let started = h.manager.start(by_scenario(h.scenario.id)).await.unwrap();
        let steps = h.repos.steps.find_by_session(started.session.id).await.unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(started.session.status, SessionStatus::PreTest);
    }

    #[tokio::test]
    async fn test_lock_registry_is_emptied_after_each_cycle() {
        let h = harness().await;
        let id = h.manager.start(by_scenario(h.scenario.id)).await.unwrap().session.id;

        h.manager.respond(id, answer("Answer.")).await.unwrap();
        assert!(h.manager.locks.lock().unwrap().is_empty());

        let stale = RespondRequest {
            expected_step_number: Some(9),
            ..answer("x")
        };
        assert!(h.manager.respond(id, stale).await.is_err());
        assert!(h.manager.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scenario_with_too_few_steps_is_rejected() {
        let h = harness().await;
        let mut short = scenario();
        short.step_count = Some(1);
        h.repos.scenarios.create(&short).await.unwrap();

        let err = h.manager.start(by_scenario(short.id)).await.unwrap_err();
        assert!(matches!(err, PracticeError::Validation(_)));
        let err = h.manager.create("user-1", short.id, None).await.unwrap_err();
        assert!(matches!(err, PracticeError::Validation(_)));
    }

    #[tokio::test]
    async fn test_stale_session_version_is_rejected() {
        let h = harness().await;
        let started = h.manager.start(by_scenario(h.scenario.id)).await.unwrap();
        // Another process advances the session behind our back.
        let mut concurrent = started.session.clone();
        concurrent.current_step = 1;
        h.repos.sessions.update(&concurrent).await.unwrap();

        let mut stale = started.session.clone();
        stale.status = SessionStatus::Simulation;
        let err: PracticeError = h.repos.sessions.update(&stale).await.unwrap_err().into();
        assert!(matches!(err, PracticeError::ConcurrencyConflict(_)));
    }

    #[tokio::test]
    async fn test_status_reports_progress() {
        let h = harness().await;
        let id = h.manager.start(by_scenario(h.scenario.id)).await.unwrap().session.id;
        h.manager.respond(id, answer("One.")).await.unwrap();
        h.manager.respond(id, answer("Two.")).await.unwrap();

        let view = h.manager.status(id).await.unwrap();
        assert_eq!(view.answered_steps.len(), 2);
        assert_eq!(view.current_step.as_ref().map(|s| s.step_number), Some(3));
        assert_eq!(view.scenario.title, "Client Escalation");
        assert_eq!(view.progress.completed_steps, 2);
        assert_eq!(view.progress.progress_percentage, 40.0);
        assert_eq!(view.progress.average_score, 80.0);
        assert_eq!(view.progress.estimated_minutes_remaining, 15);
        assert_eq!(view.progress.minutes_spent, 1);
        assert_eq!(view.progress.status_description, "In progress - step 2 of 5");
        assert!(view.progress.is_active);
    }

    #[tokio::test]
    async fn test_abandon() {
        let h = harness().await;
        let id = h.manager.start(by_scenario(h.scenario.id)).await.unwrap().session.id;

        let session = h.manager.abandon(id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Abandoned);
        assert!(session.completed_at.is_some());
        assert_eq!(session.final_score, None);

        assert!(matches!(
            h.manager.abandon(id).await,
            Err(PracticeError::Validation(_))
        ));
        let view = h.manager.status(id).await.unwrap();
        assert!(view.current_step.is_none());
        assert!(!view.progress.is_active);
    }

    #[tokio::test]
    async fn test_completion_report_requires_completed_session() {
        let h = harness().await;
        let id = h.manager.start(by_scenario(h.scenario.id)).await.unwrap().session.id;
        assert!(matches!(
            h.manager.completion_report(id).await,
            Err(PracticeError::Validation(_))
        ));

        for _ in 0..4 {
            h.manager.respond(id, answer("Answer.")).await.unwrap();
        }
        let report = h.manager.completion_report(id).await.unwrap();
        assert_eq!(report.session_id, id);
        assert_eq!(report.user_id, "user-1");
    }

    #[tokio::test]
    async fn test_failed_notification_does_not_fail_respond() {
        let mut notifier = MockCompletionNotifier::new();
        notifier
            .expect_publish()
            .returning(|_| Err(anyhow::anyhow!("broker down")));
        let h = harness_with(StubGateway::scoring(90), Arc::new(notifier)).await;
        let id = h.manager.start(by_scenario(h.scenario.id)).await.unwrap().session.id;
        for _ in 0..3 {
            h.manager.respond(id, answer("Answer.")).await.unwrap();
        }
        assert!(matches!(
            h.manager.respond(id, answer("Last.")).await,
            Ok(RespondOutcome::Completed { .. })
        ));
    }
}
