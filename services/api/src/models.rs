//! API and Database Models
//!
//! Request/response bodies documented with `utoipa`, plus the `sqlx` row types
//! the PostgreSQL repositories map through. Engine types are converted at this
//! boundary; nested engine records that the API passes through untouched are
//! documented as free-form objects.

use anyhow::Context;
use chrono::{DateTime, Utc};
use rehearsal_core::{
    Evaluation, RespondOutcome, RespondRequest, Scenario, Session, SessionStatusView,
    StartRequest, Step, UserContext,
    manager::{ProgressSummary, ScenarioSummary, StartedSession},
    report::CompletionReport,
    step::{InteractionMetrics, ResponseAnalysis, StepContent},
};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use utoipa::ToSchema;
use uuid::Uuid;

// --- Requests ---

#[derive(Deserialize, Serialize, ToSchema, Debug, Clone, Default, PartialEq)]
pub struct UserContextPayload {
    #[serde(default)]
    #[schema(example = "backend")]
    pub technical_specialization: String,
    #[serde(default)]
    #[schema(example = "senior")]
    pub seniority_level: String,
}

/// How to start a simulation: over a catalog scenario or a freshly generated one.
#[derive(Deserialize, Serialize, ToSchema, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StartSimulationPayload {
    ByScenario {
        #[schema(value_type = String, format = Uuid)]
        scenario_id: Uuid,
        #[serde(default)]
        user_context: UserContextPayload,
        #[serde(default)]
        difficulty_override: Option<u8>,
    },
    BySkill {
        #[schema(example = "negotiation")]
        skill: String,
        #[serde(default)]
        user_context: UserContextPayload,
        #[serde(default)]
        difficulty_override: Option<u8>,
    },
}

impl StartSimulationPayload {
    /// Binds the payload to the calling user.
    pub fn into_request(self, user_id: &str) -> StartRequest {
        let user_id = user_id.to_string();
        match self {
            StartSimulationPayload::ByScenario {
                scenario_id,
                user_context,
                difficulty_override,
            } => StartRequest::ByScenario {
                user_id,
                scenario_id,
                user_context: user_context.into(),
                difficulty_override,
            },
            StartSimulationPayload::BySkill {
                skill,
                user_context,
                difficulty_override,
            } => StartRequest::BySkill {
                user_id,
                skill,
                user_context: user_context.into(),
                difficulty_override,
            },
        }
    }
}

impl From<UserContextPayload> for UserContext {
    fn from(payload: UserContextPayload) -> Self {
        UserContext {
            technical_specialization: payload.technical_specialization,
            seniority_level: payload.seniority_level,
        }
    }
}

#[derive(Deserialize, ToSchema, Debug, Clone)]
pub struct RespondPayload {
    #[schema(example = "I would first acknowledge the client's frustration.")]
    pub response_text: String,
    #[serde(default)]
    pub response_time_seconds: Option<u32>,
    #[serde(default)]
    pub help_requested: bool,
    /// The step the client is answering; a mismatch is rejected with 409.
    #[serde(default)]
    pub expected_step_number: Option<u32>,
}

impl From<RespondPayload> for RespondRequest {
    fn from(payload: RespondPayload) -> Self {
        RespondRequest {
            response_text: payload.response_text,
            response_time_seconds: payload.response_time_seconds,
            help_requested: payload.help_requested,
            expected_step_number: payload.expected_step_number,
        }
    }
}

// --- Responses ---

#[derive(Serialize, ToSchema, Debug, Clone)]
pub struct SessionView {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    pub user_id: String,
    pub skill: String,
    #[schema(value_type = String, format = Uuid)]
    pub scenario_id: Uuid,
    pub scenario_title: String,
    #[schema(example = "pre_test")]
    pub status: String,
    pub current_step: u32,
    pub total_steps: u32,
    pub difficulty_level: u8,
    pub step_scores: Vec<u32>,
    pub final_score: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Session> for SessionView {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id,
            user_id: session.user_id.clone(),
            skill: session.skill.clone(),
            scenario_id: session.scenario_id,
            scenario_title: session.scenario_title.clone(),
            status: session.status.to_string(),
            current_step: session.current_step,
            total_steps: session.total_steps,
            difficulty_level: session.difficulty_level,
            step_scores: session.step_scores.clone(),
            final_score: session.final_score,
            created_at: session.created_at,
            started_at: session.started_at,
            completed_at: session.completed_at,
        }
    }
}

#[derive(Serialize, ToSchema, Debug, Clone)]
pub struct StepView {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    pub step_number: u32,
    #[schema(example = "simulation")]
    pub step_type: String,
    pub prompt: Option<String>,
    pub question: String,
    pub context: String,
    pub instructions: Option<String>,
    pub estimated_minutes: Option<u32>,
    pub user_response: Option<String>,
    pub narrative_feedback: Option<String>,
    pub score: Option<u32>,
    pub created_at: DateTime<Utc>,
}

impl From<&Step> for StepView {
    fn from(step: &Step) -> Self {
        Self {
            id: step.id,
            step_number: step.step_number,
            step_type: step.step_type.to_string(),
            prompt: step.content.prompt.clone(),
            question: step.content.question.clone(),
            context: step.content.context.clone(),
            instructions: step.content.instructions.clone(),
            estimated_minutes: step.content.estimated_minutes,
            user_response: step.content.user_response.clone(),
            narrative_feedback: step.content.narrative_feedback.clone(),
            score: step.score(),
            created_at: step.created_at,
        }
    }
}

#[derive(Serialize, ToSchema, Debug)]
pub struct SimulationStartedResponse {
    pub session: SessionView,
    #[schema(value_type = Object)]
    pub scenario: Scenario,
    pub initial_step: StepView,
}

impl From<StartedSession> for SimulationStartedResponse {
    fn from(started: StartedSession) -> Self {
        Self {
            session: SessionView::from(&started.session),
            initial_step: StepView::from(&started.initial_step),
            scenario: started.scenario,
        }
    }
}

/// Result of answering a step. `next_step` is set while the simulation
/// continues; `final_score` and `report` once it completes.
#[derive(Serialize, ToSchema, Debug)]
pub struct RespondResponse {
    #[schema(example = "continued")]
    pub outcome: String,
    pub answered_step: StepView,
    #[schema(value_type = Object)]
    pub evaluation: Evaluation,
    pub feedback: String,
    pub next_step: Option<StepView>,
    pub final_score: Option<u32>,
    #[schema(value_type = Object)]
    pub report: Option<CompletionReport>,
    pub message: String,
}

impl From<RespondOutcome> for RespondResponse {
    fn from(outcome: RespondOutcome) -> Self {
        match outcome {
            RespondOutcome::Continued {
                answered_step,
                evaluation,
                feedback,
                next_step,
                message,
            } => Self {
                outcome: "continued".to_string(),
                answered_step: StepView::from(&answered_step),
                evaluation,
                feedback,
                next_step: Some(StepView::from(&next_step)),
                final_score: None,
                report: None,
                message,
            },
            RespondOutcome::Completed {
                answered_step,
                evaluation,
                feedback,
                final_score,
                report,
                message,
            } => Self {
                outcome: "completed".to_string(),
                answered_step: StepView::from(&answered_step),
                evaluation,
                feedback,
                next_step: None,
                final_score: Some(final_score),
                report: Some(*report),
                message,
            },
        }
    }
}

#[derive(Serialize, ToSchema, Debug)]
pub struct SimulationStatusResponse {
    pub session: SessionView,
    #[schema(value_type = Object)]
    pub scenario: ScenarioSummary,
    pub answered_steps: Vec<StepView>,
    pub current_step: Option<StepView>,
    #[schema(value_type = Object)]
    pub progress: ProgressSummary,
}

impl From<SessionStatusView> for SimulationStatusResponse {
    fn from(view: SessionStatusView) -> Self {
        Self {
            session: SessionView::from(&view.session),
            answered_steps: view.answered_steps.iter().map(StepView::from).collect(),
            current_step: view.current_step.as_ref().map(StepView::from),
            scenario: view.scenario,
            progress: view.progress,
        }
    }
}

#[derive(Serialize, ToSchema, Debug)]
pub struct CompletionReportResponse {
    #[schema(value_type = Object)]
    pub report: CompletionReport,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}

// --- Database rows ---

#[derive(FromRow, Debug, Clone)]
pub struct ScenarioRow {
    pub id: Uuid,
    pub skill: String,
    pub title: String,
    pub description: String,
    pub difficulty_level: i16,
    pub estimated_duration_minutes: i32,
    pub initial_situation: String,
    pub step_count: Option<i32>,
    pub tags: Json<Vec<String>>,
    pub ai_generated: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<ScenarioRow> for Scenario {
    type Error = anyhow::Error;

    fn try_from(row: ScenarioRow) -> Result<Self, Self::Error> {
        Ok(Scenario {
            id: row.id,
            skill: row.skill,
            title: row.title,
            description: row.description,
            difficulty_level: u8::try_from(row.difficulty_level)
                .context("scenario difficulty out of range")?,
            estimated_duration_minutes: u32::try_from(row.estimated_duration_minutes)
                .context("negative scenario duration")?,
            initial_situation: row.initial_situation,
            step_count: row
                .step_count
                .map(u32::try_from)
                .transpose()
                .context("negative scenario step count")?,
            tags: row.tags.0,
            ai_generated: row.ai_generated,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow, Debug, Clone)]
pub struct SessionRow {
    pub id: Uuid,
    pub user_id: String,
    pub skill: String,
    pub scenario_id: Uuid,
    pub scenario_title: String,
    pub status: String,
    pub current_step: i32,
    pub total_steps: i32,
    pub difficulty_level: i16,
    pub step_scores: Json<Vec<u32>>,
    pub final_score: Option<i32>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<SessionRow> for Session {
    type Error = anyhow::Error;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        Ok(Session {
            id: row.id,
            user_id: row.user_id,
            skill: row.skill,
            scenario_id: row.scenario_id,
            scenario_title: row.scenario_title,
            status: row.status.parse()?,
            current_step: u32::try_from(row.current_step).context("negative current step")?,
            total_steps: u32::try_from(row.total_steps).context("negative total steps")?,
            difficulty_level: u8::try_from(row.difficulty_level)
                .context("session difficulty out of range")?,
            step_scores: row.step_scores.0,
            final_score: row
                .final_score
                .map(u32::try_from)
                .transpose()
                .context("negative final score")?,
            version: row.version,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(FromRow, Debug, Clone)]
pub struct StepRow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub step_number: i32,
    pub step_type: String,
    pub content: Json<StepContent>,
    pub evaluation: Option<Json<Evaluation>>,
    pub metrics: Json<InteractionMetrics>,
    pub analysis: Option<Json<ResponseAnalysis>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<StepRow> for Step {
    type Error = anyhow::Error;

    fn try_from(row: StepRow) -> Result<Self, Self::Error> {
        Ok(Step {
            id: row.id,
            session_id: row.session_id,
            step_number: u32::try_from(row.step_number).context("negative step number")?,
            step_type: row.step_type.parse()?,
            content: row.content.0,
            evaluation: row.evaluation.map(|e| e.0),
            metrics: row.metrics.0,
            analysis: row.analysis.map(|a| a.0),
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rehearsal_core::SessionStatus;
    use rehearsal_core::step::StepType;

    fn session_row() -> SessionRow {
        let now = Utc::now();
        SessionRow {
            id: Uuid::new_v4(),
            user_id: "user-7".to_string(),
            skill: "negotiation".to_string(),
            scenario_id: Uuid::new_v4(),
            scenario_title: "Client Escalation".to_string(),
            status: "simulation".to_string(),
            current_step: 3,
            total_steps: 5,
            difficulty_level: 2,
            step_scores: Json(vec![70, 85]),
            final_score: None,
            version: 4,
            created_at: now,
            started_at: now,
            completed_at: None,
        }
    }

    #[test]
    fn test_start_payload_by_skill_deserialization() {
        let json = r#"{"kind": "by_skill", "skill": "empathy"}"#;
        let payload: StartSimulationPayload = serde_json::from_str(json).unwrap();
        let request = payload.into_request("user-1");

        match request {
            StartRequest::BySkill {
                user_id,
                skill,
                user_context,
                difficulty_override,
            } => {
                assert_eq!(user_id, "user-1");
                assert_eq!(skill, "empathy");
                assert_eq!(user_context, UserContext::default());
                assert_eq!(difficulty_override, None);
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn test_start_payload_by_scenario_deserialization() {
        let json = r#"{
            "kind": "by_scenario",
            "scenario_id": "550e8400-e29b-41d4-a716-446655440000",
            "user_context": {"technical_specialization": "frontend"},
            "difficulty_override": 4
        }"#;
        let payload: StartSimulationPayload = serde_json::from_str(json).unwrap();
        let request = payload.into_request("user-2");

        assert_eq!(request.user_id(), "user-2");
        assert_eq!(request.difficulty_override(), Some(4));
        assert_eq!(request.user_context().technical_specialization, "frontend");
        assert_eq!(request.user_context().seniority_level, "");
    }

    #[test]
    fn test_start_payload_rejects_unknown_kind() {
        let json = r#"{"kind": "random"}"#;
        let result: Result<StartSimulationPayload, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_respond_payload_defaults() {
        let json = r#"{"response_text": "I'd call the client back."}"#;
        let payload: RespondPayload = serde_json::from_str(json).unwrap();
        let request = RespondRequest::from(payload);

        assert_eq!(request.response_text, "I'd call the client back.");
        assert_eq!(request.response_time_seconds, None);
        assert!(!request.help_requested);
        assert_eq!(request.expected_step_number, None);
    }

    #[test]
    fn test_respond_payload_missing_text() {
        let result: Result<RespondPayload, _> = serde_json::from_str(r#"{"help_requested": true}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_session_row_conversion() {
        let row = session_row();
        let id = row.id;
        let session = Session::try_from(row).unwrap();

        assert_eq!(session.id, id);
        assert_eq!(session.status, SessionStatus::Simulation);
        assert_eq!(session.current_step, 3);
        assert_eq!(session.step_scores, vec![70, 85]);
        assert_eq!(session.version, 4);
    }

    #[test]
    fn test_session_row_with_unknown_status_fails() {
        let row = SessionRow {
            status: "paused".to_string(),
            ..session_row()
        };
        assert!(Session::try_from(row).is_err());
    }

    #[test]
    fn test_session_row_with_negative_step_fails() {
        let row = SessionRow {
            current_step: -1,
            ..session_row()
        };
        assert!(Session::try_from(row).is_err());
    }

    #[test]
    fn test_step_row_conversion() {
        let row = StepRow {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            step_number: 2,
            step_type: "simulation".to_string(),
            content: Json(StepContent {
                question: "What now?".to_string(),
                ..StepContent::default()
            }),
            evaluation: None,
            metrics: Json(InteractionMetrics::default()),
            analysis: None,
            created_at: Utc::now(),
        };
        let step = Step::try_from(row).unwrap();

        assert_eq!(step.step_type, StepType::Simulation);
        assert_eq!(step.step_number, 2);
        assert!(!step.is_answered());

        let view = StepView::from(&step);
        assert_eq!(view.step_type, "simulation");
        assert_eq!(view.question, "What now?");
        assert_eq!(view.score, None);
    }

    #[test]
    fn test_session_view_uses_snake_case_status() {
        let session = Session::try_from(session_row()).unwrap();
        let json = serde_json::to_value(SessionView::from(&session)).unwrap();

        assert_eq!(json["status"], "simulation");
        assert_eq!(json["scenario_title"], "Client Escalation");
        assert_eq!(json["final_score"], serde_json::Value::Null);
    }

    #[test]
    fn test_error_response_serialization() {
        let error = ErrorResponse {
            message: "Session not found".to_string(),
        };

        let json = serde_json::to_string(&error).unwrap();
        let expected = r#"{"message":"Session not found"}"#;
        assert_eq!(json, expected);
    }
}
