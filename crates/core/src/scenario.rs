use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::gateway::ScenarioDraft;

/// Step count used when a scenario does not specify one.
pub const DEFAULT_STEP_COUNT: u32 = 5;
/// Smallest step count that leaves room for a pre-test and one simulation step.
pub const MIN_STEP_COUNT: u32 = 2;
pub const MAX_STEP_COUNT: u32 = 10;
/// Difficulty used for generated scenarios when the caller expresses no preference.
pub const DEFAULT_DIFFICULTY: u8 = 3;

/// A templated workplace situation a practice session is built around.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Scenario {
    pub id: Uuid,
    /// The soft skill this scenario exercises (e.g. "negotiation").
    pub skill: String,
    pub title: String,
    pub description: String,
    pub difficulty_level: u8,
    pub estimated_duration_minutes: u32,
    pub initial_situation: String,
    pub step_count: Option<u32>,
    pub tags: Vec<String>,
    pub ai_generated: bool,
    pub created_at: DateTime<Utc>,
}

impl Scenario {
    /// Builds a scenario from generated content.
    pub fn from_draft(skill: &str, draft: ScenarioDraft) -> Self {
        Self {
            id: Uuid::new_v4(),
            skill: skill.to_string(),
            title: draft.title,
            description: draft.description,
            difficulty_level: draft.difficulty_level.clamp(1, 5),
            estimated_duration_minutes: draft.estimated_duration_minutes,
            initial_situation: draft.initial_situation,
            step_count: Some(draft.step_count.clamp(MIN_STEP_COUNT, MAX_STEP_COUNT)),
            tags: draft.tags,
            ai_generated: true,
            created_at: Utc::now(),
        }
    }

    /// The number of steps a session over this scenario runs for.
    ///
    /// Only the configured default is raised to [`MIN_STEP_COUNT`]; a stored
    /// count below it is refused when a session is built.
    pub fn total_steps(&self, default_total_steps: u32) -> u32 {
        self.step_count
            .unwrap_or_else(|| default_total_steps.max(MIN_STEP_COUNT))
    }
}

/// Background about the learner, used to tailor generated content.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserContext {
    pub technical_specialization: String,
    pub seniority_level: String,
}

/// The two ways a practice session can be started.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StartRequest {
    /// Start over an existing catalog scenario.
    ByScenario {
        user_id: String,
        scenario_id: Uuid,
        #[serde(default)]
        user_context: UserContext,
        difficulty_override: Option<u8>,
    },
    /// Generate a fresh scenario for a skill, then start over it.
    BySkill {
        user_id: String,
        skill: String,
        #[serde(default)]
        user_context: UserContext,
        difficulty_override: Option<u8>,
    },
}

impl StartRequest {
    pub fn user_id(&self) -> &str {
        match self {
            StartRequest::ByScenario { user_id, .. } | StartRequest::BySkill { user_id, .. } => {
                user_id
            }
        }
    }

    pub fn user_context(&self) -> &UserContext {
        match self {
            StartRequest::ByScenario { user_context, .. }
            | StartRequest::BySkill { user_context, .. } => user_context,
        }
    }

    pub fn difficulty_override(&self) -> Option<u8> {
        match self {
            StartRequest::ByScenario {
                difficulty_override,
                ..
            }
            | StartRequest::BySkill {
                difficulty_override,
                ..
            } => *difficulty_override,
        }
    }
}
