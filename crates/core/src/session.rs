use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::scenario::Scenario;

/// Lifecycle state of a practice session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Started,
    PreTest,
    Simulation,
    Completed,
    Abandoned,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Started => "started",
            SessionStatus::PreTest => "pre_test",
            SessionStatus::Simulation => "simulation",
            SessionStatus::Completed => "completed",
            SessionStatus::Abandoned => "abandoned",
        }
    }

    /// Terminal sessions are immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Abandoned)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(SessionStatus::Started),
            "pre_test" => Ok(SessionStatus::PreTest),
            "simulation" => Ok(SessionStatus::Simulation),
            "completed" => Ok(SessionStatus::Completed),
            "abandoned" => Ok(SessionStatus::Abandoned),
            other => Err(anyhow::anyhow!("unknown session status '{other}'")),
        }
    }
}

/// One user's run through a scenario.
///
/// Invariants: `1 <= current_step <= total_steps + 1`,
/// `step_scores.len() <= total_steps`, and `final_score` is set exactly when
/// the status is [`SessionStatus::Completed`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: Uuid,
    pub user_id: String,
    pub skill: String,
    pub scenario_id: Uuid,
    pub scenario_title: String,
    pub status: SessionStatus,
    /// 1-based number of the step awaiting a response.
    pub current_step: u32,
    pub total_steps: u32,
    pub difficulty_level: u8,
    pub step_scores: Vec<u32>,
    pub final_score: Option<u32>,
    /// Bumped by the repository on every successful update.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(
        user_id: &str,
        scenario: &Scenario,
        total_steps: u32,
        difficulty_level: u8,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            skill: scenario.skill.clone(),
            scenario_id: scenario.id,
            scenario_title: scenario.title.clone(),
            status: SessionStatus::Started,
            current_step: 1,
            total_steps,
            difficulty_level,
            step_scores: Vec::new(),
            final_score: None,
            version: 0,
            created_at: now,
            started_at: now,
            completed_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Human-readable description of where the session stands.
    pub fn status_description(&self, completed_steps: usize) -> String {
        match self.status {
            SessionStatus::Started => {
                "Simulation started - waiting for the initial test response".to_string()
            }
            SessionStatus::PreTest => "Completing the initial test".to_string(),
            SessionStatus::Simulation => format!(
                "In progress - step {} of {}",
                completed_steps, self.total_steps
            ),
            SessionStatus::Completed => "Simulation successfully completed".to_string(),
            SessionStatus::Abandoned => "Simulation abandoned".to_string(),
        }
    }
}
