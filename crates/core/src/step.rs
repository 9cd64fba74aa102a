use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Words whose presence marks a response as confident.
pub const CONFIDENT_MARKERS: &[&str] = &["confident", "sure", "definitely", "certainly", "absolutely"];
/// Words whose presence marks a response as hedging.
pub const HEDGING_MARKERS: &[&str] = &["maybe", "perhaps", "possibly", "i think", "i'm not sure"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    PreTest,
    Simulation,
    Feedback,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::PreTest => "pre_test",
            StepType::Simulation => "simulation",
            StepType::Feedback => "feedback",
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pre_test" => Ok(StepType::PreTest),
            "simulation" => Ok(StepType::Simulation),
            "feedback" => Ok(StepType::Feedback),
            other => Err(anyhow::anyhow!("unknown step type '{other}'")),
        }
    }
}

/// What the learner is shown and what they answered.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StepContent {
    /// Situation narrative for simulation steps.
    pub prompt: Option<String>,
    pub question: String,
    pub context: String,
    pub instructions: Option<String>,
    pub estimated_minutes: Option<u32>,
    pub user_response: Option<String>,
    pub narrative_feedback: Option<String>,
}

/// Qualitative assessment of one response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evaluation {
    /// 0..=100.
    pub overall_score: u32,
    pub criteria_scores: BTreeMap<String, u32>,
    pub strengths: Vec<String>,
    pub areas_for_improvement: Vec<String>,
    pub rationale: String,
    /// Only produced for pre-test evaluations.
    pub recommended_difficulty: Option<u8>,
    pub experience_level: Option<String>,
    /// Set when the evaluation is the locally computed substitute.
    #[serde(default)]
    pub is_fallback: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InteractionMetrics {
    pub response_latency_seconds: Option<u32>,
    pub response_length: usize,
    pub help_requested: bool,
}

/// Surface statistics over the response text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseAnalysis {
    pub word_count: usize,
    pub sentence_count: usize,
    /// 1..=10.
    pub confidence_marker: u8,
}

impl ResponseAnalysis {
    pub fn from_text(text: &str) -> Self {
        let lowered = text.to_lowercase();
        let confident = count_markers(&lowered, CONFIDENT_MARKERS) as i32;
        let hedging = count_markers(&lowered, HEDGING_MARKERS) as i32;
        Self {
            word_count: text.split_whitespace().count(),
            sentence_count: text.split('.').filter(|s| !s.trim().is_empty()).count(),
            confidence_marker: (5 + confident * 2 - hedging).clamp(1, 10) as u8,
        }
    }
}

/// Counts how many of `markers` occur in the already-lowercased `text`.
pub(crate) fn count_markers(text: &str, markers: &[&str]) -> usize {
    markers.iter().filter(|m| text.contains(*m)).count()
}

/// One question/response/evaluation unit within a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    pub id: Uuid,
    pub session_id: Uuid,
    /// Unique per session, strictly increasing from 1.
    pub step_number: u32,
    pub step_type: StepType,
    pub content: StepContent,
    pub evaluation: Option<Evaluation>,
    pub metrics: InteractionMetrics,
    pub analysis: Option<ResponseAnalysis>,
    pub created_at: DateTime<Utc>,
}

impl Step {
    pub fn new(session_id: Uuid, step_number: u32, step_type: StepType, content: StepContent) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            step_number,
            step_type,
            content,
            evaluation: None,
            metrics: InteractionMetrics::default(),
            analysis: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_answered(&self) -> bool {
        self.content.user_response.is_some()
    }

    pub fn score(&self) -> Option<u32> {
        self.evaluation.as_ref().map(|e| e.overall_score)
    }
}
