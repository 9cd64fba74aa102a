use serde::{Deserialize, Serialize};
use std::fmt;

use crate::session::Session;
use crate::step::{CONFIDENT_MARKERS, Step, count_markers};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::High => "high",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::Low => "low",
        }
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pure score arithmetic over a session's accumulated steps.
pub struct ScoreAggregator;

impl ScoreAggregator {
    pub fn record_step_score(session: &mut Session, score: u32) {
        session.step_scores.push(score.min(100));
    }

    /// Integer mean of `scores`, truncated toward zero. Zero for no scores.
    pub fn final_score(scores: &[u32]) -> u32 {
        if scores.is_empty() {
            return 0;
        }
        let sum: u64 = scores.iter().map(|&s| u64::from(s)).sum();
        (sum / scores.len() as u64) as u32
    }

    /// Classifies how confidently the learner answered, from the share of
    /// answers that use confident wording and the mean response time.
    pub fn confidence_level(steps: &[Step], avg_response_seconds: f64) -> ConfidenceLevel {
        let responses: Vec<String> = steps
            .iter()
            .filter_map(|s| s.content.user_response.as_deref())
            .map(str::to_lowercase)
            .collect();
        let confident = responses
            .iter()
            .filter(|r| count_markers(r, CONFIDENT_MARKERS) > 0)
            .count();
        let ratio = if responses.is_empty() {
            0.0
        } else {
            confident as f64 / responses.len() as f64
        };

        if ratio > 0.30 && avg_response_seconds < 90.0 {
            ConfidenceLevel::High
        } else if ratio > 0.10 || avg_response_seconds < 120.0 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }

    pub fn completion_percentage(answered_steps: usize, total_steps: u32) -> f64 {
        if total_steps == 0 {
            return 0.0;
        }
        answered_steps as f64 / f64::from(total_steps) * 100.0
    }
}

/// Rounds to one decimal place.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
