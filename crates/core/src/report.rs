//! Completion Report
//!
//! Synthesizes the accumulated steps of a finished session into performance
//! metrics, per-criterion skill assessments and the gamification extras
//! (achievements, badge, percentile, certificate).
//!
//! Most of the builder is pure. Only the narrative texts go through the
//! generative service, each with a templated fallback.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::fallback;
use crate::gateway::{
    GatewayError, GenerativeContentGateway, PerformanceSummary, SkillFeedbackRequest, recover,
};
use crate::scoring::{ConfidenceLevel, ScoreAggregator, round1};
use crate::session::Session;
use crate::step::Step;

const OVERALL_FEEDBACK_MAX_CHARS: usize = 500;
const SKILL_FEEDBACK_MAX_CHARS: usize = 200;
const MAX_LISTED: usize = 3;
const MAX_ACHIEVEMENTS: usize = 4;
const MAX_RECOMMENDATIONS: usize = 4;
const MAX_LEARNINGS: usize = 3;
const CANNED_LEARNINGS: [&str; 2] = [
    "Effective communication requires clarity and empathy",
    "Taking time to reflect improves the quality of decisions",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceMetrics {
    /// Mean step score amplified by 1.2 and capped at 100, one decimal.
    pub overall_score: f64,
    pub average_step_score: f64,
    pub total_time_minutes: u32,
    pub average_response_time_seconds: f64,
    pub help_requests_count: usize,
    pub completion_percentage: f64,
    pub confidence_level: ConfidenceLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillLevel {
    Beginner,
    Intermediate,
    Advanced,
}

impl SkillLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 85.0 {
            SkillLevel::Advanced
        } else if score >= 70.0 {
            SkillLevel::Intermediate
        } else {
            SkillLevel::Beginner
        }
    }
}

/// Aggregate over every evaluation that graded one criterion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkillAssessment {
    pub skill_name: String,
    pub score: f64,
    pub level: SkillLevel,
    pub strengths: Vec<String>,
    pub areas_for_improvement: Vec<String>,
    pub narrative_feedback: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Badge {
    Expert,
    IndependentSolver,
    QuickDecisionMaker,
}

impl fmt::Display for Badge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Badge::Expert => "Expert Communicator",
            Badge::IndependentSolver => "Independent Problem Solver",
            Badge::QuickDecisionMaker => "Quick Decision Maker",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Completed,
    PartiallyCompleted,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionReport {
    pub session_id: uuid::Uuid,
    pub user_id: String,
    pub scenario_title: String,
    pub skill: String,
    pub completion_status: CompletionStatus,
    pub performance: PerformanceMetrics,
    pub skill_assessments: Vec<SkillAssessment>,
    pub overall_feedback: String,
    pub key_achievements: Vec<String>,
    pub main_learnings: Vec<String>,
    pub recommendations: Vec<String>,
    /// Coarse step function of the overall score, not a population percentile.
    pub percentile_ranking: u8,
    pub badge: Option<Badge>,
    pub certificate_earned: bool,
    pub completed_at: DateTime<Utc>,
}

pub struct CompletionReportBuilder {
    gateway: Arc<dyn GenerativeContentGateway>,
}

impl CompletionReportBuilder {
    pub fn new(gateway: Arc<dyn GenerativeContentGateway>) -> Self {
        Self { gateway }
    }

    /// Builds the full report for `session` from its steps, ordered by number.
    pub async fn build(&self, session: &Session, steps: &[Step]) -> CompletionReport {
        let performance = Self::performance_metrics(session, steps);
        let skill_assessments = self.skill_assessments(steps).await;
        let overall_feedback = self.overall_feedback(session, steps, &performance).await;

        let report = CompletionReport {
            session_id: session.id,
            user_id: session.user_id.clone(),
            scenario_title: session.scenario_title.clone(),
            skill: session.skill.clone(),
            completion_status: if performance.completion_percentage >= 100.0 {
                CompletionStatus::Completed
            } else {
                CompletionStatus::PartiallyCompleted
            },
            key_achievements: Self::key_achievements(&performance),
            main_learnings: Self::main_learnings(steps),
            recommendations: Self::recommendations(session, &performance, &skill_assessments),
            percentile_ranking: Self::percentile(performance.overall_score),
            badge: Self::badge(&performance),
            certificate_earned: performance.overall_score >= 80.0,
            completed_at: session.completed_at.unwrap_or_else(Utc::now),
            overall_feedback,
            skill_assessments,
            performance,
        };
        debug!(
            session_id = %session.id,
            overall = report.performance.overall_score,
            badge = ?report.badge,
            "Completion report built"
        );
        report
    }

    pub fn performance_metrics(session: &Session, steps: &[Step]) -> PerformanceMetrics {
        let scores: Vec<f64> = steps
            .iter()
            .filter_map(Step::score)
            .map(f64::from)
            .collect();
        let average_step_score = mean(&scores);
        let overall_score = (average_step_score * 1.2).min(100.0);

        let latencies: Vec<f64> = steps
            .iter()
            .filter_map(|s| s.metrics.response_latency_seconds)
            .map(f64::from)
            .collect();
        let average_response_time = mean(&latencies);

        let answered = steps.iter().filter(|s| s.is_answered()).count();
        let total_time_minutes = steps
            .iter()
            .map(|s| s.created_at)
            .max()
            .map(|last| (last - session.started_at).num_minutes().max(1) as u32)
            .unwrap_or(0);

        PerformanceMetrics {
            overall_score: round1(overall_score),
            average_step_score: round1(average_step_score),
            total_time_minutes,
            average_response_time_seconds: round1(average_response_time),
            help_requests_count: steps.iter().filter(|s| s.metrics.help_requested).count(),
            completion_percentage: round1(ScoreAggregator::completion_percentage(
                answered,
                session.total_steps,
            )),
            confidence_level: ScoreAggregator::confidence_level(steps, average_response_time),
        }
    }

    /// Groups criterion scores across all evaluated steps.
    pub async fn skill_assessments(&self, steps: &[Step]) -> Vec<SkillAssessment> {
        #[derive(Default)]
        struct Group {
            scores: Vec<f64>,
            strengths: Vec<String>,
            improvements: Vec<String>,
        }

        let mut groups: BTreeMap<&str, Group> = BTreeMap::new();
        for evaluation in steps.iter().filter_map(|s| s.evaluation.as_ref()) {
            for (criterion, score) in &evaluation.criteria_scores {
                let group = groups.entry(criterion.as_str()).or_default();
                group.scores.push(f64::from(*score));
                group.strengths.extend(evaluation.strengths.iter().cloned());
                group
                    .improvements
                    .extend(evaluation.areas_for_improvement.iter().cloned());
            }
        }

        let mut assessments = Vec::with_capacity(groups.len());
        for (name, group) in groups {
            let score = mean(&group.scores);
            let strengths = dedup_capped(group.strengths, MAX_LISTED);
            let improvements = dedup_capped(group.improvements, MAX_LISTED);

            let request = SkillFeedbackRequest {
                skill_name: name.to_string(),
                score,
                strengths: strengths.clone(),
                improvements: improvements.clone(),
            };
            let generated = non_blank(self.gateway.generate_skill_feedback(&request).await);
            let narrative = recover("generate_skill_feedback", generated, || {
                fallback::skill_feedback(name)
            });

            assessments.push(SkillAssessment {
                skill_name: name.to_string(),
                score: round1(score),
                level: SkillLevel::from_score(score),
                strengths,
                areas_for_improvement: improvements,
                narrative_feedback: truncate_chars(&narrative, SKILL_FEEDBACK_MAX_CHARS),
            });
        }
        assessments
    }

    pub async fn overall_feedback(
        &self,
        session: &Session,
        steps: &[Step],
        performance: &PerformanceMetrics,
    ) -> String {
        let summary = PerformanceSummary {
            skill: session.skill.clone(),
            scenario_title: session.scenario_title.clone(),
            answered_steps: steps.iter().filter(|s| s.is_answered()).count(),
            total_steps: session.total_steps,
            overall_score: performance.overall_score,
            total_time_minutes: performance.total_time_minutes,
            confidence_level: performance.confidence_level.to_string(),
        };
        let generated = non_blank(self.gateway.generate_overall_feedback(&summary).await);
        let text = recover("generate_overall_feedback", generated, || {
            fallback::overall_feedback(&session.skill, performance.overall_score)
        });
        truncate_chars(&text, OVERALL_FEEDBACK_MAX_CHARS)
    }

    pub fn key_achievements(performance: &PerformanceMetrics) -> Vec<String> {
        let mut achievements = Vec::new();
        let score = performance.overall_score;
        if score >= 90.0 {
            achievements.push("Excellent performance - score above 90%".to_string());
        } else if score >= 80.0 {
            achievements.push("Very good performance - score above 80%".to_string());
        } else if score >= 70.0 {
            achievements.push("Good performance - you met the core objectives".to_string());
        }
        if performance.completion_percentage >= 100.0 {
            achievements.push("You completed the whole simulation".to_string());
        }
        if performance.help_requests_count == 0 {
            achievements.push("You solved every challenge without asking for help".to_string());
        }
        if performance.average_response_time_seconds < 60.0 {
            achievements.push("Quick and decisive responses".to_string());
        }
        if performance.confidence_level == ConfidenceLevel::High {
            achievements.push("You showed high confidence in your responses".to_string());
        }
        achievements.truncate(MAX_ACHIEVEMENTS);
        achievements
    }

    /// Pulls the first sentence mentioning something "important" or "key"
    /// out of each step's narrative feedback.
    pub fn main_learnings(steps: &[Step]) -> Vec<String> {
        let mut learnings: Vec<String> = steps
            .iter()
            .filter_map(|s| s.content.narrative_feedback.as_deref())
            .filter_map(|feedback| {
                feedback
                    .split('.')
                    .find(|sentence| {
                        let lowered = sentence.to_lowercase();
                        lowered.contains("important") || lowered.contains("key")
                    })
                    .map(|sentence| sentence.trim().to_string())
            })
            .collect();

        if learnings.len() < 2 {
            learnings.extend(CANNED_LEARNINGS.iter().map(|l| l.to_string()));
        }
        learnings.truncate(MAX_LEARNINGS);
        learnings
    }

    pub fn recommendations(
        session: &Session,
        performance: &PerformanceMetrics,
        assessments: &[SkillAssessment],
    ) -> Vec<String> {
        let skill = &session.skill;
        let mut recommendations = vec![if performance.overall_score < 70.0 {
            format!("Practice more {skill} scenarios to strengthen the fundamentals")
        } else if performance.overall_score < 85.0 {
            format!("Look for more complex {skill} situations to reach the next level")
        } else {
            format!("Consider mentoring others in {skill}")
        }];

        recommendations.extend(
            assessments
                .iter()
                .filter(|a| a.score < 70.0)
                .map(|a| format!("Focus on improving: {}", a.skill_name)),
        );
        if performance.average_response_time_seconds > 120.0 {
            recommendations.push("Practice making faster decisions in similar situations".to_string());
        }
        if performance.help_requests_count > 2 {
            recommendations.push("Build more confidence by practicing similar scenarios".to_string());
        }
        recommendations.truncate(MAX_RECOMMENDATIONS);
        recommendations
    }

    pub fn badge(performance: &PerformanceMetrics) -> Option<Badge> {
        if performance.overall_score >= 95.0 {
            Some(Badge::Expert)
        } else if performance.overall_score >= 85.0 && performance.help_requests_count == 0 {
            Some(Badge::IndependentSolver)
        } else if performance.completion_percentage >= 100.0
            && performance.average_response_time_seconds < 60.0
        {
            Some(Badge::QuickDecisionMaker)
        } else {
            None
        }
    }

    /// Approximate standing of `score` among learners.
    ///
    /// This is a fixed step function, not a percentile computed over real
    /// results.
    pub fn percentile(score: f64) -> u8 {
        if score >= 90.0 {
            95
        } else if score >= 80.0 {
            80
        } else if score >= 70.0 {
            65
        } else if score >= 60.0 {
            50
        } else {
            30
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn dedup_capped(items: Vec<String>, cap: usize) -> Vec<String> {
    let mut unique: Vec<String> = Vec::new();
    for item in items {
        if unique.len() == cap {
            break;
        }
        if !unique.contains(&item) {
            unique.push(item);
        }
    }
    unique
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn non_blank(result: Result<String, GatewayError>) -> Result<String, GatewayError> {
    result.and_then(|text| {
        if text.trim().is_empty() {
            Err(GatewayError::MalformedPayload("empty text".to_string()))
        } else {
            Ok(text)
        }
    })
}
