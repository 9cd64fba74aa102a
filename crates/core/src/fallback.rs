//! Deterministic substitutes for generative content.
//!
//! Each function here is pure and is used by [`crate::gateway::recover`]
//! whenever the generative service fails or replies with something unusable.

use std::collections::BTreeMap;

use crate::gateway::{InitialAssessment, ScenarioDraft, StepContentDraft};
use crate::scenario::{DEFAULT_STEP_COUNT, Scenario};
use crate::step::Evaluation;

/// Score assigned when a response could not be graded.
pub const FALLBACK_SCORE: u32 = 75;

pub fn scenario(skill: &str, difficulty: u8) -> ScenarioDraft {
    ScenarioDraft {
        title: format!("Putting {skill} into practice"),
        description: format!(
            "A workplace situation where your {skill} decides how well a tense project moment resolves."
        ),
        difficulty_level: difficulty,
        estimated_duration_minutes: 15,
        step_count: DEFAULT_STEP_COUNT,
        initial_situation: format!(
            "A deadline is slipping and the people involved disagree on what to do next. \
             The team is looking to you to apply {skill} and move things forward."
        ),
        tags: vec![skill.to_string(), "workplace".to_string()],
    }
}

pub fn initial_assessment(scenario: &Scenario) -> InitialAssessment {
    InitialAssessment {
        question: format!(
            "Before starting the scenario '{}', tell us about your previous experience with {}. \
             Have you faced similar situations before? How did you handle them?",
            scenario.title, scenario.skill
        ),
        context: format!(
            "We are going to work on a scenario about {}. Your answer helps us personalize the experience.",
            scenario.skill
        ),
        instructions: "Answer honestly and in detail. There are no right or wrong answers; \
                       we only want to know your starting point."
            .to_string(),
        expected_skills: vec![scenario.skill.clone()],
        evaluation_criteria: vec![
            "previous_experience".to_string(),
            "self_awareness".to_string(),
            "reflection".to_string(),
        ],
        estimated_time_minutes: 5,
    }
}

pub fn step_content(scenario: &Scenario, step_number: u32) -> StepContentDraft {
    StepContentDraft {
        prompt: format!(
            "The situation in '{}' develops further and new pressure appears.",
            scenario.title
        ),
        question: format!(
            "How would you apply {} to handle this next development? Describe the concrete steps you would take.",
            scenario.skill
        ),
        context: format!(
            "Step {step_number} of the scenario '{}'. Build on your previous answers.",
            scenario.title
        ),
        expected_response_type: "practice".to_string(),
    }
}

pub fn evaluation() -> Evaluation {
    Evaluation {
        overall_score: FALLBACK_SCORE,
        criteria_scores: BTreeMap::new(),
        strengths: vec!["You engaged with the situation and gave a considered answer".to_string()],
        areas_for_improvement: vec![
            "Add concrete actions and examples to strengthen your response".to_string(),
        ],
        rationale: "Your response was recorded. A detailed evaluation was not available, \
                    so a standard score has been assigned."
            .to_string(),
        recommended_difficulty: None,
        experience_level: None,
        is_fallback: true,
    }
}

/// Short mentor-style comment chosen by score band.
pub fn narrative_feedback(overall_score: u32) -> String {
    if overall_score >= 80 {
        "Excellent answer! You show a good understanding of the situation. Continue to the next step."
            .to_string()
    } else if overall_score >= 60 {
        "Good answer. There are some aspects you can improve, but you are on the right track."
            .to_string()
    } else {
        "Your answer shows effort. We will help you develop this skill further in the next steps."
            .to_string()
    }
}

pub fn skill_feedback(skill_name: &str) -> String {
    format!(
        "Your performance in {skill_name} shows room to grow. Keep practicing to strengthen it."
    )
}

pub fn overall_feedback(skill: &str, overall_score: f64) -> String {
    if overall_score >= 80.0 {
        format!(
            "Excellent work! You showed a solid command of {skill}. Your score of {overall_score:.1}/100 \
             reflects your ability to handle complex professional situations."
        )
    } else if overall_score >= 60.0 {
        format!(
            "Good progress in {skill}. You completed the simulation with a score of {overall_score:.1}/100, \
             which shows a sound grasp of the key ideas. More practice will refine it further."
        )
    } else {
        format!(
            "You completed the {skill} simulation with dedication. Your score of {overall_score:.1}/100 \
             shows you are still developing; review the fundamentals and practice similar scenarios."
        )
    }
}
