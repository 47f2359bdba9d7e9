//! Intervention candidates, scoring, templated content and selection.

use std::collections::BTreeSet;

use crate::foresight::collective::DEFAULT_SUCCESS_RATE;
use crate::foresight::config::ForesightConfig;
use crate::foresight::types::{
    ActiveIntervention, InterventionContent, InterventionRecommendation, InterventionType,
    PreStruggleIndicator, StrugglePrediction, StruggleSeverity, MAX_RECOMMENDATIONS,
};

pub fn candidate_types(indicator: PreStruggleIndicator) -> &'static [InterventionType] {
    use InterventionType::*;
    match indicator {
        PreStruggleIndicator::QuizHesitation => &[ConceptRefresher, WorkedExample, HintCascade],
        PreStruggleIndicator::ErrorEscalation => &[HintCascade, DebuggingGuide, WorkedExample],
        PreStruggleIndicator::RewindCluster => {
            &[SimplifiedExplanation, VisualDiagram, ConceptRefresher]
        }
        PreStruggleIndicator::SkipBacktrack => &[PrerequisiteReview, ConceptRefresher],
        PreStruggleIndicator::SlowProgression => &[SimplifiedExplanation, ProgressCheckpoint],
        PreStruggleIndicator::Avoidance => {
            &[EncouragementNudge, SimplifiedExplanation, PrerequisiteReview]
        }
    }
}

pub fn severity_multiplier(severity: StruggleSeverity, config: &ForesightConfig) -> f64 {
    match severity {
        StruggleSeverity::Mild => config.blend.severity_mild,
        StruggleSeverity::Moderate => config.blend.severity_moderate,
        StruggleSeverity::Severe => config.blend.severity_severe,
    }
}

pub fn priority(collective_success_rate: f64, severity: StruggleSeverity, config: &ForesightConfig) -> u8 {
    let raw = (collective_success_rate.clamp(0.0, 1.0) * 10.0 + 3.0)
        * severity_multiplier(severity, config);
    raw.round().clamp(1.0, 10.0) as u8
}

pub fn expected_impact(collective_success_rate: f64, config: &ForesightConfig) -> f64 {
    (collective_success_rate.clamp(0.0, 1.0) * config.blend.impact_scale + config.blend.impact_floor)
        .clamp(0.0, 1.0)
}

fn observation(indicator: PreStruggleIndicator) -> &'static str {
    match indicator {
        PreStruggleIndicator::QuizHesitation => "Recent questions are taking longer than usual.",
        PreStruggleIndicator::ErrorEscalation => "The same errors keep coming back.",
        PreStruggleIndicator::RewindCluster => "This part of the video has been replayed a few times.",
        PreStruggleIndicator::SkipBacktrack => "You jumped ahead and came back to this section.",
        PreStruggleIndicator::SlowProgression => "This section is moving slower than expected.",
        PreStruggleIndicator::Avoidance => "Some material here was skipped past quickly.",
    }
}

pub fn build_content(
    intervention_type: InterventionType,
    indicators: &[PreStruggleIndicator],
) -> InterventionContent {
    let (title, body, key_points, code_example, estimated_duration_secs): (
        &str,
        &str,
        &[&str],
        Option<&str>,
        u32,
    ) = match intervention_type {
        InterventionType::ConceptRefresher => (
            "Quick concept refresher",
            "A short recap of the core idea behind this section.",
            &["Restate the definition", "See where it is used", "Check one common misconception"],
            None,
            90,
        ),
        InterventionType::WorkedExample => (
            "Walk through a worked example",
            "Follow a complete solution step by step before trying again.",
            &["Read the problem statement", "Trace each step", "Compare with your attempt"],
            Some("let total: u32 = values.iter().sum();\nprintln!(\"{total}\");"),
            180,
        ),
        InterventionType::HintCascade => (
            "Need a hint?",
            "Unlock hints one at a time, from a gentle nudge to the full approach.",
            &["Nudge toward the right idea", "Point at the relevant concept", "Outline the approach"],
            None,
            60,
        ),
        InterventionType::DebuggingGuide => (
            "Debugging checklist",
            "A structured way to read the error and narrow down its cause.",
            &["Read the first error line", "Find the exact location", "Change one thing at a time"],
            Some("// print intermediate values\ndbg!(&value);"),
            120,
        ),
        InterventionType::SimplifiedExplanation => (
            "Explained more simply",
            "The same material with fewer moving parts and an everyday analogy.",
            &["One idea at a time", "Concrete analogy", "Short summary"],
            None,
            120,
        ),
        InterventionType::VisualDiagram => (
            "See it as a diagram",
            "A visual overview of how the pieces fit together.",
            &["Identify the components", "Follow the flow", "Relate it back to the code"],
            None,
            90,
        ),
        InterventionType::PrerequisiteReview => (
            "Review a prerequisite",
            "This section builds on earlier material that is worth a quick look.",
            &["Revisit the earlier concept", "Try one warm-up question", "Return here"],
            None,
            240,
        ),
        InterventionType::ProgressCheckpoint => (
            "Checkpoint",
            "Pause and check what you have covered so far in this section.",
            &["Summarize what you learned", "Mark what is still unclear", "Pick the next step"],
            None,
            60,
        ),
        InterventionType::EncouragementNudge => (
            "You're closer than it feels",
            "Tricky sections are normal; a short break or a smaller step often helps.",
            &["Take a two-minute break", "Break the task into smaller steps", "Come back with fresh eyes"],
            None,
            30,
        ),
    };

    let description = match indicators.first() {
        Some(indicator) => format!("{} {body}", observation(*indicator)),
        None => body.to_string(),
    };

    InterventionContent {
        title: title.to_string(),
        description,
        key_points: key_points.iter().map(|p| p.to_string()).collect(),
        code_example: code_example.map(str::to_string),
        estimated_duration_secs,
    }
}

pub fn recommendation_id(section_id: &str, intervention_type: InterventionType) -> String {
    format!("{section_id}:{}", intervention_type.as_str())
}

/// Ranks candidate interventions for a prediction, best first, at most five.
pub fn recommend(
    prediction: &StrugglePrediction,
    success_rate: impl Fn(InterventionType) -> Option<f64>,
    config: &ForesightConfig,
) -> Vec<InterventionRecommendation> {
    let mut indicators: Vec<PreStruggleIndicator> = prediction.primary_indicators.clone();
    for factor in &prediction.contributing_factors {
        if !indicators.contains(&factor.indicator) {
            indicators.push(factor.indicator);
        }
    }

    let candidates: BTreeSet<InterventionType> = indicators
        .iter()
        .flat_map(|i| candidate_types(*i).iter().copied())
        .collect();

    let mut recommendations: Vec<InterventionRecommendation> = candidates
        .into_iter()
        .map(|intervention_type| {
            let csr = success_rate(intervention_type)
                .filter(|v| v.is_finite())
                .unwrap_or(DEFAULT_SUCCESS_RATE)
                .clamp(0.0, 1.0);
            InterventionRecommendation {
                id: recommendation_id(&prediction.section_id, intervention_type),
                intervention_type,
                priority: priority(csr, prediction.severity, config),
                content: build_content(intervention_type, &indicators),
                expected_impact: expected_impact(csr, config),
                collective_success_rate: csr,
            }
        })
        .collect();

    recommendations.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| b.expected_impact.total_cmp(&a.expected_impact))
            .then_with(|| a.intervention_type.cmp(&b.intervention_type))
    });
    recommendations.truncate(MAX_RECOMMENDATIONS);
    recommendations
}

/// Recommendations whose type is not already active.
pub fn available_interventions<'a>(
    recommendations: &'a [InterventionRecommendation],
    active: &[ActiveIntervention],
) -> Vec<&'a InterventionRecommendation> {
    let active_types: BTreeSet<InterventionType> = active
        .iter()
        .filter(|a| !a.is_resolved())
        .map(|a| a.recommendation.intervention_type)
        .collect();
    recommendations
        .iter()
        .filter(|r| !active_types.contains(&r.intervention_type))
        .collect()
}

/// At most one new intervention per cycle: the best available one `admit` accepts.
pub fn select_intervention<'a>(
    recommendations: &'a [InterventionRecommendation],
    active: &[ActiveIntervention],
    mut admit: impl FnMut(&InterventionRecommendation) -> bool,
) -> Option<&'a InterventionRecommendation> {
    available_interventions(recommendations, active)
        .into_iter()
        .find(|r| admit(r))
}
