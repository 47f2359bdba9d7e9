//! Pre-struggle pattern detection over the temporal window.
//!
//! Each detector looks at the subsequence relevant to its indicator and
//! emits at most one signal. Silence is the default outcome.

use crate::foresight::config::ForesightConfig;
use crate::foresight::types::{
    BehaviorSignal, NavigationSignal, PreStruggleIndicator, PreStruggleSignal, QuizSignal,
    SignalEvidence, StruggleSeverity, TemporalSignal, VideoSignal,
};

const QUIZ_LOOKBACK: usize = 5;
const HESITATION_RATIO: f64 = 1.5;
const HEAVY_ANSWER_CHANGES: u32 = 3;
const SLOW_PROGRESS_MIN_MINUTES: f64 = 3.0;
const SLOW_PROGRESS_RATE: f64 = 5.0;
const LOW_WATCH_PERCENTAGE: f64 = 25.0;

pub fn base_time_to_struggle(indicator: PreStruggleIndicator) -> i64 {
    match indicator {
        PreStruggleIndicator::QuizHesitation => 60_000,
        PreStruggleIndicator::ErrorEscalation => 30_000,
        PreStruggleIndicator::RewindCluster => 120_000,
        PreStruggleIndicator::SkipBacktrack => 180_000,
        PreStruggleIndicator::SlowProgression => 240_000,
        PreStruggleIndicator::Avoidance => 150_000,
    }
}

fn time_to_struggle(indicator: PreStruggleIndicator, severity: StruggleSeverity) -> i64 {
    let scale = match severity {
        StruggleSeverity::Mild => 1.0,
        StruggleSeverity::Moderate => 0.75,
        StruggleSeverity::Severe => 0.5,
    };
    (base_time_to_struggle(indicator) as f64 * scale).round() as i64
}

fn emit(
    indicator: PreStruggleIndicator,
    severity: StruggleSeverity,
    confidence: f64,
    section_id: &str,
    window_depth: usize,
    metric: f64,
    summary: String,
) -> PreStruggleSignal {
    PreStruggleSignal {
        indicator,
        severity,
        confidence: confidence.clamp(0.0, 1.0),
        section_id: section_id.to_string(),
        evidence: SignalEvidence {
            window_depth,
            metric,
            summary,
        },
        predicted_time_to_struggle: time_to_struggle(indicator, severity),
    }
}

fn in_section<'a>(
    window: &'a [TemporalSignal],
    section_id: &'a str,
) -> impl DoubleEndedIterator<Item = &'a TemporalSignal> + 'a {
    window.iter().filter(move |s| s.section_id == section_id)
}

/// Runs every detector and returns the hits in a fixed indicator order.
pub fn detect_pre_struggle(
    window: &[TemporalSignal],
    section_id: &str,
    config: &ForesightConfig,
) -> Vec<PreStruggleSignal> {
    [
        detect_quiz_hesitation(window, section_id, config),
        detect_error_escalation(window, section_id, config),
        detect_rewind_cluster(window, section_id, config),
        detect_skip_backtrack(window, section_id),
        detect_slow_progression(window, section_id),
        detect_avoidance(window, section_id),
    ]
    .into_iter()
    .flatten()
    .collect()
}

pub fn detect_quiz_hesitation(
    window: &[TemporalSignal],
    section_id: &str,
    config: &ForesightConfig,
) -> Option<PreStruggleSignal> {
    let quizzes: Vec<&QuizSignal> = in_section(window, section_id)
        .rev()
        .filter_map(|s| match &s.signal {
            BehaviorSignal::Quiz(q) => Some(q),
            _ => None,
        })
        .take(QUIZ_LOOKBACK)
        .collect();

    let baseline = config.hesitation_threshold_ms.max(1) as f64;
    let hesitant: Vec<(f64, u32)> = quizzes
        .iter()
        .map(|q| {
            let expected = q.total_questions.max(1) as f64 * baseline;
            (q.time_spent_ms.max(0) as f64 / expected, q.answer_changes)
        })
        .filter(|(ratio, _)| *ratio > HESITATION_RATIO)
        .collect();

    let count = hesitant.len();
    let heavy_changes = hesitant.iter().any(|(_, c)| *c >= HEAVY_ANSWER_CHANGES);
    if count < 2 && !(count == 1 && heavy_changes) {
        return None;
    }

    let mean_ratio = hesitant.iter().map(|(r, _)| r).sum::<f64>() / count as f64;
    let mean_changes = hesitant.iter().map(|(_, c)| *c as f64).sum::<f64>() / count as f64;

    let mut confidence = 0.7 + 0.05 * (count - 1) as f64;
    if mean_changes >= 2.0 {
        confidence += 0.05;
    }

    let severity = if mean_ratio >= 3.0 {
        StruggleSeverity::Severe
    } else if mean_ratio >= 2.0 {
        StruggleSeverity::Moderate
    } else {
        StruggleSeverity::Mild
    };

    Some(emit(
        PreStruggleIndicator::QuizHesitation,
        severity,
        confidence.min(0.95),
        section_id,
        count,
        mean_ratio,
        format!(
            "{count} of the last {} quizzes took {mean_ratio:.1}x the expected time",
            quizzes.len()
        ),
    ))
}

pub fn detect_error_escalation(
    window: &[TemporalSignal],
    section_id: &str,
    config: &ForesightConfig,
) -> Option<PreStruggleSignal> {
    let events: Vec<&TemporalSignal> = in_section(window, section_id)
        .rev()
        .take(config.error_sequence_window.max(2))
        .collect();

    // oldest first
    let errors: Vec<u32> = events
        .iter()
        .rev()
        .filter_map(|s| match &s.signal {
            BehaviorSignal::ErrorPattern(e) => Some(e.repeated_count.max(1)),
            BehaviorSignal::Playground(p) if p.error_count > 0 => Some(p.error_count),
            _ => None,
        })
        .collect();

    if errors.len() < 2 {
        return None;
    }

    let density = errors.len() as f64 / events.len() as f64;
    let peak = errors.iter().copied().max().unwrap_or(0);
    let escalating = errors[errors.len() - 1] > errors[errors.len() - 2] || peak >= 3;

    if !escalating && density < 0.6 {
        return None;
    }

    let severity = if peak >= 5 {
        StruggleSeverity::Severe
    } else if peak >= 3 {
        StruggleSeverity::Moderate
    } else {
        StruggleSeverity::Mild
    };

    Some(emit(
        PreStruggleIndicator::ErrorEscalation,
        severity,
        (0.75 + 0.05 * (errors.len() - 2) as f64).min(0.95),
        section_id,
        errors.len(),
        density,
        format!(
            "{} error events in the last {} actions, peak repeat count {peak}",
            errors.len(),
            events.len()
        ),
    ))
}

pub fn detect_rewind_cluster(
    window: &[TemporalSignal],
    section_id: &str,
    config: &ForesightConfig,
) -> Option<PreStruggleSignal> {
    let videos: Vec<&VideoSignal> = in_section(window, section_id)
        .filter_map(|s| match &s.signal {
            BehaviorSignal::Video(v) => Some(v),
            _ => None,
        })
        .collect();

    let newest = videos.iter().map(|v| v.timestamp).max()?;
    let cutoff = newest.saturating_sub(config.rewind_cluster_window_ms);
    let clustered: Vec<&&VideoSignal> = videos
        .iter()
        .filter(|v| v.timestamp >= cutoff && v.rewind_count > 0)
        .collect();
    let rewinds: u64 = clustered.iter().map(|v| u64::from(v.rewind_count)).sum();

    if rewinds < 2 {
        return None;
    }

    let severity = if rewinds >= 6 {
        StruggleSeverity::Severe
    } else if rewinds >= 4 {
        StruggleSeverity::Moderate
    } else {
        StruggleSeverity::Mild
    };

    Some(emit(
        PreStruggleIndicator::RewindCluster,
        severity,
        (0.7 + 0.05 * (rewinds - 2) as f64).min(0.9),
        section_id,
        clustered.len(),
        rewinds as f64,
        format!(
            "{rewinds} rewinds within {}s",
            config.rewind_cluster_window_ms / 1000
        ),
    ))
}

pub fn detect_skip_backtrack(
    window: &[TemporalSignal],
    section_id: &str,
) -> Option<PreStruggleSignal> {
    let navs: Vec<&NavigationSignal> = window
        .iter()
        .filter_map(|s| match &s.signal {
            BehaviorSignal::Navigation(n) => Some(n),
            _ => None,
        })
        .collect();

    let skip_returns = navs
        .iter()
        .enumerate()
        .filter(|(_, n)| n.is_skip && !n.is_backward)
        .filter(|(i, skip)| {
            navs[i + 1..]
                .iter()
                .any(|later| later.is_backward && later.to_section == skip.from_section)
        })
        .count();
    let backtracks = navs.iter().filter(|n| n.is_backward).count();

    if skip_returns == 0 && backtracks < 3 {
        return None;
    }

    let severity = if skip_returns >= 3 || backtracks >= 8 {
        StruggleSeverity::Severe
    } else if skip_returns >= 2 || backtracks >= 5 {
        StruggleSeverity::Moderate
    } else {
        StruggleSeverity::Mild
    };

    let confidence =
        0.65 + 0.1 * skip_returns as f64 + 0.05 * backtracks.saturating_sub(3) as f64;

    Some(emit(
        PreStruggleIndicator::SkipBacktrack,
        severity,
        confidence.min(0.9),
        section_id,
        skip_returns * 2 + backtracks,
        (skip_returns + backtracks) as f64,
        format!("{skip_returns} skip-ahead returns, {backtracks} backtracks"),
    ))
}

pub fn detect_slow_progression(
    window: &[TemporalSignal],
    section_id: &str,
) -> Option<PreStruggleSignal> {
    let timings: Vec<_> = in_section(window, section_id)
        .filter_map(|s| match &s.signal {
            BehaviorSignal::SectionTime(t) => Some(t),
            _ => None,
        })
        .collect();
    let latest = timings.last()?;

    let minutes = latest.time_spent_ms.max(0) as f64 / 60_000.0;
    if minutes < SLOW_PROGRESS_MIN_MINUTES || !latest.completion_percentage.is_finite() {
        return None;
    }
    let rate = latest.completion_percentage.max(0.0) / minutes;
    if rate >= SLOW_PROGRESS_RATE {
        return None;
    }

    let (severity, boost) = if rate < 2.0 {
        (StruggleSeverity::Severe, 0.15)
    } else if rate < 3.5 {
        (StruggleSeverity::Moderate, 0.1)
    } else {
        (StruggleSeverity::Mild, 0.05)
    };

    Some(emit(
        PreStruggleIndicator::SlowProgression,
        severity,
        0.6 + boost,
        section_id,
        timings.len(),
        rate,
        format!("{rate:.1}% progress per minute after {minutes:.0} minutes"),
    ))
}

pub fn detect_avoidance(window: &[TemporalSignal], section_id: &str) -> Option<PreStruggleSignal> {
    let skips_away = window
        .iter()
        .filter(|s| match &s.signal {
            BehaviorSignal::Navigation(n) => {
                n.is_skip && !n.is_backward && n.from_section == section_id
            }
            _ => false,
        })
        .count();
    let low_watch = in_section(window, section_id)
        .filter(|s| match &s.signal {
            BehaviorSignal::Video(v) => v.watched_percentage < LOW_WATCH_PERCENTAGE,
            _ => false,
        })
        .count();

    let total = skips_away + low_watch;
    if total < 2 {
        return None;
    }

    let severity = if total >= 6 {
        StruggleSeverity::Severe
    } else if total >= 4 {
        StruggleSeverity::Moderate
    } else {
        StruggleSeverity::Mild
    };

    Some(emit(
        PreStruggleIndicator::Avoidance,
        severity,
        (0.6 + 0.05 * (total - 2) as f64).min(0.85),
        section_id,
        total,
        total as f64,
        format!("{skips_away} skips away, {low_watch} barely-watched videos"),
    ))
}
