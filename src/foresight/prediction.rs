use serde::Serialize;

use crate::foresight::config::ForesightConfig;
use crate::foresight::types::{
    ConfidenceInterval, ContributingFactor, PreStruggleIndicator, PreStruggleSignal,
    PredictionHorizon, PredictiveModelState, StrugglePrediction, StruggleSeverity,
    MAX_CONTRIBUTING_FACTORS, MAX_PRIMARY_INDICATORS,
};

/// Why a cycle produced no prediction. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    InsufficientSignals { have: usize, need: usize },
    Cooldown { remaining_ms: i64 },
    InterventionCap { active: usize },
    NoIndicators,
    BelowThreshold,
}

/// Checks the gates in order: enabled, window size, cooldown, active cap.
pub fn check_gate(
    state: &PredictiveModelState,
    now: i64,
    config: &ForesightConfig,
) -> Option<SkipReason> {
    if !config.enabled {
        return Some(SkipReason::Disabled);
    }

    let have = state.current_sequence.len();
    if have < config.min_signals_for_prediction {
        return Some(SkipReason::InsufficientSignals {
            have,
            need: config.min_signals_for_prediction,
        });
    }

    if let Some(last) = state.last_prediction_at {
        let elapsed = now.saturating_sub(last);
        if elapsed < config.intervention_cooldown_ms {
            return Some(SkipReason::Cooldown {
                remaining_ms: config.intervention_cooldown_ms - elapsed.max(0),
            });
        }
    }

    let active = state
        .active_interventions
        .iter()
        .filter(|i| !i.is_resolved())
        .count();
    if active >= config.max_active_interventions {
        return Some(SkipReason::InterventionCap { active });
    }

    None
}

/// Weighted mean confidence plus a small bonus for corroborating indicators.
pub fn signal_probability(signals: &[PreStruggleSignal], config: &ForesightConfig) -> f64 {
    if signals.is_empty() {
        return 0.0;
    }
    let (weighted, total) = signals.iter().fold((0.0, 0.0), |(weighted, total), s| {
        let w = config.indicator_weights.weight(s.indicator);
        (weighted + w * s.confidence, total + w)
    });
    let mean = if total > 0.0 { weighted / total } else { 0.0 };
    let bonus = (config.blend.multi_indicator_step * signals.len() as f64)
        .min(config.blend.multi_indicator_cap);
    (mean + bonus).clamp(0.0, 1.0)
}

/// Blends both sources. Without collective evidence the signal estimate stands alone.
pub fn combine_probabilities(signal: f64, collective: Option<f64>, config: &ForesightConfig) -> f64 {
    let combined = match collective {
        Some(collective) => {
            let total = config.blend.signal + config.blend.collective;
            if total <= 0.0 {
                signal
            } else {
                (config.blend.signal * signal + config.blend.collective * collective) / total
            }
        }
        None => signal,
    };
    if combined.is_finite() {
        combined.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

pub fn horizon_for(time_to_struggle_ms: i64, config: &ForesightConfig) -> PredictionHorizon {
    if time_to_struggle_ms <= config.immediate_horizon_ms {
        PredictionHorizon::Immediate
    } else if time_to_struggle_ms <= config.short_term_horizon_ms {
        PredictionHorizon::ShortTerm
    } else {
        PredictionHorizon::MediumTerm
    }
}

fn ranked(signals: &[PreStruggleSignal], config: &ForesightConfig) -> Vec<(f64, PreStruggleSignal)> {
    let mut ranked: Vec<(f64, PreStruggleSignal)> = signals
        .iter()
        .map(|s| (config.indicator_weights.weight(s.indicator) * s.confidence, s.clone()))
        .collect();
    ranked.sort_by(|a, b| {
        b.0.total_cmp(&a.0)
            .then_with(|| a.1.indicator.cmp(&b.1.indicator))
    });
    ranked
}

pub struct PredictionContext<'a> {
    pub id: String,
    pub section_id: &'a str,
    pub now: i64,
}

/// Builds a prediction when the combined probability clears the threshold.
/// Recommendations are attached later by the recommender.
pub fn aggregate_pre_struggle_signals(
    signals: &[PreStruggleSignal],
    collective: Option<f64>,
    context: PredictionContext<'_>,
    config: &ForesightConfig,
) -> Option<StrugglePrediction> {
    if signals.is_empty() {
        return None;
    }

    let signal_prob = signal_probability(signals, config);
    let probability = combine_probabilities(signal_prob, collective, config);
    if probability < config.prediction_threshold {
        tracing::debug!(
            probability,
            threshold = config.prediction_threshold,
            "combined probability below threshold"
        );
        return None;
    }

    let ranked = ranked(signals, config);

    let mut primary_indicators: Vec<PreStruggleIndicator> = Vec::new();
    for (_, s) in &ranked {
        if !primary_indicators.contains(&s.indicator) {
            primary_indicators.push(s.indicator);
        }
        if primary_indicators.len() == MAX_PRIMARY_INDICATORS {
            break;
        }
    }

    let contributing_factors = ranked
        .iter()
        .take(MAX_CONTRIBUTING_FACTORS)
        .map(|(weight, s)| ContributingFactor {
            indicator: s.indicator,
            weight: *weight,
            description: s.evidence.summary.clone(),
        })
        .collect();

    let severity = signals
        .iter()
        .map(|s| s.severity)
        .max()
        .unwrap_or(StruggleSeverity::Mild);

    let confidence_total: f64 = signals.iter().map(|s| s.confidence).sum();
    let time_to_struggle = if confidence_total > 0.0 {
        (signals
            .iter()
            .map(|s| s.confidence * s.predicted_time_to_struggle as f64)
            .sum::<f64>()
            / confidence_total)
            .round() as i64
    } else {
        signals
            .iter()
            .map(|s| s.predicted_time_to_struggle)
            .min()
            .unwrap_or(config.short_term_horizon_ms)
    };

    let predicted_struggle_time = context.now.saturating_add(time_to_struggle);
    let half_width = config.short_term_horizon_ms / 2;

    let mean_depth = signals
        .iter()
        .map(|s| s.evidence.window_depth as f64)
        .sum::<f64>()
        / signals.len() as f64;
    let steps_ahead = ((mean_depth / 2.0).ceil() as i64).clamp(1, 5) as u8;

    Some(StrugglePrediction {
        id: context.id,
        section_id: context.section_id.to_string(),
        probability,
        signal_probability: signal_prob,
        collective_probability: collective,
        severity,
        horizon: horizon_for(time_to_struggle, config),
        primary_indicators,
        contributing_factors,
        predicted_struggle_time,
        confidence_interval: ConfidenceInterval {
            earliest: predicted_struggle_time.saturating_sub(half_width),
            latest: predicted_struggle_time.saturating_add(half_width),
        },
        recommended_interventions: Vec::new(),
        steps_ahead,
        created_at: context.now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foresight::types::SignalEvidence;

    fn hit(
        indicator: PreStruggleIndicator,
        confidence: f64,
        severity: StruggleSeverity,
        depth: usize,
        ttl: i64,
    ) -> PreStruggleSignal {
        PreStruggleSignal {
            indicator,
            severity,
            confidence,
            section_id: "s1".into(),
            evidence: SignalEvidence {
                window_depth: depth,
                metric: 1.0,
                summary: format!("{} evidence", indicator.as_str()),
            },
            predicted_time_to_struggle: ttl,
        }
    }

    fn context(now: i64) -> PredictionContext<'static> {
        PredictionContext {
            id: "p1".into(),
            section_id: "s1",
            now,
        }
    }

    #[test]
    fn signal_probability_adds_capped_bonus() {
        let config = ForesightConfig::default();
        let single = [hit(PreStruggleIndicator::QuizHesitation, 0.9, StruggleSeverity::Mild, 5, 60_000)];
        assert!((signal_probability(&single, &config) - 0.95).abs() < 1e-9);

        let many: Vec<_> = (0..6)
            .map(|_| hit(PreStruggleIndicator::Avoidance, 0.6, StruggleSeverity::Mild, 2, 60_000))
            .collect();
        assert!((signal_probability(&many, &config) - 0.8).abs() < 1e-9);

        let saturated = [hit(PreStruggleIndicator::ErrorEscalation, 1.0, StruggleSeverity::Mild, 2, 1)];
        assert_eq!(signal_probability(&saturated, &config), 1.0);
    }

    #[test]
    fn combine_blends_or_falls_back() {
        let config = ForesightConfig::default();
        assert!((combine_probabilities(0.8, Some(0.3), &config) - 0.6).abs() < 1e-9);
        assert_eq!(combine_probabilities(0.8, None, &config), 0.8);
    }

    #[test]
    fn below_threshold_returns_none() {
        let config = ForesightConfig::default();
        let weak = [hit(PreStruggleIndicator::SlowProgression, 0.5, StruggleSeverity::Mild, 1, 60_000)];
        assert!(aggregate_pre_struggle_signals(&weak, None, context(0), &config).is_none());

        let strong = [hit(PreStruggleIndicator::QuizHesitation, 0.9, StruggleSeverity::Mild, 5, 60_000)];
        assert!(aggregate_pre_struggle_signals(&strong, Some(0.0), context(0), &config).is_none());
        assert!(aggregate_pre_struggle_signals(&[], Some(1.0), context(0), &config).is_none());
    }

    #[test]
    fn prediction_takes_worst_severity_and_buckets_horizon() {
        let config = ForesightConfig::default();
        let signals = [
            hit(PreStruggleIndicator::QuizHesitation, 0.9, StruggleSeverity::Moderate, 5, 45_000),
            hit(PreStruggleIndicator::ErrorEscalation, 0.8, StruggleSeverity::Severe, 3, 15_000),
        ];
        let prediction =
            aggregate_pre_struggle_signals(&signals, None, context(1_000), &config).expect("prediction");

        assert_eq!(prediction.severity, StruggleSeverity::Severe);
        assert_eq!(prediction.horizon, PredictionHorizon::ShortTerm);
        // error escalation carries the heavier weight (1.2 * 0.8 > 1.0 * 0.9)
        assert_eq!(
            prediction.primary_indicators,
            vec![PreStruggleIndicator::ErrorEscalation, PreStruggleIndicator::QuizHesitation]
        );
        assert_eq!(prediction.steps_ahead, 2);
        assert_eq!(
            prediction.confidence_interval.latest - prediction.confidence_interval.earliest,
            config.short_term_horizon_ms
        );
        assert!(prediction.probability <= 1.0 && prediction.probability >= 0.65);
    }

    #[test]
    fn primary_indicators_are_capped_at_three() {
        let config = ForesightConfig::default();
        let signals = [
            hit(PreStruggleIndicator::QuizHesitation, 0.9, StruggleSeverity::Mild, 5, 60_000),
            hit(PreStruggleIndicator::ErrorEscalation, 0.9, StruggleSeverity::Mild, 5, 60_000),
            hit(PreStruggleIndicator::RewindCluster, 0.9, StruggleSeverity::Mild, 5, 60_000),
            hit(PreStruggleIndicator::Avoidance, 0.9, StruggleSeverity::Mild, 5, 60_000),
        ];
        let prediction =
            aggregate_pre_struggle_signals(&signals, None, context(0), &config).expect("prediction");
        assert_eq!(prediction.primary_indicators.len(), 3);
        assert_eq!(prediction.primary_indicators[0], PreStruggleIndicator::ErrorEscalation);
        assert_eq!(prediction.contributing_factors.len(), 4);
        assert_eq!(prediction.steps_ahead, 3);
    }

    #[test]
    fn gate_checks_in_order() {
        let config = ForesightConfig::default();
        let mut state = PredictiveModelState::default();
        assert!(matches!(
            check_gate(&state, 0, &config),
            Some(SkipReason::InsufficientSignals { have: 0, need: 5 })
        ));

        let disabled = ForesightConfig {
            enabled: false,
            ..Default::default()
        };
        assert_eq!(check_gate(&state, 0, &disabled), Some(SkipReason::Disabled));

        let mut enricher = crate::foresight::temporal::TemporalEnricher::new();
        for i in 0..5 {
            state.current_sequence.push_back(enricher.enrich(
                crate::foresight::types::BehaviorSignal::ErrorPattern(
                    crate::foresight::types::ErrorPatternSignal {
                        error_type: "E".into(),
                        repeated_count: 1,
                        timestamp: i,
                    },
                ),
                "s1",
            ));
        }
        assert_eq!(check_gate(&state, 10, &config), None);

        state.last_prediction_at = Some(0);
        assert_eq!(
            check_gate(&state, 20_000, &config),
            Some(SkipReason::Cooldown { remaining_ms: 40_000 })
        );
        assert_eq!(check_gate(&state, 60_000, &config), None);

        state.last_prediction_at = Some(i64::MAX);
        assert_eq!(
            check_gate(&state, i64::MIN, &config),
            Some(SkipReason::Cooldown { remaining_ms: 60_000 })
        );
        state.last_prediction_at = Some(i64::MIN);
        assert_eq!(check_gate(&state, i64::MAX, &config), None);
    }

    #[test]
    fn predicted_time_saturates_at_timestamp_limits() {
        let config = ForesightConfig::default();
        let signals = [hit(PreStruggleIndicator::QuizHesitation, 0.9, StruggleSeverity::Mild, 5, 60_000)];

        let late = aggregate_pre_struggle_signals(&signals, None, context(i64::MAX), &config)
            .expect("prediction");
        assert_eq!(late.predicted_struggle_time, i64::MAX);
        assert_eq!(late.confidence_interval.latest, i64::MAX);
        assert_eq!(late.confidence_interval.earliest, i64::MAX - config.short_term_horizon_ms / 2);

        let early = aggregate_pre_struggle_signals(&signals, None, context(i64::MIN), &config)
            .expect("prediction");
        assert_eq!(early.confidence_interval.earliest, i64::MIN);
    }
}
