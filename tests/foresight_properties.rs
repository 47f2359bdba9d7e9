//! Property-based tests for the scoring and prediction invariants:
//! - every score lands in [0, 100]
//! - combined probabilities stay in [0, 1] and silence holds below threshold
//! - signatures decode back within three decimals
//! - the comprehension transition is a pure function of its inputs

use proptest::prelude::*;

use danci_foresight::foresight::embedding::{decode_signature, encode_signature, EMBEDDING_DIM};
use danci_foresight::foresight::prediction::{
    aggregate_pre_struggle_signals, combine_probabilities, PredictionContext,
};
use danci_foresight::foresight::scoring::score_signal;
use danci_foresight::foresight::state_machine::transition;
use danci_foresight::foresight::temporal::TemporalEnricher;
use danci_foresight::foresight::{
    BehaviorSignal, ComprehensionStateMachineModel, ErrorPatternSignal, ForesightConfig,
    NavigationSignal, PlaygroundSignal, PreStruggleIndicator, PreStruggleSignal, QuizSignal,
    SectionTimeSignal, SignalEvidence, StruggleSeverity, VideoSignal,
};

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_f64_0_1() -> impl Strategy<Value = f64> {
    (0u64..=1000u64).prop_map(|v| v as f64 / 1000.0)
}

fn arb_signal() -> impl Strategy<Value = BehaviorSignal> {
    let ts = 0i64..10_000_000;
    prop_oneof![
        (0u32..20, 0u32..20, 0u32..6, 0i64..600_000, 0u32..10, ts.clone()).prop_map(
            |(correct_answers, total_questions, attempts, time_spent_ms, answer_changes, timestamp)| {
                BehaviorSignal::Quiz(QuizSignal {
                    correct_answers,
                    total_questions,
                    attempts,
                    time_spent_ms,
                    answer_changes,
                    timestamp,
                })
            }
        ),
        (0u32..20, 0u32..20, 0u32..40, ts.clone()).prop_map(
            |(run_count, successful_runs, error_count, timestamp)| {
                BehaviorSignal::Playground(PlaygroundSignal {
                    run_count,
                    successful_runs,
                    error_count,
                    timestamp,
                })
            }
        ),
        (-50.0f64..200.0, 0u32..30, 0u32..10, ts.clone()).prop_map(
            |(watched_percentage, rewind_count, pause_count, timestamp)| {
                BehaviorSignal::Video(VideoSignal {
                    watched_percentage,
                    rewind_count,
                    pause_count,
                    timestamp,
                })
            }
        ),
        (0i64..3_600_000, -50.0f64..200.0, 0u32..20, ts.clone()).prop_map(
            |(time_spent_ms, completion_percentage, revisit_count, timestamp)| {
                BehaviorSignal::SectionTime(SectionTimeSignal {
                    time_spent_ms,
                    completion_percentage,
                    revisit_count,
                    timestamp,
                })
            }
        ),
        (0u32..20, ts.clone()).prop_map(|(repeated_count, timestamp)| {
            BehaviorSignal::ErrorPattern(ErrorPatternSignal {
                error_type: "E0502".to_string(),
                repeated_count,
                timestamp,
            })
        }),
        (any::<bool>(), any::<bool>(), ts).prop_map(|(is_backward, is_skip, timestamp)| {
            BehaviorSignal::Navigation(NavigationSignal {
                from_section: "s1".to_string(),
                to_section: "s2".to_string(),
                is_backward,
                is_skip,
                timestamp,
            })
        }),
    ]
}

fn arb_indicator() -> impl Strategy<Value = PreStruggleIndicator> {
    prop_oneof![
        Just(PreStruggleIndicator::QuizHesitation),
        Just(PreStruggleIndicator::ErrorEscalation),
        Just(PreStruggleIndicator::RewindCluster),
        Just(PreStruggleIndicator::SkipBacktrack),
        Just(PreStruggleIndicator::SlowProgression),
        Just(PreStruggleIndicator::Avoidance),
    ]
}

fn arb_severity() -> impl Strategy<Value = StruggleSeverity> {
    prop_oneof![
        Just(StruggleSeverity::Mild),
        Just(StruggleSeverity::Moderate),
        Just(StruggleSeverity::Severe),
    ]
}

fn arb_pre_struggle() -> impl Strategy<Value = PreStruggleSignal> {
    (arb_indicator(), arb_severity(), arb_f64_0_1(), 1usize..10, 1_000i64..300_000).prop_map(
        |(indicator, severity, confidence, window_depth, ttl)| PreStruggleSignal {
            indicator,
            severity,
            confidence,
            section_id: "s1".to_string(),
            evidence: SignalEvidence {
                window_depth,
                metric: 1.0,
                summary: String::new(),
            },
            predicted_time_to_struggle: ttl,
        },
    )
}

proptest! {
    #[test]
    fn scores_stay_in_range(signal in arb_signal()) {
        let score = score_signal(&signal);
        prop_assert!((0.0..=100.0).contains(&score));
    }

    #[test]
    fn combined_probability_is_bounded(signal in arb_f64_0_1(), collective in proptest::option::of(arb_f64_0_1())) {
        let p = combine_probabilities(signal, collective, &ForesightConfig::default());
        prop_assert!((0.0..=1.0).contains(&p));
    }

    #[test]
    fn aggregation_respects_threshold(
        signals in proptest::collection::vec(arb_pre_struggle(), 1..6),
        collective in proptest::option::of(arb_f64_0_1()),
    ) {
        let config = ForesightConfig::default();
        let context = PredictionContext { id: "p".to_string(), section_id: "s1", now: 1_000 };
        match aggregate_pre_struggle_signals(&signals, collective, context, &config) {
            Some(prediction) => {
                prop_assert!(prediction.probability >= config.prediction_threshold);
                prop_assert!(prediction.probability <= 1.0);
                prop_assert!((1..=5).contains(&prediction.steps_ahead));
                prop_assert!(prediction.primary_indicators.len() <= 3);
                prop_assert!(prediction.contributing_factors.len() <= 5);
                let worst = signals.iter().map(|s| s.severity).max().unwrap();
                prop_assert_eq!(prediction.severity, worst);
            }
            None => {
                let signal_p = danci_foresight::foresight::prediction::signal_probability(&signals, &config);
                prop_assert!(combine_probabilities(signal_p, collective, &config) < config.prediction_threshold);
            }
        }
    }

    #[test]
    fn signature_round_trips_within_three_decimals(vector in proptest::collection::vec(arb_f64_0_1(), EMBEDDING_DIM)) {
        let decoded = decode_signature(&encode_signature(&vector));
        prop_assert_eq!(decoded.len(), EMBEDDING_DIM);
        for (a, b) in vector.iter().zip(decoded.iter()) {
            prop_assert!((a - b).abs() <= 0.0005 + 1e-12);
        }
    }

    #[test]
    fn transition_is_deterministic(signals in proptest::collection::vec(arb_signal(), 1..25)) {
        let mut enricher = TemporalEnricher::new();
        let window: Vec<_> = signals.into_iter().map(|s| enricher.enrich(s, "s1")).collect();
        let model = ComprehensionStateMachineModel::new(0);

        let (a, event_a) = transition(&model, &window);
        let (b, event_b) = transition(&model, &window);
        prop_assert_eq!(a, b);
        prop_assert_eq!(event_a, event_b);
    }
}
