//! Attention-weighted sequence embedding and its compact signature encoding.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::foresight::types::{BehaviorSignal, SignalKind, SignalOutcome, TemporalSignal};

pub const EMBEDDING_DIM: usize = 12;
const SIGNATURE_PRECISION: f64 = 1000.0;
const DELTA_HALF_LIFE_MS: f64 = 60_000.0;
const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub struct SequenceEmbedding {
    pub vector: Vec<f64>,
    pub attention: Vec<f64>,
}

/// Weight of each signal: exp(-age / horizon) * (position + 1) / len.
pub fn attention_weights(window: &[TemporalSignal], medium_term_horizon_ms: i64) -> Vec<f64> {
    let Some(newest) = window.iter().map(|s| s.timestamp()).max() else {
        return Vec::new();
    };
    let horizon = medium_term_horizon_ms.max(1) as f64;
    let len = window.len() as f64;

    window
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let age = newest.saturating_sub(s.timestamp()).max(0) as f64;
            let temporal_decay = (-age / horizon).exp();
            let context_relevance = (i + 1) as f64 / len;
            temporal_decay * context_relevance
        })
        .collect()
}

fn intensity(signal: &BehaviorSignal) -> f64 {
    let value = match signal {
        BehaviorSignal::Quiz(q) => q.attempts.saturating_sub(1) as f64 / 3.0,
        BehaviorSignal::Playground(p) => {
            if p.run_count == 0 {
                0.0
            } else {
                p.error_count as f64 / p.run_count as f64
            }
        }
        BehaviorSignal::Video(v) => v.rewind_count as f64 / 5.0,
        BehaviorSignal::SectionTime(t) => t.revisit_count as f64 / 5.0,
        BehaviorSignal::ErrorPattern(e) => e.repeated_count as f64 / 5.0,
        BehaviorSignal::Navigation(n) => {
            if n.is_backward {
                1.0
            } else if n.is_skip {
                0.5
            } else {
                0.0
            }
        }
    };
    value.clamp(0.0, 1.0)
}

/// Fixed-length feature vector for one signal.
pub fn signal_features(signal: &TemporalSignal) -> [f64; EMBEDDING_DIM] {
    let mut features = [0.0; EMBEDDING_DIM];
    features[signal.signal.kind().index()] = 1.0;
    let offset = SignalKind::ALL.len();
    features[offset] = signal.score / 100.0;
    features[offset + 1] = f64::from(u8::from(signal.outcome == SignalOutcome::Success));
    features[offset + 2] = f64::from(u8::from(signal.outcome == SignalOutcome::Failure));
    let delta = signal.delta_from_previous.max(0) as f64;
    features[offset + 3] = delta / (delta + DELTA_HALF_LIFE_MS);
    features[offset + 4] = signal.section_progress.clamp(0.0, 1.0);
    features[offset + 5] = intensity(&signal.signal);
    features
}

/// Embeds the window. An empty window embeds to the zero vector.
pub fn embed_sequence(window: &[TemporalSignal], medium_term_horizon_ms: i64) -> SequenceEmbedding {
    let attention = attention_weights(window, medium_term_horizon_ms);
    let total: f64 = attention.iter().sum();
    let mut vector = vec![0.0; EMBEDDING_DIM];

    if total > EPSILON {
        for (signal, weight) in window.iter().zip(attention.iter()) {
            for (slot, value) in vector.iter_mut().zip(signal_features(signal)) {
                *slot += weight * value;
            }
        }
        for slot in vector.iter_mut() {
            *slot /= total;
            if !slot.is_finite() {
                *slot = 0.0;
            }
        }
    }

    SequenceEmbedding { vector, attention }
}

pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a < EPSILON || norm_b < EPSILON {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Rounds to three decimals and base64-encodes the comma-joined components.
pub fn encode_signature(vector: &[f64]) -> String {
    let joined = vector
        .iter()
        .map(|v| {
            let rounded = (v * SIGNATURE_PRECISION).round() / SIGNATURE_PRECISION;
            if rounded.is_finite() {
                format!("{rounded:.3}")
            } else {
                "0.000".to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(",");
    STANDARD.encode(joined)
}

/// Decodes a signature. Anything malformed decodes to the zero vector.
pub fn decode_signature(signature: &str) -> Vec<f64> {
    try_decode(signature).unwrap_or_else(|| {
        tracing::debug!(signature, "undecodable pattern signature, using zero vector");
        vec![0.0; EMBEDDING_DIM]
    })
}

fn try_decode(signature: &str) -> Option<Vec<f64>> {
    let bytes = STANDARD.decode(signature).ok()?;
    let text = String::from_utf8(bytes).ok()?;
    let values = text
        .split(',')
        .map(|part| part.trim().parse::<f64>().ok().filter(|v| v.is_finite()))
        .collect::<Option<Vec<f64>>>()?;
    (values.len() == EMBEDDING_DIM).then_some(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foresight::temporal::TemporalEnricher;
    use crate::foresight::types::{NavigationSignal, QuizSignal};

    fn sample_window() -> Vec<TemporalSignal> {
        let mut enricher = TemporalEnricher::new();
        let mut window = Vec::new();
        for i in 0..6 {
            let signal = if i % 2 == 0 {
                BehaviorSignal::Quiz(QuizSignal {
                    correct_answers: i as u32 % 4,
                    total_questions: 4,
                    attempts: 1 + i as u32 % 3,
                    time_spent_ms: 40_000,
                    answer_changes: 1,
                    timestamp: i * 20_000,
                })
            } else {
                BehaviorSignal::Navigation(NavigationSignal {
                    from_section: "s1".into(),
                    to_section: "s0".into(),
                    is_backward: true,
                    is_skip: false,
                    timestamp: i * 20_000,
                })
            };
            window.push(enricher.enrich(signal, "s1"));
        }
        window
    }

    #[test]
    fn later_and_fresher_signals_weigh_more() {
        let weights = attention_weights(&sample_window(), 300_000);
        assert_eq!(weights.len(), 6);
        assert!(weights.windows(2).all(|w| w[1] > w[0]));
        assert!((weights[5] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn embedding_is_deterministic() {
        let a = embed_sequence(&sample_window(), 300_000);
        let b = embed_sequence(&sample_window(), 300_000);
        assert_eq!(a, b);
        assert_eq!(a.vector.len(), EMBEDDING_DIM);
    }

    #[test]
    fn empty_window_is_zero_vector() {
        let embedding = embed_sequence(&[], 300_000);
        assert_eq!(embedding.vector, vec![0.0; EMBEDDING_DIM]);
        assert!(embedding.attention.is_empty());
    }

    #[test]
    fn signature_round_trips_within_rounding() {
        let embedding = embed_sequence(&sample_window(), 300_000);
        let decoded = decode_signature(&encode_signature(&embedding.vector));
        for (original, restored) in embedding.vector.iter().zip(decoded.iter()) {
            assert!((original - restored).abs() <= 0.0005 + 1e-12);
        }
    }

    #[test]
    fn corrupt_signature_decodes_to_zero() {
        assert_eq!(decode_signature("%%% not base64"), vec![0.0; EMBEDDING_DIM]);
        assert_eq!(decode_signature(&STANDARD.encode("1,2,x")), vec![0.0; EMBEDDING_DIM]);
        assert_eq!(decode_signature(&STANDARD.encode("1,2")), vec![0.0; EMBEDDING_DIM]);
    }

    #[test]
    fn cosine_handles_degenerate_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-12);
    }
}
