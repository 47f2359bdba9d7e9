//! Benchmark suite for danci-foresight
//!
//! Run with: cargo bench

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use parking_lot::RwLock;

use danci_foresight::foresight::embedding::{embed_sequence, encode_signature};
use danci_foresight::foresight::temporal::TemporalEnricher;
use danci_foresight::foresight::{
    BehaviorSignal, CollectivePatternStore, ForesightConfig, ForesightEngine, PatternOutcome,
    QuizSignal, TemporalSignal, VideoSignal,
};

fn sample_signal(i: i64) -> BehaviorSignal {
    if i % 3 == 0 {
        BehaviorSignal::Video(VideoSignal {
            watched_percentage: 60.0,
            rewind_count: (i % 4) as u32,
            pause_count: 1,
            timestamp: i * 5_000,
        })
    } else {
        BehaviorSignal::Quiz(QuizSignal {
            correct_answers: (i % 5) as u32,
            total_questions: 5,
            attempts: 1 + (i % 2) as u32,
            time_spent_ms: 40_000 + i * 1_000,
            answer_changes: (i % 3) as u32,
            timestamp: i * 5_000,
        })
    }
}

fn sample_window(len: i64) -> Vec<TemporalSignal> {
    let mut enricher = TemporalEnricher::new();
    (0..len).map(|i| enricher.enrich(sample_signal(i), "s1")).collect()
}

fn bench_embed_sequence(c: &mut Criterion) {
    let window = sample_window(50);
    c.bench_function("embed_sequence/50", |b| {
        b.iter(|| embed_sequence(black_box(&window), 300_000))
    });
}

fn bench_collective_match(c: &mut Criterion) {
    let mut store = CollectivePatternStore::new("bench");
    for n in 10..210 {
        let embedding = embed_sequence(&sample_window(n % 40 + 5), 300_000);
        let signature = encode_signature(&embedding.vector);
        for _ in 0..3 {
            store.record_outcome("s1", &signature, &[], PatternOutcome::Struggled, None, n);
        }
    }
    let query = embed_sequence(&sample_window(30), 300_000).vector;
    c.bench_function("collective_probability/200", |b| {
        b.iter(|| store.collective_probability("s1", black_box(&query), 0.75, 3))
    });
}

fn bench_process_signal(c: &mut Criterion) {
    c.bench_function("ForesightEngine::process_signal x100", |b| {
        b.iter(|| {
            let patterns = Arc::new(RwLock::new(CollectivePatternStore::new("bench")));
            let mut engine =
                ForesightEngine::new(ForesightConfig::default(), "bench", "session", patterns);
            for i in 0..100 {
                black_box(engine.process_signal(sample_signal(i), "s1"));
            }
        })
    });
}

criterion_group!(
    benches,
    bench_embed_sequence,
    bench_collective_match,
    bench_process_signal
);
criterion_main!(benches);
