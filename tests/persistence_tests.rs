//! Storage boundary: file store layout, load fallbacks, engine restore and
//! debounced write coalescing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tempfile::TempDir;

use danci_foresight::foresight::persistence::{
    load_model_state, load_patterns, model_key, patterns_key, save_patterns,
};
use danci_foresight::foresight::{
    BehaviorSignal, CollectivePatternStore, FileStore, ForesightConfig, ForesightEngine,
    MemoryStore, PatternOutcome, PersistenceScheduler, QuizSignal, StateStore, StorageError,
};

const FIXED_TIMESTAMP: i64 = 1700000000000;

fn hesitant_quiz(offset_ms: i64) -> BehaviorSignal {
    BehaviorSignal::Quiz(QuizSignal {
        correct_answers: 1,
        total_questions: 1,
        attempts: 1,
        time_spent_ms: 75_000,
        answer_changes: 1,
        timestamp: FIXED_TIMESTAMP + offset_ms,
    })
}

#[derive(Default)]
struct CountingStore {
    inner: MemoryStore,
    writes: AtomicUsize,
}

impl CountingStore {
    fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl StateStore for CountingStore {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.inner.read(key)
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.inner.remove(key)
    }
}

#[test]
fn file_store_sanitizes_keys_and_round_trips() {
    let dir = TempDir::new().unwrap();
    let store = FileStore::new(dir.path()).unwrap();

    let key = model_key("rust-101", "session-1");
    assert_eq!(
        store.path_for(&key),
        dir.path().join("foresight_rust-101_session-1_model.json")
    );

    assert_eq!(store.read(&key).unwrap(), None);
    store.write(&key, "{\"a\":1}").unwrap();
    assert_eq!(store.read(&key).unwrap().as_deref(), Some("{\"a\":1}"));
    store.remove(&key).unwrap();
    assert_eq!(store.read(&key).unwrap(), None);
    store.remove(&key).unwrap();
}

#[test]
fn engine_state_survives_restore() {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn StateStore> = Arc::new(FileStore::new(dir.path()).unwrap());
    let scheduler = Arc::new(PersistenceScheduler::new(
        Arc::clone(&store),
        Duration::from_secs(1),
    ));
    let patterns = Arc::new(RwLock::new(CollectivePatternStore::new("rust-101")));

    let prediction_id = {
        let mut engine = ForesightEngine::new(
            ForesightConfig::default(),
            "rust-101",
            "session-1",
            Arc::clone(&patterns),
        )
        .with_persistence(Arc::clone(&scheduler));
        let mut last = None;
        for i in 0..5 {
            last = engine.process_signal(hesitant_quiz(i * 10_000), "s1").prediction;
        }
        let prediction = last.expect("prediction");
        engine.validate_prediction(&prediction.id, true).unwrap();
        engine.record_section_outcome("s1", PatternOutcome::Struggled, None);
        engine.flush();
        prediction.id
    };

    let loaded = load_model_state(store.as_ref(), "rust-101", "session-1");
    assert_eq!(loaded.total_predictions, 1);
    assert!(loaded.current_sequence.is_empty());
    assert_eq!(loaded.validated_predictions.get(&prediction_id), Some(&true));

    let restored = ForesightEngine::restore(
        ForesightConfig::default(),
        "rust-101",
        "session-1",
        Arc::new(RwLock::new(load_patterns(store.as_ref(), "rust-101"))),
        scheduler,
    );
    assert_eq!(restored.state().total_predictions, 1);
    assert!((restored.state().prediction_accuracy - 0.55).abs() < 1e-12);
    assert_eq!(restored.state().active_interventions.len(), 1);
    assert_eq!(restored.patterns().read().len(), 1);
}

#[test]
fn corrupt_blobs_fall_back_to_defaults() {
    let store = MemoryStore::new();
    store.write(&model_key("c", "s"), "[1, 2,").unwrap();
    store.write(&patterns_key("c"), "{\"patterns\": 7}").unwrap();

    let state = load_model_state(&store, "c", "s");
    assert_eq!(state.total_predictions, 0);
    assert_eq!(state.prediction_accuracy, 0.5);
    assert!(load_patterns(&store, "c").is_empty());
}

#[test]
fn patterns_blob_is_a_plain_list() {
    let store = MemoryStore::new();
    let mut patterns = CollectivePatternStore::new("c");
    patterns.record_outcome("s1", "sig-b", &[], PatternOutcome::Struggled, None, 5);
    patterns.record_outcome("s1", "sig-a", &[], PatternOutcome::Succeeded, None, 6);
    save_patterns(&store, &patterns).unwrap();

    let raw = store.read(&patterns_key("c")).unwrap().unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    let list = json["patterns"].as_array().unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0]["signalSignature"], "sig-a");
    assert_eq!(list[1]["occurrenceCount"], 1);

    let reloaded = load_patterns(&store, "c");
    assert_eq!(reloaded.len(), 2);
    assert_eq!(reloaded.get("s1", "sig-b").map(|p| p.struggle_rate), Some(1.0));
}

#[tokio::test(start_paused = true)]
async fn debounce_coalesces_bursts_into_one_write() {
    let store = Arc::new(CountingStore::default());
    let scheduler = PersistenceScheduler::new(store.clone(), Duration::from_secs(1));

    scheduler.schedule("k".into(), "1".into());
    tokio::time::sleep(Duration::from_millis(500)).await;
    scheduler.schedule("k".into(), "2".into());
    scheduler.schedule("k".into(), "3".into());
    assert_eq!(store.writes(), 0);
    assert_eq!(scheduler.pending_count(), 1);

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert_eq!(store.writes(), 1);
    assert_eq!(store.read("k").unwrap().as_deref(), Some("3"));
    assert_eq!(scheduler.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn separate_keys_debounce_independently() {
    let store = Arc::new(CountingStore::default());
    let scheduler = PersistenceScheduler::new(store.clone(), Duration::from_secs(1));

    scheduler.schedule("model".into(), "m".into());
    scheduler.schedule("patterns".into(), "p".into());
    assert_eq!(scheduler.pending_count(), 2);

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert_eq!(store.writes(), 2);
}

#[tokio::test(start_paused = true)]
async fn flush_writes_pending_state_immediately() {
    let store = Arc::new(CountingStore::default());
    let scheduler = PersistenceScheduler::new(store.clone(), Duration::from_secs(60));

    scheduler.schedule("k".into(), "v".into());
    scheduler.flush();
    assert_eq!(store.writes(), 1);
    assert_eq!(scheduler.pending_count(), 0);

    // the aborted timer must not write a second time
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(store.writes(), 1);
}
