use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::foresight::collective::{CollectivePatternStore, PersistedPatterns};
use crate::foresight::types::PredictiveModelState;

pub const MODEL_STATE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid persisted json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("persisted state version {found} does not match {expected}")]
    VersionMismatch { found: u32, expected: u32 },
}

/// Key-value blob storage for persisted engine state.
pub trait StateStore: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn write(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl StateStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// One JSON file per key inside `dir`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| StorageError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{file_name}.json"))
    }
}

impl StateStore for FileStore {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value).map_err(|source| StorageError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &path).map_err(|source| StorageError::Io { path, source })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }
}

pub fn model_key(course_id: &str, session_id: &str) -> String {
    format!("foresight:{course_id}:{session_id}:model")
}

pub fn patterns_key(course_id: &str) -> String {
    format!("foresight:{course_id}:patterns")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedModelState {
    pub version: u32,
    pub model_state: PredictiveModelState,
    pub last_updated: i64,
}

pub fn encode_model_state(state: &PredictiveModelState) -> Result<String, StorageError> {
    let blob = PersistedModelState {
        version: MODEL_STATE_VERSION,
        model_state: state.clone(),
        last_updated: chrono::Utc::now().timestamp_millis(),
    };
    Ok(serde_json::to_string(&blob)?)
}

pub fn decode_model_state(raw: &str) -> Result<PredictiveModelState, StorageError> {
    let blob: PersistedModelState = serde_json::from_str(raw)?;
    if blob.version != MODEL_STATE_VERSION {
        return Err(StorageError::VersionMismatch {
            found: blob.version,
            expected: MODEL_STATE_VERSION,
        });
    }
    Ok(blob.model_state)
}

pub fn encode_patterns(store: &CollectivePatternStore) -> Result<String, StorageError> {
    Ok(serde_json::to_string(&store.to_persisted())?)
}

/// Missing, corrupt or outdated blobs all load as a fresh default.
pub fn load_model_state(
    store: &dyn StateStore,
    course_id: &str,
    session_id: &str,
) -> PredictiveModelState {
    let key = model_key(course_id, session_id);
    match store.read(&key).and_then(|raw| raw.map(|r| decode_model_state(&r)).transpose()) {
        Ok(Some(state)) => state,
        Ok(None) => PredictiveModelState::default(),
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "discarding persisted model state");
            PredictiveModelState::default()
        }
    }
}

pub fn save_model_state(
    store: &dyn StateStore,
    course_id: &str,
    session_id: &str,
    state: &PredictiveModelState,
) -> Result<(), StorageError> {
    store.write(&model_key(course_id, session_id), &encode_model_state(state)?)
}

pub fn load_patterns(store: &dyn StateStore, course_id: &str) -> CollectivePatternStore {
    let key = patterns_key(course_id);
    let parsed = store.read(&key).and_then(|raw| {
        raw.map(|r| serde_json::from_str::<PersistedPatterns>(&r).map_err(StorageError::from))
            .transpose()
    });
    match parsed {
        Ok(Some(persisted)) => CollectivePatternStore::from_persisted(course_id, persisted),
        Ok(None) => CollectivePatternStore::new(course_id),
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "discarding persisted collective patterns");
            CollectivePatternStore::new(course_id)
        }
    }
}

pub fn save_patterns(store: &dyn StateStore, patterns: &CollectivePatternStore) -> Result<(), StorageError> {
    store.write(&patterns_key(patterns.course_id()), &encode_patterns(patterns)?)
}

fn write_logged(store: &dyn StateStore, key: &str, value: &str) {
    if let Err(e) = store.write(key, value) {
        tracing::warn!(key, error = %e, "persisting foresight state failed");
    }
}

struct PendingWrite {
    generation: u64,
    value: String,
    task: Option<JoinHandle<()>>,
}

/// Coalesces writes per key: each schedule aborts the pending write for that
/// key and starts a fresh delay. Without a tokio runtime writes go straight through.
pub struct PersistenceScheduler {
    store: Arc<dyn StateStore>,
    delay: Duration,
    pending: Arc<Mutex<HashMap<String, PendingWrite>>>,
    generation: Mutex<u64>,
}

impl PersistenceScheduler {
    pub fn new(store: Arc<dyn StateStore>, delay: Duration) -> Self {
        Self {
            store,
            delay,
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: Mutex::new(0),
        }
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn schedule(&self, key: String, value: String) {
        let Ok(handle) = Handle::try_current() else {
            write_logged(self.store.as_ref(), &key, &value);
            return;
        };

        let generation = {
            let mut g = self.generation.lock();
            *g += 1;
            *g
        };

        let mut pending = self.pending.lock();
        if let Some(previous) = pending.remove(&key) {
            if let Some(task) = previous.task {
                task.abort();
            }
        }

        let store = Arc::clone(&self.store);
        let pending_ref = Arc::clone(&self.pending);
        let delay = self.delay;
        let task_key = key.clone();
        let task = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let due = {
                let mut pending = pending_ref.lock();
                match pending.get(&task_key) {
                    Some(entry) if entry.generation == generation => {
                        pending.remove(&task_key).map(|entry| entry.value)
                    }
                    _ => None,
                }
            };
            if let Some(value) = due {
                write_logged(store.as_ref(), &task_key, &value);
                tracing::debug!(key = %task_key, "debounced foresight state written");
            }
        });

        pending.insert(
            key,
            PendingWrite {
                generation,
                value,
                task: Some(task),
            },
        );
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Writes everything still pending right away.
    pub fn flush(&self) {
        let drained: Vec<(String, PendingWrite)> = self.pending.lock().drain().collect();
        for (key, entry) in drained {
            if let Some(task) = entry.task {
                task.abort();
            }
            write_logged(self.store.as_ref(), &key, &entry.value);
        }
    }
}

impl Drop for PersistenceScheduler {
    fn drop(&mut self) {
        self.flush();
    }
}
