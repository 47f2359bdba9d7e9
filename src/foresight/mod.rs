pub mod collective;
pub mod config;
pub mod detection;
pub mod embedding;
pub mod engine;
pub mod intervention;
pub mod persistence;
pub mod prediction;
pub mod scaffolding;
pub mod scoring;
pub mod state_machine;
pub mod temporal;
pub mod types;

pub use collective::{CollectivePatternStore, PatternStoreRegistry, SharedPatternStore};
pub use config::ForesightConfig;
pub use engine::{CycleOutcome, EngineError, EngineStats, ForesightEngine, ForesightListener};
pub use persistence::{FileStore, MemoryStore, PersistenceScheduler, StateStore, StorageError};
pub use types::*;
