use std::io::{BufRead, BufReader};
use std::sync::Arc;

use serde::Deserialize;
use uuid::Uuid;

use danci_foresight::config::Config;
use danci_foresight::foresight::persistence::load_patterns;
use danci_foresight::foresight::{
    BehaviorSignal, FileStore, ForesightConfig, ForesightEngine, PatternStoreRegistry,
    PersistenceScheduler, StateStore,
};
use danci_foresight::logging::init_tracing;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplayLine {
    section_id: String,
    signal: BehaviorSignal,
}

fn open_input() -> std::io::Result<Box<dyn BufRead>> {
    match std::env::args().nth(1) {
        Some(path) if path != "-" => Ok(Box::new(BufReader::new(std::fs::File::open(path)?))),
        _ => Ok(Box::new(BufReader::new(std::io::stdin()))),
    }
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = init_tracing(&config.log_level);

    let store: Arc<dyn StateStore> = match FileStore::new(&config.storage_dir) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!(error = %e, "storage directory unavailable");
            std::process::exit(1);
        }
    };
    let scheduler = Arc::new(PersistenceScheduler::new(
        Arc::clone(&store),
        config.persist_debounce,
    ));

    let mut registry = PatternStoreRegistry::new();
    let patterns = registry.insert(load_patterns(store.as_ref(), &config.course_id));

    let session_id = config
        .session_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let mut engine = ForesightEngine::restore(
        ForesightConfig::from_env(),
        config.course_id.clone(),
        session_id,
        patterns,
        scheduler,
    );

    let input = match open_input() {
        Ok(input) => input,
        Err(e) => {
            tracing::error!(error = %e, "cannot open replay input");
            std::process::exit(1);
        }
    };

    let mut predictions = Vec::new();
    let mut interventions = Vec::new();
    let mut skipped_lines = 0usize;
    for (line_no, line) in input.lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let entry: ReplayLine = match serde_json::from_str(&line) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(line = line_no + 1, error = %e, "skipping malformed replay line");
                skipped_lines += 1;
                continue;
            }
        };

        let outcome = engine.process_signal(entry.signal, &entry.section_id);
        if let Some(prediction) = outcome.prediction {
            predictions.push(prediction);
        }
        if let Some(intervention) = outcome.intervention {
            interventions.push(intervention);
        }
    }

    if let Err(e) = engine.persist_now() {
        tracing::warn!(error = %e, "final foresight state write failed");
    }

    let summary = serde_json::json!({
        "stats": engine.stats(),
        "predictions": predictions,
        "interventions": interventions,
        "skippedLines": skipped_lines,
    });
    match serde_json::to_string_pretty(&summary) {
        Ok(text) => println!("{text}"),
        Err(e) => tracing::error!(error = %e, "failed to render summary"),
    }
}
