use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DEBOUNCE_MS: u64 = 1_000;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub storage_dir: PathBuf,
    pub persist_debounce: Duration,
    pub course_id: String,
    pub session_id: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let storage_dir = std::env::var("FORESIGHT_STORAGE_DIR")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_storage_dir);

        let persist_debounce = std::env::var("FORESIGHT_PERSIST_DEBOUNCE_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(DEFAULT_DEBOUNCE_MS));

        let course_id =
            std::env::var("FORESIGHT_COURSE_ID").unwrap_or_else(|_| "default".to_string());

        let session_id = std::env::var("FORESIGHT_SESSION_ID")
            .ok()
            .filter(|value| !value.trim().is_empty());

        Self {
            log_level,
            storage_dir,
            persist_debounce,
            course_id,
            session_id,
        }
    }
}

fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("danci-foresight")
}
