use std::collections::HashMap;

use crate::foresight::scoring::{classify_score, score_signal};
use crate::foresight::types::{BehaviorSignal, TemporalSignal};

/// Annotates raw signals with session-relative timing.
#[derive(Debug, Clone, Default)]
pub struct TemporalEnricher {
    session_started_at: Option<i64>,
    last_timestamp: Option<i64>,
    next_position: u64,
    section_progress: HashMap<String, f64>,
}

impl TemporalEnricher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enrich(&mut self, signal: BehaviorSignal, section_id: &str) -> TemporalSignal {
        let timestamp = signal.timestamp();
        let started_at = *self.session_started_at.get_or_insert(timestamp);

        // Out-of-order timestamps never produce negative deltas.
        let delta_from_previous = self
            .last_timestamp
            .map(|last| timestamp.saturating_sub(last).max(0))
            .unwrap_or(0);
        self.last_timestamp = Some(self.last_timestamp.map_or(timestamp, |last| last.max(timestamp)));

        let progress = match &signal {
            BehaviorSignal::SectionTime(section) => {
                let value = (section.completion_percentage / 100.0).clamp(0.0, 1.0);
                let value = if value.is_finite() { value } else { 0.0 };
                let entry = self.section_progress.entry(section_id.to_string()).or_insert(0.0);
                *entry = entry.max(value);
                *entry
            }
            _ => self.section_progress.get(section_id).copied().unwrap_or(0.0),
        };

        let score = score_signal(&signal);
        let position = self.next_position;
        self.next_position += 1;

        TemporalSignal {
            outcome: classify_score(score),
            score,
            signal,
            section_id: section_id.to_string(),
            delta_from_previous,
            section_progress: progress,
            session_duration: timestamp.saturating_sub(started_at).max(0),
            sequence_position: position,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
