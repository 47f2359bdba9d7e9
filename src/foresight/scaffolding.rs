//! Per-learner display gating for interventions.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::foresight::config::ForesightConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ScaffoldingRejection {
    AlreadyDismissed,
    AlreadyEngaged,
    AlreadyShown,
    TooSoon { remaining_ms: i64 },
    SectionCapReached { shown: u32 },
}

/// Shown, dismissed and engaged only ever grow within a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaffoldingState {
    shown: BTreeSet<String>,
    dismissed: BTreeSet<String>,
    engaged: BTreeSet<String>,
    shown_per_section: BTreeMap<String, u32>,
    last_shown_at: Option<i64>,
}

impl ScaffoldingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(
        &self,
        intervention_id: &str,
        section_id: &str,
        now: i64,
        config: &ForesightConfig,
    ) -> Result<(), ScaffoldingRejection> {
        if self.dismissed.contains(intervention_id) {
            return Err(ScaffoldingRejection::AlreadyDismissed);
        }
        if self.engaged.contains(intervention_id) {
            return Err(ScaffoldingRejection::AlreadyEngaged);
        }
        if self.shown.contains(intervention_id) {
            return Err(ScaffoldingRejection::AlreadyShown);
        }

        if let Some(last) = self.last_shown_at {
            let min_gap = config.intervention_cooldown_ms / 2;
            let elapsed = now.saturating_sub(last);
            if elapsed < min_gap {
                return Err(ScaffoldingRejection::TooSoon {
                    remaining_ms: min_gap - elapsed.max(0),
                });
            }
        }

        let shown = self.shown_in_section(section_id);
        if shown >= config.max_interventions_per_section {
            return Err(ScaffoldingRejection::SectionCapReached { shown });
        }

        Ok(())
    }

    pub fn record_shown(&mut self, intervention_id: &str, section_id: &str, now: i64) {
        if self.shown.insert(intervention_id.to_string()) {
            *self.shown_per_section.entry(section_id.to_string()).or_insert(0) += 1;
        }
        self.last_shown_at = Some(self.last_shown_at.map_or(now, |last| last.max(now)));
    }

    pub fn record_dismissed(&mut self, intervention_id: &str) {
        self.dismissed.insert(intervention_id.to_string());
    }

    pub fn record_engaged(&mut self, intervention_id: &str) {
        self.engaged.insert(intervention_id.to_string());
    }

    pub fn shown_in_section(&self, section_id: &str) -> u32 {
        self.shown_per_section.get(section_id).copied().unwrap_or(0)
    }

    pub fn is_shown(&self, intervention_id: &str) -> bool {
        self.shown.contains(intervention_id)
    }

    pub fn is_dismissed(&self, intervention_id: &str) -> bool {
        self.dismissed.contains(intervention_id)
    }

    pub fn is_engaged(&self, intervention_id: &str) -> bool {
        self.engaged.contains(intervention_id)
    }
}
