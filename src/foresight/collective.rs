//! Collective pattern store: how similar signal windows resolved for earlier
//! learners in the same course.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::foresight::embedding::{cosine_similarity, decode_signature};
use crate::foresight::types::{
    CollectiveStrugglePattern, EffectiveIntervention, InterventionType, PatternOutcome,
    PreStruggleIndicator,
};

pub const FULL_CONFIDENCE_SAMPLES: f64 = 20.0;
pub const DEFAULT_SUCCESS_RATE: f64 = 0.5;
const EPSILON: f64 = 1e-9;

pub type SharedPatternStore = Arc<RwLock<CollectivePatternStore>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PatternKey {
    section_id: String,
    signature: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternMatch {
    pub pattern: CollectiveStrugglePattern,
    pub similarity: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectiveEstimate {
    pub probability: f64,
    pub matches: Vec<PatternMatch>,
}

impl CollectiveEstimate {
    /// Sample-weighted success rate of an intervention type across matches.
    pub fn success_rate(&self, intervention_type: InterventionType) -> Option<f64> {
        let mut weighted = 0.0;
        let mut total = 0.0;
        for m in &self.matches {
            if let Some(entry) = m
                .pattern
                .effective_interventions
                .iter()
                .find(|e| e.intervention_type == intervention_type)
            {
                let weight = m.weight * entry.usage_count as f64;
                weighted += weight * entry.success_rate;
                total += weight;
            }
        }
        (total > EPSILON).then(|| (weighted / total).clamp(0.0, 1.0))
    }
}

/// Plain-list form used at the storage boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedPatterns {
    pub patterns: Vec<CollectiveStrugglePattern>,
}

#[derive(Debug, Clone, Default)]
pub struct CollectivePatternStore {
    course_id: String,
    patterns: HashMap<PatternKey, CollectiveStrugglePattern>,
}

impl CollectivePatternStore {
    pub fn new(course_id: impl Into<String>) -> Self {
        Self {
            course_id: course_id.into(),
            patterns: HashMap::new(),
        }
    }

    pub fn from_persisted(course_id: impl Into<String>, persisted: PersistedPatterns) -> Self {
        let mut store = Self::new(course_id);
        for pattern in persisted.patterns {
            let key = PatternKey {
                section_id: pattern.section_id.clone(),
                signature: pattern.signal_signature.clone(),
            };
            store.patterns.insert(key, sanitize(pattern));
        }
        store
    }

    /// Sorted for stable output.
    pub fn to_persisted(&self) -> PersistedPatterns {
        let mut patterns: Vec<CollectiveStrugglePattern> = self.patterns.values().cloned().collect();
        patterns.sort_by(|a, b| {
            a.section_id
                .cmp(&b.section_id)
                .then_with(|| a.signal_signature.cmp(&b.signal_signature))
        });
        PersistedPatterns { patterns }
    }

    pub fn course_id(&self) -> &str {
        &self.course_id
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn get(&self, section_id: &str, signature: &str) -> Option<&CollectiveStrugglePattern> {
        self.patterns.get(&PatternKey {
            section_id: section_id.to_string(),
            signature: signature.to_string(),
        })
    }

    /// Matches in `section_id` whose similarity reaches `threshold`, best first.
    pub fn find_similar(
        &self,
        section_id: &str,
        embedding: &[f64],
        threshold: f64,
        min_samples: u32,
    ) -> Vec<PatternMatch> {
        let mut matches: Vec<PatternMatch> = self
            .patterns
            .values()
            .filter(|p| p.section_id == section_id && p.occurrence_count >= min_samples)
            .filter_map(|p| {
                let similarity = cosine_similarity(embedding, &decode_signature(&p.signal_signature));
                (similarity >= threshold).then(|| PatternMatch {
                    weight: similarity
                        * (p.occurrence_count as f64 / FULL_CONFIDENCE_SAMPLES).min(1.0),
                    similarity,
                    pattern: p.clone(),
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            b.weight
                .total_cmp(&a.weight)
                .then_with(|| a.pattern.signal_signature.cmp(&b.pattern.signal_signature))
        });
        matches
    }

    /// Weighted mean struggle rate over similar patterns; `None` without matches.
    pub fn collective_probability(
        &self,
        section_id: &str,
        embedding: &[f64],
        threshold: f64,
        min_samples: u32,
    ) -> Option<CollectiveEstimate> {
        let matches = self.find_similar(section_id, embedding, threshold, min_samples);
        let total: f64 = matches.iter().map(|m| m.weight).sum();
        if total <= EPSILON {
            return None;
        }
        let probability = matches
            .iter()
            .map(|m| m.weight * m.pattern.struggle_rate)
            .sum::<f64>()
            / total;
        Some(CollectiveEstimate {
            probability: probability.clamp(0.0, 1.0),
            matches,
        })
    }

    /// Folds one observed outcome into the running averages.
    pub fn record_outcome(
        &mut self,
        section_id: &str,
        signature: &str,
        indicators: &[PreStruggleIndicator],
        outcome: PatternOutcome,
        intervention_type: Option<InterventionType>,
        now: i64,
    ) -> &CollectiveStrugglePattern {
        let key = PatternKey {
            section_id: section_id.to_string(),
            signature: signature.to_string(),
        };
        let value = outcome.struggle_value();

        let pattern = self
            .patterns
            .entry(key)
            .and_modify(|existing| {
                let n = existing.occurrence_count as f64;
                existing.struggle_rate = ((existing.struggle_rate * n + value) / (n + 1.0)).clamp(0.0, 1.0);
                existing.occurrence_count = existing.occurrence_count.saturating_add(1);
                for indicator in indicators {
                    if !existing.indicator_sequence.contains(indicator) {
                        existing.indicator_sequence.push(*indicator);
                    }
                }
                existing.last_updated = now;
            })
            .or_insert_with(|| CollectiveStrugglePattern {
                section_id: section_id.to_string(),
                indicator_sequence: indicators.to_vec(),
                signal_signature: signature.to_string(),
                occurrence_count: 1,
                struggle_rate: value,
                effective_interventions: Vec::new(),
                last_updated: now,
            });

        if let Some(intervention_type) = intervention_type {
            merge_intervention(pattern, intervention_type, outcome.intervention_succeeded());
        }

        tracing::debug!(
            course_id = %self.course_id,
            section_id,
            occurrences = pattern.occurrence_count,
            struggle_rate = pattern.struggle_rate,
            "collective pattern updated"
        );
        pattern
    }

    /// Keeps at most `max_patterns`, evicting the least observed then the stalest.
    pub fn prune(&mut self, max_patterns: usize) -> usize {
        if self.patterns.len() <= max_patterns {
            return 0;
        }
        let mut ranked: Vec<(PatternKey, u32, i64)> = self
            .patterns
            .iter()
            .map(|(k, p)| (k.clone(), p.occurrence_count, p.last_updated))
            .collect();
        ranked.sort_by(|a, b| {
            a.1.cmp(&b.1)
                .then_with(|| a.2.cmp(&b.2))
                .then_with(|| a.0.signature.cmp(&b.0.signature))
        });
        let excess = self.patterns.len() - max_patterns;
        for (key, _, _) in ranked.into_iter().take(excess) {
            self.patterns.remove(&key);
        }
        excess
    }
}

fn merge_intervention(
    pattern: &mut CollectiveStrugglePattern,
    intervention_type: InterventionType,
    succeeded: bool,
) {
    let value = if succeeded { 1.0 } else { 0.0 };
    match pattern
        .effective_interventions
        .iter_mut()
        .find(|e| e.intervention_type == intervention_type)
    {
        Some(entry) => {
            let n = entry.usage_count as f64;
            entry.success_rate = (entry.success_rate * n + value) / (n + 1.0);
            entry.usage_count = entry.usage_count.saturating_add(1);
        }
        None => pattern.effective_interventions.push(EffectiveIntervention {
            intervention_type,
            success_rate: value,
            usage_count: 1,
        }),
    }
}

fn sanitize(mut pattern: CollectiveStrugglePattern) -> CollectiveStrugglePattern {
    if !pattern.struggle_rate.is_finite() {
        pattern.struggle_rate = DEFAULT_SUCCESS_RATE;
    }
    pattern.struggle_rate = pattern.struggle_rate.clamp(0.0, 1.0);
    pattern.occurrence_count = pattern.occurrence_count.max(1);
    for entry in pattern.effective_interventions.iter_mut() {
        if !entry.success_rate.is_finite() {
            entry.success_rate = DEFAULT_SUCCESS_RATE;
        }
        entry.success_rate = entry.success_rate.clamp(0.0, 1.0);
    }
    pattern
}

/// Explicitly constructed owner of the per-course shared stores.
#[derive(Debug, Default)]
pub struct PatternStoreRegistry {
    stores: HashMap<String, SharedPatternStore>,
}

impl PatternStoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_course(&mut self, course_id: &str) -> SharedPatternStore {
        Arc::clone(
            self.stores
                .entry(course_id.to_string())
                .or_insert_with(|| Arc::new(RwLock::new(CollectivePatternStore::new(course_id)))),
        )
    }

    pub fn insert(&mut self, store: CollectivePatternStore) -> SharedPatternStore {
        let course_id = store.course_id().to_string();
        let shared = Arc::new(RwLock::new(store));
        self.stores.insert(course_id, Arc::clone(&shared));
        shared
    }
}
