use serde::{Deserialize, Serialize};

use crate::foresight::types::PreStruggleIndicator;

/// Per-indicator weights used when averaging detector confidences.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorWeights {
    pub quiz_hesitation: f64,
    pub error_escalation: f64,
    pub rewind_cluster: f64,
    pub skip_backtrack: f64,
    pub slow_progression: f64,
    pub avoidance: f64,
}

impl Default for IndicatorWeights {
    fn default() -> Self {
        Self {
            quiz_hesitation: 1.0,
            error_escalation: 1.2,
            rewind_cluster: 0.8,
            skip_backtrack: 0.9,
            slow_progression: 0.7,
            avoidance: 1.0,
        }
    }
}

impl IndicatorWeights {
    pub fn weight(&self, indicator: PreStruggleIndicator) -> f64 {
        match indicator {
            PreStruggleIndicator::QuizHesitation => self.quiz_hesitation,
            PreStruggleIndicator::ErrorEscalation => self.error_escalation,
            PreStruggleIndicator::RewindCluster => self.rewind_cluster,
            PreStruggleIndicator::SkipBacktrack => self.skip_backtrack,
            PreStruggleIndicator::SlowProgression => self.slow_progression,
            PreStruggleIndicator::Avoidance => self.avoidance,
        }
    }
}

/// Heuristic blend constants. Not calibrated; exposed so deployments can tune them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlendWeights {
    pub signal: f64,
    pub collective: f64,
    pub multi_indicator_step: f64,
    pub multi_indicator_cap: f64,
    pub severity_mild: f64,
    pub severity_moderate: f64,
    pub severity_severe: f64,
    pub impact_scale: f64,
    pub impact_floor: f64,
}

impl Default for BlendWeights {
    fn default() -> Self {
        Self {
            signal: 0.6,
            collective: 0.4,
            multi_indicator_step: 0.05,
            multi_indicator_cap: 0.2,
            severity_mild: 1.0,
            severity_moderate: 1.2,
            severity_severe: 1.5,
            impact_scale: 0.7,
            impact_floor: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForesightConfig {
    pub enabled: bool,
    pub prediction_threshold: f64,
    pub min_signals_for_prediction: usize,
    pub max_active_interventions: usize,
    pub immediate_horizon_ms: i64,
    pub short_term_horizon_ms: i64,
    pub medium_term_horizon_ms: i64,
    pub hesitation_threshold_ms: i64,
    pub error_sequence_window: usize,
    pub rewind_cluster_window_ms: i64,
    pub intervention_cooldown_ms: i64,
    pub max_interventions_per_section: u32,
    pub collective_pattern_min_samples: u32,
    pub similarity_threshold: f64,
    pub sequence_window: usize,
    pub max_collective_patterns: usize,
    pub indicator_weights: IndicatorWeights,
    pub blend: BlendWeights,
}

impl Default for ForesightConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prediction_threshold: 0.65,
            min_signals_for_prediction: 5,
            max_active_interventions: 2,
            immediate_horizon_ms: 30_000,
            short_term_horizon_ms: 120_000,
            medium_term_horizon_ms: 300_000,
            hesitation_threshold_ms: 30_000,
            error_sequence_window: 5,
            rewind_cluster_window_ms: 60_000,
            intervention_cooldown_ms: 60_000,
            max_interventions_per_section: 3,
            collective_pattern_min_samples: 3,
            similarity_threshold: 0.75,
            sequence_window: 50,
            max_collective_patterns: 2_000,
            indicator_weights: IndicatorWeights::default(),
            blend: BlendWeights::default(),
        }
    }
}

impl ForesightConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("FORESIGHT_ENABLED") {
            config.enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = std::env::var("FORESIGHT_PREDICTION_THRESHOLD") {
            config.prediction_threshold = val.parse().unwrap_or(config.prediction_threshold);
        }
        if let Ok(val) = std::env::var("FORESIGHT_MIN_SIGNALS") {
            config.min_signals_for_prediction =
                val.parse().unwrap_or(config.min_signals_for_prediction);
        }
        if let Ok(val) = std::env::var("FORESIGHT_MAX_ACTIVE_INTERVENTIONS") {
            config.max_active_interventions =
                val.parse().unwrap_or(config.max_active_interventions);
        }
        if let Ok(val) = std::env::var("FORESIGHT_INTERVENTION_COOLDOWN_MS") {
            config.intervention_cooldown_ms =
                val.parse().unwrap_or(config.intervention_cooldown_ms);
        }
        if let Ok(val) = std::env::var("FORESIGHT_SIMILARITY_THRESHOLD") {
            config.similarity_threshold = val.parse().unwrap_or(config.similarity_threshold);
        }
        if let Ok(val) = std::env::var("FORESIGHT_MAX_COLLECTIVE_PATTERNS") {
            config.max_collective_patterns = val.parse().unwrap_or(config.max_collective_patterns);
        }
        if let Ok(val) = std::env::var("FORESIGHT_MAX_PER_SECTION") {
            config.max_interventions_per_section =
                val.parse().unwrap_or(config.max_interventions_per_section);
        }

        config.sanitized()
    }

    /// Clamps values that would break gating or divide by zero.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if !self.prediction_threshold.is_finite() {
            self.prediction_threshold = defaults.prediction_threshold;
        }
        if !self.similarity_threshold.is_finite() {
            self.similarity_threshold = defaults.similarity_threshold;
        }
        self.prediction_threshold = self.prediction_threshold.clamp(0.0, 1.0);
        self.similarity_threshold = self.similarity_threshold.clamp(-1.0, 1.0);
        self.min_signals_for_prediction = self.min_signals_for_prediction.max(1);
        self.error_sequence_window = self.error_sequence_window.max(2);
        self.sequence_window = self.sequence_window.max(self.min_signals_for_prediction);
        self.immediate_horizon_ms = self.immediate_horizon_ms.max(1);
        self.short_term_horizon_ms = self.short_term_horizon_ms.max(self.immediate_horizon_ms);
        self.medium_term_horizon_ms = self.medium_term_horizon_ms.max(self.short_term_horizon_ms);
        self.hesitation_threshold_ms = self.hesitation_threshold_ms.max(1);
        self.rewind_cluster_window_ms = self.rewind_cluster_window_ms.max(0);
        self.intervention_cooldown_ms = self.intervention_cooldown_ms.max(0);
        self.max_collective_patterns = self.max_collective_patterns.max(1);
        self
    }
}
