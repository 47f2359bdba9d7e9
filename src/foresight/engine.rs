use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::foresight::collective::SharedPatternStore;
use crate::foresight::config::ForesightConfig;
use crate::foresight::detection::detect_pre_struggle;
use crate::foresight::embedding::{embed_sequence, encode_signature};
use crate::foresight::intervention::{recommend, select_intervention};
use crate::foresight::persistence::{
    encode_model_state, encode_patterns, load_model_state, model_key, patterns_key,
    save_model_state, save_patterns, PersistenceScheduler, StorageError,
};
use crate::foresight::prediction::{
    aggregate_pre_struggle_signals, check_gate, PredictionContext, SkipReason,
};
use crate::foresight::scaffolding::{ScaffoldingRejection, ScaffoldingState};
use crate::foresight::state_machine::{ComprehensionStateMachine, StuckAdvisory};
use crate::foresight::temporal::TemporalEnricher;
use crate::foresight::types::{
    ActiveIntervention, BehaviorSignal, CollectiveStrugglePattern, ComprehensionState,
    InterventionOutcome, InterventionType, PatternOutcome, PreStruggleIndicator,
    PreStruggleSignal, PredictiveModelState, StateTransitionEvent, StrugglePrediction,
    TemporalSignal, MAX_INTERVENTION_HISTORY, MAX_RECENT_PREDICTIONS,
};

const EMA_ALPHA: f64 = 0.1;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown intervention: {0}")]
    UnknownIntervention(String),
    #[error("intervention already resolved: {0}")]
    InterventionResolved(String),
    #[error("unknown prediction: {0}")]
    UnknownPrediction(String),
    #[error("prediction already validated: {0}")]
    PredictionValidated(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Receives engine events as they happen. Every hook defaults to a no-op.
pub trait ForesightListener: Send + Sync {
    fn on_state_transition(&self, _event: &StateTransitionEvent) {}
    fn on_prediction(&self, _prediction: &StrugglePrediction) {}
    fn on_intervention(&self, _intervention: &ActiveIntervention) {}
}

/// Everything one signal produced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleOutcome {
    pub temporal: TemporalSignal,
    pub transition: Option<StateTransitionEvent>,
    pub stuck: Option<StuckAdvisory>,
    pub pre_struggle: Vec<PreStruggleSignal>,
    pub prediction: Option<StrugglePrediction>,
    pub intervention: Option<ActiveIntervention>,
    pub skipped: Option<SkipReason>,
    pub scaffolding_rejection: Option<ScaffoldingRejection>,
}

impl CycleOutcome {
    fn new(temporal: TemporalSignal) -> Self {
        Self {
            temporal,
            transition: None,
            stuck: None,
            pre_struggle: Vec::new(),
            prediction: None,
            intervention: None,
            skipped: None,
            scaffolding_rejection: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub course_id: String,
    pub session_id: String,
    pub comprehension_state: ComprehensionState,
    pub signals_in_window: usize,
    pub total_predictions: u64,
    pub active_interventions: usize,
    pub resolved_interventions: usize,
    pub prediction_accuracy: f64,
    pub intervention_success_rate: f64,
    pub false_positive_rate: f64,
    pub collective_patterns: usize,
    pub stuck: Option<StuckAdvisory>,
}

fn ema(current: f64, observation: f64) -> f64 {
    (current * (1.0 - EMA_ALPHA) + observation * EMA_ALPHA).clamp(0.0, 1.0)
}

pub struct ForesightEngine {
    config: ForesightConfig,
    course_id: String,
    session_id: String,
    enricher: TemporalEnricher,
    state_machine: ComprehensionStateMachine,
    session_started: bool,
    last_signal_at: Option<i64>,
    state: PredictiveModelState,
    scaffolding: ScaffoldingState,
    patterns: SharedPatternStore,
    scheduler: Option<Arc<PersistenceScheduler>>,
    listener: Option<Arc<dyn ForesightListener>>,
}

impl ForesightEngine {
    pub fn new(
        config: ForesightConfig,
        course_id: impl Into<String>,
        session_id: impl Into<String>,
        patterns: SharedPatternStore,
    ) -> Self {
        Self {
            config: config.sanitized(),
            course_id: course_id.into(),
            session_id: session_id.into(),
            enricher: TemporalEnricher::new(),
            state_machine: ComprehensionStateMachine::new(0),
            session_started: false,
            last_signal_at: None,
            state: PredictiveModelState::default(),
            scaffolding: ScaffoldingState::new(),
            patterns,
            scheduler: None,
            listener: None,
        }
    }

    /// Rebuilds an engine from the persisted model for this course and session.
    /// Unreadable state starts fresh.
    pub fn restore(
        config: ForesightConfig,
        course_id: impl Into<String>,
        session_id: impl Into<String>,
        patterns: SharedPatternStore,
        scheduler: Arc<PersistenceScheduler>,
    ) -> Self {
        let mut engine = Self::new(config, course_id, session_id, patterns);
        engine.state = load_model_state(
            scheduler.store().as_ref(),
            &engine.course_id,
            &engine.session_id,
        );
        engine.state.current_sequence.clear();
        engine.state.active_interventions.retain(|i| !i.is_resolved());
        tracing::info!(
            course_id = %engine.course_id,
            session_id = %engine.session_id,
            total_predictions = engine.state.total_predictions,
            "foresight engine restored"
        );
        engine.scheduler = Some(scheduler);
        engine
    }

    pub fn with_persistence(mut self, scheduler: Arc<PersistenceScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn ForesightListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn config(&self) -> &ForesightConfig {
        &self.config
    }

    pub fn course_id(&self) -> &str {
        &self.course_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> &PredictiveModelState {
        &self.state
    }

    pub fn comprehension_state(&self) -> ComprehensionState {
        self.state_machine.current_state()
    }

    pub fn state_machine(&self) -> &ComprehensionStateMachine {
        &self.state_machine
    }

    pub fn scaffolding(&self) -> &ScaffoldingState {
        &self.scaffolding
    }

    pub fn patterns(&self) -> &SharedPatternStore {
        &self.patterns
    }

    fn now(&self) -> i64 {
        self.last_signal_at
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis())
    }

    fn next_prediction_id(&self, now: i64) -> String {
        let name = format!(
            "{}:{}:{}:{}",
            self.course_id, self.session_id, self.state.total_predictions, now
        );
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
    }

    pub fn process_signal(&mut self, signal: BehaviorSignal, section_id: &str) -> CycleOutcome {
        let now = signal.timestamp();
        if !self.session_started {
            self.state_machine.reset(now);
            self.session_started = true;
        }
        self.last_signal_at = Some(self.last_signal_at.map_or(now, |last| last.max(now)));

        let temporal = self.enricher.enrich(signal, section_id);
        self.state.current_sequence.push_back(temporal.clone());
        while self.state.current_sequence.len() > self.config.sequence_window {
            self.state.current_sequence.pop_front();
        }
        let window: Vec<TemporalSignal> = self.state.current_sequence.iter().cloned().collect();

        let mut outcome = CycleOutcome::new(temporal);

        outcome.transition = self.state_machine.update(&window);
        if let Some(event) = &outcome.transition {
            tracing::info!(
                session_id = %self.session_id,
                from = event.from.as_str(),
                to = event.to.as_str(),
                reason = %event.reason,
                "comprehension state changed"
            );
            if let Some(listener) = &self.listener {
                listener.on_state_transition(event);
            }
        }
        outcome.stuck = self.state_machine.detect_stuck();

        self.run_prediction(&window, section_id, now, &mut outcome);

        tracing::debug!(
            session_id = %self.session_id,
            section_id,
            position = outcome.temporal.sequence_position,
            score = outcome.temporal.score,
            skipped = ?outcome.skipped,
            "signal processed"
        );
        self.schedule_model_persist();
        outcome
    }

    fn run_prediction(
        &mut self,
        window: &[TemporalSignal],
        section_id: &str,
        now: i64,
        outcome: &mut CycleOutcome,
    ) {
        if let Some(reason) = check_gate(&self.state, now, &self.config) {
            outcome.skipped = Some(reason);
            return;
        }

        let signals = detect_pre_struggle(window, section_id, &self.config);
        if signals.is_empty() {
            outcome.skipped = Some(SkipReason::NoIndicators);
            return;
        }
        outcome.pre_struggle = signals.clone();

        let embedding = embed_sequence(window, self.config.medium_term_horizon_ms);
        let estimate = self.patterns.read().collective_probability(
            section_id,
            &embedding.vector,
            self.config.similarity_threshold,
            self.config.collective_pattern_min_samples,
        );

        let context = PredictionContext {
            id: self.next_prediction_id(now),
            section_id,
            now,
        };
        let Some(mut prediction) = aggregate_pre_struggle_signals(
            &signals,
            estimate.as_ref().map(|e| e.probability),
            context,
            &self.config,
        ) else {
            outcome.skipped = Some(SkipReason::BelowThreshold);
            return;
        };

        prediction.recommended_interventions = recommend(
            &prediction,
            |t| estimate.as_ref().and_then(|e| e.success_rate(t)),
            &self.config,
        );

        self.state.total_predictions += 1;
        self.state.last_prediction_at = Some(now);
        self.state.recent_predictions.push_back(prediction.clone());
        while self.state.recent_predictions.len() > MAX_RECENT_PREDICTIONS {
            if let Some(evicted) = self.state.recent_predictions.pop_front() {
                self.state.validated_predictions.remove(&evicted.id);
            }
        }

        tracing::info!(
            session_id = %self.session_id,
            section_id,
            prediction_id = %prediction.id,
            probability = prediction.probability,
            severity = prediction.severity.as_str(),
            indicators = ?prediction.primary_indicators,
            "struggle predicted"
        );
        if let Some(listener) = &self.listener {
            listener.on_prediction(&prediction);
        }

        let mut rejection = None;
        let scaffolding = &self.scaffolding;
        let config = &self.config;
        let chosen = select_intervention(
            &prediction.recommended_interventions,
            &self.state.active_interventions,
            |r| match scaffolding.check(&r.id, section_id, now, config) {
                Ok(()) => true,
                Err(reason) => {
                    rejection.get_or_insert(reason);
                    false
                }
            },
        )
        .cloned();

        match chosen {
            Some(recommendation) => {
                let intervention = ActiveIntervention {
                    id: recommendation.id.clone(),
                    recommendation,
                    prediction_id: prediction.id.clone(),
                    section_id: section_id.to_string(),
                    started_at: now,
                    viewed_at: None,
                    engaged_at: None,
                    dismissed_at: None,
                    outcome: None,
                };
                self.scaffolding.record_shown(&intervention.id, section_id, now);
                self.state.active_interventions.push(intervention.clone());
                tracing::info!(
                    session_id = %self.session_id,
                    intervention_id = %intervention.id,
                    priority = intervention.recommendation.priority,
                    "intervention started"
                );
                if let Some(listener) = &self.listener {
                    listener.on_intervention(&intervention);
                }
                outcome.intervention = Some(intervention);
            }
            None => outcome.scaffolding_rejection = rejection,
        }

        outcome.prediction = Some(prediction);
    }

    pub fn mark_intervention_viewed(&mut self, intervention_id: &str) -> Result<(), EngineError> {
        let now = self.now();
        let intervention = self
            .state
            .active_interventions
            .iter_mut()
            .find(|i| i.id == intervention_id)
            .ok_or_else(|| EngineError::UnknownIntervention(intervention_id.to_string()))?;
        intervention.viewed_at.get_or_insert(now);
        self.schedule_model_persist();
        Ok(())
    }

    /// Resolves an active intervention and folds the result into the success rate.
    pub fn record_intervention_outcome(
        &mut self,
        intervention_id: &str,
        outcome: InterventionOutcome,
    ) -> Result<ActiveIntervention, EngineError> {
        let now = self.now();
        let Some(index) = self
            .state
            .active_interventions
            .iter()
            .position(|i| i.id == intervention_id)
        else {
            if self.state.intervention_history.iter().any(|i| i.id == intervention_id) {
                return Err(EngineError::InterventionResolved(intervention_id.to_string()));
            }
            return Err(EngineError::UnknownIntervention(intervention_id.to_string()));
        };

        let mut intervention = self.state.active_interventions.remove(index);
        intervention.outcome = Some(outcome);
        match outcome {
            InterventionOutcome::Helped => {
                intervention.engaged_at.get_or_insert(now);
                self.scaffolding.record_engaged(&intervention.id);
            }
            InterventionOutcome::Dismissed => {
                intervention.dismissed_at.get_or_insert(now);
                self.scaffolding.record_dismissed(&intervention.id);
            }
            InterventionOutcome::Ignored => {}
        }

        let success = if outcome == InterventionOutcome::Helped { 1.0 } else { 0.0 };
        self.state.intervention_success_rate = ema(self.state.intervention_success_rate, success);

        self.state.intervention_history.push_back(intervention.clone());
        while self.state.intervention_history.len() > MAX_INTERVENTION_HISTORY {
            self.state.intervention_history.pop_front();
        }

        tracing::info!(
            session_id = %self.session_id,
            intervention_id,
            outcome = ?outcome,
            success_rate = self.state.intervention_success_rate,
            "intervention resolved"
        );
        self.schedule_model_persist();
        Ok(intervention)
    }

    /// Every emitted prediction forecasts struggle, so the ground truth alone
    /// decides accuracy and false positives.
    pub fn validate_prediction(
        &mut self,
        prediction_id: &str,
        did_struggle: bool,
    ) -> Result<(), EngineError> {
        if !self
            .state
            .recent_predictions
            .iter()
            .any(|p| p.id == prediction_id)
        {
            return Err(EngineError::UnknownPrediction(prediction_id.to_string()));
        }
        if self.state.validated_predictions.contains_key(prediction_id) {
            return Err(EngineError::PredictionValidated(prediction_id.to_string()));
        }

        let hit = if did_struggle { 1.0 } else { 0.0 };
        self.state.prediction_accuracy = ema(self.state.prediction_accuracy, hit);
        self.state.false_positive_rate = ema(self.state.false_positive_rate, 1.0 - hit);
        self.state
            .validated_predictions
            .insert(prediction_id.to_string(), did_struggle);

        tracing::debug!(
            prediction_id,
            did_struggle,
            accuracy = self.state.prediction_accuracy,
            false_positive_rate = self.state.false_positive_rate,
            "prediction validated"
        );
        self.schedule_model_persist();
        Ok(())
    }

    pub fn record_to_collective_patterns(
        &self,
        sequence: &[TemporalSignal],
        section_id: &str,
        outcome: PatternOutcome,
        intervention_type: Option<InterventionType>,
    ) -> CollectiveStrugglePattern {
        let embedding = embed_sequence(sequence, self.config.medium_term_horizon_ms);
        let signature = encode_signature(&embedding.vector);
        let indicators: Vec<PreStruggleIndicator> =
            detect_pre_struggle(sequence, section_id, &self.config)
                .into_iter()
                .map(|s| s.indicator)
                .collect();
        let at = sequence
            .iter()
            .map(|s| s.timestamp())
            .max()
            .unwrap_or_else(|| self.now());

        let pattern = {
            let mut store = self.patterns.write();
            let pattern = store
                .record_outcome(section_id, &signature, &indicators, outcome, intervention_type, at)
                .clone();
            let evicted = store.prune(self.config.max_collective_patterns);
            if evicted > 0 {
                tracing::debug!(evicted, course_id = %self.course_id, "collective patterns pruned");
            }
            pattern
        };
        self.schedule_patterns_persist();
        pattern
    }

    /// Records how `section_id` resolved, using the engine's current window.
    pub fn record_section_outcome(
        &self,
        section_id: &str,
        outcome: PatternOutcome,
        intervention_type: Option<InterventionType>,
    ) -> CollectiveStrugglePattern {
        let window: Vec<TemporalSignal> = self.state.current_sequence.iter().cloned().collect();
        self.record_to_collective_patterns(&window, section_id, outcome, intervention_type)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            course_id: self.course_id.clone(),
            session_id: self.session_id.clone(),
            comprehension_state: self.state_machine.current_state(),
            signals_in_window: self.state.current_sequence.len(),
            total_predictions: self.state.total_predictions,
            active_interventions: self.state.active_interventions.len(),
            resolved_interventions: self.state.intervention_history.len(),
            prediction_accuracy: self.state.prediction_accuracy,
            intervention_success_rate: self.state.intervention_success_rate,
            false_positive_rate: self.state.false_positive_rate,
            collective_patterns: self.patterns.read().len(),
            stuck: self.state_machine.detect_stuck(),
        }
    }

    /// Starts a new session window. Learned rates and prediction history stay.
    pub fn reset_session(&mut self) {
        self.enricher.reset();
        self.session_started = false;
        self.scaffolding = ScaffoldingState::new();
        self.state.current_sequence.clear();
        self.state.active_interventions.clear();
        tracing::info!(session_id = %self.session_id, "foresight session reset");
        self.schedule_model_persist();
    }

    /// Writes any debounced state now.
    pub fn flush(&self) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.flush();
        }
    }

    /// Writes model and patterns synchronously, bypassing the debounce.
    pub fn persist_now(&self) -> Result<(), EngineError> {
        let Some(scheduler) = &self.scheduler else {
            return Ok(());
        };
        let store = scheduler.store();
        save_model_state(store.as_ref(), &self.course_id, &self.session_id, &self.state)?;
        save_patterns(store.as_ref(), &self.patterns.read())?;
        Ok(())
    }

    fn schedule_model_persist(&self) {
        let Some(scheduler) = &self.scheduler else {
            return;
        };
        match encode_model_state(&self.state) {
            Ok(blob) => scheduler.schedule(model_key(&self.course_id, &self.session_id), blob),
            Err(e) => tracing::warn!(error = %e, "failed to encode model state"),
        }
    }

    fn schedule_patterns_persist(&self) {
        let Some(scheduler) = &self.scheduler else {
            return;
        };
        let encoded = encode_patterns(&self.patterns.read());
        match encoded {
            Ok(blob) => scheduler.schedule(patterns_key(&self.course_id), blob),
            Err(e) => tracing::warn!(error = %e, "failed to encode collective patterns"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foresight::collective::CollectivePatternStore;
    use crate::foresight::types::{ErrorPatternSignal, QuizSignal};
    use parking_lot::RwLock;

    fn engine() -> ForesightEngine {
        let patterns = Arc::new(RwLock::new(CollectivePatternStore::new("course")));
        ForesightEngine::new(ForesightConfig::default(), "course", "session", patterns)
    }

    fn slow_quiz(ts: i64) -> BehaviorSignal {
        BehaviorSignal::Quiz(QuizSignal {
            correct_answers: 1,
            total_questions: 4,
            attempts: 2,
            time_spent_ms: 90_000,
            answer_changes: 3,
            timestamp: ts,
        })
    }

    #[test]
    fn first_signals_are_gated_on_window_size() {
        let mut engine = engine();
        let outcome = engine.process_signal(slow_quiz(1_000), "s1");
        assert_eq!(
            outcome.skipped,
            Some(SkipReason::InsufficientSignals { have: 1, need: 5 })
        );
        assert!(outcome.prediction.is_none());
        assert_eq!(engine.state().current_sequence.len(), 1);
    }

    #[test]
    fn window_is_bounded() {
        let mut engine = engine();
        for i in 0..(engine.config().sequence_window as i64 + 10) {
            engine.process_signal(
                BehaviorSignal::ErrorPattern(ErrorPatternSignal {
                    error_type: "E0382".into(),
                    repeated_count: 0,
                    timestamp: i * 1_000,
                }),
                "s1",
            );
        }
        assert_eq!(engine.state().current_sequence.len(), engine.config().sequence_window);
    }

    #[test]
    fn unknown_ids_are_typed_errors() {
        let mut engine = engine();
        assert!(matches!(
            engine.record_intervention_outcome("nope", InterventionOutcome::Helped),
            Err(EngineError::UnknownIntervention(_))
        ));
        assert!(matches!(
            engine.validate_prediction("nope", true),
            Err(EngineError::UnknownPrediction(_))
        ));
        assert!(matches!(
            engine.mark_intervention_viewed("nope"),
            Err(EngineError::UnknownIntervention(_))
        ));
    }

    #[test]
    fn ema_moves_a_tenth_of_the_way() {
        assert!((ema(0.5, 1.0) - 0.55).abs() < 1e-12);
        assert!((ema(0.5, 0.0) - 0.45).abs() < 1e-12);
    }
}
