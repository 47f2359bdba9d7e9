//! Comprehension state machine.
//!
//! Five discrete states with per-state exit conditions evaluated in
//! descending priority. Metrics are recomputed from the signal window on
//! every update and never persisted on their own.

use serde::{Deserialize, Serialize};

use crate::foresight::scoring::mean_score;
use crate::foresight::types::{
    ComprehensionState, ComprehensionStateMachineModel, SignalKind, SignalOutcome,
    StateTransitionEvent, TemporalSignal, TransitionMetrics,
};

pub const RECENT_WINDOW: usize = 10;
pub const MAX_TRANSITION_HISTORY: usize = 50;
const MAX_SIGNALS_IN_STATE: usize = 100;

pub struct ExitCondition {
    pub priority: u8,
    pub target: ComprehensionState,
    pub predicate: fn(&TransitionMetrics) -> bool,
    pub reason: &'static str,
}

const CONFUSION_EXITS: &[ExitCondition] = &[
    ExitCondition {
        priority: 4,
        target: ComprehensionState::Breakthrough,
        predicate: |m| m.score_delta >= 35.0 && m.recent_score >= 65.0,
        reason: "sharp recovery out of confusion",
    },
    ExitCondition {
        priority: 3,
        target: ComprehensionState::Progressing,
        predicate: |m| m.consecutive_successes >= 2 && m.recent_score >= 50.0,
        reason: "consecutive successes after confusion",
    },
    ExitCondition {
        priority: 2,
        target: ComprehensionState::Struggling,
        predicate: |m| m.score_delta >= 10.0 && m.recent_score >= 30.0,
        reason: "partial improvement",
    },
];

const STRUGGLING_EXITS: &[ExitCondition] = &[
    ExitCondition {
        priority: 5,
        target: ComprehensionState::Confusion,
        predicate: |m| m.consecutive_failures >= 3 && m.recent_score < 20.0,
        reason: "repeated failures with very low scores",
    },
    ExitCondition {
        priority: 4,
        target: ComprehensionState::Breakthrough,
        predicate: |m| m.score_delta >= 30.0 && m.recent_score >= 60.0,
        reason: "large score jump",
    },
    ExitCondition {
        priority: 3,
        target: ComprehensionState::Progressing,
        predicate: |m| m.consecutive_successes >= 2 && m.recent_score >= 50.0,
        reason: "steady recovery",
    },
];

const PROGRESSING_EXITS: &[ExitCondition] = &[
    ExitCondition {
        priority: 5,
        target: ComprehensionState::Struggling,
        predicate: |m| m.consecutive_failures >= 2 && m.recent_score < 45.0,
        reason: "back-to-back failures",
    },
    ExitCondition {
        priority: 4,
        target: ComprehensionState::Breakthrough,
        predicate: |m| m.score_delta >= 20.0 && m.recent_score >= 75.0,
        reason: "marked improvement",
    },
    ExitCondition {
        priority: 3,
        target: ComprehensionState::Mastery,
        predicate: |m| {
            m.recent_score >= 85.0 && m.consecutive_successes >= 5 && m.signals_in_state >= 8
        },
        reason: "sustained high performance",
    },
    ExitCondition {
        priority: 2,
        target: ComprehensionState::Struggling,
        predicate: |m| m.recent_score < 40.0 && m.score_delta <= -15.0,
        reason: "declining scores",
    },
];

const BREAKTHROUGH_EXITS: &[ExitCondition] = &[
    ExitCondition {
        priority: 5,
        target: ComprehensionState::Struggling,
        predicate: |m| m.consecutive_failures >= 2,
        reason: "breakthrough did not hold",
    },
    ExitCondition {
        priority: 4,
        target: ComprehensionState::Mastery,
        predicate: |m| m.recent_score >= 85.0 && m.consecutive_successes >= 4,
        reason: "breakthrough consolidated",
    },
    ExitCondition {
        priority: 3,
        target: ComprehensionState::Progressing,
        predicate: |m| m.signals_in_state >= 5,
        reason: "breakthrough settled",
    },
];

const MASTERY_EXITS: &[ExitCondition] = &[ExitCondition {
    priority: 5,
    target: ComprehensionState::Progressing,
    predicate: |m| m.consecutive_failures >= 2 || m.recent_score < 65.0,
    reason: "mastery slipping",
}];

pub fn exit_conditions(state: ComprehensionState) -> &'static [ExitCondition] {
    match state {
        ComprehensionState::Confusion => CONFUSION_EXITS,
        ComprehensionState::Struggling => STRUGGLING_EXITS,
        ComprehensionState::Progressing => PROGRESSING_EXITS,
        ComprehensionState::Breakthrough => BREAKTHROUGH_EXITS,
        ComprehensionState::Mastery => MASTERY_EXITS,
    }
}

/// Highest-priority exit condition of `state` that holds for `metrics`.
pub fn next_state(
    state: ComprehensionState,
    metrics: &TransitionMetrics,
) -> Option<(ComprehensionState, &'static str)> {
    let mut conditions: Vec<&ExitCondition> = exit_conditions(state).iter().collect();
    conditions.sort_by(|a, b| b.priority.cmp(&a.priority));
    conditions
        .into_iter()
        .find(|c| (c.predicate)(metrics))
        .map(|c| (c.target, c.reason))
}

/// Recomputes metrics from the window. The newest signal is the last element.
pub fn compute_metrics(
    window: &[TemporalSignal],
    signals_in_state: usize,
    state_entered_at: i64,
) -> TransitionMetrics {
    let len = window.len();
    let recent = &window[len.saturating_sub(RECENT_WINDOW)..];
    let older_start = len.saturating_sub(RECENT_WINDOW * 2);
    let older = &window[older_start..len.saturating_sub(RECENT_WINDOW)];

    let recent_score = mean_score(recent.iter().map(|s| s.score));
    let older_score = if older.is_empty() {
        recent_score
    } else {
        mean_score(older.iter().map(|s| s.score))
    };

    let tail = &window[older_start..];
    let consecutive_successes = trailing_count(tail, SignalOutcome::Success);
    let consecutive_failures = trailing_count(tail, SignalOutcome::Failure);

    let kind_score = |kind: SignalKind| {
        mean_score(
            recent
                .iter()
                .filter(|s| s.signal.kind() == kind)
                .map(|s| s.score),
        )
    };

    let newest = window.last();
    let now = newest.map(|s| s.timestamp()).unwrap_or(state_entered_at);

    TransitionMetrics {
        recent_score,
        older_score,
        score_delta: recent_score - older_score,
        consecutive_successes,
        consecutive_failures,
        signals_in_state: signals_in_state as u32,
        time_in_state: now.saturating_sub(state_entered_at).max(0),
        quiz_score: kind_score(SignalKind::Quiz),
        playground_score: kind_score(SignalKind::Playground),
        video_score: kind_score(SignalKind::Video),
        total_signals: newest.map(|s| s.sequence_position + 1).unwrap_or(0) as u32,
    }
}

fn trailing_count(window: &[TemporalSignal], outcome: SignalOutcome) -> u32 {
    window
        .iter()
        .rev()
        .take_while(|s| s.outcome == outcome)
        .count() as u32
}

/// Advances the model by the newest signal in `window` and returns the next
/// snapshot. The input model is left untouched.
pub fn transition(
    model: &ComprehensionStateMachineModel,
    window: &[TemporalSignal],
) -> (ComprehensionStateMachineModel, Option<StateTransitionEvent>) {
    let Some(newest) = window.last() else {
        return (model.clone(), None);
    };
    let now = newest.timestamp();
    let mut next = model.clone();

    let signals_in_state = model.signals_in_current_state.len() + 1;
    let metrics = compute_metrics(window, signals_in_state, model.state_entered_at);
    next.current_metrics = metrics.clone();
    next.last_updated = now;

    match next_state(model.current_state, &metrics) {
        Some((target, reason)) if target != model.current_state => {
            let event = StateTransitionEvent {
                from: model.current_state,
                to: target,
                at: now,
                reason: reason.to_string(),
                recent_score: metrics.recent_score,
                score_delta: metrics.score_delta,
            };
            next.current_state = target;
            next.state_entered_at = now;
            next.signals_in_current_state.clear();
            next.transition_history.push_back(event.clone());
            while next.transition_history.len() > MAX_TRANSITION_HISTORY {
                next.transition_history.pop_front();
            }
            (next, Some(event))
        }
        _ => {
            next.signals_in_current_state.push(newest.clone());
            if next.signals_in_current_state.len() > MAX_SIGNALS_IN_STATE {
                let overflow = next.signals_in_current_state.len() - MAX_SIGNALS_IN_STATE;
                next.signals_in_current_state.drain(0..overflow);
            }
            (next, None)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StuckAdvisory {
    pub state: ComprehensionState,
    pub signals_in_state: u32,
    pub score_delta: f64,
    pub message: String,
}

/// Flags over-dwelling in a state. Advisory only; never transitions.
pub fn detect_stuck(model: &ComprehensionStateMachineModel) -> Option<StuckAdvisory> {
    let metrics = &model.current_metrics;
    let dwell = model.signals_in_current_state.len() as u32;

    let message = match model.current_state {
        ComprehensionState::Confusion if dwell >= 20 && metrics.score_delta < 5.0 => {
            "Confusion has persisted without improvement; consider revisiting prerequisites"
        }
        ComprehensionState::Struggling if dwell >= 15 && metrics.score_delta < 5.0 => {
            "Struggling for an extended stretch; a worked example may unblock progress"
        }
        ComprehensionState::Progressing if dwell >= 30 && metrics.score_delta.abs() < 3.0 => {
            "Progress has plateaued; try a harder exercise or a checkpoint quiz"
        }
        _ => return None,
    };

    Some(StuckAdvisory {
        state: model.current_state,
        signals_in_state: dwell,
        score_delta: metrics.score_delta,
        message: message.to_string(),
    })
}

pub struct ComprehensionStateMachine {
    model: ComprehensionStateMachineModel,
}

impl ComprehensionStateMachine {
    pub fn new(started_at: i64) -> Self {
        Self {
            model: ComprehensionStateMachineModel::new(started_at),
        }
    }

    pub fn from_model(model: ComprehensionStateMachineModel) -> Self {
        Self { model }
    }

    pub fn update(&mut self, window: &[TemporalSignal]) -> Option<StateTransitionEvent> {
        let (next, event) = transition(&self.model, window);
        self.model = next;
        event
    }

    pub fn current_state(&self) -> ComprehensionState {
        self.model.current_state
    }

    pub fn model(&self) -> &ComprehensionStateMachineModel {
        &self.model
    }

    pub fn detect_stuck(&self) -> Option<StuckAdvisory> {
        detect_stuck(&self.model)
    }

    pub fn reset(&mut self, started_at: i64) {
        self.model = ComprehensionStateMachineModel::new(started_at);
    }
}
