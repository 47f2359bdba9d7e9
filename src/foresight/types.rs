use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

pub const MAX_RECENT_PREDICTIONS: usize = 20;
pub const MAX_INTERVENTION_HISTORY: usize = 50;
pub const MAX_PRIMARY_INDICATORS: usize = 3;
pub const MAX_CONTRIBUTING_FACTORS: usize = 5;
pub const MAX_RECOMMENDATIONS: usize = 5;

// ========== Signals ==========

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSignal {
    pub correct_answers: u32,
    pub total_questions: u32,
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default)]
    pub time_spent_ms: i64,
    #[serde(default)]
    pub answer_changes: u32,
    pub timestamp: i64,
}

fn default_attempts() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaygroundSignal {
    pub run_count: u32,
    pub successful_runs: u32,
    pub error_count: u32,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSignal {
    pub watched_percentage: f64,
    pub rewind_count: u32,
    #[serde(default)]
    pub pause_count: u32,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionTimeSignal {
    pub time_spent_ms: i64,
    pub completion_percentage: f64,
    pub revisit_count: u32,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPatternSignal {
    pub error_type: String,
    pub repeated_count: u32,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationSignal {
    pub from_section: String,
    pub to_section: String,
    pub is_backward: bool,
    #[serde(default)]
    pub is_skip: bool,
    pub timestamp: i64,
}

/// One observed learner interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BehaviorSignal {
    Quiz(QuizSignal),
    Playground(PlaygroundSignal),
    Video(VideoSignal),
    SectionTime(SectionTimeSignal),
    ErrorPattern(ErrorPatternSignal),
    Navigation(NavigationSignal),
}

impl BehaviorSignal {
    pub fn timestamp(&self) -> i64 {
        match self {
            Self::Quiz(s) => s.timestamp,
            Self::Playground(s) => s.timestamp,
            Self::Video(s) => s.timestamp,
            Self::SectionTime(s) => s.timestamp,
            Self::ErrorPattern(s) => s.timestamp,
            Self::Navigation(s) => s.timestamp,
        }
    }

    pub fn kind(&self) -> SignalKind {
        match self {
            Self::Quiz(_) => SignalKind::Quiz,
            Self::Playground(_) => SignalKind::Playground,
            Self::Video(_) => SignalKind::Video,
            Self::SectionTime(_) => SignalKind::SectionTime,
            Self::ErrorPattern(_) => SignalKind::ErrorPattern,
            Self::Navigation(_) => SignalKind::Navigation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SignalKind {
    Quiz,
    Playground,
    Video,
    SectionTime,
    ErrorPattern,
    Navigation,
}

impl SignalKind {
    pub const ALL: [SignalKind; 6] = [
        Self::Quiz,
        Self::Playground,
        Self::Video,
        Self::SectionTime,
        Self::ErrorPattern,
        Self::Navigation,
    ];

    pub fn index(&self) -> usize {
        match self {
            Self::Quiz => 0,
            Self::Playground => 1,
            Self::Video => 2,
            Self::SectionTime => 3,
            Self::ErrorPattern => 4,
            Self::Navigation => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalOutcome {
    Success,
    Neutral,
    Failure,
}

/// A signal annotated with its position in the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemporalSignal {
    pub signal: BehaviorSignal,
    pub section_id: String,
    pub score: f64,
    pub outcome: SignalOutcome,
    pub delta_from_previous: i64,
    pub section_progress: f64,
    pub session_duration: i64,
    pub sequence_position: u64,
}

impl TemporalSignal {
    pub fn timestamp(&self) -> i64 {
        self.signal.timestamp()
    }
}

// ========== Comprehension states ==========

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComprehensionState {
    Confusion,
    Struggling,
    #[default]
    Progressing,
    Breakthrough,
    Mastery,
}

impl ComprehensionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confusion => "confusion",
            Self::Struggling => "struggling",
            Self::Progressing => "progressing",
            Self::Breakthrough => "breakthrough",
            Self::Mastery => "mastery",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionMetrics {
    pub recent_score: f64,
    pub older_score: f64,
    pub score_delta: f64,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub signals_in_state: u32,
    pub time_in_state: i64,
    pub quiz_score: f64,
    pub playground_score: f64,
    pub video_score: f64,
    pub total_signals: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateTransitionEvent {
    pub from: ComprehensionState,
    pub to: ComprehensionState,
    pub at: i64,
    pub reason: String,
    pub recent_score: f64,
    pub score_delta: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComprehensionStateMachineModel {
    pub current_state: ComprehensionState,
    pub state_entered_at: i64,
    pub signals_in_current_state: Vec<TemporalSignal>,
    pub transition_history: VecDeque<StateTransitionEvent>,
    pub current_metrics: TransitionMetrics,
    pub last_updated: i64,
}

impl ComprehensionStateMachineModel {
    pub fn new(started_at: i64) -> Self {
        Self {
            current_state: ComprehensionState::Progressing,
            state_entered_at: started_at,
            signals_in_current_state: Vec::new(),
            transition_history: VecDeque::new(),
            current_metrics: TransitionMetrics::default(),
            last_updated: started_at,
        }
    }
}

// ========== Pre-struggle detection ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreStruggleIndicator {
    QuizHesitation,
    ErrorEscalation,
    RewindCluster,
    SkipBacktrack,
    SlowProgression,
    Avoidance,
}

impl PreStruggleIndicator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QuizHesitation => "quiz_hesitation",
            Self::ErrorEscalation => "error_escalation",
            Self::RewindCluster => "rewind_cluster",
            Self::SkipBacktrack => "skip_backtrack",
            Self::SlowProgression => "slow_progression",
            Self::Avoidance => "avoidance",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StruggleSeverity {
    #[default]
    Mild,
    Moderate,
    Severe,
}

impl StruggleSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mild => "mild",
            Self::Moderate => "moderate",
            Self::Severe => "severe",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionHorizon {
    Immediate,
    ShortTerm,
    MediumTerm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalEvidence {
    /// Number of signals in the window that support the hit.
    pub window_depth: usize,
    /// Indicator-specific magnitude (ratio, count or rate).
    pub metric: f64,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreStruggleSignal {
    pub indicator: PreStruggleIndicator,
    pub severity: StruggleSeverity,
    pub confidence: f64,
    pub section_id: String,
    pub evidence: SignalEvidence,
    pub predicted_time_to_struggle: i64,
}

// ========== Interventions ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionType {
    ConceptRefresher,
    WorkedExample,
    HintCascade,
    DebuggingGuide,
    SimplifiedExplanation,
    VisualDiagram,
    PrerequisiteReview,
    ProgressCheckpoint,
    EncouragementNudge,
}

impl InterventionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConceptRefresher => "concept_refresher",
            Self::WorkedExample => "worked_example",
            Self::HintCascade => "hint_cascade",
            Self::DebuggingGuide => "debugging_guide",
            Self::SimplifiedExplanation => "simplified_explanation",
            Self::VisualDiagram => "visual_diagram",
            Self::PrerequisiteReview => "prerequisite_review",
            Self::ProgressCheckpoint => "progress_checkpoint",
            Self::EncouragementNudge => "encouragement_nudge",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterventionContent {
    pub title: String,
    pub description: String,
    pub key_points: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_example: Option<String>,
    pub estimated_duration_secs: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterventionRecommendation {
    /// Stable per section and type so dismissals survive across cycles.
    pub id: String,
    #[serde(rename = "type")]
    pub intervention_type: InterventionType,
    pub priority: u8,
    pub content: InterventionContent,
    pub expected_impact: f64,
    pub collective_success_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterventionOutcome {
    Helped,
    Ignored,
    Dismissed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveIntervention {
    pub id: String,
    pub recommendation: InterventionRecommendation,
    pub prediction_id: String,
    pub section_id: String,
    pub started_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewed_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engaged_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dismissed_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<InterventionOutcome>,
}

impl ActiveIntervention {
    pub fn is_resolved(&self) -> bool {
        self.outcome.is_some()
    }
}

// ========== Predictions ==========

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributingFactor {
    pub indicator: PreStruggleIndicator,
    pub weight: f64,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceInterval {
    pub earliest: i64,
    pub latest: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrugglePrediction {
    pub id: String,
    pub section_id: String,
    pub probability: f64,
    pub signal_probability: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collective_probability: Option<f64>,
    pub severity: StruggleSeverity,
    pub horizon: PredictionHorizon,
    pub primary_indicators: Vec<PreStruggleIndicator>,
    pub contributing_factors: Vec<ContributingFactor>,
    pub predicted_struggle_time: i64,
    pub confidence_interval: ConfidenceInterval,
    pub recommended_interventions: Vec<InterventionRecommendation>,
    pub steps_ahead: u8,
    pub created_at: i64,
}

// ========== Collective patterns ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternOutcome {
    Struggled,
    Succeeded,
    Recovered,
}

impl PatternOutcome {
    /// Contribution to the running struggle rate.
    pub fn struggle_value(&self) -> f64 {
        match self {
            Self::Struggled => 1.0,
            Self::Recovered => 0.5,
            Self::Succeeded => 0.0,
        }
    }

    pub fn intervention_succeeded(&self) -> bool {
        !matches!(self, Self::Struggled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveIntervention {
    #[serde(rename = "type")]
    pub intervention_type: InterventionType,
    pub success_rate: f64,
    pub usage_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectiveStrugglePattern {
    pub section_id: String,
    pub indicator_sequence: Vec<PreStruggleIndicator>,
    pub signal_signature: String,
    pub occurrence_count: u32,
    pub struggle_rate: f64,
    pub effective_interventions: Vec<EffectiveIntervention>,
    #[serde(default)]
    pub last_updated: i64,
}

// ========== Model state ==========

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictiveModelState {
    #[serde(skip)]
    pub current_sequence: VecDeque<TemporalSignal>,
    pub recent_predictions: VecDeque<StrugglePrediction>,
    pub active_interventions: Vec<ActiveIntervention>,
    #[serde(default)]
    pub intervention_history: VecDeque<ActiveIntervention>,
    /// prediction id -> whether the learner actually struggled
    #[serde(default)]
    pub validated_predictions: BTreeMap<String, bool>,
    pub prediction_accuracy: f64,
    pub intervention_success_rate: f64,
    pub false_positive_rate: f64,
    #[serde(default)]
    pub total_predictions: u64,
    #[serde(default)]
    pub last_prediction_at: Option<i64>,
}

impl Default for PredictiveModelState {
    fn default() -> Self {
        Self {
            current_sequence: VecDeque::new(),
            recent_predictions: VecDeque::new(),
            active_interventions: Vec::new(),
            intervention_history: VecDeque::new(),
            validated_predictions: BTreeMap::new(),
            prediction_accuracy: 0.5,
            intervention_success_rate: 0.5,
            false_positive_rate: 0.0,
            total_predictions: 0,
            last_prediction_at: None,
        }
    }
}
