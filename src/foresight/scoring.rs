//! Signal scoring: maps a raw behavior signal onto a 0-100 performance score.

use crate::foresight::types::{BehaviorSignal, SignalOutcome};

pub const NEUTRAL_SCORE: f64 = 50.0;
pub const SUCCESS_THRESHOLD: f64 = 70.0;
pub const FAILURE_THRESHOLD: f64 = 40.0;

const QUIZ_RETRY_PENALTY: f64 = 10.0;
const PLAYGROUND_ERROR_PENALTY: f64 = 20.0;
const SECTION_FREE_REVISITS: u32 = 2;
const SECTION_REVISIT_PENALTY: f64 = 5.0;
const ERROR_REPEAT_PENALTY: f64 = 20.0;
const VIDEO_REWIND_PENALTY: f64 = 3.0;
const VIDEO_REWIND_PENALTY_CAP: f64 = 15.0;
const NAV_BACKWARD_SCORE: f64 = 60.0;
const NAV_FORWARD_SCORE: f64 = 80.0;

pub fn score_signal(signal: &BehaviorSignal) -> f64 {
    let raw = match signal {
        BehaviorSignal::Quiz(quiz) => {
            if quiz.total_questions == 0 {
                NEUTRAL_SCORE
            } else {
                let accuracy =
                    quiz.correct_answers.min(quiz.total_questions) as f64 / quiz.total_questions as f64;
                let retries = quiz.attempts.saturating_sub(1) as f64;
                (accuracy * 100.0 - QUIZ_RETRY_PENALTY * retries).max(0.0)
            }
        }
        BehaviorSignal::Playground(run) => {
            if run.run_count == 0 {
                NEUTRAL_SCORE
            } else {
                let runs = run.run_count as f64;
                let success_rate = run.successful_runs.min(run.run_count) as f64 / runs;
                let error_rate = run.error_count as f64 / runs;
                success_rate * 100.0 - PLAYGROUND_ERROR_PENALTY * error_rate
            }
        }
        BehaviorSignal::SectionTime(section) => {
            let extra_revisits = section.revisit_count.saturating_sub(SECTION_FREE_REVISITS) as f64;
            section.completion_percentage - SECTION_REVISIT_PENALTY * extra_revisits
        }
        BehaviorSignal::ErrorPattern(error) => {
            100.0 - ERROR_REPEAT_PENALTY * error.repeated_count as f64
        }
        BehaviorSignal::Video(video) => {
            let penalty =
                (VIDEO_REWIND_PENALTY * video.rewind_count as f64).min(VIDEO_REWIND_PENALTY_CAP);
            video.watched_percentage - penalty
        }
        BehaviorSignal::Navigation(nav) => {
            if nav.is_backward {
                NAV_BACKWARD_SCORE
            } else {
                NAV_FORWARD_SCORE
            }
        }
    };

    if raw.is_finite() {
        raw.clamp(0.0, 100.0)
    } else {
        NEUTRAL_SCORE
    }
}

pub fn classify_score(score: f64) -> SignalOutcome {
    if score >= SUCCESS_THRESHOLD {
        SignalOutcome::Success
    } else if score < FAILURE_THRESHOLD {
        SignalOutcome::Failure
    } else {
        SignalOutcome::Neutral
    }
}

/// Mean of the given scores, or the neutral score when empty.
pub fn mean_score(scores: impl IntoIterator<Item = f64>) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for score in scores {
        sum += score;
        count += 1;
    }
    if count == 0 {
        NEUTRAL_SCORE
    } else {
        sum / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foresight::types::*;

    fn quiz(correct: u32, total: u32, attempts: u32) -> BehaviorSignal {
        BehaviorSignal::Quiz(QuizSignal {
            correct_answers: correct,
            total_questions: total,
            attempts,
            time_spent_ms: 10_000,
            answer_changes: 0,
            timestamp: 0,
        })
    }

    #[test]
    fn quiz_penalises_retries_and_floors_at_zero() {
        assert_eq!(score_signal(&quiz(4, 5, 1)), 80.0);
        assert_eq!(score_signal(&quiz(4, 5, 3)), 60.0);
        assert_eq!(score_signal(&quiz(1, 5, 10)), 0.0);
    }

    #[test]
    fn empty_quiz_and_idle_playground_are_neutral() {
        assert_eq!(score_signal(&quiz(0, 0, 1)), NEUTRAL_SCORE);
        let idle = BehaviorSignal::Playground(PlaygroundSignal {
            run_count: 0,
            successful_runs: 0,
            error_count: 0,
            timestamp: 0,
        });
        assert_eq!(score_signal(&idle), NEUTRAL_SCORE);
    }

    #[test]
    fn playground_subtracts_error_rate() {
        let run = BehaviorSignal::Playground(PlaygroundSignal {
            run_count: 4,
            successful_runs: 2,
            error_count: 2,
            timestamp: 0,
        });
        assert!((score_signal(&run) - 40.0).abs() < 1e-9);
    }

    #[test]
    fn section_time_only_penalises_revisits_beyond_two() {
        let section = |revisits| {
            BehaviorSignal::SectionTime(SectionTimeSignal {
                time_spent_ms: 60_000,
                completion_percentage: 90.0,
                revisit_count: revisits,
                timestamp: 0,
            })
        };
        assert_eq!(score_signal(&section(2)), 90.0);
        assert_eq!(score_signal(&section(4)), 80.0);
    }

    #[test]
    fn video_rewind_penalty_is_capped() {
        let video = BehaviorSignal::Video(VideoSignal {
            watched_percentage: 100.0,
            rewind_count: 20,
            pause_count: 0,
            timestamp: 0,
        });
        assert_eq!(score_signal(&video), 85.0);
    }

    #[test]
    fn error_and_navigation_rules() {
        let error = BehaviorSignal::ErrorPattern(ErrorPatternSignal {
            error_type: "SyntaxError".into(),
            repeated_count: 7,
            timestamp: 0,
        });
        assert_eq!(score_signal(&error), 0.0);

        let back = BehaviorSignal::Navigation(NavigationSignal {
            from_section: "b".into(),
            to_section: "a".into(),
            is_backward: true,
            is_skip: false,
            timestamp: 0,
        });
        assert_eq!(score_signal(&back), 60.0);
    }

    #[test]
    fn non_finite_input_is_neutral() {
        let video = BehaviorSignal::Video(VideoSignal {
            watched_percentage: f64::NAN,
            rewind_count: 0,
            pause_count: 0,
            timestamp: 0,
        });
        assert_eq!(score_signal(&video), NEUTRAL_SCORE);
    }

    #[test]
    fn classification_boundaries() {
        assert_eq!(classify_score(70.0), SignalOutcome::Success);
        assert_eq!(classify_score(69.9), SignalOutcome::Neutral);
        assert_eq!(classify_score(40.0), SignalOutcome::Neutral);
        assert_eq!(classify_score(39.9), SignalOutcome::Failure);
    }
}
