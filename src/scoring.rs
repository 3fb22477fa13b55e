use std::time::Duration;

use crate::types::AnswerKey;

pub const BASE_POINTS: u32 = 1000;
pub const SPEED_BONUS: u32 = 500;

/// Points for one answer: 0 unless the chosen option matches the correct
/// one, otherwise a flat base plus a speed bonus that decays linearly over
/// the question's time limit.
///
/// This is the single scoring implementation; both the score mutation at
/// reveal and the feedback payload go through it.
pub fn points(
    chosen: Option<AnswerKey>,
    correct: AnswerKey,
    elapsed: Duration,
    time_limit: Duration,
) -> u32 {
    match chosen {
        Some(key) if key == correct => {}
        _ => return 0,
    }

    let speed_ratio = (1.0 - elapsed.as_secs_f64() / time_limit.as_secs_f64()).max(0.0);
    BASE_POINTS + (SPEED_BONUS as f64 * speed_ratio).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: Duration = Duration::from_secs(20);

    #[test]
    fn instant_answer_scores_full_bonus() {
        let p = points(Some(AnswerKey::A), AnswerKey::A, Duration::ZERO, LIMIT);
        assert_eq!(p, 1500);
    }

    #[test]
    fn answer_at_limit_scores_base() {
        let p = points(Some(AnswerKey::A), AnswerKey::A, LIMIT, LIMIT);
        assert_eq!(p, 1000);
    }

    #[test]
    fn answer_past_limit_never_drops_below_base() {
        let p = points(Some(AnswerKey::A), AnswerKey::A, Duration::from_secs(25), LIMIT);
        assert_eq!(p, 1000);
    }

    #[test]
    fn wrong_answer_scores_zero() {
        let p = points(Some(AnswerKey::B), AnswerKey::A, Duration::ZERO, LIMIT);
        assert_eq!(p, 0);
    }

    #[test]
    fn missing_answer_scores_zero() {
        let p = points(None, AnswerKey::A, Duration::ZERO, LIMIT);
        assert_eq!(p, 0);
    }

    #[test]
    fn bonus_decays_linearly() {
        // 2s of 20s -> ratio 0.9 -> 1000 + 450
        let p = points(
            Some(AnswerKey::C),
            AnswerKey::C,
            Duration::from_millis(2000),
            LIMIT,
        );
        assert_eq!(p, 1450);

        // 19s of 20s -> ratio 0.05 -> 1000 + 25
        let p = points(
            Some(AnswerKey::C),
            AnswerKey::C,
            Duration::from_millis(19000),
            LIMIT,
        );
        assert_eq!(p, 1025);
    }
}
