//! Elapsed/remaining time derived from server-authoritative timestamps.
//!
//! Time spent in an open pause (`paused_at` set) is not elapsed yet; time spent
//! in pauses that already ended is carried in `total_paused_ms`. Each pause
//! interval is therefore subtracted exactly once.

use chrono::{DateTime, Utc};

use crate::models::QuizSession;

/// Active (unpaused) milliseconds since the quiz started, as of `now`.
pub fn elapsed_ms(quiz: &QuizSession, now: DateTime<Utc>) -> i64 {
    let Some(start) = quiz.start_time else {
        return 0;
    };
    let until = quiz.end_time.or(quiz.paused_at).unwrap_or(now);
    (until - start)
        .num_milliseconds()
        .saturating_sub(quiz.total_paused_ms)
        .max(0)
}

pub fn elapsed_seconds(quiz: &QuizSession, now: DateTime<Utc>) -> u64 {
    (elapsed_ms(quiz, now) / 1000) as u64
}

/// `max(0, timeDuration - elapsed)`, rounded to the nearest second.
pub fn remaining_seconds(quiz: &QuizSession, now: DateTime<Utc>) -> u64 {
    let total_ms = i64::try_from(quiz.configuration.time_duration)
        .unwrap_or(i64::MAX)
        .saturating_mul(1000);
    let remaining_ms = total_ms.saturating_sub(elapsed_ms(quiz, now)).max(0);
    (remaining_ms.saturating_add(500) / 1000) as u64
}
