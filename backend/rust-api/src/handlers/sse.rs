use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
};
use chrono::Utc;
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

use crate::{
    engine::reconcile,
    error::QuizError,
    metrics::SSE_CONNECTIONS_ACTIVE,
    models::{
        timer::{SessionClosed, TimeExpired, TimerEvent, TimerTick},
        QuizSession,
    },
    services::AppState,
};

/// SSE endpoint for timer events
/// GET /quizzes/{id}/stream
pub async fn quiz_stream(
    State(state): State<Arc<AppState>>,
    Path(quiz_id): Path<String>,
) -> Result<impl IntoResponse, QuizError> {
    state
        .quizzes
        .get_quiz(&quiz_id)
        .await?
        .ok_or_else(|| QuizError::NotFound(quiz_id.clone()))?;

    let tick_interval = tick_interval_ms();
    tracing::info!(
        "Client connected to SSE stream: quiz={}, tick_interval={}ms",
        quiz_id,
        tick_interval
    );

    let stream = create_timer_stream(
        state,
        quiz_id,
        Duration::from_millis(tick_interval),
        Duration::from_secs(max_stream_duration_seconds()),
    );

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn max_stream_duration_seconds() -> u64 {
    std::env::var("SSE_MAX_STREAM_SECONDS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(3600)
}

fn tick_interval_ms() -> u64 {
    std::env::var("SSE_TICK_INTERVAL_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(1000)
}

/// Keeps the active-connection gauge in step with the stream's lifetime.
struct ConnectionGuard;

impl ConnectionGuard {
    fn new() -> Self {
        SSE_CONNECTIONS_ACTIVE.inc();
        Self
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        SSE_CONNECTIONS_ACTIVE.dec();
    }
}

struct StreamState {
    app: Arc<AppState>,
    quiz_id: String,
    tick: Duration,
    deadline: Instant,
    first: bool,
    expired_sent: bool,
    _guard: ConnectionGuard,
}

/// Re-reads the quiz every tick so pauses and resumes made elsewhere show up
/// in the stream. Ends after `session-closed`, when the quiz disappears, or at
/// the stream deadline.
fn create_timer_stream(
    app: Arc<AppState>,
    quiz_id: String,
    tick: Duration,
    max_duration: Duration,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let initial = StreamState {
        app,
        quiz_id,
        tick,
        deadline: Instant::now() + max_duration,
        first: true,
        expired_sent: false,
        _guard: ConnectionGuard::new(),
    };

    stream::unfold(Some(initial), |state| async move {
        let mut state = state?;

        loop {
            if !state.first {
                sleep(state.tick).await;
            }
            state.first = false;

            if Instant::now() >= state.deadline {
                tracing::info!("SSE stream deadline reached: quiz={}", state.quiz_id);
                return None;
            }

            let quiz = match state.app.quizzes.get_quiz(&state.quiz_id).await {
                Ok(Some(quiz)) => quiz,
                Ok(None) => {
                    tracing::info!("Quiz gone, closing SSE stream: quiz={}", state.quiz_id);
                    return None;
                }
                Err(e) => {
                    tracing::warn!("SSE reload failed: quiz={}, error={}", state.quiz_id, e);
                    continue;
                }
            };

            match next_event(&quiz, &mut state.expired_sent) {
                Some(timer_event) => {
                    let event = Event::default()
                        .event(timer_event.event_name())
                        .data(timer_event.to_sse_data());
                    let next = match timer_event {
                        TimerEvent::SessionClosed(_) => None,
                        _ => Some(state),
                    };
                    return Some((Ok(event), next));
                }
                None => continue,
            }
        }
    })
}

/// Picks the event for the quiz's current state. After `time-expired` nothing
/// is sent until the quiz closes.
fn next_event(quiz: &QuizSession, expired_sent: &mut bool) -> Option<TimerEvent> {
    let now = Utc::now();

    if quiz.is_terminal() {
        return Some(TimerEvent::SessionClosed(SessionClosed {
            quiz_id: quiz.id.clone(),
            status: quiz.status,
            timestamp: now,
        }));
    }

    let remaining = reconcile::remaining_seconds(quiz, now);
    if quiz.start_time.is_some() && remaining == 0 {
        if *expired_sent {
            return None;
        }
        *expired_sent = true;
        tracing::info!("Timer expired: quiz={}", quiz.id);
        return Some(TimerEvent::TimeExpired(TimeExpired {
            quiz_id: quiz.id.clone(),
            timestamp: now,
            message: "Time limit exceeded".to_string(),
        }));
    }

    Some(TimerEvent::TimerTick(TimerTick {
        quiz_id: quiz.id.clone(),
        remaining_seconds: remaining,
        elapsed_seconds: reconcile::elapsed_seconds(quiz, now),
        total_seconds: quiz.configuration.time_duration,
        paused: quiz.is_paused(),
        timestamp: now,
    }))
}
