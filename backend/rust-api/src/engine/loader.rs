use std::sync::Arc;

use super::api::QuizApi;
use crate::error::QuizError;
use crate::models::QuizSession;
use crate::utils::retry::{retry_async_when, RetryConfig};

#[derive(Debug)]
pub enum LoadOutcome {
    Found(QuizSession),
    NotFoundAfterRetries,
    Fatal(QuizError),
}

/// Fetches a quiz that may not be readable yet (e.g. straight after creation).
///
/// Not-found and network errors are retried with `retry`'s backoff; any other
/// error ends the attempt immediately.
pub async fn load_with_retry(
    api: Arc<dyn QuizApi>,
    quiz_id: &str,
    retry: RetryConfig,
) -> LoadOutcome {
    let max_attempts = retry.max_attempts.max(1);
    let mut attempt = 0usize;

    let result = retry_async_when(retry, QuizError::is_retryable, || {
        attempt += 1;
        let api = api.clone();
        let quiz_id = quiz_id.to_string();
        let current = attempt;
        async move {
            match api.get(&quiz_id).await {
                Ok(Some(quiz)) => Ok(quiz),
                Ok(None) => {
                    tracing::debug!(
                        "Quiz {} not found (attempt {}/{})",
                        quiz_id,
                        current,
                        max_attempts
                    );
                    Err(QuizError::NotFound(quiz_id))
                }
                Err(e) => {
                    tracing::warn!(
                        "Loading quiz {} failed (attempt {}/{}): {}",
                        quiz_id,
                        current,
                        max_attempts,
                        e
                    );
                    Err(e)
                }
            }
        }
    })
    .await;

    match result {
        Ok(quiz) => LoadOutcome::Found(quiz),
        Err(QuizError::NotFound(_)) => LoadOutcome::NotFoundAfterRetries,
        Err(e) => LoadOutcome::Fatal(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::quiz_repository::InMemoryQuizRepository;
    use crate::services::quiz_service::QuizService;
    use std::time::Duration;

    fn quick() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(20),
            jitter_max: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_quiz_exhausts_retries() {
        let api: Arc<dyn QuizApi> =
            Arc::new(QuizService::new(Arc::new(InMemoryQuizRepository::new())));

        let outcome = load_with_retry(api, "missing", quick()).await;
        assert!(matches!(outcome, LoadOutcome::NotFoundAfterRetries));
    }
}
