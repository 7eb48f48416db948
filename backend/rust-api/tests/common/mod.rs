#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use quiz_session_api::{
    config::Config,
    create_router,
    engine::{EngineConfig, QuizApi},
    error::QuizError,
    models::{
        CreateQuizRequest, Difficulty, PauseReason, Question, QuizConfiguration, QuizSession,
    },
    services::{
        quiz_repository::{InMemoryQuizRepository, QuizRepository},
        quiz_service::QuizService,
        AppState,
    },
    utils::retry::RetryConfig,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn test_state() -> Arc<AppState> {
    init_tracing();
    let repo: Arc<dyn QuizRepository> = Arc::new(InMemoryQuizRepository::new());
    Arc::new(AppState::with_repository(Config::default(), repo))
}

pub fn create_test_app() -> Router {
    create_router(test_state())
}

pub fn create_test_app_with_state() -> (Router, Arc<AppState>) {
    let state = test_state();
    (create_router(state.clone()), state)
}

/// Serves the router on an ephemeral local port.
pub async fn spawn_server(state: Arc<AppState>) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, create_router(state))
            .await
            .expect("test server");
    });
    addr
}

pub fn service() -> Arc<QuizService> {
    init_tracing();
    Arc::new(QuizService::new(Arc::new(InMemoryQuizRepository::new())))
}

pub fn configuration(number_of_questions: u32, time_duration: u64) -> QuizConfiguration {
    QuizConfiguration {
        difficulty: Difficulty::Easy,
        number_of_questions,
        time_duration,
    }
}

/// Questions `q1..qn`, each with options a/b/c and `a` correct.
pub fn questions(n: u32) -> Vec<Question> {
    (1..=n)
        .map(|i| Question {
            id: format!("q{}", i),
            text: format!("What is item {}?", i),
            options: vec!["a".to_string(), "b".to_string(), "c".to_string()],
            correct_answer: "a".to_string(),
            difficulty: Difficulty::Easy,
            explanation: Some(format!("Item {} is a", i)),
            code_snippet: None,
            image_reference: None,
        })
        .collect()
}

pub fn create_request(n: u32, time_duration: u64) -> CreateQuizRequest {
    CreateQuizRequest {
        configuration: configuration(n, time_duration),
        content_input_id: None,
        questions: questions(n),
    }
}

pub async fn create_quiz(service: &QuizService, n: u32, time_duration: u64) -> QuizSession {
    service
        .create_quiz(create_request(n, time_duration))
        .await
        .expect("quiz created")
}

/// Short backoffs for tests that run on the real clock.
pub fn fast_engine_config() -> EngineConfig {
    EngineConfig {
        load_retry: RetryConfig {
            max_attempts: 4,
            base_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(100),
            jitter_max: None,
        },
        terminal_retry: RetryConfig {
            max_attempts: 2,
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(10),
            jitter_max: None,
        },
        ..EngineConfig::default()
    }
}

/// Wraps the in-memory service with injectable failures.
pub struct FlakyApi {
    pub inner: Arc<QuizService>,
    /// `get` answers "not found" this many times first.
    pub missing_gets: AtomicUsize,
    /// `answer` fails with a network error this many times first.
    pub failing_answers: AtomicUsize,
    /// `finish` fails with a network error this many times first.
    pub failing_finishes: AtomicUsize,
    /// `pause` fails with a network error this many times first.
    pub failing_pauses: AtomicUsize,
    /// The first `slow_gets` calls to `get` sleep for `get_delay`.
    pub get_delay: Duration,
    pub slow_gets: AtomicUsize,
    pub get_calls: AtomicUsize,
    pub start_calls: AtomicUsize,
    pub finish_calls: AtomicUsize,
}

impl FlakyApi {
    pub fn new(inner: Arc<QuizService>) -> Self {
        Self {
            inner,
            missing_gets: AtomicUsize::new(0),
            failing_answers: AtomicUsize::new(0),
            failing_finishes: AtomicUsize::new(0),
            failing_pauses: AtomicUsize::new(0),
            get_delay: Duration::ZERO,
            slow_gets: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
            start_calls: AtomicUsize::new(0),
            finish_calls: AtomicUsize::new(0),
        }
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl QuizApi for FlakyApi {
    async fn create(&self, request: CreateQuizRequest) -> Result<QuizSession, QuizError> {
        self.inner.create(request).await
    }

    async fn start(&self, id: &str) -> Result<QuizSession, QuizError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.start(id).await
    }

    async fn answer(
        &self,
        id: &str,
        question_id: &str,
        answer: &str,
    ) -> Result<QuizSession, QuizError> {
        if take_one(&self.failing_answers) {
            return Err(QuizError::Network("connection reset".to_string()));
        }
        self.inner.answer(id, question_id, answer).await
    }

    async fn pause(&self, id: &str, reason: PauseReason) -> Result<QuizSession, QuizError> {
        if take_one(&self.failing_pauses) {
            return Err(QuizError::Network("connection reset".to_string()));
        }
        self.inner.pause(id, reason).await
    }

    async fn resume(&self, id: &str) -> Result<QuizSession, QuizError> {
        self.inner.resume(id).await
    }

    async fn finish(&self, id: &str) -> Result<QuizSession, QuizError> {
        self.finish_calls.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.failing_finishes) {
            return Err(QuizError::Network("service unavailable".to_string()));
        }
        self.inner.finish(id).await
    }

    async fn expire(&self, id: &str) -> Result<QuizSession, QuizError> {
        self.inner.expire(id).await
    }

    async fn get(&self, id: &str) -> Result<Option<QuizSession>, QuizError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.slow_gets) {
            tokio::time::sleep(self.get_delay).await;
        }
        if take_one(&self.missing_gets) {
            return Ok(None);
        }
        self.inner.get(id).await
    }

    async fn list(&self) -> Result<Vec<QuizSession>, QuizError> {
        self.inner.list().await
    }

    async fn delete(&self, id: &str) -> Result<(), QuizError> {
        self.inner.delete(id).await
    }
}
