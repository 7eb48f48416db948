use std::collections::BTreeMap;
use std::sync::Arc;
use validator::Validate;

use super::api::QuizApi;
use crate::error::QuizError;
use crate::models::{
    CreateQuizRequest, PauseReason, Question, QuizConfiguration, QuizSession, QuizStatus,
};
use crate::utils::retry::{retry_async_when, RetryConfig};

#[derive(Debug, Clone, Copy)]
enum RemoteOp {
    Start,
    Finish,
    Expire,
}

impl RemoteOp {
    fn name(self) -> &'static str {
        match self {
            RemoteOp::Start => "start",
            RemoteOp::Finish => "finish",
            RemoteOp::Expire => "expire",
        }
    }
}

/// Client-side holder of the current quiz.
///
/// Every operation goes through [`QuizApi`] and then replaces the local copy
/// with the server's answer; the question index is the only purely local state.
pub struct SessionStore {
    api: Arc<dyn QuizApi>,
    session: Option<QuizSession>,
    current_question_index: usize,
    /// Selected answers the server has not acknowledged yet.
    pending_answers: BTreeMap<String, String>,
}

impl SessionStore {
    pub fn new(api: Arc<dyn QuizApi>) -> Self {
        Self {
            api,
            session: None,
            current_question_index: 0,
            pending_answers: BTreeMap::new(),
        }
    }

    pub fn api(&self) -> Arc<dyn QuizApi> {
        self.api.clone()
    }

    pub fn session(&self) -> Option<&QuizSession> {
        self.session.as_ref()
    }

    pub fn current_question_index(&self) -> usize {
        self.current_question_index
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.session
            .as_ref()
            .and_then(|s| s.questions.get(self.current_question_index))
    }

    pub fn pending_answers(&self) -> &BTreeMap<String, String> {
        &self.pending_answers
    }

    /// The unsaved selection if there is one, else the recorded answer.
    pub fn selected_answer(&self, question_id: &str) -> Option<&str> {
        self.pending_answers
            .get(question_id)
            .or_else(|| self.session.as_ref()?.answers.get(question_id))
            .map(String::as_str)
    }

    /// Replaces the local copy with server state. Switching to another quiz
    /// resets navigation and drops unsaved selections.
    pub fn adopt(&mut self, quiz: QuizSession) -> QuizSession {
        let same_quiz = self.session.as_ref().is_some_and(|s| s.id == quiz.id);
        if !same_quiz {
            self.current_question_index = 0;
            self.pending_answers.clear();
        }
        self.pending_answers
            .retain(|question_id, answer| quiz.answers.get(question_id) != Some(answer));
        if let Some(last) = quiz.questions.len().checked_sub(1) {
            self.current_question_index = self.current_question_index.min(last);
        }

        self.session = Some(quiz.clone());
        quiz
    }

    /// Validated locally; nothing is sent for an invalid configuration.
    pub async fn create(
        &mut self,
        configuration: QuizConfiguration,
        content_ref: Option<String>,
        questions: Vec<Question>,
    ) -> Result<QuizSession, QuizError> {
        let request = CreateQuizRequest {
            configuration,
            content_input_id: content_ref,
            questions,
        };
        request.validate()?;

        let quiz = self.api.create(request).await?;
        self.session = None;
        Ok(self.adopt(quiz))
    }

    pub async fn start(&mut self, id: &str) -> Result<QuizSession, QuizError> {
        self.start_with_retry(id, single_attempt()).await
    }

    /// Like [`start`](Self::start), retrying network failures with `retry`.
    pub async fn start_with_retry(
        &mut self,
        id: &str,
        retry: RetryConfig,
    ) -> Result<QuizSession, QuizError> {
        self.call(RemoteOp::Start, id.to_string(), retry).await
    }

    /// Records `answer` for `question_id`. The selection stays pending until the
    /// server acknowledges it; the question index never moves.
    pub async fn answer(&mut self, question_id: &str, answer: &str) -> Result<QuizSession, QuizError> {
        let id = self.require_session()?.id.clone();
        self.pending_answers
            .insert(question_id.to_string(), answer.to_string());

        let quiz = self.api.answer(&id, question_id, answer).await?;
        Ok(self.adopt(quiz))
    }

    pub fn next(&mut self) -> usize {
        let len = self.session.as_ref().map_or(0, |s| s.questions.len());
        if self.current_question_index + 1 < len {
            self.current_question_index += 1;
        }
        self.current_question_index
    }

    pub fn previous(&mut self) -> usize {
        self.current_question_index = self.current_question_index.saturating_sub(1);
        self.current_question_index
    }

    /// A paused quiz is returned as is, without calling the server.
    pub async fn pause(&mut self, reason: PauseReason) -> Result<QuizSession, QuizError> {
        let quiz = self.require_session()?;
        if quiz.is_paused() {
            return Ok(quiz.clone());
        }
        let id = quiz.id.clone();

        let quiz = self.api.pause(&id, reason).await?;
        Ok(self.adopt(quiz))
    }

    pub async fn resume(&mut self) -> Result<QuizSession, QuizError> {
        let quiz = self.require_session()?;
        if !quiz.is_paused() {
            return Err(QuizError::NotPaused);
        }
        let id = quiz.id.clone();

        let quiz = self.api.resume(&id).await?;
        Ok(self.adopt(quiz))
    }

    pub async fn finish(&mut self) -> Result<QuizSession, QuizError> {
        self.finish_with_retry(single_attempt()).await
    }

    pub async fn finish_with_retry(&mut self, retry: RetryConfig) -> Result<QuizSession, QuizError> {
        self.close(RemoteOp::Finish, retry).await
    }

    pub async fn expire(&mut self) -> Result<QuizSession, QuizError> {
        self.expire_with_retry(single_attempt()).await
    }

    pub async fn expire_with_retry(&mut self, retry: RetryConfig) -> Result<QuizSession, QuizError> {
        self.close(RemoteOp::Expire, retry).await
    }

    /// `Ok(None)` when the server has no such quiz.
    pub async fn load(&mut self, id: &str) -> Result<Option<QuizSession>, QuizError> {
        match self.api.get(id).await? {
            Some(quiz) => Ok(Some(self.adopt(quiz))),
            None => Ok(None),
        }
    }

    /// Resubmits unsaved selections. Returns how many are still unsaved.
    pub async fn flush_pending_answers(&mut self) -> usize {
        let accepting = self
            .session
            .as_ref()
            .is_some_and(|s| s.status == QuizStatus::InProgress && !s.is_paused());
        if !accepting || self.pending_answers.is_empty() {
            return self.pending_answers.len();
        }

        let pending: Vec<(String, String)> = self
            .pending_answers
            .iter()
            .map(|(q, a)| (q.clone(), a.clone()))
            .collect();
        for (question_id, answer) in pending {
            if let Err(e) = self.answer(&question_id, &answer).await {
                tracing::warn!("Resubmitting answer for {} failed: {}", question_id, e);
            }
        }
        self.pending_answers.len()
    }

    /// Flushes unsaved selections, then records `""` for every question that
    /// still has no answer. Returns the number of writes that failed.
    pub async fn fill_forward(&mut self) -> usize {
        let mut failures = self.flush_pending_answers().await;

        let unanswered = match self.session.as_ref() {
            Some(quiz) => quiz
                .unanswered_question_ids()
                .into_iter()
                .filter(|id| !self.pending_answers.contains_key(id))
                .collect::<Vec<_>>(),
            None => return failures,
        };

        for question_id in unanswered {
            if let Err(e) = self.answer(&question_id, "").await {
                tracing::warn!("Recording empty answer for {} failed: {}", question_id, e);
                self.pending_answers.remove(&question_id);
                failures += 1;
            }
        }
        failures
    }

    pub fn clear(&mut self) {
        self.session = None;
        self.current_question_index = 0;
        self.pending_answers.clear();
    }

    fn require_session(&self) -> Result<&QuizSession, QuizError> {
        self.session
            .as_ref()
            .ok_or_else(|| QuizError::ConflictingState("no quiz loaded".to_string()))
    }

    /// Finish or expire. A conflict means another writer closed the quiz
    /// first; the server copy is accepted if it is terminal.
    async fn close(&mut self, op: RemoteOp, retry: RetryConfig) -> Result<QuizSession, QuizError> {
        let id = self.require_session()?.id.clone();

        match self.call(op, id.clone(), retry).await {
            Err(e) if e.is_conflict() => match self.load(&id).await? {
                Some(quiz) if quiz.is_terminal() => {
                    tracing::info!(
                        "Quiz {} already closed as {}",
                        id,
                        quiz.status.as_str()
                    );
                    Ok(quiz)
                }
                _ => Err(e),
            },
            other => other,
        }
    }

    async fn call(
        &mut self,
        op: RemoteOp,
        id: String,
        retry: RetryConfig,
    ) -> Result<QuizSession, QuizError> {
        let api = self.api.clone();
        let quiz = retry_async_when(
            retry,
            |e: &QuizError| matches!(e, QuizError::Network(_)),
            || {
                let api = api.clone();
                let id = id.clone();
                async move {
                    let result = match op {
                        RemoteOp::Start => api.start(&id).await,
                        RemoteOp::Finish => api.finish(&id).await,
                        RemoteOp::Expire => api.expire(&id).await,
                    };
                    if let Err(e) = &result {
                        tracing::warn!("Quiz {} {} failed: {}", id, op.name(), e);
                    }
                    result
                }
            },
        )
        .await?;

        Ok(self.adopt(quiz))
    }
}

fn single_attempt() -> RetryConfig {
    RetryConfig {
        max_attempts: 1,
        ..RetryConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Difficulty;
    use crate::services::quiz_repository::InMemoryQuizRepository;
    use crate::services::quiz_service::QuizService;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Forwards to an in-memory service, counting calls and optionally failing answers.
    struct CountingApi {
        inner: QuizService,
        calls: AtomicUsize,
        fail_answers: AtomicBool,
    }

    impl CountingApi {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                inner: QuizService::new(Arc::new(InMemoryQuizRepository::new())),
                calls: AtomicUsize::new(0),
                fail_answers: AtomicBool::new(false),
            })
        }

        fn hit(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl QuizApi for CountingApi {
        async fn create(&self, request: CreateQuizRequest) -> Result<QuizSession, QuizError> {
            self.hit();
            self.inner.create(request).await
        }
        async fn start(&self, id: &str) -> Result<QuizSession, QuizError> {
            self.hit();
            self.inner.start(id).await
        }
        async fn answer(&self, id: &str, q: &str, a: &str) -> Result<QuizSession, QuizError> {
            self.hit();
            if self.fail_answers.load(Ordering::SeqCst) {
                return Err(QuizError::Network("connection reset".into()));
            }
            self.inner.answer(id, q, a).await
        }
        async fn pause(&self, id: &str, reason: PauseReason) -> Result<QuizSession, QuizError> {
            self.hit();
            self.inner.pause(id, reason).await
        }
        async fn resume(&self, id: &str) -> Result<QuizSession, QuizError> {
            self.hit();
            self.inner.resume(id).await
        }
        async fn finish(&self, id: &str) -> Result<QuizSession, QuizError> {
            self.hit();
            self.inner.finish(id).await
        }
        async fn expire(&self, id: &str) -> Result<QuizSession, QuizError> {
            self.hit();
            self.inner.expire(id).await
        }
        async fn get(&self, id: &str) -> Result<Option<QuizSession>, QuizError> {
            self.hit();
            self.inner.get(id).await
        }
        async fn list(&self) -> Result<Vec<QuizSession>, QuizError> {
            self.hit();
            self.inner.list().await
        }
        async fn delete(&self, id: &str) -> Result<(), QuizError> {
            self.hit();
            self.inner.delete(id).await
        }
    }

    fn config(n: u32) -> QuizConfiguration {
        QuizConfiguration {
            difficulty: Difficulty::Normal,
            number_of_questions: n,
            time_duration: 120,
        }
    }

    fn questions(n: u32) -> Vec<Question> {
        (1..=n)
            .map(|i| Question {
                id: format!("q{}", i),
                text: format!("Question {}", i),
                options: vec!["a".into(), "b".into(), "c".into()],
                correct_answer: "a".into(),
                difficulty: Difficulty::Normal,
                explanation: None,
                code_snippet: None,
                image_reference: None,
            })
            .collect()
    }

    async fn started_store(n: u32) -> (SessionStore, Arc<CountingApi>) {
        let api = CountingApi::new();
        let mut store = SessionStore::new(api.clone());
        let quiz = store.create(config(n), None, questions(n)).await.unwrap();
        store.start(&quiz.id).await.unwrap();
        (store, api)
    }

    #[tokio::test]
    async fn test_invalid_configuration_is_not_sent() {
        let api = CountingApi::new();
        let mut store = SessionStore::new(api.clone());

        let result = store.create(config(0), None, vec![]).await;

        assert!(matches!(result, Err(QuizError::Validation(_))));
        assert_eq!(api.calls(), 0);
        assert!(store.session().is_none());
    }

    #[tokio::test]
    async fn test_answer_keeps_question_index() {
        let (mut store, _) = started_store(3).await;
        store.next();

        store.answer("q1", "b").await.unwrap();

        assert_eq!(store.current_question_index(), 1);
        assert_eq!(store.selected_answer("q1"), Some("b"));
        assert!(store.pending_answers().is_empty());
    }

    #[tokio::test]
    async fn test_navigation_is_clamped() {
        let (mut store, _) = started_store(2).await;

        assert_eq!(store.previous(), 0);
        assert_eq!(store.next(), 1);
        assert_eq!(store.next(), 1);
        assert_eq!(store.current_question().map(|q| q.id.as_str()), Some("q2"));
    }

    #[tokio::test]
    async fn test_pause_while_paused_skips_network() {
        let (mut store, api) = started_store(2).await;

        let first = store.pause(PauseReason::TabChange).await.unwrap();
        let calls = api.calls();
        let second = store.pause(PauseReason::Manual).await.unwrap();

        assert_eq!(api.calls(), calls);
        assert_eq!(second.pause_count, 1);
        assert_eq!(second.paused_at, first.paused_at);
        assert_eq!(second.pause_reason, Some(PauseReason::TabChange));
    }

    #[tokio::test]
    async fn test_resume_when_not_paused() {
        let (mut store, _) = started_store(2).await;
        assert!(matches!(store.resume().await, Err(QuizError::NotPaused)));
    }

    #[tokio::test]
    async fn test_failed_answer_stays_pending_until_flushed() {
        let (mut store, api) = started_store(3).await;

        api.fail_answers.store(true, Ordering::SeqCst);
        assert!(store.answer("q2", "c").await.is_err());
        assert_eq!(store.selected_answer("q2"), Some("c"));
        assert_eq!(store.pending_answers().len(), 1);

        api.fail_answers.store(false, Ordering::SeqCst);
        assert_eq!(store.flush_pending_answers().await, 0);
        assert_eq!(
            store.session().unwrap().answers.get("q2").map(String::as_str),
            Some("c")
        );
    }

    #[tokio::test]
    async fn test_fill_forward_records_empty_answers() {
        let (mut store, _) = started_store(4).await;
        store.answer("q1", "a").await.unwrap();
        store.answer("q3", "b").await.unwrap();

        assert_eq!(store.fill_forward().await, 0);

        let quiz = store.session().unwrap();
        assert_eq!(quiz.answers.len(), 4);
        assert_eq!(quiz.answers["q2"], "");
        assert_eq!(quiz.answers["q4"], "");
        assert_eq!(quiz.answers["q1"], "a");
    }

    #[tokio::test]
    async fn test_finish_after_external_close_accepts_server_state() {
        let (mut store, api) = started_store(1).await;
        let id = store.session().unwrap().id.clone();
        api.inner.expire(&id).await.unwrap();

        let quiz = store.finish().await.unwrap();

        assert_eq!(quiz.status, QuizStatus::Expired);
        assert!(store.session().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let api = CountingApi::new();
        let mut store = SessionStore::new(api);
        assert!(store.load("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_resets_everything() {
        let (mut store, _) = started_store(2).await;
        store.next();
        store.clear();

        assert!(store.session().is_none());
        assert_eq!(store.current_question_index(), 0);
    }
}
