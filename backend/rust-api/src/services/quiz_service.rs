use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use uuid::Uuid;
use validator::Validate;

use crate::error::QuizError;
use crate::metrics::{ANSWERS_SUBMITTED_TOTAL, QUIZZES_ACTIVE, QUIZZES_TOTAL, QUIZ_PAUSES_TOTAL};
use crate::models::{
    CreateQuizRequest, PauseReason, QuizSession, QuizStatus, SubmitAnswerRequest,
};

use super::quiz_repository::QuizRepository;

/// Server-authoritative quiz state machine.
///
/// Every transition on a quiz id runs under that id's lock, so concurrent
/// requests for the same quiz observe each other's writes.
pub struct QuizService {
    repo: Arc<dyn QuizRepository>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl QuizService {
    pub fn new(repo: Arc<dyn QuizRepository>) -> Self {
        Self {
            repo,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn repository(&self) -> &Arc<dyn QuizRepository> {
        &self.repo
    }

    pub async fn create_quiz(&self, req: CreateQuizRequest) -> Result<QuizSession, QuizError> {
        req.validate()?;
        validate_questions(&req)?;

        let now = Utc::now();
        let quiz = QuizSession {
            id: Uuid::new_v4().to_string(),
            configuration: req.configuration,
            questions: req.questions,
            answers: HashMap::new(),
            status: QuizStatus::Pending,
            pause_reason: None,
            paused_at: None,
            pause_count: 0,
            total_paused_ms: 0,
            start_time: None,
            end_time: None,
            score: None,
            correct_count: None,
            incorrect_count: None,
            content_input_id: req.content_input_id,
            created_at: now,
            updated_at: now,
        };

        self.repo.put(&quiz).await?;
        QUIZZES_TOTAL.with_label_values(&["created"]).inc();

        tracing::info!(
            "Quiz created: {} ({} questions, {}s)",
            quiz.id,
            quiz.questions.len(),
            quiz.configuration.time_duration
        );

        Ok(quiz)
    }

    pub async fn get_quiz(&self, id: &str) -> Result<Option<QuizSession>, QuizError> {
        Ok(self.repo.get(id).await?)
    }

    pub async fn list_quizzes(&self) -> Result<Vec<QuizSession>, QuizError> {
        Ok(self.repo.list().await?)
    }

    pub async fn delete_quiz(&self, id: &str) -> Result<(), QuizError> {
        let lock = self.lock_for(id);
        let deleted = {
            let _guard = lock.lock().await;
            self.repo.delete(id).await
        };
        self.release_lock(id, lock);

        if !deleted? {
            return Err(QuizError::NotFound(id.to_string()));
        }
        tracing::info!("Quiz deleted: {}", id);
        Ok(())
    }

    /// pending -> in-progress. Fails with `ConflictingState` for any other status.
    pub async fn start_quiz(&self, id: &str) -> Result<QuizSession, QuizError> {
        let quiz = self
            .transition(id, |quiz, now| {
                if quiz.status != QuizStatus::Pending {
                    return Err(conflict(quiz, "start"));
                }
                quiz.status = QuizStatus::InProgress;
                quiz.start_time = Some(now);
                Ok(true)
            })
            .await?;

        QUIZZES_ACTIVE.inc();
        QUIZZES_TOTAL.with_label_values(&["started"]).inc();
        tracing::info!("Quiz started: {}", id);
        Ok(quiz)
    }

    pub async fn submit_answer(
        &self,
        id: &str,
        req: SubmitAnswerRequest,
    ) -> Result<QuizSession, QuizError> {
        let quiz = self
            .transition(id, |quiz, _| {
                if quiz.status != QuizStatus::InProgress || quiz.is_paused() {
                    return Err(conflict(quiz, "answer"));
                }
                let question = quiz.question(&req.question_id).ok_or_else(|| {
                    QuizError::Validation(format!("unknown question id {}", req.question_id))
                })?;
                if !req.answer.is_empty() && !question.options.contains(&req.answer) {
                    return Err(QuizError::Validation(format!(
                        "answer is not an option of question {}",
                        req.question_id
                    )));
                }
                quiz.answers
                    .insert(req.question_id.clone(), req.answer.clone());
                Ok(true)
            })
            .await?;

        let label = if req.answer.is_empty() { "empty" } else { "choice" };
        ANSWERS_SUBMITTED_TOTAL.with_label_values(&[label]).inc();
        tracing::debug!("Answer stored: quiz={}, question={}", id, req.question_id);
        Ok(quiz)
    }

    /// Pausing an already paused quiz returns it unchanged.
    pub async fn pause_quiz(&self, id: &str, reason: PauseReason) -> Result<QuizSession, QuizError> {
        let mut paused_now = false;
        let quiz = self
            .transition(id, |quiz, now| {
                if quiz.status != QuizStatus::InProgress {
                    return Err(conflict(quiz, "pause"));
                }
                if quiz.is_paused() {
                    return Ok(false);
                }
                quiz.pause_reason = Some(reason);
                quiz.paused_at = Some(now);
                quiz.pause_count += 1;
                paused_now = true;
                Ok(true)
            })
            .await?;

        if paused_now {
            QUIZ_PAUSES_TOTAL.with_label_values(&[reason.as_str()]).inc();
            tracing::info!(
                "Quiz paused: {} reason={} count={}",
                id,
                reason.as_str(),
                quiz.pause_count
            );
        }
        Ok(quiz)
    }

    pub async fn resume_quiz(&self, id: &str) -> Result<QuizSession, QuizError> {
        let quiz = self
            .transition(id, |quiz, now| {
                if quiz.status != QuizStatus::InProgress || !quiz.is_paused() {
                    return Err(QuizError::NotPaused);
                }
                close_pause(quiz, now);
                Ok(true)
            })
            .await?;

        tracing::info!(
            "Quiz resumed: {} total_paused_ms={}",
            id,
            quiz.total_paused_ms
        );
        Ok(quiz)
    }

    pub async fn finish_quiz(&self, id: &str) -> Result<QuizSession, QuizError> {
        self.close_quiz(id, QuizStatus::Completed).await
    }

    /// Same as finish, but records that the timer ended the attempt.
    pub async fn expire_quiz(&self, id: &str) -> Result<QuizSession, QuizError> {
        self.close_quiz(id, QuizStatus::Expired).await
    }

    async fn close_quiz(&self, id: &str, terminal: QuizStatus) -> Result<QuizSession, QuizError> {
        let operation = match terminal {
            QuizStatus::Expired => "expire",
            _ => "finish",
        };

        let quiz = self
            .transition(id, |quiz, now| {
                if quiz.status != QuizStatus::InProgress {
                    return Err(conflict(quiz, operation));
                }
                if quiz.is_paused() {
                    close_pause(quiz, now);
                }
                let tally = quiz.tally();
                quiz.correct_count = Some(tally.correct);
                quiz.incorrect_count = Some(tally.incorrect);
                quiz.score = Some(tally.score);
                quiz.end_time = Some(now);
                quiz.status = terminal;
                Ok(true)
            })
            .await?;

        QUIZZES_ACTIVE.dec();
        QUIZZES_TOTAL
            .with_label_values(&[terminal.as_str()])
            .inc();
        tracing::info!(
            "Quiz {}: {} score={:?} correct={:?} incorrect={:?}",
            terminal.as_str(),
            id,
            quiz.score,
            quiz.correct_count,
            quiz.incorrect_count
        );
        Ok(quiz)
    }

    /// Loads the quiz under its lock, applies `apply` and persists when it reports a change.
    async fn transition<F>(&self, id: &str, apply: F) -> Result<QuizSession, QuizError>
    where
        F: FnOnce(&mut QuizSession, DateTime<Utc>) -> Result<bool, QuizError>,
    {
        let lock = self.lock_for(id);
        let result = {
            let _guard = lock.lock().await;
            self.apply_transition(id, apply).await
        };
        self.release_lock(id, lock);
        result
    }

    async fn apply_transition<F>(&self, id: &str, apply: F) -> Result<QuizSession, QuizError>
    where
        F: FnOnce(&mut QuizSession, DateTime<Utc>) -> Result<bool, QuizError>,
    {
        let mut quiz = self
            .repo
            .get(id)
            .await?
            .ok_or_else(|| QuizError::NotFound(id.to_string()))?;

        let now = Utc::now();
        if apply(&mut quiz, now)? {
            quiz.updated_at = now;
            self.repo.put(&quiz).await?;
        }
        Ok(quiz)
    }

    fn lock_for(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(id.to_string())
            .or_default()
            .clone()
    }

    /// Forgets the id's lock once no other request holds or waits on it.
    /// Clones are only taken under the map lock, so the count cannot race.
    fn release_lock(&self, id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let idle = locks
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current, &lock) && Arc::strong_count(&lock) == 2);
        if idle {
            locks.remove(id);
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

fn conflict(quiz: &QuizSession, operation: &str) -> QuizError {
    let state = if quiz.is_paused() {
        "paused"
    } else {
        quiz.status.as_str()
    };
    QuizError::ConflictingState(format!(
        "cannot {} quiz {} while it is {}",
        operation, quiz.id, state
    ))
}

fn close_pause(quiz: &mut QuizSession, now: DateTime<Utc>) {
    if let Some(paused_at) = quiz.paused_at.take() {
        quiz.total_paused_ms += (now - paused_at).num_milliseconds().max(0);
    }
    quiz.pause_reason = None;
}

fn validate_questions(req: &CreateQuizRequest) -> Result<(), QuizError> {
    let expected = req.configuration.number_of_questions as usize;
    if req.questions.len() != expected {
        return Err(QuizError::Validation(format!(
            "expected {} questions, got {}",
            expected,
            req.questions.len()
        )));
    }

    let mut seen = HashSet::new();
    for question in &req.questions {
        if !seen.insert(question.id.as_str()) {
            return Err(QuizError::Validation(format!(
                "duplicate question id {}",
                question.id
            )));
        }
        if !question.options.contains(&question.correct_answer) {
            return Err(QuizError::Validation(format!(
                "correct answer of question {} is not one of its options",
                question.id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Difficulty, Question, QuizConfiguration};
    use crate::services::quiz_repository::InMemoryQuizRepository;

    fn questions(n: usize) -> Vec<Question> {
        (1..=n)
            .map(|i| Question {
                id: format!("q{}", i),
                text: format!("Question {}", i),
                options: vec!["A".into(), "B".into(), "C".into(), "D".into()],
                correct_answer: "A".into(),
                difficulty: Difficulty::Easy,
                explanation: None,
                code_snippet: None,
                image_reference: None,
            })
            .collect()
    }

    fn request(n: u32) -> CreateQuizRequest {
        CreateQuizRequest {
            configuration: QuizConfiguration {
                difficulty: Difficulty::Easy,
                number_of_questions: n,
                time_duration: 300,
            },
            content_input_id: Some("content-1".into()),
            questions: questions(n as usize),
        }
    }

    fn service() -> QuizService {
        QuizService::new(Arc::new(InMemoryQuizRepository::new()))
    }

    fn answer(question_id: &str, answer: &str) -> SubmitAnswerRequest {
        SubmitAnswerRequest {
            question_id: question_id.into(),
            answer: answer.into(),
        }
    }

    #[tokio::test]
    async fn test_create_rejects_mismatched_question_count() {
        let svc = service();
        let mut req = request(3);
        req.questions.pop();

        let err = svc.create_quiz(req).await.unwrap_err();
        assert!(matches!(err, QuizError::Validation(_)));
    }

    #[tokio::test]
    async fn test_create_rejects_answer_outside_options() {
        let svc = service();
        let mut req = request(2);
        req.questions[1].correct_answer = "E".into();

        let err = svc.create_quiz(req).await.unwrap_err();
        assert!(matches!(err, QuizError::Validation(_)));
    }

    #[tokio::test]
    async fn test_start_twice_conflicts() {
        let svc = service();
        let quiz = svc.create_quiz(request(2)).await.unwrap();

        let started = svc.start_quiz(&quiz.id).await.unwrap();
        assert_eq!(started.status, QuizStatus::InProgress);
        assert!(started.start_time.is_some());

        let err = svc.start_quiz(&quiz.id).await.unwrap_err();
        assert!(matches!(err, QuizError::ConflictingState(_)));

        let reloaded = svc.get_quiz(&quiz.id).await.unwrap().unwrap();
        assert_eq!(reloaded.start_time, started.start_time);
    }

    #[tokio::test]
    async fn test_concurrent_starts_yield_one_start_time() {
        let svc = Arc::new(service());
        let quiz = svc.create_quiz(request(2)).await.unwrap();

        let (a, b) = tokio::join!(svc.start_quiz(&quiz.id), svc.start_quiz(&quiz.id));
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);

        let reloaded = svc.get_quiz(&quiz.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, QuizStatus::InProgress);
        let winner = a.or(b).unwrap();
        assert_eq!(reloaded.start_time, winner.start_time);
    }

    #[tokio::test]
    async fn test_locks_are_released_after_transitions() {
        let svc = Arc::new(service());
        let quiz = svc.create_quiz(request(2)).await.unwrap();

        let (a, b) = tokio::join!(svc.start_quiz(&quiz.id), svc.start_quiz(&quiz.id));
        assert!(a.is_ok() || b.is_ok());
        svc.pause_quiz(&quiz.id, PauseReason::Manual).await.unwrap();
        svc.finish_quiz(&quiz.id).await.unwrap();
        assert!(svc.expire_quiz(&quiz.id).await.is_err());

        assert_eq!(svc.tracked_locks(), 0);

        let other = svc.create_quiz(request(1)).await.unwrap();
        svc.start_quiz(&other.id).await.unwrap();
        svc.delete_quiz(&other.id).await.unwrap();
        assert_eq!(svc.tracked_locks(), 0);
    }

    #[tokio::test]
    async fn test_repeated_pause_counts_one_transition() {
        let svc = service();
        let quiz = svc.create_quiz(request(2)).await.unwrap();
        svc.start_quiz(&quiz.id).await.unwrap();

        for _ in 0..4 {
            svc.pause_quiz(&quiz.id, PauseReason::TabChange).await.unwrap();
        }

        let paused = svc.get_quiz(&quiz.id).await.unwrap().unwrap();
        assert_eq!(paused.pause_count, 1);
        assert_eq!(paused.pause_reason, Some(PauseReason::TabChange));
        assert!(paused.paused_at.is_some());
    }

    #[tokio::test]
    async fn test_resume_clears_pause_and_keeps_answers() {
        let svc = service();
        let quiz = svc.create_quiz(request(2)).await.unwrap();
        svc.start_quiz(&quiz.id).await.unwrap();
        svc.submit_answer(&quiz.id, answer("q1", "A")).await.unwrap();
        let before = svc
            .pause_quiz(&quiz.id, PauseReason::Manual)
            .await
            .unwrap();

        let resumed = svc.resume_quiz(&quiz.id).await.unwrap();

        assert!(resumed.pause_reason.is_none());
        assert!(resumed.paused_at.is_none());
        assert_eq!(resumed.answers, before.answers);
        assert!(resumed.total_paused_ms >= 0);
    }

    #[tokio::test]
    async fn test_resume_without_pause_fails() {
        let svc = service();
        let quiz = svc.create_quiz(request(1)).await.unwrap();
        svc.start_quiz(&quiz.id).await.unwrap();

        let err = svc.resume_quiz(&quiz.id).await.unwrap_err();
        assert!(matches!(err, QuizError::NotPaused));
    }

    #[tokio::test]
    async fn test_answer_while_paused_conflicts() {
        let svc = service();
        let quiz = svc.create_quiz(request(1)).await.unwrap();
        svc.start_quiz(&quiz.id).await.unwrap();
        svc.pause_quiz(&quiz.id, PauseReason::TabChange).await.unwrap();

        let err = svc
            .submit_answer(&quiz.id, answer("q1", "A"))
            .await
            .unwrap_err();
        assert!(matches!(err, QuizError::ConflictingState(_)));
    }

    #[tokio::test]
    async fn test_answer_validation() {
        let svc = service();
        let quiz = svc.create_quiz(request(1)).await.unwrap();
        svc.start_quiz(&quiz.id).await.unwrap();

        let unknown = svc.submit_answer(&quiz.id, answer("q9", "A")).await;
        assert!(matches!(unknown, Err(QuizError::Validation(_))));

        let not_option = svc.submit_answer(&quiz.id, answer("q1", "Z")).await;
        assert!(matches!(not_option, Err(QuizError::Validation(_))));

        let empty = svc.submit_answer(&quiz.id, answer("q1", "")).await.unwrap();
        assert_eq!(empty.answers.get("q1").map(String::as_str), Some(""));
    }

    #[tokio::test]
    async fn test_finish_scores_and_freezes() {
        let svc = service();
        let quiz = svc.create_quiz(request(4)).await.unwrap();
        svc.start_quiz(&quiz.id).await.unwrap();
        svc.submit_answer(&quiz.id, answer("q1", "A")).await.unwrap();
        svc.submit_answer(&quiz.id, answer("q2", "A")).await.unwrap();
        svc.submit_answer(&quiz.id, answer("q3", "B")).await.unwrap();

        let done = svc.finish_quiz(&quiz.id).await.unwrap();
        assert_eq!(done.status, QuizStatus::Completed);
        assert_eq!(done.correct_count, Some(2));
        assert_eq!(done.incorrect_count, Some(2));
        assert_eq!(done.score, Some(50));
        assert!(done.end_time.is_some());

        assert!(svc.finish_quiz(&quiz.id).await.is_err());
        assert!(svc.expire_quiz(&quiz.id).await.is_err());
        assert!(svc
            .pause_quiz(&quiz.id, PauseReason::Manual)
            .await
            .is_err());
        assert!(svc.submit_answer(&quiz.id, answer("q4", "A")).await.is_err());

        let frozen = svc.get_quiz(&quiz.id).await.unwrap().unwrap();
        assert_eq!(frozen, done);
    }

    #[tokio::test]
    async fn test_expire_while_paused_closes_pause() {
        let svc = service();
        let quiz = svc.create_quiz(request(2)).await.unwrap();
        svc.start_quiz(&quiz.id).await.unwrap();
        svc.pause_quiz(&quiz.id, PauseReason::TabChange).await.unwrap();

        let expired = svc.expire_quiz(&quiz.id).await.unwrap();
        assert_eq!(expired.status, QuizStatus::Expired);
        assert!(expired.paused_at.is_none());
        assert!(expired.pause_reason.is_none());
        assert_eq!(expired.incorrect_count, Some(2));
    }

    #[tokio::test]
    async fn test_delete_missing_quiz() {
        let svc = service();
        let err = svc.delete_quiz("nope").await.unwrap_err();
        assert!(matches!(err, QuizError::NotFound(_)));
    }
}
