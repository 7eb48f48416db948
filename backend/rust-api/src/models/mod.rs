use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::Validate;

pub mod timer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Difficulty {
    Easy,
    Normal,
    Hard,
    Master,
}

/// One week; longer attempts are rejected at creation.
pub const MAX_TIME_DURATION_SECS: u64 = 7 * 24 * 60 * 60;

/// Immutable quiz settings, fixed when the quiz is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct QuizConfiguration {
    pub difficulty: Difficulty,
    #[validate(range(min = 1, max = 100))]
    pub number_of_questions: u32,
    /// Seconds allotted for the whole attempt.
    #[validate(range(min = 1, max = MAX_TIME_DURATION_SECS))]
    pub time_duration: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    #[validate(length(min = 1))]
    pub id: String,
    #[validate(length(min = 1))]
    pub text: String,
    #[validate(length(min = 1))]
    pub options: Vec<String>,
    pub correct_answer: String,
    pub difficulty: Difficulty,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_reference: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuizStatus {
    Pending,
    InProgress,
    Completed,
    Expired,
}

impl QuizStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, QuizStatus::Completed | QuizStatus::Expired)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QuizStatus::Pending => "pending",
            QuizStatus::InProgress => "in-progress",
            QuizStatus::Completed => "completed",
            QuizStatus::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PauseReason {
    TabChange,
    Manual,
}

impl PauseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            PauseReason::TabChange => "tab-change",
            PauseReason::Manual => "manual",
        }
    }
}

/// One quiz attempt, from creation to a terminal status.
///
/// The quiz service is the only writer of `status`, `start_time`,
/// `paused_at` and the score fields; clients treat them as read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSession {
    pub id: String,
    pub configuration: QuizConfiguration,
    pub questions: Vec<Question>,
    /// Question id -> submitted answer. A missing key means unanswered.
    #[serde(default)]
    pub answers: HashMap<String, String>,
    pub status: QuizStatus,
    #[serde(default)]
    pub pause_reason: Option<PauseReason>,
    #[serde(default)]
    pub paused_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pause_count: u32,
    /// Total length of pauses that have already ended.
    #[serde(default)]
    pub total_paused_ms: i64,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub score: Option<u32>,
    #[serde(default)]
    pub correct_count: Option<u32>,
    #[serde(default)]
    pub incorrect_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_input_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QuizSession {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_paused(&self) -> bool {
        self.pause_reason.is_some()
    }

    pub fn question(&self, question_id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == question_id)
    }

    /// Questions with no recorded answer, in quiz order.
    pub fn unanswered_question_ids(&self) -> Vec<String> {
        self.questions
            .iter()
            .filter(|q| !self.answers.contains_key(&q.id))
            .map(|q| q.id.clone())
            .collect()
    }

    /// Literal correct/incorrect tally. Unanswered questions count as incorrect.
    pub fn tally(&self) -> ScoreTally {
        let total = self.questions.len() as u32;
        let correct = self
            .questions
            .iter()
            .filter(|q| {
                self.answers
                    .get(&q.id)
                    .is_some_and(|answer| *answer == q.correct_answer)
            })
            .count() as u32;

        let score = if total == 0 {
            0
        } else {
            ((correct as f64 / total as f64) * 100.0).round() as u32
        };

        ScoreTally {
            correct,
            incorrect: total - correct,
            score,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScoreTally {
    pub correct: u32,
    pub incorrect: u32,
    pub score: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateQuizRequest {
    #[validate(nested)]
    pub configuration: QuizConfiguration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_input_id: Option<String>,
    #[validate(nested)]
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswerRequest {
    pub question_id: String,
    pub answer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PauseRequest {
    pub reason: PauseReason,
}

/// Success envelope shared by every quiz endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub success: bool,
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}
