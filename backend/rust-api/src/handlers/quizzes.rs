use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::error::QuizError;
use crate::models::{ApiResponse, CreateQuizRequest, PauseRequest, SubmitAnswerRequest};
use crate::services::AppState;

/// POST /quizzes
pub async fn create_quiz(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateQuizRequest>,
) -> Result<impl IntoResponse, QuizError> {
    tracing::info!(
        "Creating quiz: difficulty={:?}, questions={}, duration={}s",
        payload.configuration.difficulty,
        payload.configuration.number_of_questions,
        payload.configuration.time_duration
    );

    let quiz = state.quizzes.create_quiz(payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(quiz))))
}

/// GET /quizzes
pub async fn list_quizzes(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, QuizError> {
    let quizzes = state.quizzes.list_quizzes().await?;
    Ok(Json(ApiResponse::ok(quizzes)))
}

/// GET /quizzes/{id}
pub async fn get_quiz(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, QuizError> {
    let quiz = state
        .quizzes
        .get_quiz(&id)
        .await?
        .ok_or_else(|| QuizError::NotFound(id))?;
    Ok(Json(ApiResponse::ok(quiz)))
}

/// DELETE /quizzes/{id}
pub async fn delete_quiz(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, QuizError> {
    state.quizzes.delete_quiz(&id).await?;
    tracing::info!("Quiz deleted: {}", id);
    Ok(StatusCode::NO_CONTENT)
}

/// POST /quizzes/{id}/start
pub async fn start_quiz(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, QuizError> {
    let quiz = state.quizzes.start_quiz(&id).await?;
    Ok(Json(ApiResponse::ok(quiz)))
}

/// POST /quizzes/{id}/answer
pub async fn submit_answer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<SubmitAnswerRequest>,
) -> Result<impl IntoResponse, QuizError> {
    let quiz = state.quizzes.submit_answer(&id, payload).await?;
    Ok(Json(ApiResponse::ok(quiz)))
}

/// POST /quizzes/{id}/pause
pub async fn pause_quiz(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<PauseRequest>,
) -> Result<impl IntoResponse, QuizError> {
    let quiz = state.quizzes.pause_quiz(&id, payload.reason).await?;
    Ok(Json(ApiResponse::ok(quiz)))
}

/// POST /quizzes/{id}/resume
pub async fn resume_quiz(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, QuizError> {
    let quiz = state.quizzes.resume_quiz(&id).await?;
    Ok(Json(ApiResponse::ok(quiz)))
}

/// POST /quizzes/{id}/finish
pub async fn finish_quiz(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, QuizError> {
    let quiz = state.quizzes.finish_quiz(&id).await?;
    Ok(Json(ApiResponse::ok(quiz)))
}

/// POST /quizzes/{id}/expire
pub async fn expire_quiz(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, QuizError> {
    let quiz = state.quizzes.expire_quiz(&id).await?;
    Ok(Json(ApiResponse::ok(quiz)))
}
