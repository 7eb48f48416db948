use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

use crate::config::Config;
use crate::error::QuizError;
use crate::models::{
    ApiErrorBody, ApiResponse, CreateQuizRequest, PauseReason, PauseRequest, QuizSession,
    SubmitAnswerRequest,
};
use crate::services::quiz_service::QuizService;

/// Quiz operations as seen by the session engine.
#[async_trait]
pub trait QuizApi: Send + Sync {
    async fn create(&self, request: CreateQuizRequest) -> Result<QuizSession, QuizError>;

    async fn start(&self, id: &str) -> Result<QuizSession, QuizError>;

    async fn answer(
        &self,
        id: &str,
        question_id: &str,
        answer: &str,
    ) -> Result<QuizSession, QuizError>;

    async fn pause(&self, id: &str, reason: PauseReason) -> Result<QuizSession, QuizError>;

    async fn resume(&self, id: &str) -> Result<QuizSession, QuizError>;

    async fn finish(&self, id: &str) -> Result<QuizSession, QuizError>;

    async fn expire(&self, id: &str) -> Result<QuizSession, QuizError>;

    /// `Ok(None)` when the quiz does not exist (yet).
    async fn get(&self, id: &str) -> Result<Option<QuizSession>, QuizError>;

    async fn list(&self) -> Result<Vec<QuizSession>, QuizError>;

    async fn delete(&self, id: &str) -> Result<(), QuizError>;
}

#[async_trait]
impl QuizApi for QuizService {
    async fn create(&self, request: CreateQuizRequest) -> Result<QuizSession, QuizError> {
        self.create_quiz(request).await
    }

    async fn start(&self, id: &str) -> Result<QuizSession, QuizError> {
        self.start_quiz(id).await
    }

    async fn answer(
        &self,
        id: &str,
        question_id: &str,
        answer: &str,
    ) -> Result<QuizSession, QuizError> {
        let request = SubmitAnswerRequest {
            question_id: question_id.to_string(),
            answer: answer.to_string(),
        };
        self.submit_answer(id, request).await
    }

    async fn pause(&self, id: &str, reason: PauseReason) -> Result<QuizSession, QuizError> {
        self.pause_quiz(id, reason).await
    }

    async fn resume(&self, id: &str) -> Result<QuizSession, QuizError> {
        self.resume_quiz(id).await
    }

    async fn finish(&self, id: &str) -> Result<QuizSession, QuizError> {
        self.finish_quiz(id).await
    }

    async fn expire(&self, id: &str) -> Result<QuizSession, QuizError> {
        self.expire_quiz(id).await
    }

    async fn get(&self, id: &str) -> Result<Option<QuizSession>, QuizError> {
        self.get_quiz(id).await
    }

    async fn list(&self) -> Result<Vec<QuizSession>, QuizError> {
        self.list_quizzes().await
    }

    async fn delete(&self, id: &str) -> Result<(), QuizError> {
        self.delete_quiz(id).await
    }
}

/// `QuizApi` over the service's HTTP routes.
#[derive(Clone)]
pub struct HttpQuizApi {
    http_client: reqwest::Client,
    base_url: Url,
}

impl HttpQuizApi {
    pub fn new(base_url: &str) -> Result<Self, QuizError> {
        Self::with_timeout(base_url, Duration::from_secs(10))
    }

    /// Client for `Config::quiz_api_url`.
    pub fn from_config(config: &Config) -> Result<Self, QuizError> {
        Self::new(&config.quiz_api_url)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, QuizError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| QuizError::Validation(format!("invalid quiz API url: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(QuizError::Validation(format!(
                "quiz API url cannot be a base: {}",
                base_url
            )));
        }

        let http_client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // cannot_be_a_base was rejected in the constructor
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("quizzes").extend(segments);
        }
        url
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, QuizError> {
        let response = request.send().await?;
        if response.status().is_success() {
            let envelope: ApiResponse<T> = response.json().await?;
            return Ok(envelope.data);
        }

        Err(Self::error_from(response).await)
    }

    /// Rebuilds the typed error from an error envelope, or from the bare status
    /// when the body is not one (e.g. axum's own JSON rejections).
    async fn error_from(response: reqwest::Response) -> QuizError {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let (code, message) = match serde_json::from_str::<ApiErrorBody>(&text) {
            Ok(body) => (body.error.code, body.error.message),
            Err(_) => (String::new(), text),
        };
        tracing::debug!("Quiz API returned {}: {} {}", status, code, message);
        QuizError::from_api(status, &code, message)
    }

    async fn post_action(&self, id: &str, action: &str) -> Result<QuizSession, QuizError> {
        self.send(self.http_client.post(self.url(&[id, action])))
            .await
    }
}

#[async_trait]
impl QuizApi for HttpQuizApi {
    async fn create(&self, request: CreateQuizRequest) -> Result<QuizSession, QuizError> {
        self.send(self.http_client.post(self.url(&[])).json(&request))
            .await
    }

    async fn start(&self, id: &str) -> Result<QuizSession, QuizError> {
        self.post_action(id, "start").await
    }

    async fn answer(
        &self,
        id: &str,
        question_id: &str,
        answer: &str,
    ) -> Result<QuizSession, QuizError> {
        let body = SubmitAnswerRequest {
            question_id: question_id.to_string(),
            answer: answer.to_string(),
        };
        self.send(self.http_client.post(self.url(&[id, "answer"])).json(&body))
            .await
    }

    async fn pause(&self, id: &str, reason: PauseReason) -> Result<QuizSession, QuizError> {
        let body = PauseRequest { reason };
        self.send(self.http_client.post(self.url(&[id, "pause"])).json(&body))
            .await
    }

    async fn resume(&self, id: &str) -> Result<QuizSession, QuizError> {
        self.post_action(id, "resume").await
    }

    async fn finish(&self, id: &str) -> Result<QuizSession, QuizError> {
        self.post_action(id, "finish").await
    }

    async fn expire(&self, id: &str) -> Result<QuizSession, QuizError> {
        self.post_action(id, "expire").await
    }

    async fn get(&self, id: &str) -> Result<Option<QuizSession>, QuizError> {
        match self.send(self.http_client.get(self.url(&[id]))).await {
            Ok(quiz) => Ok(Some(quiz)),
            Err(QuizError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list(&self) -> Result<Vec<QuizSession>, QuizError> {
        self.send(self.http_client.get(self.url(&[]))).await
    }

    async fn delete(&self, id: &str) -> Result<(), QuizError> {
        let response = self.http_client.delete(self.url(&[id])).send().await?;
        if response.status().is_success() {
            return Ok(());
        }
        Err(Self::error_from(response).await)
    }
}
