use crate::config::Config;
use crate::utils::retry::{retry_async_with_config, RetryConfig};
use std::sync::Arc;

use quiz_repository::{InMemoryQuizRepository, QuizRepository, RedisQuizRepository};
use quiz_service::QuizService;

pub struct AppState {
    pub config: Config,
    pub quizzes: Arc<QuizService>,
}

impl AppState {
    /// Connects to Redis when `redis_uri` is configured; otherwise keeps quizzes in memory.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let repo: Arc<dyn QuizRepository> = match config.redis_uri.as_deref() {
            Some(uri) => {
                tracing::info!("Attempting to connect to Redis...");
                let client = redis::Client::open(uri)?;

                let redis = tokio::time::timeout(
                    std::time::Duration::from_secs(30),
                    redis::aio::ConnectionManager::new(client),
                )
                .await
                .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

                retry_async_with_config(RetryConfig::default(), || {
                    let mut conn = redis.clone();
                    async move {
                        let pong = tokio::time::timeout(
                            std::time::Duration::from_secs(5),
                            redis::cmd("PING").query_async::<String>(&mut conn),
                        )
                        .await
                        .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;
                        Ok::<_, anyhow::Error>(pong)
                    }
                })
                .await?;

                tracing::info!("Redis connection established successfully");
                Arc::new(RedisQuizRepository::new(redis, config.quiz_ttl_seconds))
            }
            None => {
                tracing::warn!("REDIS_URI not configured, using in-memory quiz storage");
                Arc::new(InMemoryQuizRepository::new())
            }
        };

        Ok(Self::with_repository(config, repo))
    }

    pub fn with_repository(config: Config, repo: Arc<dyn QuizRepository>) -> Self {
        Self {
            config,
            quizzes: Arc::new(QuizService::new(repo)),
        }
    }
}

pub mod quiz_repository;
pub mod quiz_service;
