use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::metrics::{record_cache_hit, record_cache_miss, track_cache_operation};
use crate::models::QuizSession;

/// Storage contract for quiz sessions.
///
/// Implementations only store and fetch; transition rules live in `QuizService`.
#[async_trait]
pub trait QuizRepository: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<QuizSession>>;

    async fn put(&self, quiz: &QuizSession) -> Result<()>;

    async fn list(&self) -> Result<Vec<QuizSession>>;

    /// Returns `false` when there was nothing to delete.
    async fn delete(&self, id: &str) -> Result<bool>;

    async fn ping(&self) -> Result<()>;
}

#[derive(Clone, Default)]
pub struct InMemoryQuizRepository {
    quizzes: Arc<RwLock<HashMap<String, QuizSession>>>,
}

impl InMemoryQuizRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QuizRepository for InMemoryQuizRepository {
    async fn get(&self, id: &str) -> Result<Option<QuizSession>> {
        Ok(self.quizzes.read().await.get(id).cloned())
    }

    async fn put(&self, quiz: &QuizSession) -> Result<()> {
        self.quizzes
            .write()
            .await
            .insert(quiz.id.clone(), quiz.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<QuizSession>> {
        let mut quizzes: Vec<QuizSession> = self.quizzes.read().await.values().cloned().collect();
        quizzes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(quizzes)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.quizzes.write().await.remove(id).is_some())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

const QUIZ_INDEX_KEY: &str = "quizzes";

/// Quizzes stored as JSON under `quiz:{id}` with a TTL, plus an index set of ids.
#[derive(Clone)]
pub struct RedisQuizRepository {
    redis: ConnectionManager,
    ttl_seconds: u64,
}

impl RedisQuizRepository {
    pub fn new(redis: ConnectionManager, ttl_seconds: u64) -> Self {
        Self { redis, ttl_seconds }
    }

    fn quiz_key(id: &str) -> String {
        format!("quiz:{}", id)
    }
}

#[async_trait]
impl QuizRepository for RedisQuizRepository {
    async fn get(&self, id: &str) -> Result<Option<QuizSession>> {
        let mut conn = self.redis.clone();
        let key = Self::quiz_key(id);

        let raw: Option<String> = track_cache_operation("get", async {
            redis::cmd("GET")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .context("Failed to read quiz from Redis")
        })
        .await?;

        match raw {
            Some(json) => {
                record_cache_hit();
                let quiz = serde_json::from_str(&json).context("Corrupted quiz payload")?;
                Ok(Some(quiz))
            }
            None => {
                record_cache_miss();
                Ok(None)
            }
        }
    }

    async fn put(&self, quiz: &QuizSession) -> Result<()> {
        let mut conn = self.redis.clone();
        let key = Self::quiz_key(&quiz.id);
        let json = serde_json::to_string(quiz)?;

        track_cache_operation("setex", async {
            redis::pipe()
                .cmd("SETEX")
                .arg(&key)
                .arg(self.ttl_seconds)
                .arg(json)
                .ignore()
                .cmd("SADD")
                .arg(QUIZ_INDEX_KEY)
                .arg(&quiz.id)
                .ignore()
                .query_async::<()>(&mut conn)
                .await
                .context("Failed to save quiz to Redis")
        })
        .await
    }

    async fn list(&self) -> Result<Vec<QuizSession>> {
        let mut conn = self.redis.clone();
        let ids: Vec<String> = redis::cmd("SMEMBERS")
            .arg(QUIZ_INDEX_KEY)
            .query_async(&mut conn)
            .await
            .context("Failed to read quiz index from Redis")?;

        let mut quizzes = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get(&id).await? {
                Some(quiz) => quizzes.push(quiz),
                None => {
                    // Expired by TTL; drop the stale index entry
                    let _: redis::RedisResult<()> = redis::cmd("SREM")
                        .arg(QUIZ_INDEX_KEY)
                        .arg(&id)
                        .query_async(&mut conn)
                        .await;
                }
            }
        }
        quizzes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(quizzes)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut conn = self.redis.clone();
        let key = Self::quiz_key(id);

        let (removed, _): (u32, u32) = track_cache_operation("del", async {
            redis::pipe()
                .cmd("DEL")
                .arg(&key)
                .cmd("SREM")
                .arg(QUIZ_INDEX_KEY)
                .arg(id)
                .query_async(&mut conn)
                .await
                .context("Failed to delete quiz from Redis")
        })
        .await?;

        Ok(removed > 0)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.redis.clone();
        tokio::time::timeout(
            std::time::Duration::from_millis(500),
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis timeout after 500ms"))??;
        Ok(())
    }
}
