use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub listen_addr: String,
    /// Redis holds quiz state when set; otherwise quizzes live in process memory.
    pub redis_uri: Option<String>,
    pub quiz_ttl_seconds: u64,
    pub quiz_api_url: String,
    pub init_timeout_ms: u64,
    pub load_retry_attempts: usize,
    pub load_retry_base_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8081".to_string(),
            redis_uri: None,
            quiz_ttl_seconds: 86_400,
            quiz_api_url: "http://localhost:8081".to_string(),
            init_timeout_ms: 12_000,
            load_retry_attempts: 4,
            load_retry_base_ms: 500,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first, then the local one
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/*.toml + ENV overrides (prefix: APP_)
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let defaults = Config::default();

        let listen_addr = settings
            .get_string("server.listen_addr")
            .or_else(|_| env::var("LISTEN_ADDR"))
            .unwrap_or(defaults.listen_addr);

        let redis_uri = settings
            .get_string("redis.uri")
            .or_else(|_| env::var("REDIS_URI"))
            .ok()
            .filter(|uri| !uri.trim().is_empty());

        let quiz_ttl_seconds = read_number(&settings, "quiz.ttl_seconds", "QUIZ_TTL_SECONDS")
            .filter(|v| *v > 0)
            .unwrap_or(defaults.quiz_ttl_seconds);

        let quiz_api_url = settings
            .get_string("quiz_api.url")
            .or_else(|_| env::var("QUIZ_API_URL"))
            .unwrap_or(defaults.quiz_api_url);

        let init_timeout_ms =
            read_number(&settings, "engine.init_timeout_ms", "QUIZ_INIT_TIMEOUT_MS")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.init_timeout_ms);

        let load_retry_attempts =
            read_number(&settings, "engine.load_retry_attempts", "QUIZ_LOAD_RETRY_ATTEMPTS")
                .filter(|v| *v > 0)
                .map(|v| v as usize)
                .unwrap_or(defaults.load_retry_attempts);

        let load_retry_base_ms =
            read_number(&settings, "engine.load_retry_base_ms", "QUIZ_LOAD_RETRY_BASE_MS")
                .unwrap_or(defaults.load_retry_base_ms);

        if env == "prod" && redis_uri.is_none() {
            eprintln!("WARNING: REDIS_URI not set in production, quizzes will not survive restarts");
        }

        Ok(Config {
            listen_addr,
            redis_uri,
            quiz_ttl_seconds,
            quiz_api_url,
            init_timeout_ms,
            load_retry_attempts,
            load_retry_base_ms,
        })
    }
}

fn read_number(settings: &config::Config, key: &str, env_key: &str) -> Option<u64> {
    settings
        .get_int(key)
        .ok()
        .and_then(|v| u64::try_from(v).ok())
        .or_else(|| env::var(env_key).ok().and_then(|v| v.parse::<u64>().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_load_reads_env_overrides() {
        env::set_var("SKIP_ROOT_ENV", "1");
        env::set_var("QUIZ_TTL_SECONDS", "120");
        env::set_var("QUIZ_INIT_TIMEOUT_MS", "5000");
        env::set_var("REDIS_URI", "");

        let config = Config::load().expect("config loads");

        assert_eq!(config.quiz_ttl_seconds, 120);
        assert_eq!(config.init_timeout_ms, 5000);
        assert!(config.redis_uri.is_none());

        env::remove_var("QUIZ_TTL_SECONDS");
        env::remove_var("QUIZ_INIT_TIMEOUT_MS");
        env::remove_var("REDIS_URI");
    }

    #[test]
    #[serial]
    fn test_load_ignores_invalid_numbers() {
        env::set_var("SKIP_ROOT_ENV", "1");
        env::set_var("QUIZ_LOAD_RETRY_ATTEMPTS", "many");

        let config = Config::load().expect("config loads");

        assert_eq!(config.load_retry_attempts, 4);
        env::remove_var("QUIZ_LOAD_RETRY_ATTEMPTS");
    }
}
