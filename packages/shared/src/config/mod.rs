pub mod rank_ladder;

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::config::rank_ladder::{LadderError, RankLadder};
use crate::models::match_session::SessionTimings;
use crate::repositories::atomic::RetryPolicy;

#[derive(Debug)]
pub enum ConfigError {
    InvalidValue { name: String, value: String },
    LadderFile { path: String, message: String },
    Ladder(LadderError),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue { name, value } => {
                write!(f, "Invalid value for {}: {}", name, value)
            }
            ConfigError::LadderFile { path, message } => {
                write!(f, "Could not read rank ladder {}: {}", path, message)
            }
            ConfigError::Ladder(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<LadderError> for ConfigError {
    fn from(e: LadderError) -> Self {
        ConfigError::Ladder(e)
    }
}

/// Everything the engine needs, read once at start-up and passed into constructors.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub store_table: String,
    pub countdown: Duration,
    pub match_duration: Duration,
    pub history_retention: usize,
    pub history_page_size: usize,
    pub starting_balance: i64,
    pub retry: RetryPolicy,
    pub subscription_poll: Duration,
    pub ladder: RankLadder,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            store_table: "match-engine".to_string(),
            countdown: Duration::from_millis(3000),
            match_duration: Duration::from_millis(15000),
            history_retention: 100,
            history_page_size: 20,
            starting_balance: 1000,
            retry: RetryPolicy::default(),
            subscription_poll: Duration::from_millis(500),
            ladder: RankLadder::standard(),
        }
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            value,
        }),
        Err(_) => Ok(default),
    }
}

fn millis_var(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    parse_var(name, default_ms).map(Duration::from_millis)
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = EngineConfig::default();

        let ladder = match env::var("RANK_LADDER_PATH") {
            Ok(path) => {
                let json = std::fs::read_to_string(&path).map_err(|e| ConfigError::LadderFile {
                    path: path.clone(),
                    message: e.to_string(),
                })?;
                RankLadder::from_json(&json)?
            }
            Err(_) => defaults.ladder,
        };

        let retry = RetryPolicy {
            max_attempts: parse_var("RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
            base_delay: millis_var("RETRY_BASE_DELAY_MS", defaults.retry.base_delay)?,
            max_delay: millis_var("RETRY_MAX_DELAY_MS", defaults.retry.max_delay)?,
        };
        if retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                name: "RETRY_MAX_ATTEMPTS".to_string(),
                value: "0".to_string(),
            });
        }

        Ok(EngineConfig {
            store_table: env::var("STORE_TABLE").unwrap_or(defaults.store_table),
            countdown: millis_var("COUNTDOWN_MS", defaults.countdown)?,
            match_duration: millis_var("MATCH_DURATION_MS", defaults.match_duration)?,
            history_retention: parse_var("HISTORY_RETENTION", defaults.history_retention)?,
            history_page_size: parse_var("HISTORY_PAGE_SIZE", defaults.history_page_size)?,
            starting_balance: parse_var("STARTING_BALANCE", defaults.starting_balance)?,
            retry,
            subscription_poll: millis_var("SUBSCRIPTION_POLL_MS", defaults.subscription_poll)?,
            ladder,
        })
    }

    pub fn session_timings(&self) -> SessionTimings {
        SessionTimings {
            countdown: chrono::Duration::from_std(self.countdown)
                .unwrap_or_else(|_| chrono::Duration::milliseconds(3000)),
            match_duration: chrono::Duration::from_std(self.match_duration)
                .unwrap_or_else(|_| chrono::Duration::milliseconds(15000)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Environment variables are process-wide; keep every env-touching assertion in one test.
    #[test]
    fn test_from_env_defaults_and_overrides() {
        for name in [
            "STORE_TABLE",
            "COUNTDOWN_MS",
            "MATCH_DURATION_MS",
            "RETRY_MAX_ATTEMPTS",
            "RANK_LADDER_PATH",
        ] {
            env::remove_var(name);
        }

        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.countdown, Duration::from_millis(3000));
        assert_eq!(config.match_duration, Duration::from_millis(15000));
        assert_eq!(config.retry.max_attempts, 8);
        assert_eq!(config.ladder, RankLadder::standard());

        env::set_var("STORE_TABLE", "arena");
        env::set_var("MATCH_DURATION_MS", "20000");
        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.store_table, "arena");
        assert_eq!(config.match_duration, Duration::from_millis(20000));

        env::set_var("COUNTDOWN_MS", "soon");
        assert!(matches!(
            EngineConfig::from_env(),
            Err(ConfigError::InvalidValue { .. })
        ));
        env::remove_var("COUNTDOWN_MS");

        env::set_var("RETRY_MAX_ATTEMPTS", "0");
        assert!(EngineConfig::from_env().is_err());
        env::remove_var("RETRY_MAX_ATTEMPTS");

        let path = env::temp_dir().join(format!("ladder-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, serde_json::to_string(&RankLadder::division()).unwrap()).unwrap();
        env::set_var("RANK_LADDER_PATH", &path);
        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.ladder, RankLadder::division());

        env::set_var("RANK_LADDER_PATH", "/definitely/not/here.json");
        assert!(matches!(
            EngineConfig::from_env(),
            Err(ConfigError::LadderFile { .. })
        ));

        env::remove_var("RANK_LADDER_PATH");
        env::remove_var("STORE_TABLE");
        env::remove_var("MATCH_DURATION_MS");
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_session_timings_follow_config() {
        let config = EngineConfig {
            countdown: Duration::from_millis(10),
            match_duration: Duration::from_millis(50),
            ..EngineConfig::default()
        };
        let timings = config.session_timings();
        assert_eq!(timings.countdown, chrono::Duration::milliseconds(10));
        assert_eq!(timings.match_duration, chrono::Duration::milliseconds(50));
    }
}
