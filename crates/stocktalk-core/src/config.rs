//! Application configuration
//!
//! Policy constants live here rather than in code: cache TTL classes, the
//! discussion cap, the task staleness threshold, and the retry profiles are
//! all tunable per deployment.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

const ENV_CHANNEL_SECRET: &str = "STOCKTALK_CHANNEL_SECRET";
const ENV_CHANNEL_TOKEN: &str = "STOCKTALK_CHANNEL_TOKEN";
const ENV_MESSAGING_API_BASE: &str = "STOCKTALK_MESSAGING_API_BASE";
const ENV_BIND_ADDR: &str = "STOCKTALK_BIND_ADDR";

/// Configuration for the stocktalk service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Shared secret used to verify webhook signatures
    pub channel_secret: String,

    /// Bearer token for the outbound messaging API
    pub channel_token: String,

    /// Base URL of the outbound messaging API
    pub messaging_api_base: String,

    /// Address the webhook server binds to
    pub bind_addr: String,

    /// TTL for per-subject analysis artifacts
    pub subject_cache_ttl: Duration,

    /// TTL for aggregate recommendation artifacts
    pub recommend_cache_ttl: Duration,

    /// Lifetime of a conversation session
    pub session_ttl: Duration,

    /// Maximum discussion rounds per session
    pub discussion_cap: u8,

    /// Age past which a processing task is failed by the poller
    pub task_stale_after: Duration,

    /// Suggested poll interval returned with "in progress" replies
    pub poll_retry_hint: Duration,

    /// Subjects screened per batch during recommendation runs
    pub screen_batch_size: usize,

    /// Pause between screening batches
    pub screen_batch_delay: Duration,

    /// Retry profile for market data calls
    pub market_retry: RetryPolicy,

    /// Retry profile for AI generation calls
    pub ai_retry: RetryPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            channel_secret: String::new(),
            channel_token: String::new(),
            messaging_api_base: "http://127.0.0.1:9000".to_string(),
            bind_addr: "0.0.0.0:8080".to_string(),
            subject_cache_ttl: Duration::from_secs(6 * 3600),
            recommend_cache_ttl: Duration::from_secs(4 * 3600),
            session_ttl: Duration::from_secs(12 * 3600),
            discussion_cap: 5,
            task_stale_after: Duration::from_secs(90),
            poll_retry_hint: Duration::from_secs(10),
            screen_batch_size: 5,
            screen_batch_delay: Duration::from_secs(1),
            market_retry: RetryPolicy::fast(),
            ai_retry: RetryPolicy::slow(),
        }
    }
}

impl AppConfig {
    /// Create a new configuration builder
    pub fn builder() -> AppConfigBuilder {
        AppConfigBuilder::default()
    }

    /// Load configuration from the environment.
    ///
    /// `STOCKTALK_CHANNEL_SECRET` and `STOCKTALK_CHANNEL_TOKEN` are required;
    /// the messaging API base and bind address fall back to defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self {
            channel_secret: require_env(ENV_CHANNEL_SECRET)?,
            channel_token: require_env(ENV_CHANNEL_TOKEN)?,
            ..Self::default()
        };

        if let Ok(base) = std::env::var(ENV_MESSAGING_API_BASE) {
            config.messaging_api_base = base;
        }
        if let Ok(addr) = std::env::var(ENV_BIND_ADDR) {
            config.bind_addr = addr;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.discussion_cap == 0 {
            return Err(Error::Config(
                "discussion_cap must be greater than 0".to_string(),
            ));
        }

        if self.screen_batch_size == 0 {
            return Err(Error::Config(
                "screen_batch_size must be greater than 0".to_string(),
            ));
        }

        if self.market_retry.max_attempts == 0 || self.ai_retry.max_attempts == 0 {
            return Err(Error::Config(
                "retry profiles need at least one attempt".to_string(),
            ));
        }

        if self.task_stale_after.is_zero() {
            return Err(Error::Config(
                "task_stale_after must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("environment variable {name} is not set")))
}

/// Builder for [`AppConfig`]
#[derive(Debug, Default)]
pub struct AppConfigBuilder {
    channel_secret: Option<String>,
    channel_token: Option<String>,
    messaging_api_base: Option<String>,
    bind_addr: Option<String>,
    subject_cache_ttl: Option<Duration>,
    recommend_cache_ttl: Option<Duration>,
    session_ttl: Option<Duration>,
    discussion_cap: Option<u8>,
    task_stale_after: Option<Duration>,
    poll_retry_hint: Option<Duration>,
    screen_batch_size: Option<usize>,
    screen_batch_delay: Option<Duration>,
    market_retry: Option<RetryPolicy>,
    ai_retry: Option<RetryPolicy>,
}

impl AppConfigBuilder {
    /// Set the webhook signing secret
    pub fn channel_secret(mut self, secret: impl Into<String>) -> Self {
        self.channel_secret = Some(secret.into());
        self
    }

    /// Set the messaging API token
    pub fn channel_token(mut self, token: impl Into<String>) -> Self {
        self.channel_token = Some(token.into());
        self
    }

    /// Set the messaging API base URL
    pub fn messaging_api_base(mut self, base: impl Into<String>) -> Self {
        self.messaging_api_base = Some(base.into());
        self
    }

    /// Set the webhook bind address
    pub fn bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = Some(addr.into());
        self
    }

    /// Set the per-subject artifact TTL
    pub fn subject_cache_ttl(mut self, ttl: Duration) -> Self {
        self.subject_cache_ttl = Some(ttl);
        self
    }

    /// Set the aggregate recommendation TTL
    pub fn recommend_cache_ttl(mut self, ttl: Duration) -> Self {
        self.recommend_cache_ttl = Some(ttl);
        self
    }

    /// Set the session lifetime
    pub fn session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = Some(ttl);
        self
    }

    /// Set the discussion round cap
    pub fn discussion_cap(mut self, cap: u8) -> Self {
        self.discussion_cap = Some(cap);
        self
    }

    /// Set the task staleness threshold
    pub fn task_stale_after(mut self, threshold: Duration) -> Self {
        self.task_stale_after = Some(threshold);
        self
    }

    /// Set the suggested poll interval
    pub fn poll_retry_hint(mut self, hint: Duration) -> Self {
        self.poll_retry_hint = Some(hint);
        self
    }

    /// Set the screening batch size
    pub fn screen_batch_size(mut self, size: usize) -> Self {
        self.screen_batch_size = Some(size);
        self
    }

    /// Set the pause between screening batches
    pub fn screen_batch_delay(mut self, delay: Duration) -> Self {
        self.screen_batch_delay = Some(delay);
        self
    }

    /// Set the market data retry profile
    pub fn market_retry(mut self, policy: RetryPolicy) -> Self {
        self.market_retry = Some(policy);
        self
    }

    /// Set the AI generation retry profile
    pub fn ai_retry(mut self, policy: RetryPolicy) -> Self {
        self.ai_retry = Some(policy);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<AppConfig> {
        let defaults = AppConfig::default();

        let config = AppConfig {
            channel_secret: self.channel_secret.unwrap_or(defaults.channel_secret),
            channel_token: self.channel_token.unwrap_or(defaults.channel_token),
            messaging_api_base: self
                .messaging_api_base
                .unwrap_or(defaults.messaging_api_base),
            bind_addr: self.bind_addr.unwrap_or(defaults.bind_addr),
            subject_cache_ttl: self.subject_cache_ttl.unwrap_or(defaults.subject_cache_ttl),
            recommend_cache_ttl: self
                .recommend_cache_ttl
                .unwrap_or(defaults.recommend_cache_ttl),
            session_ttl: self.session_ttl.unwrap_or(defaults.session_ttl),
            discussion_cap: self.discussion_cap.unwrap_or(defaults.discussion_cap),
            task_stale_after: self.task_stale_after.unwrap_or(defaults.task_stale_after),
            poll_retry_hint: self.poll_retry_hint.unwrap_or(defaults.poll_retry_hint),
            screen_batch_size: self.screen_batch_size.unwrap_or(defaults.screen_batch_size),
            screen_batch_delay: self
                .screen_batch_delay
                .unwrap_or(defaults.screen_batch_delay),
            market_retry: self.market_retry.unwrap_or(defaults.market_retry),
            ai_retry: self.ai_retry.unwrap_or(defaults.ai_retry),
        };

        config.validate()?;
        Ok(config)
    }
}
