//! Deterministic in-process backends for local development
//!
//! The dev providers answer instantly from synthesized data so the whole
//! pipeline runs without network credentials. Price paths are seeded from
//! the subject id, so repeated fetches return identical values.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::info;

use stocktalk_core::{AppConfig, ArtifactCache, Result};
use stocktalk_providers::{
    AiProvider, Candle, MarketDataProvider, Retrying, SearchHit, SearchProvider, SeriesRange,
    TimeSeries,
};
use stocktalk_state::{IdempotencyLedger, SessionManager, TaskManager};

use crate::analysis::AnalysisService;
use crate::channel::{PushPort, ReplyPort};
use crate::orchestrator::Orchestrator;

/// Synthesized market data, seeded per subject
pub struct DevMarketData;

fn seed_from(subject: &str) -> u64 {
    subject
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325, |acc: u64, byte| {
            (acc ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
        })
        .max(1)
}

fn next(state: &mut u64) -> u64 {
    let mut x = *state;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    *state = x;
    x
}

fn candle_count(range: SeriesRange) -> usize {
    match range {
        SeriesRange::Week => 5,
        SeriesRange::Month => 21,
        SeriesRange::Quarter => 63,
        SeriesRange::HalfYear => 126,
        SeriesRange::Year => 251,
    }
}

#[async_trait]
impl MarketDataProvider for DevMarketData {
    async fn fetch_series(&self, subject: &str, range: SeriesRange) -> Result<TimeSeries> {
        let mut state = seed_from(subject);
        let count = candle_count(range);
        let now = Utc::now();

        let mut close = 50.0 + (next(&mut state) % 900) as f64 / 2.0;
        let mut candles = Vec::with_capacity(count);
        for index in 0..count {
            let open = close;
            let step = (next(&mut state) % 600) as f64 / 100.0 - 3.0;
            close = (close + step).max(1.0);
            let spread = (next(&mut state) % 200) as f64 / 100.0;
            candles.push(Candle {
                at: now - Duration::days((count - index) as i64),
                open,
                high: open.max(close) + spread,
                low: (open.min(close) - spread).max(0.5),
                close,
                volume: 1_000 + next(&mut state) % 50_000,
            });
        }

        Ok(TimeSeries {
            subject: subject.to_string(),
            range,
            candles,
        })
    }

    fn name(&self) -> &str {
        "dev-market"
    }
}

/// Canned completion provider
pub struct DevAi;

#[async_trait]
impl AiProvider for DevAi {
    async fn complete(&self, prompt: &str, schema: Option<Value>) -> Result<Value> {
        let preview: String = prompt.chars().take(60).collect();
        let text = format!("（開發模式回覆）{preview}");
        Ok(match schema {
            Some(_) => json!({ "text": text }),
            None => Value::String(text),
        })
    }

    fn name(&self) -> &str {
        "dev-ai"
    }
}

/// Canned search provider
pub struct DevSearch;

#[async_trait]
impl SearchProvider for DevSearch {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let now = Utc::now();
        Ok((1..=limit.min(3))
            .map(|index| SearchHit {
                title: format!("{query} 相關報導 {index}"),
                url: format!("https://news.example.invalid/{index}"),
                snippet: format!("{query} 的模擬新聞摘要。"),
                published_at: Some(now - Duration::hours(index as i64)),
            })
            .collect())
    }

    fn name(&self) -> &str {
        "dev-search"
    }
}

/// Reply port that records outbound messages, for tests
#[derive(Default)]
pub struct RecordingReplyPort {
    replies: Mutex<Vec<(String, String)>>,
    pushes: Mutex<Vec<(String, String)>>,
}

impl RecordingReplyPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// (reply_token, text) pairs in send order
    pub async fn replies(&self) -> Vec<(String, String)> {
        self.replies.lock().await.clone()
    }

    /// (user_id, text) pairs in send order
    pub async fn pushes(&self) -> Vec<(String, String)> {
        self.pushes.lock().await.clone()
    }
}

#[async_trait]
impl ReplyPort for RecordingReplyPort {
    async fn reply(&self, reply_token: &str, text: &str) -> Result<()> {
        self.replies
            .lock()
            .await
            .push((reply_token.to_string(), text.to_string()));
        Ok(())
    }
}

#[async_trait]
impl PushPort for RecordingReplyPort {
    async fn push(&self, user_id: &str, text: &str) -> Result<()> {
        self.pushes
            .lock()
            .await
            .push((user_id.to_string(), text.to_string()));
        Ok(())
    }
}

/// Reply port that logs instead of calling the platform, for dev serve
pub struct LoggingReplyPort;

#[async_trait]
impl ReplyPort for LoggingReplyPort {
    async fn reply(&self, reply_token: &str, text: &str) -> Result<()> {
        info!("Reply [{}]: {}", reply_token, text);
        Ok(())
    }
}

#[async_trait]
impl PushPort for LoggingReplyPort {
    async fn push(&self, user_id: &str, text: &str) -> Result<()> {
        info!("Push [{}]: {}", user_id, text);
        Ok(())
    }
}

/// Wire a full orchestrator around the dev providers and in-memory stores.
///
/// The retry decorators are kept in the path so the wiring matches
/// production; the dev providers simply never fail.
pub fn dev_orchestrator(
    config: AppConfig,
    reply_port: Arc<dyn ReplyPort>,
    push_port: Option<Arc<dyn PushPort>>,
) -> Orchestrator {
    let cache = ArtifactCache::in_memory();
    let analysis = Arc::new(AnalysisService::new(
        Arc::new(Retrying::new(DevMarketData, config.market_retry.clone())),
        Arc::new(Retrying::new(DevAi, config.ai_retry.clone())),
        Arc::new(Retrying::new(DevSearch, config.market_retry.clone())),
        cache.clone(),
        &config,
    ));

    Orchestrator::new(
        config.clone(),
        IdempotencyLedger::in_memory(),
        SessionManager::in_memory(config.session_ttl, config.discussion_cap),
        TaskManager::in_memory(config.task_stale_after),
        cache,
        analysis,
        reply_port,
        push_port,
    )
}
