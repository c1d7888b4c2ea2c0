//! Analysis artifact assembly
//!
//! Every expensive computation funnels through the TTL cache: per-subject
//! artifacts (snapshot, news, politics, cross-market briefs) use the subject
//! class, aggregate recommendations the aggregate class. Discussion replies
//! and final reviews are session-scoped and never cached.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde_json::{Value, json};
use tokio::time::sleep;
use tracing::{info, warn};

use stocktalk_core::{AppConfig, ArtifactCache, Error, Result};
use stocktalk_providers::{
    AiProvider, MarketDataProvider, SearchProvider, SeriesRange, completion_text,
};
use stocktalk_state::DiscussionRound;

use crate::router::RecommendBucket;

/// Subjects screened for aggregate recommendations
const SCREEN_UNIVERSE: &[&str] = &[
    "2330", "2317", "2454", "2881", "2412", "2308", "2303", "2002", "1301", "2891",
];

const SEARCH_LIMIT: usize = 5;

/// Assembles analysis artifacts from the market, AI and search providers
pub struct AnalysisService {
    market: Arc<dyn MarketDataProvider>,
    ai: Arc<dyn AiProvider>,
    search: Arc<dyn SearchProvider>,
    cache: ArtifactCache,
    subject_ttl: Duration,
    aggregate_ttl: Duration,
    screen_batch_size: usize,
    screen_batch_delay: Duration,
}

impl AnalysisService {
    pub fn new(
        market: Arc<dyn MarketDataProvider>,
        ai: Arc<dyn AiProvider>,
        search: Arc<dyn SearchProvider>,
        cache: ArtifactCache,
        config: &AppConfig,
    ) -> Self {
        Self {
            market,
            ai,
            search,
            cache,
            subject_ttl: config.subject_cache_ttl,
            aggregate_ttl: config.recommend_cache_ttl,
            screen_batch_size: config.screen_batch_size,
            screen_batch_delay: config.screen_batch_delay,
        }
    }

    /// Price snapshot with AI commentary for one subject, cached per subject
    pub async fn subject_snapshot(&self, topic: &str) -> Result<String> {
        let key = format!("subject:{topic}");
        let artifact = self
            .cache
            .get_or_fetch(&key, self.subject_ttl, || self.build_snapshot(topic))
            .await?;
        Ok(render_snapshot(&artifact))
    }

    /// Snapshot text from the cache only; `None` when nothing fresh is held
    pub async fn cached_snapshot(&self, topic: &str) -> Option<String> {
        self.cache
            .get(&format!("subject:{topic}"), self.subject_ttl)
            .await
            .map(|artifact| render_snapshot(&artifact))
    }

    async fn build_snapshot(&self, topic: &str) -> Result<Value> {
        let series = self.market.fetch_series(topic, SeriesRange::Month).await?;
        let close = series
            .latest_close()
            .ok_or_else(|| Error::NotFound(format!("no market data for {topic}")))?;
        let change = series.change_percent().unwrap_or(0.0);
        let high = series.high().unwrap_or(close);
        let low = series.low().unwrap_or(close);

        let prompt = format!(
            "你是股票分析助理。{topic} 近一個月收盤 {close:.2}，漲跌 {change:+.2}%，\
             區間 {low:.2} 至 {high:.2}。請用繁體中文寫兩句走勢觀察，不要提供投資建議。"
        );
        let commentary = completion_text(&self.ai.complete(&prompt, None).await?);

        Ok(json!({
            "topic": topic,
            "close": close,
            "change_percent": change,
            "high": high,
            "low": low,
            "commentary": commentary,
            "as_of": Utc::now().to_rfc3339(),
        }))
    }

    /// News brief for one subject, cached under `news:{topic}`
    pub async fn news_brief(&self, topic: &str) -> Result<String> {
        self.search_brief(
            "news",
            topic,
            format!("{topic} 股票 新聞"),
            "請用繁體中文整理成三點新聞重點，並說明對股價的可能影響。",
        )
        .await
    }

    /// Policy and macro brief for one subject, cached under `politics:{topic}`
    pub async fn politics_brief(&self, topic: &str) -> Result<String> {
        self.search_brief(
            "politics",
            topic,
            format!("{topic} 產業政策 總體經濟"),
            "請用繁體中文整理政經與政策面的觀察重點，說明對該產業的影響。",
        )
        .await
    }

    async fn search_brief(
        &self,
        kind: &str,
        topic: &str,
        query: String,
        instruction: &str,
    ) -> Result<String> {
        let key = format!("{kind}:{topic}");
        let artifact = self
            .cache
            .get_or_fetch(&key, self.subject_ttl, || async {
                let hits = self.search.search(&query, SEARCH_LIMIT).await?;
                let digest: Vec<String> = hits
                    .iter()
                    .map(|hit| format!("- {}：{}", hit.title, hit.snippet))
                    .collect();
                let prompt = format!(
                    "以下是「{query}」的搜尋結果：\n{}\n{instruction}",
                    digest.join("\n")
                );
                let text = completion_text(&self.ai.complete(&prompt, None).await?);
                let sources: Vec<String> = hits.iter().map(|hit| hit.url.clone()).collect();

                Ok::<_, Error>(json!({
                    "topic": topic,
                    "kind": kind,
                    "text": text,
                    "sources": sources,
                }))
            })
            .await?;

        Ok(artifact["text"].as_str().unwrap_or_default().to_string())
    }

    /// Cross-market comparison for one subject, cached under `cross_market:{topic}`
    pub async fn cross_market_brief(&self, topic: &str) -> Result<String> {
        let key = format!("cross_market:{topic}");
        let artifact = self
            .cache
            .get_or_fetch(&key, self.subject_ttl, || async {
                let series = self.market.fetch_series(topic, SeriesRange::Quarter).await?;
                let change = series.change_percent().unwrap_or(0.0);
                let hits = self
                    .search
                    .search(&format!("{topic} ADR 美股 國際盤"), SEARCH_LIMIT)
                    .await?;
                let digest: Vec<String> =
                    hits.iter().map(|hit| format!("- {}", hit.title)).collect();
                let prompt = format!(
                    "{topic} 近一季漲跌 {change:+.2}%。相關國際市場消息：\n{}\n\
                     請用繁體中文比較該標的與國際盤的連動，寫出兩到三點觀察。",
                    digest.join("\n")
                );
                let text = completion_text(&self.ai.complete(&prompt, None).await?);

                Ok::<_, Error>(json!({
                    "topic": topic,
                    "kind": "cross_market",
                    "change_percent": change,
                    "text": text,
                }))
            })
            .await?;

        Ok(artifact["text"].as_str().unwrap_or_default().to_string())
    }

    /// One discussion round reply, grounded in the session log
    pub async fn discussion_reply(
        &self,
        topic: &str,
        log: &[DiscussionRound],
        input: &str,
    ) -> Result<String> {
        let mut history = String::new();
        for round in log {
            history.push_str(&format!(
                "第{}輪 使用者：{}\n第{}輪 回覆：{}\n",
                round.round, round.input, round.round, round.response
            ));
        }

        let prompt = format!(
            "你是股票分析助理，正在與使用者討論 {topic}。\n{history}\
             使用者最新提問：{input}\n請用繁體中文簡潔回覆，聚焦在該標的。"
        );
        let reply = completion_text(&self.ai.complete(&prompt, None).await?);
        Ok(reply)
    }

    /// Closing review over the whole discussion
    pub async fn final_review(&self, topic: &str, log: &[DiscussionRound]) -> Result<String> {
        let mut transcript = String::new();
        for round in log {
            transcript.push_str(&format!("{}：{}\n", round.input, round.response));
        }
        // Reuse the snapshot artifact when one is still fresh
        let snapshot = self
            .cache
            .get(&format!("subject:{topic}"), self.subject_ttl)
            .await
            .map(|value| render_snapshot(&value))
            .unwrap_or_default();

        let prompt = format!(
            "請總結以下關於 {topic} 的討論。\n{snapshot}\n討論紀錄：\n{transcript}\
             用繁體中文寫出三點結論與一句風險提醒。"
        );
        let review = completion_text(&self.ai.complete(&prompt, None).await?);
        Ok(review)
    }

    /// Aggregate recommendation artifact, cached per bucket.
    ///
    /// A full screening run walks the universe in batches with an
    /// inter-batch pause, which is why callers run it as a background task.
    pub async fn recommendations(&self, bucket: RecommendBucket) -> Result<Value> {
        let key = format!("recommend:{}", bucket.as_str());
        self.cache
            .get_or_fetch(&key, self.aggregate_ttl, || self.screen(bucket))
            .await
    }

    async fn screen(&self, bucket: RecommendBucket) -> Result<Value> {
        info!("Screening {} subjects for bucket '{}'", SCREEN_UNIVERSE.len(), bucket);
        let mut scored: Vec<(String, f64)> = Vec::new();

        for (index, batch) in SCREEN_UNIVERSE.chunks(self.screen_batch_size).enumerate() {
            if index > 0 {
                sleep(self.screen_batch_delay).await;
            }

            let results = join_all(batch.iter().map(|subject| self.score(subject, bucket))).await;
            for (subject, result) in batch.iter().zip(results) {
                match result {
                    Ok(score) => scored.push(((*subject).to_string(), score)),
                    // One bad subject must not sink the whole run
                    Err(e) => warn!("Screening {} failed, skipping: {}", subject, e),
                }
            }
        }

        if scored.is_empty() {
            return Err(Error::NotFound(
                "no subjects survived screening".to_string(),
            ));
        }

        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(5);

        let lines: Vec<String> = scored
            .iter()
            .map(|(id, score)| format!("{id}（{score:+.2}）"))
            .collect();
        let prompt = format!(
            "以下是{}選股的篩選結果：{}。請用繁體中文寫兩句整體觀察。",
            bucket.label(),
            lines.join("、")
        );
        let commentary = completion_text(&self.ai.complete(&prompt, None).await?);

        let picks: Vec<Value> = scored
            .iter()
            .map(|(id, score)| json!({ "topic": id, "score": score }))
            .collect();

        Ok(json!({
            "bucket": bucket.as_str(),
            "picks": picks,
            "commentary": commentary,
            "generated_at": Utc::now().to_rfc3339(),
        }))
    }

    async fn score(&self, subject: &str, bucket: RecommendBucket) -> Result<f64> {
        let series = self.market.fetch_series(subject, SeriesRange::Quarter).await?;
        let close = series
            .latest_close()
            .ok_or_else(|| Error::NotFound(format!("no market data for {subject}")))?;

        let score = match bucket {
            // Strongest price trend over the quarter
            RecommendBucket::Momentum => series.change_percent().unwrap_or(0.0),
            // Farthest below the quarter high
            RecommendBucket::Value => {
                let high = series.high().unwrap_or(close);
                if high > 0.0 { (high - close) / high * 100.0 } else { 0.0 }
            }
        };

        Ok(score)
    }
}

fn render_snapshot(artifact: &Value) -> String {
    format!(
        "【{} 行情快照】\n收盤 {:.2}（近月 {:+.2}%）\n區間 {:.2} 至 {:.2}\n{}",
        artifact["topic"].as_str().unwrap_or_default(),
        artifact["close"].as_f64().unwrap_or_default(),
        artifact["change_percent"].as_f64().unwrap_or_default(),
        artifact["low"].as_f64().unwrap_or_default(),
        artifact["high"].as_f64().unwrap_or_default(),
        artifact["commentary"].as_str().unwrap_or_default(),
    )
}

/// Render a recommendation artifact as reply text
pub fn render_recommendations(artifact: &Value) -> String {
    let bucket = match artifact["bucket"].as_str() {
        Some("momentum") => "動能",
        Some("value") => "價值",
        _ => "綜合",
    };

    let mut lines = vec![format!("【{bucket}推薦】")];
    if let Some(picks) = artifact["picks"].as_array() {
        for (index, pick) in picks.iter().enumerate() {
            lines.push(format!(
                "{}. {}（{:+.2}）",
                index + 1,
                pick["topic"].as_str().unwrap_or_default(),
                pick["score"].as_f64().unwrap_or_default(),
            ));
        }
    }
    if let Some(commentary) = artifact["commentary"].as_str() {
        lines.push(commentary.to_string());
    }

    lines.join("\n")
}
