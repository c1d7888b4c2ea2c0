//! Request orchestration
//!
//! One inbound event flows: signature check → duplicate-handle check →
//! command routing → dispatch → exactly one reply through the handle →
//! handle recorded. The handle is recorded only after a successful reply,
//! so a crashed invocation leaves the platform's redelivery free to retry
//! the whole event.
//!
//! All cross-invocation state lives behind the component contracts; the
//! orchestrator itself holds none.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use stocktalk_core::{AppConfig, ArtifactCache, Error, Result};
use stocktalk_state::{
    AsyncTask, Availability, GatedFeature, IdempotencyLedger, SessionManager, Stage, TaskManager,
    TaskStatus,
};

use crate::analysis::{AnalysisService, render_recommendations};
use crate::channel::{PushPort, ReplyPort};
use crate::router::{self, CacheAdmin, Command, Feature};
use crate::webhook::{self, InboundEvent};

const UNKNOWN_HELP: &str =
    "無法辨識的指令。輸入股票代號（例如 2330）查詢，或輸入「查詢進度」查看任務狀態。";
const GENERIC_FAILURE: &str = "系統暫時無法處理您的要求，請稍後再試。";

/// Wires the components together and drives one event at a time
pub struct Orchestrator {
    config: AppConfig,
    ledger: IdempotencyLedger,
    sessions: SessionManager,
    tasks: TaskManager,
    cache: ArtifactCache,
    analysis: Arc<AnalysisService>,
    reply_port: Arc<dyn ReplyPort>,
    push_port: Option<Arc<dyn PushPort>>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AppConfig,
        ledger: IdempotencyLedger,
        sessions: SessionManager,
        tasks: TaskManager,
        cache: ArtifactCache,
        analysis: Arc<AnalysisService>,
        reply_port: Arc<dyn ReplyPort>,
        push_port: Option<Arc<dyn PushPort>>,
    ) -> Self {
        Self {
            config,
            ledger,
            sessions,
            tasks,
            cache,
            analysis,
            reply_port,
            push_port,
        }
    }

    /// Verify, parse and process one webhook delivery.
    ///
    /// Returns how many events were processed. Per-event failures are
    /// logged, not propagated: the delivery is acknowledged either way, so
    /// an unrecorded handle is retried only through platform redelivery.
    pub async fn handle_webhook(&self, body: &[u8], signature: Option<&str>) -> Result<usize> {
        if !webhook::verify(&self.config.channel_secret, body, signature) {
            return Err(Error::Auth("webhook signature mismatch".to_string()));
        }

        let payload = webhook::parse_payload(body)?;
        let mut processed = 0;
        for event in &payload.events {
            match self.handle_event(event).await {
                Ok(true) => processed += 1,
                Ok(false) => {}
                Err(e) => error!(
                    "Event handling failed for handle '{}': {}",
                    event.reply_token, e
                ),
            }
        }

        Ok(processed)
    }

    /// Process one inbound event end to end.
    ///
    /// Returns `false` when the event was skipped (non-text, or a duplicate
    /// delivery of an already-answered handle).
    pub async fn handle_event(&self, event: &InboundEvent) -> Result<bool> {
        let Some(text) = event.text() else {
            debug!("Skipping event of kind '{}'", event.kind);
            return Ok(false);
        };
        let handle = event.reply_token.as_str();

        if self.ledger.already_processed(handle).await {
            info!("Duplicate delivery for handle '{}', skipping", handle);
            return Ok(false);
        }

        let user_id = event.source.user_id.as_str();
        let command = router::parse(text);
        debug!("User '{}' command: {:?}", user_id, command);

        let reply_text = match self.dispatch(user_id, command).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Dispatch failed for user '{}': {}", user_id, e);
                GENERIC_FAILURE.to_string()
            }
        };

        self.reply_port.reply(handle, &reply_text).await?;
        self.ledger.record(handle).await;
        Ok(true)
    }

    async fn dispatch(&self, user_id: &str, command: Command) -> Result<String> {
        match command {
            Command::Lookup { topic } => {
                self.sessions.get_or_create(user_id, &topic).await?;
                self.analysis.subject_snapshot(&topic).await
            }

            Command::Feature {
                feature,
                topic,
                payload,
            } => {
                self.handle_feature(user_id, feature, &topic, payload.as_deref())
                    .await
            }

            Command::Recommend { bucket } => {
                self.tasks.reap_finished().await;
                let task = self.tasks.create(user_id).await?;

                let analysis = Arc::clone(&self.analysis);
                let push = self.push_port.clone();
                let owner = user_id.to_string();
                self.tasks
                    .run(task.id, async move {
                        let artifact = analysis.recommendations(bucket).await?;
                        if let Some(push) = push {
                            let text = render_recommendations(&artifact);
                            if let Err(e) = push.push(&owner, &text).await {
                                warn!("Push of finished screening to '{}' failed: {}", owner, e);
                            }
                        }
                        Ok(artifact)
                    })
                    .await;

                Ok(format!(
                    "已開始{}篩選（任務 {}）。約 {} 秒後輸入「查詢進度」查看結果。",
                    bucket.label(),
                    task.id,
                    self.config.poll_retry_hint.as_secs()
                ))
            }

            Command::CacheAdmin(action) => match action {
                CacheAdmin::ClearOne { topic } => {
                    for key in [
                        format!("subject:{topic}"),
                        format!("news:{topic}"),
                        format!("politics:{topic}"),
                        format!("cross_market:{topic}"),
                    ] {
                        self.cache.invalidate(&key).await?;
                    }
                    Ok(format!("已清除 {topic} 的快取。"))
                }
                CacheAdmin::ClearAll => {
                    self.cache.invalidate_all().await?;
                    Ok("已清除全部快取。".to_string())
                }
            },

            Command::PollTask { task_id } => {
                let task = self.tasks.poll(user_id, task_id).await?;
                Ok(self.render_poll(task))
            }

            Command::Unknown { raw } => {
                // Free text is discussion input only while a session waits for it
                if let Some(session) = self.sessions.awaiting_discussion(user_id).await? {
                    let topic = session.topic.clone();
                    return self.submit_discussion(user_id, &topic, &raw).await;
                }

                debug!("Unknown command from '{}': {}", user_id, raw);
                Ok(UNKNOWN_HELP.to_string())
            }
        }
    }

    async fn handle_feature(
        &self,
        user_id: &str,
        feature: Feature,
        topic: &str,
        payload: Option<&str>,
    ) -> Result<String> {
        match feature {
            Feature::News => {
                self.one_shot(
                    user_id,
                    topic,
                    GatedFeature::News,
                    format!("news:{topic}"),
                    self.analysis.news_brief(topic),
                )
                .await
            }

            Feature::Politics => {
                self.one_shot(
                    user_id,
                    topic,
                    GatedFeature::Politics,
                    format!("politics:{topic}"),
                    self.analysis.politics_brief(topic),
                )
                .await
            }

            Feature::CrossMarket => {
                self.one_shot(
                    user_id,
                    topic,
                    GatedFeature::CrossMarket,
                    format!("cross_market:{topic}"),
                    self.analysis.cross_market_brief(topic),
                )
                .await
            }

            Feature::DiscussionStart => {
                let session = self.sessions.get_or_create(user_id, topic).await?;
                let availability = self
                    .sessions
                    .check_feature_availability(&session, GatedFeature::DiscussionStart);
                if !availability.available {
                    return Ok(denied_text(availability));
                }

                self.sessions
                    .mark_feature_used(user_id, topic, GatedFeature::DiscussionStart, None)
                    .await?;
                Ok(format!(
                    "已開始討論 {}（第 {}/{} 輪），請直接輸入您的問題。",
                    topic,
                    session.discussion_count + 1,
                    self.sessions.discussion_cap()
                ))
            }

            Feature::DiscussionSubmit => match payload {
                Some(input) => self.submit_discussion(user_id, topic, input).await,
                None => Ok(format!("請在指令後附上問題，例如「提問:{topic}:您的問題」。")),
            },

            Feature::FinalReview => {
                let session = self.sessions.get_or_create(user_id, topic).await?;
                if session.discussion_log.is_empty() {
                    return Ok(format!("尚無 {topic} 的討論紀錄，請先輸入「討論:{topic}」開始。"));
                }
                self.analysis.final_review(topic, &session.discussion_log).await
            }

            Feature::Feedback => {
                if let Some(text) = payload {
                    info!("Feedback from '{}' on {}: {}", user_id, topic, text);
                }
                self.sessions.complete(user_id, topic).await?;
                Ok("感謝您的回饋，此話題的對話已結束。".to_string())
            }

            Feature::EndDiscussion => {
                let availability = self.sessions.end_discussion(user_id, topic).await?;
                if !availability.available {
                    return Ok(denied_text(availability));
                }
                Ok(format!("已結束 {topic} 的討論。輸入「總結:{topic}」可取得總結。"))
            }

            Feature::ViewResult => match self.analysis.cached_snapshot(topic).await {
                Some(text) => Ok(text),
                None => Ok(format!("尚無 {topic} 的分析結果，請先輸入 {topic} 查詢。")),
            },
        }
    }

    /// Run one gated one-shot feature.
    ///
    /// The flag flips only after the artifact was built, so a provider
    /// failure leaves the feature available for a retry.
    async fn one_shot<F>(
        &self,
        user_id: &str,
        topic: &str,
        gated: GatedFeature,
        artifact_key: String,
        build: F,
    ) -> Result<String>
    where
        F: std::future::Future<Output = Result<String>>,
    {
        let session = self.sessions.get_or_create(user_id, topic).await?;
        let availability = self.sessions.check_feature_availability(&session, gated);
        if !availability.available {
            return Ok(denied_text(availability));
        }

        let text = build.await?;
        self.sessions
            .mark_feature_used(user_id, topic, gated, Some(&artifact_key))
            .await?;
        Ok(text)
    }

    async fn submit_discussion(&self, user_id: &str, topic: &str, input: &str) -> Result<String> {
        let session = self.sessions.get_or_create(user_id, topic).await?;
        if session.stage != Stage::AwaitingDiscussionInput {
            return Ok(format!("目前不在討論模式，請先輸入「討論:{topic}」開始。"));
        }

        let response = self
            .analysis
            .discussion_reply(topic, &session.discussion_log, input)
            .await?;
        let round = self
            .sessions
            .record_discussion_round(user_id, topic, input, &response)
            .await?;

        Ok(format!(
            "（第 {}/{} 輪）{}",
            round,
            self.sessions.discussion_cap(),
            response
        ))
    }

    fn render_poll(&self, task: Option<AsyncTask>) -> String {
        let Some(task) = task else {
            return "目前沒有進行中的任務。".to_string();
        };

        match task.status {
            TaskStatus::Pending | TaskStatus::Processing => {
                let phase = if task.status == TaskStatus::Pending {
                    "排隊"
                } else {
                    "處理"
                };
                format!(
                    "任務 {} {}中，請於 {} 秒後輸入「查詢進度:{}」。",
                    task.id,
                    phase,
                    self.config.poll_retry_hint.as_secs(),
                    task.id
                )
            }
            TaskStatus::Completed => task
                .result
                .as_ref()
                .map(render_recommendations)
                .unwrap_or_else(|| "任務已完成，但沒有結果內容。".to_string()),
            TaskStatus::Failed => format!(
                "任務 {} 失敗：{}",
                task.id,
                task.error.as_deref().unwrap_or("未知原因")
            ),
        }
    }

    /// Await all registered background work; used on server shutdown
    pub async fn shutdown(&self) {
        self.tasks.shutdown().await;
    }
}

fn denied_text(availability: Availability) -> String {
    availability
        .reason
        .unwrap_or_else(|| "此功能目前無法使用。".to_string())
}
