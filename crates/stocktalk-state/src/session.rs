//! Conversation session state machine
//!
//! A session is keyed by (user, topic) and tracks where a conversation about
//! one stock stands: which one-shot features have been consumed, how many
//! discussion rounds have run, and the full discussion log. Sessions carry an
//! absolute expiry timestamp; expiry is evaluated lazily at read time, and an
//! expired session reads as "no session", so the caller falls through to
//! creation.
//!
//! Concurrent updates to the same session are last-write-wins. The channel
//! serializes messages per user in practice, so the race window is accepted
//! rather than locked away.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use stocktalk_core::Result;

/// Where a (user, topic) conversation currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Fresh session, no discussion started
    Initial,
    /// User pressed "start discussion", next free text is the input
    AwaitingDiscussionInput,
    /// At least one discussion round recorded
    InDiscussion,
    /// Terminal feedback recorded, conversation closed
    Completed,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Initial => "initial",
            Stage::AwaitingDiscussionInput => "awaiting_discussion_input",
            Stage::InDiscussion => "in_discussion",
            Stage::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

/// Features gated per (user, topic) by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatedFeature {
    /// One-shot news brief
    News,
    /// One-shot politics and macro brief
    Politics,
    /// One-shot cross-market comparison
    CrossMarket,
    /// Opens a discussion round, capped per session
    DiscussionStart,
}

impl GatedFeature {
    /// Display label used in user-facing denial reasons
    fn label(self) -> &'static str {
        match self {
            GatedFeature::News => "新聞分析",
            GatedFeature::Politics => "政經分析",
            GatedFeature::CrossMarket => "跨市場分析",
            GatedFeature::DiscussionStart => "討論",
        }
    }
}

/// One recorded discussion round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscussionRound {
    /// 1-based round number
    pub round: u8,
    /// What the user asked
    pub input: String,
    /// What the system answered
    pub response: String,
    /// When the round was recorded
    pub at: DateTime<Utc>,
}

/// Conversation state for one (user, topic) pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub topic: String,
    pub stage: Stage,
    pub news_used: bool,
    pub politics_used: bool,
    pub cross_market_used: bool,
    pub discussion_count: u8,
    pub discussion_log: Vec<DiscussionRound>,
    /// Cache keys of artifacts produced for this session (not owned by it)
    pub artifacts: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Create a fresh session expiring `ttl` from now
    pub fn new(user_id: impl Into<String>, topic: impl Into<String>, ttl: Duration) -> Self {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36500));
        Self {
            user_id: user_id.into(),
            topic: topic.into(),
            stage: Stage::Initial,
            news_used: false,
            politics_used: false,
            cross_market_used: false,
            discussion_count: 0,
            discussion_log: Vec::new(),
            artifacts: Vec::new(),
            created_at: now,
            expires_at: now + ttl,
        }
    }

    /// Whether the session is past its expiry at instant `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether the session is past its expiry right now
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Read the one-shot flag for a feature; `None` for non-one-shot features
    fn one_shot_used(&self, feature: GatedFeature) -> Option<bool> {
        match feature {
            GatedFeature::News => Some(self.news_used),
            GatedFeature::Politics => Some(self.politics_used),
            GatedFeature::CrossMarket => Some(self.cross_market_used),
            GatedFeature::DiscussionStart => None,
        }
    }

    fn set_one_shot(&mut self, feature: GatedFeature) {
        match feature {
            GatedFeature::News => self.news_used = true,
            GatedFeature::Politics => self.politics_used = true,
            GatedFeature::CrossMarket => self.cross_market_used = true,
            GatedFeature::DiscussionStart => {}
        }
    }

    /// Remember an artifact key this session refers to
    fn reference_artifact(&mut self, key: &str) {
        if !self.artifacts.iter().any(|k| k == key) {
            self.artifacts.push(key.to_string());
        }
    }
}

/// Outcome of a feature gate check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Availability {
    pub available: bool,
    pub reason: Option<String>,
}

impl Availability {
    /// Feature may be used
    pub fn ok() -> Self {
        Self {
            available: true,
            reason: None,
        }
    }

    /// Feature is denied, with a user-facing reason
    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            available: false,
            reason: Some(reason.into()),
        }
    }
}

/// Backing store for sessions
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Read the session for (user, topic), expired or not
    async fn get(&self, user_id: &str, topic: &str) -> Result<Option<Session>>;

    /// Upsert a session
    async fn put(&self, session: Session) -> Result<()>;

    /// Remove the session for (user, topic)
    async fn delete(&self, user_id: &str, topic: &str) -> Result<()>;

    /// The user's session waiting for discussion input, newest first if
    /// several topics are waiting; expired or not
    async fn awaiting_input(&self, user_id: &str) -> Result<Option<Session>>;
}

/// In-memory session store
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<(String, String), Session>>,
}

impl MemorySessionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, user_id: &str, topic: &str) -> Result<Option<Session>> {
        let key = (user_id.to_string(), topic.to_string());
        Ok(self.sessions.read().await.get(&key).cloned())
    }

    async fn put(&self, session: Session) -> Result<()> {
        let key = (session.user_id.clone(), session.topic.clone());
        self.sessions.write().await.insert(key, session);
        Ok(())
    }

    async fn delete(&self, user_id: &str, topic: &str) -> Result<()> {
        let key = (user_id.to_string(), topic.to_string());
        self.sessions.write().await.remove(&key);
        Ok(())
    }

    async fn awaiting_input(&self, user_id: &str) -> Result<Option<Session>> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.user_id == user_id && s.stage == Stage::AwaitingDiscussionInput)
            .max_by_key(|s| s.created_at)
            .cloned())
    }
}

/// Session lifecycle and feature gating over a [`SessionStore`]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    session_ttl: Duration,
    discussion_cap: u8,
}

impl SessionManager {
    /// Create a manager over the given store
    pub fn new(store: Arc<dyn SessionStore>, session_ttl: Duration, discussion_cap: u8) -> Self {
        Self {
            store,
            session_ttl,
            discussion_cap,
        }
    }

    /// Create a manager backed by process memory
    pub fn in_memory(session_ttl: Duration, discussion_cap: u8) -> Self {
        Self::new(Arc::new(MemorySessionStore::new()), session_ttl, discussion_cap)
    }

    /// Get the live session for (user, topic), creating one if absent.
    ///
    /// An expired session reads as absent and is replaced by a fresh one.
    pub async fn get_or_create(&self, user_id: &str, topic: &str) -> Result<Session> {
        if let Some(session) = self.get_active(user_id, topic).await? {
            return Ok(session);
        }

        debug!("Creating session for user '{}' on topic '{}'", user_id, topic);
        let session = Session::new(user_id, topic, self.session_ttl);
        self.store.put(session.clone()).await?;
        Ok(session)
    }

    /// Get the live session for (user, topic), if any.
    ///
    /// Returns `None` for both a missing and an expired session.
    pub async fn get_active(&self, user_id: &str, topic: &str) -> Result<Option<Session>> {
        match self.store.get(user_id, topic).await? {
            Some(session) if !session.is_expired() => Ok(Some(session)),
            Some(_) => {
                debug!("Session for user '{}' on topic '{}' has expired", user_id, topic);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// The user's live session waiting for discussion input, if any.
    ///
    /// Lets callers route free text to the right topic when the command
    /// itself names none.
    pub async fn awaiting_discussion(&self, user_id: &str) -> Result<Option<Session>> {
        match self.store.awaiting_input(user_id).await? {
            Some(session) if !session.is_expired() => Ok(Some(session)),
            _ => Ok(None),
        }
    }

    /// Whether `feature` may be used in the given session.
    ///
    /// Pure: answers from the session snapshot, mutating nothing.
    pub fn check_feature_availability(
        &self,
        session: &Session,
        feature: GatedFeature,
    ) -> Availability {
        match feature {
            GatedFeature::DiscussionStart => {
                if session.stage == Stage::Completed {
                    Availability::denied("此話題的對話已結束，請重新查詢股票")
                } else if session.discussion_count >= self.discussion_cap {
                    Availability::denied(format!(
                        "討論次數已達上限 ({}/{})",
                        session.discussion_count, self.discussion_cap
                    ))
                } else {
                    Availability::ok()
                }
            }
            one_shot => match session.one_shot_used(one_shot) {
                Some(true) => Availability::denied(format!(
                    "{}已使用過，每檔股票限用一次",
                    one_shot.label()
                )),
                _ => Availability::ok(),
            },
        }
    }

    /// Record a feature as consumed, optionally referencing a cache artifact.
    ///
    /// One-shot features set their flag; `DiscussionStart` moves the stage to
    /// [`Stage::AwaitingDiscussionInput`]. Callers gate with
    /// [`check_feature_availability`](Self::check_feature_availability) first;
    /// a lost race between two writers is last-write-wins.
    pub async fn mark_feature_used(
        &self,
        user_id: &str,
        topic: &str,
        feature: GatedFeature,
        artifact: Option<&str>,
    ) -> Result<Session> {
        let mut session = self.get_or_create(user_id, topic).await?;

        match feature {
            GatedFeature::DiscussionStart => {
                session.stage = Stage::AwaitingDiscussionInput;
            }
            one_shot => session.set_one_shot(one_shot),
        }
        if let Some(key) = artifact {
            session.reference_artifact(key);
        }

        self.store.put(session.clone()).await?;
        Ok(session)
    }

    /// Record one discussion round and return its 1-based round number.
    ///
    /// Only valid while the session awaits discussion input; a call in any
    /// other stage, or past the cap, leaves the session untouched and returns
    /// the current round count.
    pub async fn record_discussion_round(
        &self,
        user_id: &str,
        topic: &str,
        input: &str,
        response: &str,
    ) -> Result<u8> {
        let mut session = self.get_or_create(user_id, topic).await?;

        if session.stage != Stage::AwaitingDiscussionInput {
            warn!(
                "Discussion round for '{}' on '{}' ignored in stage {}",
                user_id, topic, session.stage
            );
            return Ok(session.discussion_count);
        }
        if session.discussion_count >= self.discussion_cap {
            warn!(
                "Discussion round for '{}' on '{}' ignored at cap {}",
                user_id, topic, self.discussion_cap
            );
            return Ok(session.discussion_count);
        }

        session.discussion_count += 1;
        let round = session.discussion_count;
        session.discussion_log.push(DiscussionRound {
            round,
            input: input.to_string(),
            response: response.to_string(),
            at: Utc::now(),
        });
        session.stage = Stage::InDiscussion;

        self.store.put(session).await?;
        Ok(round)
    }

    /// Close an active discussion: [`Stage::AwaitingDiscussionInput`] or
    /// [`Stage::InDiscussion`] moves to [`Stage::Completed`].
    ///
    /// Any other stage, and a missing or expired session, is refused with a
    /// reason and nothing is written. Closing the whole conversation
    /// regardless of stage is [`complete`](Self::complete).
    pub async fn end_discussion(&self, user_id: &str, topic: &str) -> Result<Availability> {
        match self.get_active(user_id, topic).await? {
            Some(mut session)
                if matches!(
                    session.stage,
                    Stage::AwaitingDiscussionInput | Stage::InDiscussion
                ) =>
            {
                session.stage = Stage::Completed;
                self.store.put(session).await?;
                Ok(Availability::ok())
            }
            Some(session) if session.stage == Stage::Completed => {
                Ok(Availability::denied("此話題的對話已結束。"))
            }
            _ => Ok(Availability::denied(format!(
                "目前沒有進行中的 {topic} 討論，請先輸入「討論:{topic}」開始。"
            ))),
        }
    }

    /// Close the conversation: any stage moves to [`Stage::Completed`].
    ///
    /// Terminal feedback closes even a conversation that never discussed, so
    /// this creates the session when none is live.
    pub async fn complete(&self, user_id: &str, topic: &str) -> Result<Session> {
        let mut session = self.get_or_create(user_id, topic).await?;
        session.stage = Stage::Completed;
        self.store.put(session.clone()).await?;
        Ok(session)
    }

    /// Drop the session for (user, topic) entirely
    pub async fn clear(&self, user_id: &str, topic: &str) -> Result<()> {
        self.store.delete(user_id, topic).await
    }

    /// Discussion round cap this manager enforces
    pub fn discussion_cap(&self) -> u8 {
        self.discussion_cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(12 * 3600);

    fn manager() -> SessionManager {
        SessionManager::in_memory(TTL, 5)
    }

    #[tokio::test]
    async fn test_get_or_create_starts_fresh() {
        let manager = manager();

        let session = manager.get_or_create("u1", "2330").await.unwrap();

        assert_eq!(session.stage, Stage::Initial);
        assert_eq!(session.discussion_count, 0);
        assert!(!session.news_used);
        assert!(!session.politics_used);
        assert!(!session.cross_market_used);
        assert!(session.discussion_log.is_empty());
    }

    #[tokio::test]
    async fn test_expired_session_reads_as_absent() {
        let store = Arc::new(MemorySessionStore::new());
        let manager = SessionManager::new(store.clone(), TTL, 5);

        let mut stale = Session::new("u1", "2330", TTL);
        stale.news_used = true;
        stale.expires_at = Utc::now() - chrono::Duration::seconds(1);
        store.put(stale).await.unwrap();

        assert!(manager.get_active("u1", "2330").await.unwrap().is_none());

        // get_or_create falls through to a fresh session
        let session = manager.get_or_create("u1", "2330").await.unwrap();
        assert!(!session.news_used);
        assert_eq!(session.stage, Stage::Initial);
    }

    #[tokio::test]
    async fn test_awaiting_discussion_finds_the_waiting_topic() {
        let manager = manager();

        assert!(manager.awaiting_discussion("u1").await.unwrap().is_none());

        manager.get_or_create("u1", "2317").await.unwrap();
        manager
            .mark_feature_used("u1", "2330", GatedFeature::DiscussionStart, None)
            .await
            .unwrap();

        let waiting = manager.awaiting_discussion("u1").await.unwrap().unwrap();
        assert_eq!(waiting.topic, "2330");
        assert_eq!(waiting.stage, Stage::AwaitingDiscussionInput);

        // Another user sees nothing
        assert!(manager.awaiting_discussion("u2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_one_shot_consumed_once() {
        let manager = manager();

        let session = manager.get_or_create("u1", "2330").await.unwrap();
        let avail = manager.check_feature_availability(&session, GatedFeature::News);
        assert!(avail.available);

        let session = manager
            .mark_feature_used("u1", "2330", GatedFeature::News, Some("news:2330"))
            .await
            .unwrap();
        assert!(session.news_used);
        assert!(session.artifacts.contains(&"news:2330".to_string()));

        let avail = manager.check_feature_availability(&session, GatedFeature::News);
        assert!(!avail.available);
        assert!(avail.reason.unwrap().contains("已使用過"));
    }

    #[tokio::test]
    async fn test_one_shot_flags_are_independent() {
        let manager = manager();

        manager
            .mark_feature_used("u1", "2330", GatedFeature::News, None)
            .await
            .unwrap();
        let session = manager.get_or_create("u1", "2330").await.unwrap();

        assert!(
            manager
                .check_feature_availability(&session, GatedFeature::Politics)
                .available
        );
        assert!(
            manager
                .check_feature_availability(&session, GatedFeature::CrossMarket)
                .available
        );

        // Same feature on a different topic is its own flag
        let other = manager.get_or_create("u1", "2317").await.unwrap();
        assert!(
            manager
                .check_feature_availability(&other, GatedFeature::News)
                .available
        );
    }

    #[tokio::test]
    async fn test_discussion_rounds_until_cap() {
        let manager = manager();

        for n in 1..=7u8 {
            let session = manager.get_or_create("u1", "2330").await.unwrap();
            let avail = manager.check_feature_availability(&session, GatedFeature::DiscussionStart);
            if n <= 5 {
                assert!(avail.available, "round {n} should be allowed");
                manager
                    .mark_feature_used("u1", "2330", GatedFeature::DiscussionStart, None)
                    .await
                    .unwrap();
                let round = manager
                    .record_discussion_round("u1", "2330", "怎麼看?", "穩健")
                    .await
                    .unwrap();
                assert_eq!(round, n);
            } else {
                assert!(!avail.available, "round {n} should be denied");
                assert!(avail.reason.unwrap().contains("已達上限"));
                // A denied start leaves the stage untouched
                assert_eq!(session.stage, Stage::InDiscussion);
            }
        }

        let session = manager.get_or_create("u1", "2330").await.unwrap();
        assert_eq!(session.discussion_count, 5);
        assert_eq!(session.discussion_log.len(), 5);
    }

    #[tokio::test]
    async fn test_submit_outside_awaiting_stage_is_ignored() {
        let manager = manager();

        manager.get_or_create("u1", "2330").await.unwrap();
        let round = manager
            .record_discussion_round("u1", "2330", "text", "reply")
            .await
            .unwrap();

        assert_eq!(round, 0);
        let session = manager.get_or_create("u1", "2330").await.unwrap();
        assert_eq!(session.stage, Stage::Initial);
        assert!(session.discussion_log.is_empty());
    }

    #[tokio::test]
    async fn test_complete_is_terminal_for_discussion() {
        let manager = manager();

        manager
            .mark_feature_used("u1", "2330", GatedFeature::DiscussionStart, None)
            .await
            .unwrap();
        let session = manager.complete("u1", "2330").await.unwrap();
        assert_eq!(session.stage, Stage::Completed);

        let avail = manager.check_feature_availability(&session, GatedFeature::DiscussionStart);
        assert!(!avail.available);
    }

    #[tokio::test]
    async fn test_end_discussion_closes_active_stages() {
        let manager = manager();

        // While awaiting input
        manager
            .mark_feature_used("u1", "2330", GatedFeature::DiscussionStart, None)
            .await
            .unwrap();
        let outcome = manager.end_discussion("u1", "2330").await.unwrap();
        assert!(outcome.available);
        let session = manager.get_or_create("u1", "2330").await.unwrap();
        assert_eq!(session.stage, Stage::Completed);

        // Mid-discussion
        manager
            .mark_feature_used("u1", "2317", GatedFeature::DiscussionStart, None)
            .await
            .unwrap();
        manager
            .record_discussion_round("u1", "2317", "怎麼看?", "穩健")
            .await
            .unwrap();
        let outcome = manager.end_discussion("u1", "2317").await.unwrap();
        assert!(outcome.available);
        let session = manager.get_or_create("u1", "2317").await.unwrap();
        assert_eq!(session.stage, Stage::Completed);
    }

    #[tokio::test]
    async fn test_end_discussion_outside_a_discussion_mutates_nothing() {
        let manager = manager();

        // No session at all: refused, and none is created
        let outcome = manager.end_discussion("u1", "2330").await.unwrap();
        assert!(!outcome.available);
        assert!(outcome.reason.unwrap().contains("討論:2330"));
        assert!(manager.get_active("u1", "2330").await.unwrap().is_none());

        // A fresh lookup session stays usable
        manager.get_or_create("u1", "2330").await.unwrap();
        let outcome = manager.end_discussion("u1", "2330").await.unwrap();
        assert!(!outcome.available);
        let session = manager.get_or_create("u1", "2330").await.unwrap();
        assert_eq!(session.stage, Stage::Initial);
        assert!(
            manager
                .check_feature_availability(&session, GatedFeature::DiscussionStart)
                .available
        );

        // Already completed: refused without resurrecting the discussion
        manager.complete("u1", "2330").await.unwrap();
        let outcome = manager.end_discussion("u1", "2330").await.unwrap();
        assert!(!outcome.available);
        assert!(outcome.reason.unwrap().contains("已結束"));
    }

    #[tokio::test]
    async fn test_clear_drops_session() {
        let manager = manager();

        manager
            .mark_feature_used("u1", "2330", GatedFeature::News, None)
            .await
            .unwrap();
        manager.clear("u1", "2330").await.unwrap();

        let session = manager.get_or_create("u1", "2330").await.unwrap();
        assert!(!session.news_used);
    }

    #[test]
    fn test_stage_serde_shape() {
        let json = serde_json::to_string(&Stage::AwaitingDiscussionInput).unwrap();
        assert_eq!(json, "\"awaiting_discussion_input\"");
        assert_eq!(Stage::AwaitingDiscussionInput.to_string(), "awaiting_discussion_input");
    }
}
