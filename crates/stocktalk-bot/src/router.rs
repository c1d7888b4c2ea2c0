//! Command router for inbound message text
//!
//! Parsing is pure and does no I/O. The grammar is shape-based: rules are
//! tried in the fixed order of [`RULES`] and the first match wins, so any
//! text that could satisfy two shapes is resolved by rule position, not by
//! semantic priority. Keywords are case-sensitive and come in CJK and ASCII
//! forms; full-width digits and colons are normalized before matching.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

/// Topic id shape: 3 to 5 ASCII digits
static TOPIC_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{3,5}$").expect("topic id pattern is valid"));

/// A parsed inbound command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Topic-scoped gated feature request
    Feature {
        feature: Feature,
        topic: String,
        payload: Option<String>,
    },
    /// Bare topic lookup
    Lookup { topic: String },
    /// Named aggregate recommendation request
    Recommend { bucket: RecommendBucket },
    /// Cache administration
    CacheAdmin(CacheAdmin),
    /// Background task poll; `None` targets the caller's most recent task
    PollTask { task_id: Option<uuid::Uuid> },
    /// Unmatched text, kept verbatim for fallback handling
    Unknown { raw: String },
}

/// Gated features addressable from message text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    News,
    Politics,
    CrossMarket,
    DiscussionStart,
    DiscussionSubmit,
    FinalReview,
    Feedback,
    EndDiscussion,
    ViewResult,
}

impl Feature {
    /// Snake-case name, for logs and cache keys
    pub fn as_str(self) -> &'static str {
        match self {
            Feature::News => "news",
            Feature::Politics => "politics",
            Feature::CrossMarket => "cross_market",
            Feature::DiscussionStart => "discussion_start",
            Feature::DiscussionSubmit => "discussion_submit",
            Feature::FinalReview => "final_review",
            Feature::Feedback => "feedback",
            Feature::EndDiscussion => "end_discussion",
            Feature::ViewResult => "view_result",
        }
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Aggregate recommendation buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecommendBucket {
    Momentum,
    Value,
}

impl RecommendBucket {
    /// Bucket name used in cache keys
    pub fn as_str(self) -> &'static str {
        match self {
            RecommendBucket::Momentum => "momentum",
            RecommendBucket::Value => "value",
        }
    }

    /// User-facing bucket name
    pub fn label(self) -> &'static str {
        match self {
            RecommendBucket::Momentum => "動能",
            RecommendBucket::Value => "價值",
        }
    }
}

impl std::fmt::Display for RecommendBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Cache administration requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheAdmin {
    /// Drop the cached artifact for one topic
    ClearOne { topic: String },
    /// Drop every cached artifact
    ClearAll,
}

/// Feature keywords, exact match on the first `:`-separated segment
const FEATURE_KEYWORDS: &[(&str, Feature)] = &[
    ("新聞", Feature::News),
    ("news", Feature::News),
    ("政經", Feature::Politics),
    ("politics", Feature::Politics),
    ("跨市場", Feature::CrossMarket),
    ("cross", Feature::CrossMarket),
    ("討論", Feature::DiscussionStart),
    ("discuss", Feature::DiscussionStart),
    ("提問", Feature::DiscussionSubmit),
    ("ask", Feature::DiscussionSubmit),
    ("總結", Feature::FinalReview),
    ("review", Feature::FinalReview),
    ("回饋", Feature::Feedback),
    ("feedback", Feature::Feedback),
    ("結束討論", Feature::EndDiscussion),
    ("end", Feature::EndDiscussion),
    ("查看結果", Feature::ViewResult),
    ("result", Feature::ViewResult),
];

type Rule = fn(&str) -> Option<Command>;

/// Shape rules in match order
const RULES: &[(&str, Rule)] = &[
    ("feature", parse_feature),
    ("cache_admin", parse_cache_admin),
    ("recommend", parse_recommend),
    ("poll", parse_poll),
    ("lookup", parse_lookup),
];

/// Parse message text into a [`Command`]
pub fn parse(text: &str) -> Command {
    let normalized = normalize(text);

    for (name, rule) in RULES {
        if let Some(command) = rule(&normalized) {
            debug!("Rule '{}' matched: {:?}", name, command);
            return command;
        }
    }

    Command::Unknown {
        raw: text.trim().to_string(),
    }
}

/// Trim and fold full-width colons and digits into ASCII
fn normalize(text: &str) -> String {
    text.trim()
        .chars()
        .map(|c| match c {
            '：' => ':',
            '０'..='９' => char::from_u32(c as u32 - 0xFEE0).unwrap_or(c),
            _ => c,
        })
        .collect()
}

/// Validate the topic id shape
fn topic_id(segment: &str) -> Option<String> {
    let candidate = segment.trim();
    TOPIC_ID.is_match(candidate).then(|| candidate.to_string())
}

fn parse_feature(text: &str) -> Option<Command> {
    let mut parts = text.splitn(3, ':');
    let keyword = parts.next()?;
    let feature = FEATURE_KEYWORDS
        .iter()
        .find(|(kw, _)| *kw == keyword)
        .map(|(_, f)| *f)?;
    let topic = topic_id(parts.next()?)?;
    let payload = parts
        .next()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string);

    Some(Command::Feature {
        feature,
        topic,
        payload,
    })
}

fn parse_cache_admin(text: &str) -> Option<Command> {
    if text == "清除全部快取" || text == "cache_clear_all" {
        return Some(Command::CacheAdmin(CacheAdmin::ClearAll));
    }

    let (keyword, rest) = text.split_once(':')?;
    if keyword != "清除快取" && keyword != "cache_clear" {
        return None;
    }
    let topic = topic_id(rest)?;
    Some(Command::CacheAdmin(CacheAdmin::ClearOne { topic }))
}

fn parse_recommend(text: &str) -> Option<Command> {
    let bucket = match text {
        "動能推薦" | "momentum" => RecommendBucket::Momentum,
        "價值推薦" | "value" => RecommendBucket::Value,
        _ => return None,
    };
    Some(Command::Recommend { bucket })
}

fn parse_poll(text: &str) -> Option<Command> {
    const KEYWORDS: &[&str] = &["查詢進度", "poll"];

    if KEYWORDS.contains(&text) {
        return Some(Command::PollTask { task_id: None });
    }

    let (keyword, rest) = text.split_once(':')?;
    if !KEYWORDS.contains(&keyword) {
        return None;
    }
    let task_id = rest.trim().parse().ok()?;
    Some(Command::PollTask {
        task_id: Some(task_id),
    })
}

fn parse_lookup(text: &str) -> Option<Command> {
    let topic = topic_id(text)?;
    Some(Command::Lookup { topic })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_commands_bilingual() {
        assert_eq!(
            parse("新聞:2330"),
            Command::Feature {
                feature: Feature::News,
                topic: "2330".to_string(),
                payload: None,
            }
        );
        assert_eq!(parse("news:2330"), parse("新聞:2330"));
        assert_eq!(
            parse("提問:2330:台積電下半年怎麼看"),
            Command::Feature {
                feature: Feature::DiscussionSubmit,
                topic: "2330".to_string(),
                payload: Some("台積電下半年怎麼看".to_string()),
            }
        );
    }

    #[test]
    fn test_keywords_are_case_sensitive() {
        assert!(matches!(parse("News:2330"), Command::Unknown { .. }));
        assert!(matches!(parse("POLL"), Command::Unknown { .. }));
    }

    #[test]
    fn test_feature_requires_id_shaped_topic() {
        assert!(matches!(parse("新聞:台積電"), Command::Unknown { .. }));
        assert!(matches!(parse("新聞:12"), Command::Unknown { .. }));
        assert!(matches!(parse("新聞:"), Command::Unknown { .. }));
    }

    #[test]
    fn test_empty_payload_segment_is_none() {
        assert_eq!(
            parse("回饋:2330:"),
            Command::Feature {
                feature: Feature::Feedback,
                topic: "2330".to_string(),
                payload: None,
            }
        );
    }

    #[test]
    fn test_bare_lookup_shape() {
        assert_eq!(
            parse("2330"),
            Command::Lookup {
                topic: "2330".to_string()
            }
        );
        assert_eq!(
            parse(" 00878 "),
            Command::Lookup {
                topic: "00878".to_string()
            }
        );
        assert!(matches!(parse("23"), Command::Unknown { .. }));
        assert!(matches!(parse("233067"), Command::Unknown { .. }));
        assert!(matches!(parse("23a0"), Command::Unknown { .. }));
    }

    #[test]
    fn test_fullwidth_input_is_normalized() {
        assert_eq!(
            parse("２３３０"),
            Command::Lookup {
                topic: "2330".to_string()
            }
        );
        assert_eq!(parse("新聞：２３３０"), parse("news:2330"));
    }

    #[test]
    fn test_cache_admin_commands() {
        assert_eq!(
            parse("清除快取:2330"),
            Command::CacheAdmin(CacheAdmin::ClearOne {
                topic: "2330".to_string()
            })
        );
        assert_eq!(parse("cache_clear_all"), Command::CacheAdmin(CacheAdmin::ClearAll));
        // Missing topic is not an admin command
        assert!(matches!(parse("清除快取"), Command::Unknown { .. }));
    }

    #[test]
    fn test_recommend_buckets() {
        assert_eq!(
            parse("動能推薦"),
            Command::Recommend {
                bucket: RecommendBucket::Momentum
            }
        );
        assert_eq!(
            parse("value"),
            Command::Recommend {
                bucket: RecommendBucket::Value
            }
        );
    }

    #[test]
    fn test_poll_with_and_without_task_id() {
        assert_eq!(parse("查詢進度"), Command::PollTask { task_id: None });

        let id = uuid::Uuid::new_v4();
        assert_eq!(
            parse(&format!("poll:{id}")),
            Command::PollTask { task_id: Some(id) }
        );
        assert!(matches!(parse("poll:not-a-uuid"), Command::Unknown { .. }));
    }

    #[test]
    fn test_unknown_keeps_raw_text() {
        assert_eq!(
            parse("  早安，大盤如何？  "),
            Command::Unknown {
                raw: "早安，大盤如何？".to_string()
            }
        );
    }

    #[test]
    fn test_end_discussion_is_distinct_from_start() {
        assert_eq!(
            parse("結束討論:2330"),
            Command::Feature {
                feature: Feature::EndDiscussion,
                topic: "2330".to_string(),
                payload: None,
            }
        );
        assert_eq!(
            parse("討論:2330"),
            Command::Feature {
                feature: Feature::DiscussionStart,
                topic: "2330".to_string(),
                payload: None,
            }
        );
    }
}
