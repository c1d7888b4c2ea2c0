//! Web search provider interface

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stocktalk_core::Result;

/// One search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// Source of recent articles for news and politics briefs
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Search for recent articles matching the query
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;

    /// Provider name, for logs
    fn name(&self) -> &str;
}
