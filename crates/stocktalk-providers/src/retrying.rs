//! Retrying decorators for provider calls
//!
//! Every outbound provider call crosses the retry wrapper exactly once, here.
//! Wrap a provider in [`Retrying`] with the profile from config and hand the
//! result around as the trait object; callers never see a raw provider.

use async_trait::async_trait;
use serde_json::Value;

use stocktalk_core::{Result, RetryPolicy};

use crate::ai::AiProvider;
use crate::market::{MarketDataProvider, SeriesRange, TimeSeries};
use crate::search::{SearchHit, SearchProvider};

/// A provider wrapped with a retry policy
pub struct Retrying<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P> Retrying<P> {
    /// Wrap `inner` so its calls run under `policy`
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<P: MarketDataProvider> MarketDataProvider for Retrying<P> {
    async fn fetch_series(&self, subject: &str, range: SeriesRange) -> Result<TimeSeries> {
        self.policy
            .execute("market.fetch_series", || {
                self.inner.fetch_series(subject, range)
            })
            .await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[async_trait]
impl<P: AiProvider> AiProvider for Retrying<P> {
    async fn complete(&self, prompt: &str, schema: Option<Value>) -> Result<Value> {
        self.policy
            .execute("ai.complete", || {
                self.inner.complete(prompt, schema.clone())
            })
            .await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[async_trait]
impl<P: SearchProvider> SearchProvider for Retrying<P> {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        self.policy
            .execute("search.search", || self.inner.search(query, limit))
            .await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
