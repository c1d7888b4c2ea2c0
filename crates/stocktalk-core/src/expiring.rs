//! Timestamped value wrapper with lazy expiry
//!
//! Freshness is decided at read time against a caller-supplied TTL. Nothing
//! in here schedules deletions; a stale value simply stops being returned.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A value paired with the instant it was written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expiring<T> {
    /// The wrapped payload
    pub value: T,
    /// When the payload was produced
    pub updated_at: DateTime<Utc>,
}

impl<T> Expiring<T> {
    /// Wrap a value, timestamped now
    pub fn new(value: T) -> Self {
        Self {
            value,
            updated_at: Utc::now(),
        }
    }

    /// Wrap a value with an explicit timestamp
    pub fn with_timestamp(value: T, updated_at: DateTime<Utc>) -> Self {
        Self { value, updated_at }
    }

    /// Age of the value relative to `now`
    pub fn age_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.updated_at
    }

    /// Age of the value relative to the current instant
    pub fn age(&self) -> chrono::Duration {
        self.age_at(Utc::now())
    }

    /// Whether the value is still valid under `ttl` at instant `now`.
    ///
    /// Valid means `age < ttl`, strictly. A TTL too large for chrono's range
    /// never expires anything.
    pub fn is_fresh_at(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => self.age_at(now) < ttl,
            Err(_) => true,
        }
    }

    /// Whether the value is still valid under `ttl` right now
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.is_fresh_at(ttl, Utc::now())
    }

    /// Unwrap the value if still fresh, discarding it otherwise
    pub fn into_fresh(self, ttl: Duration) -> Option<T> {
        if self.is_fresh(ttl) { Some(self.value) } else { None }
    }
}
