//! Shared building blocks for the stocktalk service
//!
//! This crate carries the pieces every other stocktalk crate leans on:
//!
//! - A unified error taxonomy with retryability classification
//! - [`retry::RetryPolicy`], bounded exponential backoff for provider calls
//! - [`expiring::Expiring`], a timestamped wrapper with read-time TTL checks
//! - [`cache::ArtifactCache`], a read-through TTL cache for analysis artifacts
//! - [`config::AppConfig`], deployment configuration with env loading
//! - Tracing initialization
//!
//! Nothing here knows about webhooks, sessions, or providers; those live in
//! the crates stacked on top.

pub mod cache;
pub mod config;
pub mod error;
pub mod expiring;
pub mod logging;
pub mod retry;

// Re-export main types for convenience
pub use cache::{ArtifactCache, CacheStore, MemoryCacheStore};
pub use config::AppConfig;
pub use error::{Error, Result, Retryable};
pub use expiring::Expiring;
pub use retry::RetryPolicy;
