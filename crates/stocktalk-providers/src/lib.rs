//! Collaborator interfaces for the stocktalk service
//!
//! The orchestration core talks to three kinds of upstream through the traits
//! here: price history ([`market::MarketDataProvider`]), generated analysis
//! ([`ai::AiProvider`]), and recent articles ([`search::SearchProvider`]).
//! Concrete network clients live outside this workspace; what ships here are
//! the contracts, the DTOs, and the [`retrying::Retrying`] decorator that
//! puts every call behind a retry policy.

pub mod ai;
pub mod market;
pub mod retrying;
pub mod search;

pub use ai::{AiProvider, completion_text};
pub use market::{Candle, MarketDataProvider, SeriesRange, TimeSeries};
pub use retrying::Retrying;
pub use search::{SearchHit, SearchProvider};
