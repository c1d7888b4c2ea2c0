//! Chat-driven stock analysis bot
//!
//! Users send short text commands over a messaging channel; the backend
//! answers with computed artifacts: price snapshots with AI commentary,
//! news and politics briefs, and screened recommendation lists. This crate
//! carries the event-facing half of the service:
//!
//! - [`webhook`]: delivery payloads and HMAC signature verification
//! - [`router`]: text-to-command parsing with fixed rule precedence
//! - [`channel`]: outbound reply/push ports and the platform HTTP client
//! - [`analysis`]: artifact assembly over the provider traits
//! - [`orchestrator`]: dedup, dispatch, reply-once per event
//! - [`server`]: the axum ingress (`POST /callback`, `GET /healthz`)
//! - [`dev`]: deterministic in-process backends for local runs and tests
//!
//! Command grammar: `<keyword>:<topic>` or `<keyword>:<topic>:<extra>` for
//! gated features, a bare `\d{3,5}` id for lookups, and fixed keywords for
//! recommendations, cache administration and task polling. Anything else is
//! treated as free-form discussion input when the sender's session is
//! waiting for one.
//!
//! Slow work (recommendation screening) is accepted as a background task:
//! the reply is an immediate "in progress" with a task id, and the user
//! polls with `查詢進度` until the task record turns terminal.

pub mod analysis;
pub mod channel;
pub mod dev;
pub mod orchestrator;
pub mod router;
pub mod server;
pub mod webhook;

pub use analysis::AnalysisService;
pub use channel::{MessagingClient, PushPort, ReplyPort};
pub use orchestrator::Orchestrator;
pub use router::{CacheAdmin, Command, Feature, RecommendBucket};
pub use server::AppState;
pub use webhook::{InboundEvent, WebhookPayload};
