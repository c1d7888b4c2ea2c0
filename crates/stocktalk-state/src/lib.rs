//! Cross-event state for the stocktalk service
//!
//! Each inbound webhook event is handled by an independent invocation; all
//! state that must survive between events lives behind the store traits in
//! this crate:
//!
//! - [`ledger`]: which reply handles have already been answered
//! - [`session`]: per-(user, topic) conversation state machine
//! - [`task`]: background task records and detached execution
//!
//! Every component is a thin manager over a narrow async store trait, with an
//! in-memory implementation for single-process deployments and tests.

pub mod ledger;
pub mod session;
pub mod task;

pub use ledger::{IdempotencyLedger, LedgerStore, MemoryLedgerStore};
pub use session::{
    Availability, DiscussionRound, GatedFeature, MemorySessionStore, Session, SessionManager,
    SessionStore, Stage,
};
pub use task::{
    AsyncTask, MemoryTaskStore, TaskManager, TaskStatus, TaskStore, Transition, TIMEOUT_REASON,
};
