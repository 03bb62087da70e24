//! Session-scoped polling and command-detection engine.
//!
//! One `Session` tracks one monitored broadcast: its pagination cursor, its
//! dedup ledger of already-actioned message ids, and its poll bookkeeping.
//! The `PollScheduler` drives fetch → extract → select → dispatch cycles per
//! active session, serialized within a session and parallel across sessions.

mod cursor;
mod dispatch;
mod extract;
mod ledger;
mod scheduler;
mod select;
mod session;

pub use cursor::{CursorStore, FailureKind, PollError};
pub use dispatch::{ActionDispatcher, ClipAction, DispatchError, RoutingConfig, RoutingResolver};
pub use extract::{ClipCandidate, CommandKind, Extraction, classify_command, extract_commands};
pub use ledger::DedupLedger;
pub use scheduler::{PollScheduler, SchedulerConfig};
pub use select::{Selection, select_latest, target_event_time};
pub use session::{
    CycleContext, FailureDisposition, SessionCounters, SessionError, SessionManager, SessionState,
    SessionSummary,
};
