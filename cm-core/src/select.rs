use crate::extract::ClipCandidate;
use chrono::{DateTime, Utc};
use cm_chat::MessageId;
use std::time::Duration;

/// The outcome of picking one action from a cycle's candidates.
#[derive(Debug, Clone)]
pub struct Selection {
    pub winner: ClipCandidate,
    /// Every candidate id considered this cycle, winner included. All of
    /// them are committed to the ledger after a successful dispatch so
    /// passed-over candidates are not re-evaluated next cycle.
    pub considered: Vec<MessageId>,
    pub target_event_time: DateTime<Utc>,
}

/// Latest-wins tie-break: sort by event time descending (stable, so equal
/// timestamps keep upstream order) and take the first. At most one action per
/// poll cycle is a deliberate backpressure policy toward low-throughput
/// sinks, not an oversight.
pub fn select_latest(
    candidates: Vec<ClipCandidate>,
    lookback: Duration,
    floor: DateTime<Utc>,
) -> Option<Selection> {
    if candidates.is_empty() {
        return None;
    }
    let considered: Vec<MessageId> = candidates.iter().map(|c| c.message_id.clone()).collect();

    let mut ordered = candidates;
    ordered.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    let winner = ordered.into_iter().next()?;
    let target_event_time = target_event_time(winner.published_at, lookback, floor);

    Some(Selection {
        winner,
        considered,
        target_event_time,
    })
}

/// The action targets a moment `lookback` before the command was typed,
/// clamped so it never precedes the session watermark.
pub fn target_event_time(
    published_at: DateTime<Utc>,
    lookback: Duration,
    floor: DateTime<Utc>,
) -> DateTime<Utc> {
    let offset = chrono::Duration::milliseconds(lookback.as_millis() as i64);
    (published_at - offset).max(floor)
}
