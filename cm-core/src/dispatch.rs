use crate::extract::ClipCandidate;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cm_chat::{MessageId, StreamId, StreamInfo};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Per-channel routing attached to a session once at creation and carried on
/// every action it dispatches; never re-resolved per cycle.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingConfig {
    pub channel_id: String,
    pub channel_name: String,
    pub short_name: String,
    /// Report-sink target (spreadsheet id in the reporting collaborator's
    /// terms). Absent for channels without a report route.
    pub sheet_id: Option<String>,
    /// Per-channel override of the default lookback.
    pub lookback_seconds: Option<u64>,
    /// When false the session still polls and marks commands seen, but
    /// dispatches nothing.
    pub auto_clip: bool,
    /// False when the channel fell through to the default route.
    pub configured: bool,
}

/// Resolves routing for a stream's channel. Consulted once at session
/// creation.
pub trait RoutingResolver: Send + Sync {
    fn resolve(&self, info: &StreamInfo) -> RoutingConfig;
}

/// One derived action: "clip the moment `target_time` on this stream".
#[derive(Debug, Clone, Serialize)]
pub struct ClipAction {
    pub id: Uuid,
    pub stream_id: StreamId,
    pub message_id: MessageId,
    pub moderator: String,
    pub command: String,
    /// When the command message was published upstream.
    pub event_time: DateTime<Utc>,
    /// The moment the clip should capture: event time minus lookback,
    /// clamped to the session watermark.
    pub target_time: DateTime<Utc>,
    pub routing: RoutingConfig,
    pub created_at: DateTime<Utc>,
}

impl ClipAction {
    pub fn from_selection(
        stream_id: StreamId,
        winner: &ClipCandidate,
        target_time: DateTime<Utc>,
        routing: RoutingConfig,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            stream_id,
            message_id: winner.message_id.clone(),
            moderator: winner.author_name.clone(),
            command: winner.text.clone(),
            event_time: winner.published_at,
            target_time,
            routing,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Sink unavailable; the cycle may retry the same action later.
    #[error("transient dispatch failure: {0}")]
    Transient(String),

    /// The sink rejected the action; retrying cannot help.
    #[error("permanent dispatch failure: {0}")]
    Permanent(String),
}

/// Downstream fan-out for actions. Implementations may write several sinks
/// internally but must return one unambiguous verdict per call; partial sink
/// failure policy is theirs.
#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    async fn dispatch(&self, action: &ClipAction) -> Result<(), DispatchError>;
}
