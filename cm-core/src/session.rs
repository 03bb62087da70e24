//! Session registry for monitored broadcasts.
//!
//! One entry per stream id. Cursor and ledger live exactly as long as the
//! session and are destroyed together on terminate. All mutation happens
//! through short synchronous critical sections on the registry entry; the
//! lock is never held across an await.

use crate::cursor::{CursorStore, FailureKind, PollError};
use crate::dispatch::RoutingConfig;
use crate::extract::{Extraction, extract_commands};
use crate::ledger::DedupLedger;
use chrono::{DateTime, Utc};
use cm_chat::{ChatMessage, LiveChatId, MessageId, PageToken, StreamId, StreamInfo};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Pending,
    Active,
    Paused,
    Terminated,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session already exists for stream {0}")]
    AlreadyExists(StreamId),

    #[error("no session for stream {0}")]
    NotFound(StreamId),
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SessionCounters {
    pub polls: u64,
    pub messages_seen: u64,
    pub clips_dispatched: u64,
    pub ignored_commands: u64,
    pub duplicates_skipped: u64,
}

struct Session {
    info: StreamInfo,
    routing: RoutingConfig,
    state: SessionState,
    created_at: DateTime<Utc>,
    cursor: CursorStore,
    ledger: DedupLedger,
    counters: SessionCounters,
    run_token: CancellationToken,
}

/// Snapshot of one session for status surfaces. Error state stays readable
/// after a session pauses itself.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub stream_id: StreamId,
    pub title: String,
    pub channel_id: String,
    pub channel_title: String,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub has_cursor: bool,
    pub consecutive_errors: u32,
    pub last_error: Option<PollError>,
    pub counters: SessionCounters,
}

/// Everything one poll cycle needs, snapshotted under the session lock.
#[derive(Debug, Clone)]
pub struct CycleContext {
    pub stream_id: StreamId,
    pub live_chat_id: LiveChatId,
    pub cursor: Option<PageToken>,
    pub created_at: DateTime<Utc>,
    pub routing: RoutingConfig,
    pub cancel: CancellationToken,
}

/// How the scheduler should proceed after a recorded failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Retry after the flat transient delay.
    Retry,
    /// Retry after the extended rate-limit delay.
    RateLimit,
    /// The session paused itself (permanent failure or error cap); stop
    /// rescheduling.
    Paused,
}

pub struct SessionManager {
    sessions: DashMap<StreamId, Session>,
    ledger_capacity: usize,
}

impl SessionManager {
    pub fn new(ledger_capacity: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            ledger_capacity: ledger_capacity.max(1),
        }
    }

    pub fn create(
        &self,
        info: StreamInfo,
        routing: RoutingConfig,
    ) -> Result<SessionSummary, SessionError> {
        let stream_id = info.video_id.clone();
        match self.sessions.entry(stream_id.clone()) {
            Entry::Occupied(_) => Err(SessionError::AlreadyExists(stream_id)),
            Entry::Vacant(entry) => {
                let session = Session {
                    info,
                    routing,
                    state: SessionState::Pending,
                    created_at: Utc::now(),
                    cursor: CursorStore::default(),
                    ledger: DedupLedger::new(self.ledger_capacity),
                    counters: SessionCounters::default(),
                    run_token: CancellationToken::new(),
                };
                let summary = summarize(&stream_id, &session);
                entry.insert(session);
                tracing::info!(stream_id = %summary.stream_id, "session created");
                Ok(summary)
            }
        }
    }

    pub fn activate(&self, stream_id: &StreamId) -> Result<(), SessionError> {
        let mut session = self
            .sessions
            .get_mut(stream_id)
            .ok_or_else(|| SessionError::NotFound(stream_id.clone()))?;
        if session.state == SessionState::Active {
            return Ok(());
        }
        session.state = SessionState::Active;
        session.run_token = CancellationToken::new();
        session.cursor.clear_errors();
        tracing::info!(stream_id = %stream_id, "session activated");
        Ok(())
    }

    /// Pause polling. Cursor and ledger survive, so a later activate resumes
    /// where the session left off.
    pub fn pause(&self, stream_id: &StreamId) -> Result<(), SessionError> {
        let mut session = self
            .sessions
            .get_mut(stream_id)
            .ok_or_else(|| SessionError::NotFound(stream_id.clone()))?;
        if session.state == SessionState::Paused {
            return Ok(());
        }
        session.state = SessionState::Paused;
        session.run_token.cancel();
        tracing::info!(stream_id = %stream_id, "session paused");
        Ok(())
    }

    /// Destroy the session with its cursor and ledger. Idempotent:
    /// terminating an absent session is a no-op success. Returns whether a
    /// session was actually removed.
    pub fn terminate(&self, stream_id: &StreamId) -> bool {
        let Some((_, mut session)) = self.sessions.remove(stream_id) else {
            return false;
        };
        session.state = SessionState::Terminated;
        session.run_token.cancel();
        tracing::info!(stream_id = %stream_id, "session terminated");
        true
    }

    pub fn get(&self, stream_id: &StreamId) -> Option<SessionSummary> {
        self.sessions
            .get(stream_id)
            .map(|session| summarize(stream_id, &session))
    }

    pub fn list(&self) -> Vec<SessionSummary> {
        let mut out: Vec<SessionSummary> = self
            .sessions
            .iter()
            .map(|entry| summarize(entry.key(), entry.value()))
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    /// Snapshot of sessions the scheduler should be driving. Never includes
    /// paused or pending sessions.
    pub fn list_active(&self) -> Vec<SessionSummary> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().state == SessionState::Active)
            .map(|entry| summarize(entry.key(), entry.value()))
            .collect()
    }

    /// Seed the pagination cursor before the first poll so the session
    /// starts at the live head. No-op if a cursor already exists.
    pub fn prime_cursor(
        &self,
        stream_id: &StreamId,
        token: PageToken,
    ) -> Result<bool, SessionError> {
        let mut session = self
            .sessions
            .get_mut(stream_id)
            .ok_or_else(|| SessionError::NotFound(stream_id.clone()))?;
        Ok(session.cursor.prime(token))
    }

    /// Snapshot everything one cycle needs. Returns `None` unless the
    /// session exists and is active — the scheduler treats that as "stop
    /// rescheduling".
    pub fn cycle_context(&self, stream_id: &StreamId) -> Option<CycleContext> {
        let session = self.sessions.get(stream_id)?;
        if session.state != SessionState::Active {
            return None;
        }
        Some(CycleContext {
            stream_id: stream_id.clone(),
            live_chat_id: session.info.live_chat_id.clone(),
            cursor: session.cursor.token().cloned(),
            created_at: session.created_at,
            routing: session.routing.clone(),
            cancel: session.run_token.clone(),
        })
    }

    /// A fetch succeeded: advance the cursor to the returned token (even for
    /// a zero-message page) and stamp the poll.
    pub fn record_fetch_success(
        &self,
        stream_id: &StreamId,
        next_cursor: PageToken,
        message_count: usize,
    ) {
        let Some(mut session) = self.sessions.get_mut(stream_id) else {
            return;
        };
        session.cursor.advance(next_cursor, Utc::now());
        session.counters.polls += 1;
        session.counters.messages_seen += message_count as u64;
    }

    /// Run the extractor for a fetched page against this session's ledger
    /// and watermark. Reads the ledger; never commits to it.
    pub fn extract_page(
        &self,
        stream_id: &StreamId,
        messages: &[ChatMessage],
    ) -> Option<Extraction> {
        let mut session = self.sessions.get_mut(stream_id)?;
        let extraction = extract_commands(messages, session.created_at, &session.ledger);
        session.counters.ignored_commands += extraction.ignored_commands;
        session.counters.duplicates_skipped += extraction.duplicates_skipped;
        Some(extraction)
    }

    /// Close out a successful cycle: commit the considered candidate ids to
    /// the ledger (so none are re-evaluated next cycle) and reset the error
    /// streak. The ledger commit and the dispatch verdict land in the same
    /// critical section, immediately after the dispatcher returned.
    pub fn commit_cycle(&self, stream_id: &StreamId, ids: Vec<MessageId>, dispatched: bool) {
        let Some(mut session) = self.sessions.get_mut(stream_id) else {
            return;
        };
        session.ledger.commit(ids);
        session.cursor.clear_errors();
        if dispatched {
            session.counters.clips_dispatched += 1;
        }
    }

    /// Record a classified fetch/dispatch failure and decide how the cycle
    /// should proceed. Permanent failures and a capped transient streak
    /// pause the session, leaving the reason inspectable in its summary.
    pub fn record_poll_failure(
        &self,
        stream_id: &StreamId,
        kind: FailureKind,
        message: String,
        error_cap: u32,
    ) -> FailureDisposition {
        let Some(mut session) = self.sessions.get_mut(stream_id) else {
            return FailureDisposition::Paused;
        };
        let error = PollError {
            kind,
            message,
            at: Utc::now(),
        };
        match kind {
            FailureKind::Permanent => {
                session.cursor.record_error(error);
                session.state = SessionState::Paused;
                session.run_token.cancel();
                tracing::warn!(
                    stream_id = %stream_id,
                    "permanent upstream failure; session paused"
                );
                FailureDisposition::Paused
            }
            FailureKind::RateLimited => {
                session.cursor.record_error(error);
                FailureDisposition::RateLimit
            }
            FailureKind::Transient => {
                let streak = session.cursor.record_error(error);
                if streak >= error_cap {
                    session.state = SessionState::Paused;
                    session.run_token.cancel();
                    tracing::error!(
                        stream_id = %stream_id,
                        consecutive_errors = streak,
                        error_cap,
                        "transient failure streak hit the cap; session paused"
                    );
                    FailureDisposition::Paused
                } else {
                    FailureDisposition::Retry
                }
            }
        }
    }
}

fn summarize(stream_id: &StreamId, session: &Session) -> SessionSummary {
    SessionSummary {
        stream_id: stream_id.clone(),
        title: session.info.title.clone(),
        channel_id: session.info.channel_id.clone(),
        channel_title: session.info.channel_title.clone(),
        state: session.state,
        created_at: session.created_at,
        last_polled_at: session.cursor.last_polled_at(),
        has_cursor: session.cursor.token().is_some(),
        consecutive_errors: session.cursor.consecutive_errors(),
        last_error: session.cursor.last_error().cloned(),
        counters: session.counters,
    }
}

#[cfg(test)]
mod tests {
    use super::{FailureDisposition, SessionError, SessionManager, SessionState};
    use crate::cursor::FailureKind;
    use crate::dispatch::RoutingConfig;
    use chrono::Utc;
    use cm_chat::{AuthorRole, ChatMessage, PageToken, StreamId, StreamInfo};

    fn info(video_id: &str) -> StreamInfo {
        StreamInfo {
            video_id: StreamId::new(video_id),
            live_chat_id: "chat-1".into(),
            title: "Launch stream".to_string(),
            channel_id: "UCchan".to_string(),
            channel_title: "Chan".to_string(),
        }
    }

    fn routing() -> RoutingConfig {
        RoutingConfig {
            channel_id: "UCchan".to_string(),
            channel_name: "Chan".to_string(),
            short_name: "CH".to_string(),
            sheet_id: Some("sheet-1".to_string()),
            lookback_seconds: None,
            auto_clip: true,
            configured: true,
        }
    }

    fn clip_message(id: &str) -> ChatMessage {
        ChatMessage {
            id: id.into(),
            author_id: "UCauthor".into(),
            author_name: "Mod".to_string(),
            role: AuthorRole::Moderator,
            text: "!clip".to_string(),
            published_at: Utc::now() + chrono::Duration::seconds(5),
        }
    }

    #[test]
    fn create_rejects_duplicate_stream_ids() {
        let manager = SessionManager::new(64);
        manager.create(info("vid-1"), routing()).expect("create");
        let err = manager
            .create(info("vid-1"), routing())
            .expect_err("duplicate must fail");
        assert!(matches!(err, SessionError::AlreadyExists(_)));
    }

    #[test]
    fn activate_and_pause_require_a_known_session() {
        let manager = SessionManager::new(64);
        let missing = StreamId::new("nope");
        assert!(matches!(
            manager.activate(&missing),
            Err(SessionError::NotFound(_))
        ));
        assert!(matches!(
            manager.pause(&missing),
            Err(SessionError::NotFound(_))
        ));
    }

    #[test]
    fn list_active_excludes_pending_and_paused() {
        let manager = SessionManager::new(64);
        manager.create(info("pending"), routing()).expect("create");
        manager.create(info("active"), routing()).expect("create");
        manager.create(info("paused"), routing()).expect("create");
        manager.activate(&StreamId::new("active")).expect("activate");
        manager.activate(&StreamId::new("paused")).expect("activate");
        manager.pause(&StreamId::new("paused")).expect("pause");

        let active = manager.list_active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].stream_id.as_str(), "active");
        assert_eq!(manager.list().len(), 3);
    }

    #[test]
    fn terminate_is_idempotent() {
        let manager = SessionManager::new(64);
        let id = StreamId::new("vid-1");
        manager.create(info("vid-1"), routing()).expect("create");
        assert!(manager.terminate(&id));
        assert!(!manager.terminate(&id));
        assert!(manager.get(&id).is_none());
    }

    #[test]
    fn pause_preserves_cursor_and_ledger_for_resume() {
        let manager = SessionManager::new(64);
        let id = StreamId::new("vid-1");
        manager.create(info("vid-1"), routing()).expect("create");
        manager.activate(&id).expect("activate");
        manager.record_fetch_success(&id, PageToken::new("p1"), 1);
        manager.commit_cycle(&id, vec!["seen-1".into()], true);

        manager.pause(&id).expect("pause");
        manager.activate(&id).expect("resume");

        let summary = manager.get(&id).expect("summary");
        assert!(summary.has_cursor);
        let extraction = manager
            .extract_page(&id, &[clip_message("seen-1")])
            .expect("extract");
        assert!(extraction.clips.is_empty());
        assert_eq!(extraction.duplicates_skipped, 1);
    }

    #[test]
    fn cycle_context_only_exists_for_active_sessions() {
        let manager = SessionManager::new(64);
        let id = StreamId::new("vid-1");
        manager.create(info("vid-1"), routing()).expect("create");
        assert!(manager.cycle_context(&id).is_none(), "pending has no cycle");
        manager.activate(&id).expect("activate");
        assert!(manager.cycle_context(&id).is_some());
        manager.pause(&id).expect("pause");
        assert!(manager.cycle_context(&id).is_none(), "paused has no cycle");
    }

    #[test]
    fn permanent_failure_pauses_with_inspectable_reason() {
        let manager = SessionManager::new(64);
        let id = StreamId::new("vid-1");
        manager.create(info("vid-1"), routing()).expect("create");
        manager.activate(&id).expect("activate");

        let disposition = manager.record_poll_failure(
            &id,
            FailureKind::Permanent,
            "chat ended".to_string(),
            5,
        );
        assert_eq!(disposition, FailureDisposition::Paused);

        let summary = manager.get(&id).expect("summary");
        assert_eq!(summary.state, SessionState::Paused);
        let last = summary.last_error.expect("last error");
        assert_eq!(last.kind, FailureKind::Permanent);
        assert_eq!(last.message, "chat ended");
    }

    #[test]
    fn transient_streak_pauses_at_the_cap() {
        let manager = SessionManager::new(64);
        let id = StreamId::new("vid-1");
        manager.create(info("vid-1"), routing()).expect("create");
        manager.activate(&id).expect("activate");

        let first =
            manager.record_poll_failure(&id, FailureKind::Transient, "timeout".to_string(), 2);
        assert_eq!(first, FailureDisposition::Retry);
        let second =
            manager.record_poll_failure(&id, FailureKind::Transient, "timeout".to_string(), 2);
        assert_eq!(second, FailureDisposition::Paused);
        let summary = manager.get(&id).expect("summary");
        assert_eq!(summary.state, SessionState::Paused);
        assert_eq!(summary.consecutive_errors, 2);
    }

    #[test]
    fn rate_limit_does_not_advance_the_error_streak() {
        let manager = SessionManager::new(64);
        let id = StreamId::new("vid-1");
        manager.create(info("vid-1"), routing()).expect("create");
        manager.activate(&id).expect("activate");

        let disposition =
            manager.record_poll_failure(&id, FailureKind::RateLimited, "quota".to_string(), 2);
        assert_eq!(disposition, FailureDisposition::RateLimit);
        let summary = manager.get(&id).expect("summary");
        assert_eq!(summary.state, SessionState::Active);
        assert_eq!(summary.consecutive_errors, 0);
        assert!(summary.last_error.is_some());
    }
}
