use chrono::{DateTime, Utc};
use cm_chat::PageToken;
use serde::Serialize;

/// Classification of a failed fetch or dispatch, kept for operator
/// inspection after the fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transient,
    RateLimited,
    Permanent,
}

#[derive(Debug, Clone, Serialize)]
pub struct PollError {
    pub kind: FailureKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Per-session pagination cursor plus poll bookkeeping.
///
/// The cursor token is opaque and upstream-issued. It advances on every
/// successful fetch — including zero-message pages — and is left untouched by
/// failed fetches. Losing an advance only costs a page of reprocessing,
/// which the dedup ledger absorbs.
#[derive(Debug, Default)]
pub struct CursorStore {
    token: Option<PageToken>,
    last_polled_at: Option<DateTime<Utc>>,
    consecutive_errors: u32,
    last_error: Option<PollError>,
}

impl CursorStore {
    pub fn token(&self) -> Option<&PageToken> {
        self.token.as_ref()
    }

    pub fn last_polled_at(&self) -> Option<DateTime<Utc>> {
        self.last_polled_at
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn last_error(&self) -> Option<&PollError> {
        self.last_error.as_ref()
    }

    pub fn advance(&mut self, token: PageToken, polled_at: DateTime<Utc>) {
        self.token = Some(token);
        self.last_polled_at = Some(polled_at);
    }

    /// Seed the cursor before the first poll, so polling starts at the live
    /// head instead of replaying history. No-op once a cursor exists.
    pub fn prime(&mut self, token: PageToken) -> bool {
        if self.token.is_some() {
            return false;
        }
        self.token = Some(token);
        true
    }

    /// Record a classified failure. Rate limiting is remembered but does not
    /// count toward the consecutive-error cap. Returns the updated count.
    pub fn record_error(&mut self, error: PollError) -> u32 {
        if error.kind != FailureKind::RateLimited {
            self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        }
        self.last_error = Some(error);
        self.consecutive_errors
    }

    pub fn clear_errors(&mut self) {
        self.consecutive_errors = 0;
        self.last_error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::{CursorStore, FailureKind, PollError};
    use chrono::Utc;
    use cm_chat::PageToken;

    fn error(kind: FailureKind) -> PollError {
        PollError {
            kind,
            message: "boom".to_string(),
            at: Utc::now(),
        }
    }

    #[test]
    fn advance_replaces_token_and_stamps_poll_time() {
        let mut cursor = CursorStore::default();
        assert!(cursor.token().is_none());
        let now = Utc::now();
        cursor.advance(PageToken::new("p1"), now);
        cursor.advance(PageToken::new("p2"), now);
        assert_eq!(cursor.token().map(|t| t.as_str()), Some("p2"));
        assert_eq!(cursor.last_polled_at(), Some(now));
    }

    #[test]
    fn prime_only_seeds_an_empty_cursor() {
        let mut cursor = CursorStore::default();
        assert!(cursor.prime(PageToken::new("head")));
        assert!(!cursor.prime(PageToken::new("later")));
        assert_eq!(cursor.token().map(|t| t.as_str()), Some("head"));
    }

    #[test]
    fn rate_limited_errors_do_not_count_toward_the_cap() {
        let mut cursor = CursorStore::default();
        assert_eq!(cursor.record_error(error(FailureKind::Transient)), 1);
        assert_eq!(cursor.record_error(error(FailureKind::RateLimited)), 1);
        assert_eq!(cursor.record_error(error(FailureKind::Transient)), 2);
        assert_eq!(
            cursor.last_error().map(|e| e.kind),
            Some(FailureKind::Transient)
        );
        cursor.clear_errors();
        assert_eq!(cursor.consecutive_errors(), 0);
        assert!(cursor.last_error().is_none());
    }
}
