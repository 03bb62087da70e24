use crate::ledger::DedupLedger;
use chrono::{DateTime, Utc};
use cm_chat::{ChatMessage, MessageId};

/// Leading-token command classification. Matching is case-sensitive and
/// exact: `!clip now` is a clip command, `!clipx` is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Clip,
    Other,
}

pub fn classify_command(text: &str) -> Option<CommandKind> {
    let token = text.split_whitespace().next()?;
    if !token.starts_with('!') || token.len() < 2 {
        return None;
    }
    if token == "!clip" {
        Some(CommandKind::Clip)
    } else {
        Some(CommandKind::Other)
    }
}

/// A privileged clip command surviving every extraction filter, pending
/// selection.
#[derive(Debug, Clone)]
pub struct ClipCandidate {
    pub message_id: MessageId,
    pub author_name: String,
    pub text: String,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct Extraction {
    /// Surviving clip candidates, in upstream order.
    pub clips: Vec<ClipCandidate>,
    /// Privileged non-clip commands observed this page (counted, not acted on).
    pub ignored_commands: u64,
    /// Messages skipped because the ledger already holds their id.
    pub duplicates_skipped: u64,
}

/// Pure page transformation: one fetched page in, surviving clip candidates
/// out. Reads the ledger but never writes it — marking ids as seen is a
/// separate commit step taken only after a successful dispatch, so a failed
/// dispatch can be retried on the next cycle.
///
/// Filters, in order: already-seen ids, non-privileged authors, leading-token
/// classification, and the session watermark (clip commands published before
/// the session was created never fire, even on a cursor replay of
/// pre-session history).
pub fn extract_commands(
    messages: &[ChatMessage],
    watermark: DateTime<Utc>,
    ledger: &DedupLedger,
) -> Extraction {
    let mut out = Extraction::default();

    for message in messages {
        if ledger.contains(&message.id) {
            out.duplicates_skipped += 1;
            continue;
        }
        if !message.role.is_privileged() {
            continue;
        }
        match classify_command(&message.text) {
            Some(CommandKind::Clip) => {
                if message.published_at < watermark {
                    continue;
                }
                out.clips.push(ClipCandidate {
                    message_id: message.id.clone(),
                    author_name: message.author_name.clone(),
                    text: message.text.clone(),
                    published_at: message.published_at,
                });
            }
            Some(CommandKind::Other) => {
                out.ignored_commands += 1;
            }
            None => {}
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::{CommandKind, classify_command, extract_commands};
    use crate::ledger::DedupLedger;
    use chrono::{DateTime, Duration, Utc};
    use cm_chat::{AuthorRole, ChatMessage};

    fn t0() -> DateTime<Utc> {
        "2026-03-01T12:00:00Z".parse().expect("timestamp")
    }

    fn message(id: &str, role: AuthorRole, text: &str, offset_secs: i64) -> ChatMessage {
        ChatMessage {
            id: id.into(),
            author_id: "UCauthor".into(),
            author_name: "Mod".to_string(),
            role,
            text: text.to_string(),
            published_at: t0() + Duration::seconds(offset_secs),
        }
    }

    #[test]
    fn classify_requires_exact_leading_clip_token() {
        assert_eq!(classify_command("!clip"), Some(CommandKind::Clip));
        assert_eq!(classify_command("!clip that moment"), Some(CommandKind::Clip));
        assert_eq!(classify_command("!clipx"), Some(CommandKind::Other));
        assert_eq!(classify_command("!chat hello"), Some(CommandKind::Other));
        assert_eq!(classify_command("!Clip"), Some(CommandKind::Other));
        assert_eq!(classify_command("clip this"), None);
        assert_eq!(classify_command("!"), None);
        assert_eq!(classify_command("   "), None);
    }

    #[test]
    fn only_privileged_authors_produce_candidates() {
        let ledger = DedupLedger::new(16);
        let page = vec![
            message("a", AuthorRole::Viewer, "!clip pls", 5),
            message("b", AuthorRole::Moderator, "!clip now", 6),
            message("c", AuthorRole::Owner, "!clip", 7),
        ];
        let extraction = extract_commands(&page, t0(), &ledger);
        let ids: Vec<&str> = extraction
            .clips
            .iter()
            .map(|c| c.message_id.as_str())
            .collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn seen_ids_are_skipped_and_counted() {
        let mut ledger = DedupLedger::new(16);
        ledger.commit(["b".into()]);
        let page = vec![
            message("b", AuthorRole::Moderator, "!clip again", 6),
            message("d", AuthorRole::Moderator, "!clip fresh", 8),
        ];
        let extraction = extract_commands(&page, t0(), &ledger);
        assert_eq!(extraction.clips.len(), 1);
        assert_eq!(extraction.clips[0].message_id.as_str(), "d");
        assert_eq!(extraction.duplicates_skipped, 1);
    }

    #[test]
    fn watermark_drops_pre_session_clips_even_if_unseen() {
        let ledger = DedupLedger::new(16);
        let page = vec![
            message("old", AuthorRole::Owner, "!clip early", -30),
            message("new", AuthorRole::Owner, "!clip late", 30),
        ];
        let extraction = extract_commands(&page, t0(), &ledger);
        assert_eq!(extraction.clips.len(), 1);
        assert_eq!(extraction.clips[0].message_id.as_str(), "new");
    }

    #[test]
    fn other_privileged_commands_are_counted_not_converted() {
        let ledger = DedupLedger::new(16);
        let page = vec![
            message("a", AuthorRole::Moderator, "!chat hello", 5),
            message("b", AuthorRole::Viewer, "!chat hi", 6),
            message("c", AuthorRole::Owner, "!ban someone", 7),
        ];
        let extraction = extract_commands(&page, t0(), &ledger);
        assert!(extraction.clips.is_empty());
        assert_eq!(extraction.ignored_commands, 2);
    }

    #[test]
    fn candidates_keep_upstream_order_even_when_times_do_not() {
        let ledger = DedupLedger::new(16);
        // Page order is upstream order; event times are deliberately not sorted.
        let page = vec![
            message("x", AuthorRole::Moderator, "!clip", 20),
            message("y", AuthorRole::Moderator, "!clip", 10),
        ];
        let extraction = extract_commands(&page, t0(), &ledger);
        let ids: Vec<&str> = extraction
            .clips
            .iter()
            .map(|c| c.message_id.as_str())
            .collect();
        assert_eq!(ids, vec!["x", "y"]);
    }
}
