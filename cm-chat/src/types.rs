use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::time::Duration;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Deref for $name {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

id_newtype!(StreamId);
id_newtype!(LiveChatId);
id_newtype!(MessageId);
id_newtype!(AuthorId);
id_newtype!(PageToken);

/// Author standing in the chat, as reported by the upstream.
/// `Owner` outranks `Moderator`; both are privileged for commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorRole {
    Viewer,
    Moderator,
    Owner,
}

impl AuthorRole {
    pub fn is_privileged(self) -> bool {
        matches!(self, AuthorRole::Moderator | AuthorRole::Owner)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub author_id: AuthorId,
    pub author_name: String,
    pub role: AuthorRole,
    pub text: String,
    /// Event time assigned by the upstream. Non-decreasing within one page,
    /// not guaranteed monotone across pages.
    pub published_at: DateTime<Utc>,
}

/// One fetched page of chat messages, in upstream order.
#[derive(Debug, Clone)]
pub struct ChatPage {
    pub messages: Vec<ChatMessage>,
    /// Opaque cursor for the next fetch. Always present on success; must be
    /// persisted even when the page carries zero messages.
    pub next_cursor: PageToken,
    /// Upstream's suggested wait before the next fetch, when it provides one.
    pub retry_after: Option<Duration>,
}

/// Resolved broadcast metadata, captured once when a session is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamInfo {
    pub video_id: StreamId,
    pub live_chat_id: LiveChatId,
    pub title: String,
    pub channel_id: String,
    pub channel_title: String,
}
