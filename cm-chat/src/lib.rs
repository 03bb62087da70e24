//! Upstream live-chat access for Clipmark.
//!
//! This crate owns the wire-facing side: message and page types, the
//! `LiveChatClient` seam the polling core consumes, and the concrete
//! YouTube Live Chat implementation.

mod error;
mod traits;
mod types;
mod youtube;

pub use error::ChatError;
pub use traits::LiveChatClient;
pub use types::{
    AuthorId, AuthorRole, ChatMessage, ChatPage, LiveChatId, MessageId, PageToken, StreamId,
    StreamInfo,
};
pub use youtube::{YouTubeChatClient, parse_video_id};
