use crate::error::Result;
use crate::types::{ChatPage, LiveChatId, PageToken, StreamInfo};
use async_trait::async_trait;

/// Paginated access to a broadcast's live chat.
///
/// `fetch_page` with no cursor returns the current tail of the chat plus a
/// cursor; presenting that cursor on the next call returns only newer
/// messages. Implementations classify failures via `ChatError`.
#[async_trait]
pub trait LiveChatClient: Send + Sync {
    /// Resolve a broadcast's live chat and metadata from its video id.
    async fn resolve_stream(&self, video_id: &str) -> Result<StreamInfo>;

    /// Fetch one page of chat messages at the given cursor position.
    async fn fetch_page(
        &self,
        live_chat_id: &LiveChatId,
        cursor: Option<&PageToken>,
    ) -> Result<ChatPage>;
}
