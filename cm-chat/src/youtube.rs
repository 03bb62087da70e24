use crate::error::{ChatError, Result};
use crate::traits::LiveChatClient;
use crate::types::{
    AuthorRole, ChatMessage, ChatPage, LiveChatId, PageToken, StreamId, StreamInfo,
};
use anyhow::Result as AnyResult;
use chrono::{DateTime, Utc};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;

const YOUTUBE_API_BASE: &str = "https://www.googleapis.com/youtube/v3";
const MESSAGES_PART: &str = "snippet,authorDetails";
const MESSAGES_MAX_RESULTS: &str = "200";
const VIDEO_ID_LEN: usize = 11;

#[derive(Clone)]
pub struct YouTubeChatClient {
    http: reqwest::Client,
    api_key: String,
}

impl YouTubeChatClient {
    pub fn new(api_key: &str) -> AnyResult<Self> {
        if api_key.trim().is_empty() {
            return Err(anyhow::anyhow!("youtube api key is required"));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            http,
            api_key: api_key.trim().to_string(),
        })
    }

    fn api_url(&self, method: &str) -> Result<Url> {
        Url::parse(&format!("{YOUTUBE_API_BASE}/{method}"))
            .map_err(|e| ChatError::Permanent(format!("bad api url for {method}: {e}")))
    }

    async fn read_success_body<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait::async_trait]
impl LiveChatClient for YouTubeChatClient {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn resolve_stream(&self, video_id: &str) -> Result<StreamInfo> {
        let url = self.api_url("videos")?;
        let response = self
            .http
            .get(url)
            .query(&[
                ("part", "liveStreamingDetails,snippet"),
                ("id", video_id),
                ("key", &self.api_key),
            ])
            .send()
            .await?;
        let parsed: VideosResponse = Self::read_success_body(response).await?;

        let Some(video) = parsed.items.into_iter().next() else {
            return Err(ChatError::Permanent(format!("video not found: {video_id}")));
        };
        let snippet = video.snippet.unwrap_or_default();
        let live_chat_id = video
            .live_streaming_details
            .and_then(|details| details.active_live_chat_id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                ChatError::Permanent(format!(
                    "no active live chat for {video_id}; the video is not currently live"
                ))
            })?;

        Ok(StreamInfo {
            video_id: StreamId::new(video_id),
            live_chat_id: LiveChatId::new(live_chat_id),
            title: snippet.title,
            channel_id: snippet.channel_id,
            channel_title: snippet.channel_title,
        })
    }

    #[tracing::instrument(level = "debug", skip_all, fields(live_chat_id = %live_chat_id))]
    async fn fetch_page(
        &self,
        live_chat_id: &LiveChatId,
        cursor: Option<&PageToken>,
    ) -> Result<ChatPage> {
        let url = self.api_url("liveChat/messages")?;
        let mut query: Vec<(&str, &str)> = vec![
            ("liveChatId", live_chat_id.as_str()),
            ("part", MESSAGES_PART),
            ("maxResults", MESSAGES_MAX_RESULTS),
            ("key", &self.api_key),
        ];
        if let Some(token) = cursor {
            query.push(("pageToken", token.as_str()));
        }

        let response = self.http.get(url).query(&query).send().await?;
        let parsed: MessagesResponse = Self::read_success_body(response).await?;

        let next_cursor = parsed
            .next_page_token
            .filter(|token| !token.is_empty())
            .map(PageToken::new)
            .ok_or_else(|| {
                ChatError::Transient("live chat page carried no next page token".to_string())
            })?;

        let item_count = parsed.items.len();
        let messages: Vec<ChatMessage> = parsed
            .items
            .into_iter()
            .filter_map(build_chat_message)
            .collect();
        if messages.len() < item_count {
            tracing::debug!(
                skipped = item_count - messages.len(),
                "skipped malformed chat items without text or author"
            );
        }

        Ok(ChatPage {
            messages,
            next_cursor,
            retry_after: parsed.polling_interval_millis.map(Duration::from_millis),
        })
    }
}

/// Extract the 11-character video id from the supported live URL shapes:
/// `youtube.com/watch?v=`, `youtube.com/live/`, `youtube.com/embed/`,
/// `youtu.be/`.
pub fn parse_video_id(url: &str) -> Option<StreamId> {
    let parsed = Url::parse(url.trim()).ok()?;
    let host = parsed.host_str()?;

    let candidate = if host.contains("youtube.com") {
        let path = parsed.path();
        if let Some(rest) = path.strip_prefix("/live/") {
            rest.split('/').next().map(str::to_string)
        } else if let Some(rest) = path.strip_prefix("/embed/") {
            rest.split('/').next().map(str::to_string)
        } else if path.starts_with("/watch") {
            parsed
                .query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.into_owned())
        } else {
            None
        }
    } else if host.contains("youtu.be") {
        parsed
            .path()
            .trim_start_matches('/')
            .split('/')
            .next()
            .map(str::to_string)
    } else {
        None
    }?;

    if candidate.len() != VIDEO_ID_LEN {
        return None;
    }
    Some(StreamId::new(candidate))
}

fn classify_status(status: StatusCode, body: &str) -> ChatError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return ChatError::RateLimited { retry_after: None };
    }
    if status == StatusCode::FORBIDDEN
        && (body.contains("quotaExceeded") || body.contains("rateLimitExceeded"))
    {
        return ChatError::RateLimited { retry_after: None };
    }
    if status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || status == StatusCode::NOT_FOUND
    {
        return ChatError::Permanent(format!("upstream rejected request: status={status}"));
    }
    if status == StatusCode::REQUEST_TIMEOUT || status.is_server_error() {
        return ChatError::Transient(format!("upstream unavailable: status={status}"));
    }
    ChatError::Permanent(format!("unexpected upstream status: {status}"))
}

fn author_role(details: &AuthorDetails) -> AuthorRole {
    if details.is_chat_owner {
        AuthorRole::Owner
    } else if details.is_chat_moderator {
        AuthorRole::Moderator
    } else {
        AuthorRole::Viewer
    }
}

fn build_chat_message(item: MessageItem) -> Option<ChatMessage> {
    let id = item.id.filter(|id| !id.is_empty())?;
    let snippet = item.snippet?;
    let author = item.author_details?;
    let text = snippet
        .display_message
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())?;
    let published_at = snippet.published_at?;
    let role = author_role(&author);

    Some(ChatMessage {
        id: id.into(),
        author_id: author.channel_id.unwrap_or_default().into(),
        author_name: author.display_name.unwrap_or_default(),
        role,
        text,
        published_at,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideosResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoItem {
    #[serde(default)]
    snippet: Option<VideoSnippet>,
    #[serde(default)]
    live_streaming_details: Option<LiveStreamingDetails>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoSnippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    channel_id: String,
    #[serde(default)]
    channel_title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveStreamingDetails {
    #[serde(default)]
    active_live_chat_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagesResponse {
    #[serde(default)]
    next_page_token: Option<String>,
    #[serde(default)]
    polling_interval_millis: Option<u64>,
    #[serde(default)]
    items: Vec<MessageItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageItem {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    snippet: Option<MessageSnippet>,
    #[serde(default)]
    author_details: Option<AuthorDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageSnippet {
    #[serde(default)]
    display_message: Option<String>,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorDetails {
    #[serde(default)]
    channel_id: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    is_chat_owner: bool,
    #[serde(default)]
    is_chat_moderator: bool,
}

#[cfg(test)]
mod tests {
    use super::{
        AuthorDetails, MessageItem, MessageSnippet, build_chat_message, classify_status,
        parse_video_id,
    };
    use crate::error::ChatError;
    use crate::types::AuthorRole;
    use reqwest::StatusCode;

    fn sample_item(text: Option<&str>, owner: bool, moderator: bool) -> MessageItem {
        MessageItem {
            id: Some("msg-1".to_string()),
            snippet: Some(MessageSnippet {
                display_message: text.map(str::to_string),
                published_at: Some("2026-03-01T12:00:05Z".parse().expect("timestamp")),
            }),
            author_details: Some(AuthorDetails {
                channel_id: Some("UCauthor".to_string()),
                display_name: Some("Mod".to_string()),
                is_chat_owner: owner,
                is_chat_moderator: moderator,
            }),
        }
    }

    #[test]
    fn parse_video_id_handles_supported_url_shapes() {
        let expected = "dQw4w9WgXcQ";
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtube.com/live/dQw4w9WgXcQ?feature=share",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ?t=10",
        ] {
            let id = parse_video_id(url).expect("should parse");
            assert_eq!(id.as_str(), expected, "url: {url}");
        }
    }

    #[test]
    fn parse_video_id_rejects_foreign_hosts_and_short_ids() {
        assert!(parse_video_id("https://example.com/watch?v=dQw4w9WgXcQ").is_none());
        assert!(parse_video_id("https://youtu.be/short").is_none());
        assert!(parse_video_id("not a url").is_none());
    }

    #[test]
    fn classify_status_separates_quota_from_revoked_access() {
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, r#"{"reason":"quotaExceeded"}"#),
            ChatError::RateLimited { .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, "forbidden"),
            ChatError::Permanent(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, ""),
            ChatError::Permanent(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, ""),
            ChatError::RateLimited { .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, ""),
            ChatError::Transient(_)
        ));
    }

    #[test]
    fn build_chat_message_maps_roles_with_owner_precedence() {
        let owner = build_chat_message(sample_item(Some("!clip"), true, true)).expect("message");
        assert_eq!(owner.role, AuthorRole::Owner);

        let moderator =
            build_chat_message(sample_item(Some("!clip"), false, true)).expect("message");
        assert_eq!(moderator.role, AuthorRole::Moderator);

        let viewer = build_chat_message(sample_item(Some("hi"), false, false)).expect("message");
        assert_eq!(viewer.role, AuthorRole::Viewer);
        assert!(!viewer.role.is_privileged());
    }

    #[test]
    fn build_chat_message_skips_items_without_text() {
        assert!(build_chat_message(sample_item(None, false, true)).is_none());
        assert!(build_chat_message(sample_item(Some("   "), false, true)).is_none());
    }
}
