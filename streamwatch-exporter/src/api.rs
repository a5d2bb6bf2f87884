//! YouTube Data API v3 adapter.
//!
//! [`VideoPlatformApi`] is the seam the pollers depend on; [`YouTubeClient`]
//! is the HTTP implementation. Every call returns a tagged [`ApiError`] on
//! failure instead of panicking.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::trace;

/// Default API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

/// Value of `snippet.liveBroadcastContent` while a broadcast is live.
pub const LIVE_SENTINEL: &str = "live";

/// Title reported when a video snippet has no title.
const NO_TITLE: &str = "No title";

/// Errors returned by the video platform API.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP status {0}")]
    Http(u16),
    #[error("Failed to parse response: {0}")]
    Parse(String),
    #[error("Response contained no items")]
    UpstreamEmpty,
}

impl ApiError {
    /// Short error kind for structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Network(_) => "network",
            ApiError::Http(_) => "http",
            ApiError::Parse(_) => "parse",
            ApiError::UpstreamEmpty => "empty",
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        // The request URL carries the API key in its query
        let err = err.without_url();
        if err.is_decode() {
            ApiError::Parse(err.to_string())
        } else if let Some(status) = err.status() {
            ApiError::Http(status.as_u16())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Parse(err.to_string())
    }
}

/// Live-state details of one video.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoDetails {
    /// Raw `liveBroadcastContent` value ("live", "upcoming", "none").
    pub live_broadcast_content: String,
    pub title: String,
    pub concurrent_viewers: Option<u64>,
}

impl VideoDetails {
    pub fn is_live(&self) -> bool {
        self.live_broadcast_content == LIVE_SENTINEL
    }
}

/// Engagement counters of one video. Missing counters are zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoStatistics {
    pub view_count: u64,
    pub like_count: u64,
    pub comment_count: u64,
    pub favorite_count: u64,
}

/// Statistics and snippet of one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelDetails {
    pub subscriber_count: u64,
    pub title: String,
    pub description: String,
}

/// Read-only view of the video platform used by the pollers.
#[async_trait]
pub trait VideoPlatformApi: Send + Sync {
    /// Snippet and live streaming details of a video.
    async fn video_details(&self, video_id: &str) -> Result<VideoDetails, ApiError>;

    /// Statistics of a video.
    async fn video_statistics(&self, video_id: &str) -> Result<VideoStatistics, ApiError>;

    /// Statistics and snippet of a channel.
    async fn channel_details(&self, channel_id: &str) -> Result<ChannelDetails, ApiError>;
}

/// HTTP client for the YouTube Data API v3, bound to one API key.
#[derive(Clone)]
pub struct YouTubeClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl YouTubeClient {
    /// Create a client. `client` may be shared between streams.
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    /// Build the shared HTTP client with a per-request timeout.
    pub fn http_client(timeout: Duration) -> Result<reqwest::Client, ApiError> {
        reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("streamwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ApiError::from)
    }

    async fn fetch(&self, resource: &str, part: &str, id: &str) -> Result<String, ApiError> {
        let url = format!("{}/{}", self.base_url, resource);
        trace!(%url, part, id, "API request");

        let response = self
            .client
            .get(&url)
            .query(&[("part", part), ("id", id), ("key", self.api_key.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Http(status.as_u16()));
        }

        Ok(response.text().await?)
    }
}

#[async_trait]
impl VideoPlatformApi for YouTubeClient {
    async fn video_details(&self, video_id: &str) -> Result<VideoDetails, ApiError> {
        let body = self
            .fetch("videos", "snippet,liveStreamingDetails", video_id)
            .await?;
        parse_video_details(&body)
    }

    async fn video_statistics(&self, video_id: &str) -> Result<VideoStatistics, ApiError> {
        let body = self.fetch("videos", "statistics", video_id).await?;
        parse_video_statistics(&body)
    }

    async fn channel_details(&self, channel_id: &str) -> Result<ChannelDetails, ApiError> {
        let body = self
            .fetch("channels", "statistics,snippet", channel_id)
            .await?;
        parse_channel_details(&body)
    }
}

// Wire format

#[derive(Debug, Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoItem {
    #[serde(default)]
    snippet: Option<Snippet>,
    #[serde(default)]
    live_streaming_details: Option<LiveStreamingDetails>,
    #[serde(default)]
    statistics: Option<RawVideoStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    live_broadcast_content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveStreamingDetails {
    #[serde(default, deserialize_with = "de_opt_count")]
    concurrent_viewers: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVideoStatistics {
    #[serde(default, deserialize_with = "de_count")]
    view_count: u64,
    #[serde(default, deserialize_with = "de_count")]
    like_count: u64,
    #[serde(default, deserialize_with = "de_count")]
    comment_count: u64,
    #[serde(default, deserialize_with = "de_count")]
    favorite_count: u64,
}

#[derive(Debug, Deserialize)]
struct ChannelListResponse {
    #[serde(default)]
    items: Vec<ChannelItem>,
}

#[derive(Debug, Deserialize)]
struct ChannelItem {
    #[serde(default)]
    snippet: Option<Snippet>,
    #[serde(default)]
    statistics: Option<RawChannelStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChannelStatistics {
    #[serde(default, deserialize_with = "de_count")]
    subscriber_count: u64,
}

/// The API encodes counts as decimal strings; accept plain numbers too.
#[derive(Deserialize)]
#[serde(untagged)]
enum Count {
    Number(u64),
    Text(String),
}

impl Count {
    fn into_u64<E: serde::de::Error>(self) -> Result<u64, E> {
        match self {
            Count::Number(n) => Ok(n),
            Count::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid count '{}'", s))),
        }
    }
}

fn de_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    Count::deserialize(deserializer)?.into_u64()
}

fn de_opt_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    Option::<Count>::deserialize(deserializer)?
        .map(Count::into_u64)
        .transpose()
}

/// Parse a `videos?part=snippet,liveStreamingDetails` response.
pub fn parse_video_details(body: &str) -> Result<VideoDetails, ApiError> {
    let response: VideoListResponse = serde_json::from_str(body)?;
    let item = response
        .items
        .into_iter()
        .next()
        .ok_or(ApiError::UpstreamEmpty)?;

    let (live_broadcast_content, title) = match item.snippet {
        Some(snippet) => (
            snippet.live_broadcast_content.unwrap_or_default(),
            snippet.title.unwrap_or_else(|| NO_TITLE.to_string()),
        ),
        None => (String::new(), String::new()),
    };

    Ok(VideoDetails {
        live_broadcast_content,
        title,
        concurrent_viewers: item
            .live_streaming_details
            .and_then(|d| d.concurrent_viewers),
    })
}

/// Parse a `videos?part=statistics` response.
pub fn parse_video_statistics(body: &str) -> Result<VideoStatistics, ApiError> {
    let response: VideoListResponse = serde_json::from_str(body)?;
    let item = response
        .items
        .into_iter()
        .next()
        .ok_or(ApiError::UpstreamEmpty)?;
    let stats = item
        .statistics
        .ok_or_else(|| ApiError::Parse("missing 'statistics' in video item".to_string()))?;

    Ok(VideoStatistics {
        view_count: stats.view_count,
        like_count: stats.like_count,
        comment_count: stats.comment_count,
        favorite_count: stats.favorite_count,
    })
}

/// Parse a `channels?part=statistics,snippet` response.
pub fn parse_channel_details(body: &str) -> Result<ChannelDetails, ApiError> {
    let response: ChannelListResponse = serde_json::from_str(body)?;
    let item = response
        .items
        .into_iter()
        .next()
        .ok_or(ApiError::UpstreamEmpty)?;
    let stats = item
        .statistics
        .ok_or_else(|| ApiError::Parse("missing 'statistics' in channel item".to_string()))?;
    let (title, description) = item
        .snippet
        .map(|s| {
            (
                s.title.unwrap_or_default(),
                s.description.unwrap_or_default(),
            )
        })
        .unwrap_or_default();

    Ok(ChannelDetails {
        subscriber_count: stats.subscriber_count,
        title,
        description,
    })
}
