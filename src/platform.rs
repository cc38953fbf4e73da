// Video platform data and analytics API client

use anyhow::Context;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::ApiError;
use crate::http_client::PlatformHttpClient;
use crate::retention::{parse_iso8601_duration, series_from_columns, RetentionPoint};

pub const DEFAULT_DATA_API_URL: &str = "https://www.googleapis.com/youtube/v3";
pub const DEFAULT_ANALYTICS_API_URL: &str = "https://youtubeanalytics.googleapis.com/v2";

/// Largest page the playlist endpoint serves
const PLAYLIST_PAGE_SIZE: usize = 50;

/// Analytics history window queried for retention
const RETENTION_WINDOW_DAYS: i64 = 5 * 365;

/// The authorized channel
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelInfo {
    pub channel_id: String,
    pub title: String,
    pub uploads_playlist_id: Option<String>,
}

/// An uploaded video as listed in the uploads playlist
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadSummary {
    pub video_id: String,
    pub title: String,
    pub published_at: Option<String>,
}

/// Metadata needed to analyze one video
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoDetails {
    pub video_id: String,
    pub channel_id: String,
    pub title: String,
    pub duration_secs: u64,
}

// Wire shapes (only the fields we read)

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelItem {
    id: String,
    #[serde(default)]
    snippet: Option<ChannelSnippet>,
    #[serde(default)]
    content_details: Option<ChannelContentDetails>,
}

#[derive(Debug, Deserialize)]
struct ChannelSnippet {
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelContentDetails {
    related_playlists: Option<RelatedPlaylists>,
}

#[derive(Debug, Deserialize)]
struct RelatedPlaylists {
    uploads: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItem {
    snippet: Option<PlaylistSnippet>,
    content_details: Option<PlaylistContentDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistSnippet {
    #[serde(default)]
    title: String,
    published_at: Option<String>,
    resource_id: Option<ResourceId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistContentDetails {
    video_id: Option<String>,
    video_published_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoItem {
    id: String,
    snippet: Option<VideoSnippet>,
    content_details: Option<VideoContentDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoSnippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    channel_id: String,
}

#[derive(Debug, Deserialize)]
struct VideoContentDetails {
    #[serde(default)]
    duration: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportResponse {
    #[serde(default)]
    column_headers: Vec<ColumnHeader>,
    #[serde(default)]
    rows: Option<Vec<Vec<Value>>>,
}

#[derive(Debug, Deserialize)]
struct ColumnHeader {
    name: String,
}

impl ReportResponse {
    /// Index of a named column, or `fallback` when headers are absent
    fn column(&self, name: &str, fallback: usize) -> usize {
        self.column_headers
            .iter()
            .position(|h| h.name == name)
            .unwrap_or(fallback)
    }
}

/// Client for channel, upload and retention queries.
///
/// Every call takes the access token of the channel it acts for.
pub struct PlatformClient {
    http: Arc<PlatformHttpClient>,
    data_api_url: String,
    analytics_api_url: String,
}

impl PlatformClient {
    pub fn new(http: Arc<PlatformHttpClient>) -> Self {
        Self {
            http,
            data_api_url: DEFAULT_DATA_API_URL.to_string(),
            analytics_api_url: DEFAULT_ANALYTICS_API_URL.to_string(),
        }
    }

    /// Point the client at different base URLs (tests)
    pub fn with_base_urls(mut self, data_api_url: impl Into<String>, analytics_api_url: impl Into<String>) -> Self {
        self.data_api_url = data_api_url.into().trim_end_matches('/').to_string();
        self.analytics_api_url = analytics_api_url.into().trim_end_matches('/').to_string();
        self
    }

    /// The channel owned by the token holder
    pub async fn my_channel(&self, access_token: &str) -> Result<ChannelInfo, ApiError> {
        let url = format!("{}/channels", self.data_api_url);
        let response: ListResponse<ChannelItem> = self
            .get_json(&url, access_token, &[("part", "id,snippet,contentDetails"), ("mine", "true")])
            .await?;

        let item = response.items.into_iter().next().ok_or_else(|| {
            ApiError::NotFound("No channel is associated with this account".to_string())
        })?;

        Ok(ChannelInfo {
            channel_id: item.id,
            title: item.snippet.map(|s| s.title).unwrap_or_default(),
            uploads_playlist_id: item
                .content_details
                .and_then(|d| d.related_playlists)
                .and_then(|p| p.uploads),
        })
    }

    /// Most recent uploads of the channel, newest first, at most `limit`
    pub async fn recent_uploads(
        &self,
        access_token: &str,
        limit: usize,
    ) -> Result<Vec<UploadSummary>, ApiError> {
        let channel = self.my_channel(access_token).await?;
        let Some(playlist_id) = channel.uploads_playlist_id else {
            tracing::debug!(channel_id = %channel.channel_id, "Channel has no uploads playlist");
            return Ok(Vec::new());
        };

        let url = format!("{}/playlistItems", self.data_api_url);
        let mut uploads = Vec::new();
        let mut page_token: Option<String> = None;

        while uploads.len() < limit {
            let page_size = (limit - uploads.len()).min(PLAYLIST_PAGE_SIZE).to_string();
            let mut query = vec![
                ("part", "snippet,contentDetails"),
                ("playlistId", playlist_id.as_str()),
                ("maxResults", page_size.as_str()),
            ];
            if let Some(token) = page_token.as_deref() {
                query.push(("pageToken", token));
            }

            let page: ListResponse<PlaylistItem> = self.get_json(&url, access_token, &query).await?;

            uploads.extend(page.items.into_iter().filter_map(upload_from_item));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        uploads.truncate(limit);
        tracing::debug!(
            channel_id = %channel.channel_id,
            count = uploads.len(),
            "Fetched recent uploads"
        );
        Ok(uploads)
    }

    /// Title, owner and duration of one video
    pub async fn video_details(
        &self,
        access_token: &str,
        video_id: &str,
    ) -> Result<VideoDetails, ApiError> {
        let url = format!("{}/videos", self.data_api_url);
        let response: ListResponse<VideoItem> = self
            .get_json(&url, access_token, &[("part", "snippet,contentDetails"), ("id", video_id)])
            .await?;

        let item = response
            .items
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::NotFound(format!("Video {video_id} not found")))?;

        let (title, channel_id) = item
            .snippet
            .map(|s| (s.title, s.channel_id))
            .unwrap_or_default();

        Ok(VideoDetails {
            video_id: item.id,
            channel_id,
            title,
            duration_secs: item
                .content_details
                .map(|d| parse_iso8601_duration(&d.duration))
                .unwrap_or(0),
        })
    }

    /// Audience retention curve of a video owned by the token holder.
    ///
    /// Points come back in position order as reported; an empty report (too
    /// few views) is an empty series.
    pub async fn retention_series(
        &self,
        access_token: &str,
        video_id: &str,
    ) -> Result<Vec<RetentionPoint>, ApiError> {
        let end = Utc::now().date_naive();
        let start = end - Duration::days(RETENTION_WINDOW_DAYS);
        let start_date = start.format("%Y-%m-%d").to_string();
        let end_date = end.format("%Y-%m-%d").to_string();
        let filter = format!("video=={video_id}");

        let url = format!("{}/reports", self.analytics_api_url);
        let report: ReportResponse = self
            .get_json(
                &url,
                access_token,
                &[
                    ("ids", "channel==MINE"),
                    ("startDate", start_date.as_str()),
                    ("endDate", end_date.as_str()),
                    ("metrics", "audienceWatchRatio,relativeRetentionPerformance"),
                    ("dimensions", "elapsedVideoTimeRatio"),
                    ("filters", filter.as_str()),
                    ("sort", "elapsedVideoTimeRatio"),
                ],
            )
            .await?;

        let position_col = report.column("elapsedVideoTimeRatio", 0);
        let ratio_col = report.column("audienceWatchRatio", 1);
        let series = series_from_columns(
            report.rows.as_deref().unwrap_or_default(),
            position_col,
            ratio_col,
        );
        tracing::debug!(video_id = %video_id, points = series.len(), "Fetched retention series");
        Ok(series)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        access_token: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let request = self
            .http
            .client()
            .get(url)
            .bearer_auth(access_token)
            .query(query)
            .build()
            .context("Failed to build platform request")?;

        let response = self
            .http
            .request_with_retry(request)
            .await
            .map_err(|e| match e {
                ApiError::PlatformApiError { status: 401, message } => {
                    ApiError::AuthError(format!("platform rejected the access token: {message}"))
                }
                other => other,
            })?;

        let data = response
            .json::<T>()
            .await
            .context("Failed to parse platform response")?;

        Ok(data)
    }
}

fn upload_from_item(item: PlaylistItem) -> Option<UploadSummary> {
    let details = item.content_details;
    let snippet = item.snippet;

    let video_id = details
        .as_ref()
        .and_then(|d| d.video_id.clone())
        .or_else(|| {
            snippet
                .as_ref()
                .and_then(|s| s.resource_id.as_ref())
                .and_then(|r| r.video_id.clone())
        })?;

    let published_at = details
        .and_then(|d| d.video_published_at)
        .or_else(|| snippet.as_ref().and_then(|s| s.published_at.clone()));

    Some(UploadSummary {
        video_id,
        title: snippet.map(|s| s.title).unwrap_or_default(),
        published_at,
    })
}
