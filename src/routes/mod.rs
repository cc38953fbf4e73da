use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware::{self as axum_middleware},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::auth::{OAuthClient, PendingAuthorizations, TokenManager};
use crate::cache::UploadsCache;
use crate::config::Config;
use crate::error::ApiError;
use crate::middleware;
use crate::platform::{PlatformClient, UploadSummary};
use crate::retention::{self, AnnotatedDrop, DropInsight, RetentionPoint};
use crate::store::CredentialStore;

/// Application version from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Number of drops turned into coaching insights
const MAX_INSIGHTS: usize = 5;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<CredentialStore>,
    pub tokens: Arc<TokenManager>,
    pub oauth: Arc<OAuthClient>,
    pub pending: Arc<PendingAuthorizations>,
    pub platform: Arc<PlatformClient>,
    pub uploads_cache: Arc<UploadsCache>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        store: Arc<CredentialStore>,
        oauth: Arc<OAuthClient>,
        platform: Arc<PlatformClient>,
    ) -> Self {
        let tokens = Arc::new(TokenManager::new(
            Arc::clone(&store),
            Arc::clone(&oauth),
            config.token_refresh_threshold,
        ));
        let uploads_cache = Arc::new(UploadsCache::new(config.uploads_cache_ttl));

        Self {
            store,
            tokens,
            oauth,
            pending: Arc::new(PendingAuthorizations::default()),
            platform,
            uploads_cache,
            config,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChannelQuery {
    pub channel: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideosResponse {
    pub channel_id: String,
    pub videos: Vec<UploadSummary>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionResponse {
    pub video_id: String,
    pub title: String,
    pub duration_secs: u64,
    pub points: Vec<RetentionPoint>,
    pub drops: Vec<DropInsight>,
    pub insights: Vec<AnnotatedDrop>,
}

/// All routes with CORS applied
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(health_routes(state.clone()))
        .merge(auth_routes(state.clone()))
        .merge(api_routes(state))
        .layer(middleware::cors_layer())
}

/// Health check routes (no authentication required)
pub fn health_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Channel authorization routes (no API key: the browser lands here)
pub fn auth_routes(state: AppState) -> Router {
    Router::new()
        .route("/auth/login", get(login_handler))
        .route("/oauth2callback", get(oauth_callback_handler))
        .with_state(state)
}

/// Retention API routes (require authentication when an API key is set)
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/videos", get(videos_handler))
        .route("/api/retention/:video", get(retention_handler))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ))
        .with_state(state)
}

/// GET / - Simple health check
async fn root_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "Retention Insights is running",
        "version": VERSION,
        "channels": state.store.channel_ids().map(|ids| ids.len()).unwrap_or(0)
    }))
}

/// GET /health - Detailed health check
///
/// Reports 503 when the credential store cannot be read.
async fn health_handler(State(state): State<AppState>) -> Response {
    match state.store.channel_ids() {
        Ok(ids) => Json(json!({
            "status": "healthy",
            "timestamp": Utc::now().to_rfc3339(),
            "version": VERSION,
            "channels": ids.len()
        }))
        .into_response(),
        Err(e) => {
            tracing::error!("Health check failed to read credential store: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "timestamp": Utc::now().to_rfc3339(),
                    "version": VERSION,
                    "error": "credential store unavailable"
                })),
            )
                .into_response()
        }
    }
}

/// GET /auth/login - Redirect to the consent screen
async fn login_handler(State(state): State<AppState>) -> Result<Redirect, ApiError> {
    let url = state.oauth.authorization_url(&state.pending.issue())?;
    tracing::info!("Redirecting to authorization endpoint");
    Ok(Redirect::temporary(&url))
}

/// GET /oauth2callback - Finish authorization and store the channel credentials
async fn oauth_callback_handler(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Result<Json<Value>, ApiError> {
    // The state is single use, so it is spent even when consent was refused
    let issued_here = query
        .state
        .as_deref()
        .is_some_and(|s| state.pending.consume(s));
    if !issued_here {
        tracing::warn!("Rejected callback with missing or unknown state");
        return Err(ApiError::ValidationError(
            "missing or unknown authorization state".to_string(),
        ));
    }

    if let Some(error) = query.error {
        tracing::warn!("Authorization was not granted: {}", error);
        return Err(ApiError::ValidationError(format!(
            "authorization was not granted: {error}"
        )));
    }

    let code = query
        .code
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| ApiError::ValidationError("missing authorization code".to_string()))?;

    let tokens = state.oauth.exchange_code(&code).await?;
    let channel = state.platform.my_channel(&tokens.access_token).await?;

    state.tokens.save_authorization(&channel.channel_id, tokens)?;
    state.uploads_cache.invalidate(&channel.channel_id);

    tracing::info!(channel_id = %channel.channel_id, title = %channel.title, "Authorization complete");

    Ok(Json(json!({
        "channelId": channel.channel_id,
        "title": channel.title
    })))
}

/// GET /api/videos - Recent uploads of the authorized channel
async fn videos_handler(
    State(state): State<AppState>,
    Query(query): Query<ChannelQuery>,
) -> Result<Json<VideosResponse>, ApiError> {
    let token = state.tokens.access_token(query.channel.as_deref()).await?;

    if let Some(videos) = state.uploads_cache.get(&token.channel_id) {
        tracing::debug!(channel_id = %token.channel_id, "Serving recent uploads from cache");
        return Ok(Json(VideosResponse {
            channel_id: token.channel_id,
            videos,
        }));
    }

    let videos = state
        .platform
        .recent_uploads(&token.access_token, state.config.recent_uploads_limit)
        .await?;
    state.uploads_cache.insert(&token.channel_id, videos.clone());

    Ok(Json(VideosResponse {
        channel_id: token.channel_id,
        videos,
    }))
}

/// GET /api/retention/:video - Retention curve, drops and coaching insights
///
/// `:video` is a bare id or a percent-encoded watch URL.
async fn retention_handler(
    State(state): State<AppState>,
    Path(video): Path<String>,
    Query(query): Query<ChannelQuery>,
) -> Result<Json<RetentionResponse>, ApiError> {
    let video_id = retention::extract_video_id(&video)
        .ok_or_else(|| ApiError::ValidationError(format!("not a video id or URL: {video}")))?;

    tracing::info!("Request to /api/retention: video={}", video_id);

    let token = state.tokens.access_token(query.channel.as_deref()).await?;
    let details = state
        .platform
        .video_details(&token.access_token, &video_id)
        .await?;

    if details.channel_id != token.channel_id {
        tracing::warn!(
            video_id = %video_id,
            owner = %details.channel_id,
            channel_id = %token.channel_id,
            "Video belongs to another channel"
        );
        return Err(ApiError::Forbidden(format!(
            "video {video_id} does not belong to the authorized channel"
        )));
    }

    let points = state
        .platform
        .retention_series(&token.access_token, &video_id)
        .await?;

    let located = retention::locate_drops(&points);
    let insights = retention::annotate(
        &retention::top_drops(&located, MAX_INSIGHTS),
        details.duration_secs,
    );
    let drops: Vec<_> = located.into_iter().map(|d| d.insight).collect();

    tracing::debug!(
        video_id = %video_id,
        points = points.len(),
        drops = drops.len(),
        "Retention analyzed"
    );

    Ok(Json(RetentionResponse {
        video_id,
        title: details.title,
        duration_secs: details.duration_secs,
        points,
        drops,
        insights,
    }))
}
