// Integration tests for Retention Insights
//
// These tests drive the full HTTP stack (routing, middleware, token refresh,
// credential persistence) against a mocked video platform.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::Utc;
use mockito::{Matcher, Server, ServerGuard};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower::ServiceExt;

use retention_insights::{
    auth::OAuthClient,
    config::{Config, StoreBackendKind},
    crypto::TokenCipher,
    http_client::PlatformHttpClient,
    platform::PlatformClient,
    routes::{self, AppState},
    store::{CredentialStore, JsonFileBackend, SqliteBackend, TokenSet},
};

// ==================================================================================================
// Test Helpers
// ==================================================================================================

const KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

fn test_config(store_backend: StoreBackendKind, store_path: PathBuf) -> Config {
    Config {
        server_host: "127.0.0.1".to_string(),
        server_port: 8080,
        api_key: Some("test-api-key-secret".to_string()),
        token_encryption_key: KEY_HEX.to_string(),
        store_backend,
        store_path,
        oauth_client_id: "client-id".to_string(),
        oauth_client_secret: "client-secret".to_string(),
        oauth_redirect_uri: "http://localhost:8080/oauth2callback".to_string(),
        token_refresh_threshold: 300,
        http_connect_timeout: 5,
        http_request_timeout: 5,
        http_max_retries: 0,
        recent_uploads_limit: 10,
        uploads_cache_ttl: 120,
        log_level: "info".to_string(),
    }
}

fn open_store(config: &Config) -> Arc<CredentialStore> {
    let cipher = TokenCipher::from_encoded(&config.token_encryption_key).unwrap();
    let store = match config.store_backend {
        StoreBackendKind::File => {
            CredentialStore::new(JsonFileBackend::new(config.store_path.clone()), cipher)
        }
        StoreBackendKind::Sqlite => {
            CredentialStore::new(SqliteBackend::open(&config.store_path).unwrap(), cipher)
        }
    };
    store.ensure_initialized().unwrap();
    Arc::new(store)
}

/// Create application state whose upstream endpoints live on the mock server
fn create_test_app_state(server: &ServerGuard, config: Config) -> AppState {
    let store = open_store(&config);
    let http = Arc::new(PlatformHttpClient::new(5, 5, 0).unwrap());
    let oauth = Arc::new(
        OAuthClient::new(
            Arc::clone(&http),
            config.oauth_client_id.clone(),
            config.oauth_client_secret.clone(),
            config.oauth_redirect_uri.clone(),
        )
        .with_endpoints(
            format!("{}/o/oauth2/v2/auth", server.url()),
            format!("{}/token", server.url()),
        ),
    );
    let platform = Arc::new(PlatformClient::new(http).with_base_urls(
        format!("{}/youtube/v3", server.url()),
        format!("{}/v2", server.url()),
    ));

    AppState::new(Arc::new(config), store, oauth, platform)
}

fn build_test_app(state: AppState) -> Router {
    routes::build_router(state)
}

async fn send(app: &Router, uri: &str, api_key: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::builder().uri(uri);
    if let Some(key) = api_key {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {key}"));
    }
    let response = app
        .clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn mock_channel(server: &mut ServerGuard) -> mockito::Mock {
    server
        .mock("GET", "/youtube/v3/channels")
        .match_query(Matcher::UrlEncoded("mine".into(), "true".into()))
        .with_body(
            r#"{"items":[{"id":"UC_MINE","snippet":{"title":"Cooking Lab"},
                "contentDetails":{"relatedPlaylists":{"uploads":"UU_MINE"}}}]}"#,
        )
        .create_async()
        .await
}

fn store_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(name)
}

// ==================================================================================================
// Health Check Tests
// ==================================================================================================

#[tokio::test]
async fn test_root_and_health_endpoints() {
    let server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(StoreBackendKind::File, store_path(dir.path(), "creds.json"));
    let app = build_test_app(create_test_app_state(&server, config));

    let (status, body) = send(&app, "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["message"], "Retention Insights is running");

    let (status, body) = send(&app, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["channels"], 0);
    assert!(body["timestamp"].is_string());
}

// ==================================================================================================
// Authorization Flow Tests
// ==================================================================================================

#[tokio::test]
async fn test_authorize_then_analyze_end_to_end() {
    let mut server = Server::new_async().await;
    let token_mock = server
        .mock("POST", "/token")
        .match_body(Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()))
        .with_body(r#"{"access_token":"ya29.first","refresh_token":"1//refresh","expires_in":3599}"#)
        .expect(1)
        .create_async()
        .await;
    mock_channel(&mut server).await;
    server
        .mock("GET", "/youtube/v3/playlistItems")
        .match_query(Matcher::UrlEncoded("playlistId".into(), "UU_MINE".into()))
        .match_header("authorization", "Bearer ya29.first")
        .with_body(
            r#"{"items":[
                {"snippet":{"title":"Knife skills"},"contentDetails":{"videoId":"vid1","videoPublishedAt":"2024-03-01T10:00:00Z"}},
                {"snippet":{"title":"Sourdough"},"contentDetails":{"videoId":"vid2"}}
            ]}"#,
        )
        .create_async()
        .await;
    server
        .mock("GET", "/youtube/v3/videos")
        .match_query(Matcher::UrlEncoded("id".into(), "vid1".into()))
        .with_body(
            r#"{"items":[{"id":"vid1","snippet":{"title":"Knife skills","channelId":"UC_MINE"},
                "contentDetails":{"duration":"PT10M"}}]}"#,
        )
        .create_async()
        .await;
    server
        .mock("GET", "/v2/reports")
        .match_query(Matcher::UrlEncoded("filters".into(), "video==vid1".into()))
        .with_body(r#"{"rows":[[0.0,1.0,1.0],[0.01,0.8,1.0],[0.02,0.78,1.0],[0.5,0.6,1.0]]}"#)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = test_config(StoreBackendKind::Sqlite, store_path(dir.path(), "creds.db"));
    let state = create_test_app_state(&server, config);
    let app = build_test_app(state.clone());

    // Consent screen redirect
    let response = app
        .clone()
        .oneshot(Request::builder().uri("/auth/login").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    let location = response.headers()[header::LOCATION].to_str().unwrap();
    assert!(location.starts_with(&format!("{}/o/oauth2/v2/auth", server.url())));

    let issued = reqwest::Url::parse(location)
        .unwrap()
        .query_pairs()
        .find(|(key, _)| key == "state")
        .map(|(_, value)| value.into_owned())
        .unwrap();

    // A callback that did not start at /auth/login is refused
    let (status, _) = send(&app, "/oauth2callback?code=the-code&state=forged", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Callback stores the channel
    let uri = format!("/oauth2callback?code=the-code&state={issued}");
    let (status, body) = send(&app, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["channelId"], "UC_MINE");
    token_mock.assert_async().await;

    // Refresh token is at rest only as ciphertext
    assert_eq!(state.store.channel_ids().unwrap(), vec!["UC_MINE".to_string()]);

    // API key is required
    let (status, _) = send(&app, "/api/videos", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&app, "/api/videos", Some("test-api-key-secret")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["videos"][0]["videoId"], "vid1");
    assert_eq!(body["videos"][1]["title"], "Sourdough");

    let (status, body) = send(&app, "/api/retention/vid1", Some("test-api-key-secret")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["durationSecs"], 600);

    let drops = body["drops"].as_array().unwrap();
    assert_eq!(drops.len(), 2);
    assert_eq!(drops[0]["atPercent"], 1);
    assert_eq!(drops[0]["changePercent"], -20.0);
    assert_eq!(drops[1]["atPercent"], 50);
    assert_eq!(drops[1]["changePercent"], -18.0);

    let insights = body["insights"].as_array().unwrap();
    assert_eq!(insights[0]["atSeconds"], 6);
    assert!(insights[0]["tip"].as_str().unwrap().contains("hook"));
    assert_eq!(insights[1]["atSeconds"], 300);
}

#[tokio::test]
async fn test_credentials_survive_restart_and_refresh() {
    let mut server = Server::new_async().await;
    let refresh_mock = server
        .mock("POST", "/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
            Matcher::UrlEncoded("refresh_token".into(), "1//long-lived".into()),
        ]))
        .with_body(r#"{"access_token":"ya29.refreshed","expires_in":3599}"#)
        .expect(1)
        .create_async()
        .await;
    server
        .mock("GET", "/youtube/v3/channels")
        .match_query(Matcher::Any)
        .match_header("authorization", "Bearer ya29.refreshed")
        .with_body(r#"{"items":[{"id":"UC_MINE","snippet":{"title":"Cooking Lab"}}]}"#)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let path = store_path(dir.path(), "creds.json");

    // A previous process stored credentials whose access token has expired
    {
        let config = test_config(StoreBackendKind::File, path.clone());
        open_store(&config)
            .save(
                "UC_MINE",
                &TokenSet {
                    access_token: "ya29.stale".to_string(),
                    refresh_token: Some("1//long-lived".to_string()),
                    expiry_date: Some(Utc::now().timestamp_millis() - 1000),
                },
            )
            .unwrap();
    }

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(!raw.contains("1//long-lived"));

    let config = test_config(StoreBackendKind::File, path.clone());
    let state = create_test_app_state(&server, config);
    let app = build_test_app(state.clone());

    // Channel without an uploads playlist lists no videos
    let (status, body) = send(&app, "/api/videos?channel=UC_MINE", Some("test-api-key-secret")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["videos"].as_array().unwrap().is_empty());
    refresh_mock.assert_async().await;

    let stored = state.store.load("UC_MINE").unwrap().unwrap();
    assert_eq!(stored.tokens.access_token, "ya29.refreshed");
    assert_eq!(stored.tokens.refresh_token.as_deref(), Some("1//long-lived"));
}

#[tokio::test]
async fn test_tampered_store_reports_integrity_error() {
    let server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let path = store_path(dir.path(), "creds.json");

    std::fs::write(
        &path,
        r#"[{"channelId":"UC_MINE","access_token":"ya29.x","refresh_token":"bm90LWEtdmFsaWQtYmxvYi1hdC1hbGwtLS0tLS0tLS0tLS0=","expiry_date":0}]"#,
    )
    .unwrap();

    let config = test_config(StoreBackendKind::File, path);
    let app = build_test_app(create_test_app_state(&server, config));

    let (status, body) = send(&app, "/api/videos", Some("test-api-key-secret")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["type"], "integrity_error");
}

#[tokio::test]
async fn test_unowned_video_is_forbidden() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/youtube/v3/videos")
        .match_query(Matcher::Any)
        .with_body(
            r#"{"items":[{"id":"other","snippet":{"title":"Not mine","channelId":"UC_SOMEONE"},
                "contentDetails":{"duration":"PT30S"}}]}"#,
        )
        .create_async()
        .await;
    let reports = server
        .mock("GET", "/v2/reports")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = test_config(StoreBackendKind::Sqlite, store_path(dir.path(), "creds.db"));
    let state = create_test_app_state(&server, config);
    state
        .tokens
        .save_authorization(
            "UC_MINE",
            TokenSet {
                access_token: "ya29.valid".to_string(),
                refresh_token: Some("1//r".to_string()),
                expiry_date: Some(Utc::now().timestamp_millis() + 3_600_000),
            },
        )
        .unwrap();

    let app = build_test_app(state);
    let (status, _) = send(&app, "/api/retention/other", Some("test-api-key-secret")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    reports.assert_async().await;
}
