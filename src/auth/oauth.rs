// OAuth authorization code flow and token refresh

use anyhow::Context;
use std::sync::Arc;

use super::types::OAuthTokenResponse;
use crate::error::ApiError;
use crate::http_client::PlatformHttpClient;
use crate::store::TokenSet;

pub const DEFAULT_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Read-only access to channel data and analytics
pub const SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/youtube.readonly",
    "https://www.googleapis.com/auth/yt-analytics.readonly",
];

/// OAuth client for the video platform
pub struct OAuthClient {
    http: Arc<PlatformHttpClient>,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    auth_url: String,
    token_url: String,
}

impl OAuthClient {
    pub fn new(
        http: Arc<PlatformHttpClient>,
        client_id: String,
        client_secret: String,
        redirect_uri: String,
    ) -> Self {
        Self {
            http,
            client_id,
            client_secret,
            redirect_uri,
            auth_url: DEFAULT_AUTH_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
        }
    }

    /// Point the client at different endpoints (tests, emulators)
    pub fn with_endpoints(mut self, auth_url: impl Into<String>, token_url: impl Into<String>) -> Self {
        self.auth_url = auth_url.into();
        self.token_url = token_url.into();
        self
    }

    /// URL the user visits to grant offline access; `state` comes back on the callback
    pub fn authorization_url(&self, state: &str) -> Result<String, ApiError> {
        let scope = SCOPES.join(" ");
        let url = reqwest::Url::parse_with_params(
            &self.auth_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("include_granted_scopes", "true"),
                ("state", state),
            ],
        )
        .map_err(|e| ApiError::ConfigError(format!("invalid authorization URL: {e}")))?;

        Ok(url.to_string())
    }

    /// Exchange an authorization code for tokens
    pub async fn exchange_code(&self, code: &str) -> Result<TokenSet, ApiError> {
        tracing::info!("Exchanging authorization code for tokens...");

        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];

        let tokens = self.post_token_form(&form).await?;

        if tokens.refresh_token.is_none() {
            tracing::warn!("Authorization response did not include a refresh token");
        }

        Ok(tokens)
    }

    /// Obtain a new access token with a refresh token.
    ///
    /// The returned set carries the new refresh token if the platform rotated
    /// it, otherwise the one passed in.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, ApiError> {
        tracing::info!("Refreshing access token...");

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        let mut tokens = self.post_token_form(&form).await?;
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = Some(refresh_token.to_string());
        }

        tracing::info!(
            "Token refreshed, expires: {}",
            tokens
                .expiry_date
                .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_default()
        );

        Ok(tokens)
    }

    async fn post_token_form(&self, form: &[(&str, &str)]) -> Result<TokenSet, ApiError> {
        let request = self
            .http
            .client()
            .post(&self.token_url)
            .form(form)
            .build()
            .context("Failed to build token request")?;

        let response = self
            .http
            .request_with_retry(request)
            .await
            .map_err(|e| match e {
                // invalid_grant, invalid_client and friends
                ApiError::PlatformApiError { status: 400 | 401, message } => {
                    ApiError::AuthError(format!("token endpoint rejected the request: {message}"))
                }
                other => other,
            })?;

        let data: OAuthTokenResponse = response
            .json()
            .await
            .context("Failed to parse token response")?;

        if data.access_token.is_empty() {
            return Err(ApiError::AuthError(
                "token response does not contain access_token".to_string(),
            ));
        }

        Ok(data.into_token_set())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client(token_url: String) -> OAuthClient {
        let http = Arc::new(PlatformHttpClient::new(5, 5, 0).unwrap());
        OAuthClient::new(
            http,
            "client-id".to_string(),
            "client-secret".to_string(),
            "http://localhost:8000/oauth2callback".to_string(),
        )
        .with_endpoints(DEFAULT_AUTH_URL, token_url)
    }

    #[test]
    fn test_authorization_url() {
        let url = client(DEFAULT_TOKEN_URL.to_string())
            .authorization_url("st4te")
            .unwrap();
        let parsed = reqwest::Url::parse(&url).unwrap();
        let params: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();

        assert!(url.starts_with(DEFAULT_AUTH_URL));
        assert_eq!(params["client_id"], "client-id");
        assert_eq!(params["access_type"], "offline");
        assert_eq!(params["prompt"], "consent");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["state"], "st4te");
        assert!(params["scope"].contains("yt-analytics.readonly"));
    }

    #[tokio::test]
    async fn test_exchange_code() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("code".into(), "auth-code".into()),
            ]))
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"ya29.new","refresh_token":"1//r","expires_in":3599}"#)
            .create_async()
            .await;

        let tokens = client(format!("{}/token", server.url()))
            .exchange_code("auth-code")
            .await
            .unwrap();

        assert_eq!(tokens.access_token, "ya29.new");
        assert_eq!(tokens.refresh_token.as_deref(), Some("1//r"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_keeps_old_refresh_token() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .match_body(Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()))
            .with_body(r#"{"access_token":"ya29.fresh","expires_in":3599}"#)
            .create_async()
            .await;

        let tokens = client(format!("{}/token", server.url()))
            .refresh("1//old")
            .await
            .unwrap();

        assert_eq!(tokens.access_token, "ya29.fresh");
        assert_eq!(tokens.refresh_token.as_deref(), Some("1//old"));
    }

    #[tokio::test]
    async fn test_invalid_grant_is_auth_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#)
            .create_async()
            .await;

        let err = client(format!("{}/token", server.url()))
            .refresh("1//revoked")
            .await
            .unwrap_err();

        match err {
            ApiError::AuthError(msg) => assert!(msg.contains("expired or revoked")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
