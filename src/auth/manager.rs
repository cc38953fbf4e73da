use std::sync::Arc;
use tokio::sync::Mutex;

use super::oauth::OAuthClient;
use crate::error::ApiError;
use crate::store::{CredentialStore, StoredCredentials, TokenSet};

/// Access token for a resolved channel
#[derive(Debug, Clone)]
pub struct ChannelToken {
    pub channel_id: String,
    pub access_token: String,
}

/// Authentication manager
/// Hands out valid access tokens for stored channels, refreshing and
/// persisting new tokens when the current one is about to expire
pub struct TokenManager {
    /// Persistent credentials
    store: Arc<CredentialStore>,

    /// Token endpoint client
    oauth: Arc<OAuthClient>,

    /// Token refresh threshold in seconds (default: 300 = 5 minutes)
    refresh_threshold: i64,

    /// Only one refresh runs at a time
    refresh_lock: Mutex<()>,
}

impl TokenManager {
    pub fn new(store: Arc<CredentialStore>, oauth: Arc<OAuthClient>, refresh_threshold: u64) -> Self {
        Self {
            store,
            oauth,
            refresh_threshold: refresh_threshold as i64,
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Persist tokens from a completed authorization.
    ///
    /// The platform omits the refresh token when consent was granted earlier;
    /// the stored one is kept in that case.
    pub fn save_authorization(&self, channel_id: &str, mut tokens: TokenSet) -> Result<(), ApiError> {
        if tokens.refresh_token.is_none() {
            if let Some(existing) = self.store.load(channel_id)? {
                tokens.refresh_token = existing.tokens.refresh_token;
            }
        }

        self.store.save(channel_id, &tokens)?;
        tracing::info!(channel_id = %channel_id, "Channel authorized");
        Ok(())
    }

    /// Get a valid access token for `channel` (or the first stored channel)
    pub async fn access_token(&self, channel: Option<&str>) -> Result<ChannelToken, ApiError> {
        let creds = self.resolve(channel)?;

        if !creds.tokens.expires_within(self.refresh_threshold) {
            return Ok(to_channel_token(creds));
        }

        let _guard = self.refresh_lock.lock().await;

        // Another request may have refreshed while we waited
        let creds = self.resolve(Some(creds.channel_id.as_str()))?;
        if !creds.tokens.expires_within(self.refresh_threshold) {
            return Ok(to_channel_token(creds));
        }

        let Some(refresh_token) = creds.tokens.refresh_token.clone() else {
            if !creds.tokens.is_expired() {
                tracing::warn!(
                    channel_id = %creds.channel_id,
                    "No refresh token stored; using access token until it expires"
                );
                return Ok(to_channel_token(creds));
            }
            return Err(ApiError::AuthError(format!(
                "Access token for channel {} expired and no refresh token is stored; authorize again",
                creds.channel_id
            )));
        };

        match self.oauth.refresh(&refresh_token).await {
            Ok(tokens) => {
                self.store.save(&creds.channel_id, &tokens)?;
                Ok(ChannelToken {
                    channel_id: creds.channel_id,
                    access_token: tokens.access_token,
                })
            }
            Err(e) => {
                tracing::error!(channel_id = %creds.channel_id, "Token refresh failed: {}", e);

                // Graceful degradation: if token isn't actually expired yet, use it
                if !creds.tokens.is_expired() {
                    tracing::warn!("Using existing token despite refresh failure (not yet expired)");
                    return Ok(to_channel_token(creds));
                }

                Err(e)
            }
        }
    }

    fn resolve(&self, channel: Option<&str>) -> Result<StoredCredentials, ApiError> {
        let found = match channel {
            Some(channel_id) => self.store.load(channel_id)?,
            None => self.store.load_first()?,
        };

        found.ok_or_else(|| match channel {
            Some(channel_id) => {
                ApiError::AuthError(format!("Channel {channel_id} has not been authorized"))
            }
            None => ApiError::AuthError(
                "No channel has been authorized yet; visit /auth/login".to_string(),
            ),
        })
    }
}

fn to_channel_token(creds: StoredCredentials) -> ChannelToken {
    ChannelToken {
        channel_id: creds.channel_id,
        access_token: creds.tokens.access_token,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::TokenCipher;
    use crate::http_client::PlatformHttpClient;
    use crate::store::MemoryBackend;
    use chrono::Utc;

    fn manager(token_url: String) -> TokenManager {
        let store = Arc::new(CredentialStore::new(
            MemoryBackend::new(),
            TokenCipher::new(&[5u8; 32]).unwrap(),
        ));
        let http = Arc::new(PlatformHttpClient::new(5, 5, 0).unwrap());
        let oauth = Arc::new(
            OAuthClient::new(
                http,
                "id".to_string(),
                "secret".to_string(),
                "http://localhost/cb".to_string(),
            )
            .with_endpoints("http://localhost/auth", token_url),
        );
        TokenManager::new(store, oauth, 300)
    }

    fn tokens(access: &str, refresh: Option<&str>, expires_in_secs: i64) -> TokenSet {
        TokenSet {
            access_token: access.to_string(),
            refresh_token: refresh.map(str::to_string),
            expiry_date: Some(Utc::now().timestamp_millis() + expires_in_secs * 1000),
        }
    }

    #[tokio::test]
    async fn test_fresh_token_returned_without_refresh() {
        let manager = manager("http://127.0.0.1:9/token".to_string());
        manager
            .save_authorization("UC1", tokens("ya29.fresh", Some("1//r"), 3600))
            .unwrap();

        let token = manager.access_token(None).await.unwrap();
        assert_eq!(token.channel_id, "UC1");
        assert_eq!(token.access_token, "ya29.fresh");
    }

    #[tokio::test]
    async fn test_unknown_channel_is_auth_error() {
        let manager = manager("http://127.0.0.1:9/token".to_string());
        assert!(matches!(
            manager.access_token(None).await,
            Err(ApiError::AuthError(_))
        ));
        assert!(matches!(
            manager.access_token(Some("UC404")).await,
            Err(ApiError::AuthError(_))
        ));
    }

    #[tokio::test]
    async fn test_expiring_token_is_refreshed_and_persisted() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .with_body(r#"{"access_token":"ya29.refreshed","expires_in":3599}"#)
            .expect(1)
            .create_async()
            .await;

        let manager = manager(format!("{}/token", server.url()));
        manager
            .save_authorization("UC1", tokens("ya29.old", Some("1//r"), 60))
            .unwrap();

        let token = manager.access_token(Some("UC1")).await.unwrap();
        assert_eq!(token.access_token, "ya29.refreshed");

        let stored = manager.store().load("UC1").unwrap().unwrap();
        assert_eq!(stored.tokens.access_token, "ya29.refreshed");
        assert_eq!(stored.tokens.refresh_token.as_deref(), Some("1//r"));

        // Second call uses the persisted token
        manager.access_token(Some("UC1")).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_failure_falls_back_to_unexpired_token() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let manager = manager(format!("{}/token", server.url()));
        manager
            .save_authorization("UC1", tokens("ya29.old", Some("1//r"), 60))
            .unwrap();

        let token = manager.access_token(None).await.unwrap();
        assert_eq!(token.access_token, "ya29.old");
    }

    #[tokio::test]
    async fn test_expired_without_refresh_token_requires_reauthorization() {
        let manager = manager("http://127.0.0.1:9/token".to_string());
        manager
            .save_authorization("UC1", tokens("ya29.old", None, -60))
            .unwrap();

        assert!(matches!(
            manager.access_token(None).await,
            Err(ApiError::AuthError(_))
        ));
    }

    #[tokio::test]
    async fn test_reauthorization_keeps_refresh_token() {
        let manager = manager("http://127.0.0.1:9/token".to_string());
        manager
            .save_authorization("UC1", tokens("a1", Some("1//first"), 3600))
            .unwrap();
        manager
            .save_authorization("UC1", tokens("a2", None, 3600))
            .unwrap();

        let stored = manager.store().load("UC1").unwrap().unwrap();
        assert_eq!(stored.tokens.access_token, "a2");
        assert_eq!(stored.tokens.refresh_token.as_deref(), Some("1//first"));
    }
}
