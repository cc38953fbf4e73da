// Authentication types

use chrono::{Duration, Utc};
use serde::Deserialize;

use crate::store::TokenSet;

/// Token endpoint response (authorization code and refresh grants)
#[derive(Debug, Deserialize)]
pub struct OAuthTokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    #[allow(dead_code)]
    pub scope: Option<String>,
    #[allow(dead_code)]
    pub token_type: Option<String>,
}

/// Longest access token lifetime accepted from the token endpoint
const MAX_TOKEN_LIFETIME_SECS: i64 = 365 * 24 * 3600;

impl OAuthTokenResponse {
    /// Convert to a token set, expiring 60 seconds early
    pub fn into_token_set(self) -> TokenSet {
        let expires_in = self.expires_in.unwrap_or(3600);
        let lifetime = expires_in
            .saturating_sub(60)
            .clamp(0, MAX_TOKEN_LIFETIME_SECS);
        let expires_at = Utc::now() + Duration::seconds(lifetime);

        TokenSet {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expiry_date: Some(expires_at.timestamp_millis()),
        }
    }
}
