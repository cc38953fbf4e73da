// Credential types

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

/// Persisted per-channel record.
///
/// `refresh_token` holds a cipher blob, never the plaintext token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    #[serde(rename = "channelId")]
    pub channel_id: String,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Epoch milliseconds
    #[serde(default)]
    pub expiry_date: Option<i64>,
}

/// Decrypted token set as exchanged with the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Epoch milliseconds
    pub expiry_date: Option<i64>,
}

impl TokenSet {
    /// True if the access token expires within `threshold_secs` (or has no expiry)
    pub fn expires_within(&self, threshold_secs: i64) -> bool {
        match self.expiry_date {
            None => true,
            Some(expiry) => {
                let threshold = Utc::now() + Duration::seconds(threshold_secs);
                expiry <= threshold.timestamp_millis()
            }
        }
    }

    /// True if the access token is already expired (or has no expiry)
    pub fn is_expired(&self) -> bool {
        self.expires_within(0)
    }
}

/// Credentials recovered from the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCredentials {
    pub channel_id: String,
    pub tokens: TokenSet,
}
