// Authentication module
// OAuth authorization, token refresh and access token lifecycle

mod manager;
mod oauth;
mod state;
mod types;

pub use manager::{ChannelToken, TokenManager};
pub use oauth::{OAuthClient, DEFAULT_AUTH_URL, DEFAULT_TOKEN_URL, SCOPES};
pub use state::{PendingAuthorizations, PENDING_STATE_TTL};
