/// Access Token Claims
///
/// Payload of the short-lived access token: the owning user plus the standard
/// registered claims (RFC 7519) `sub`, `iat` and `exp`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Claims carried by every access token
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Numeric user ID
    #[serde(rename = "userId")]
    pub user_id: i64,
    /// Username at the time of issuance
    pub username: String,
    /// Subject (user ID rendered as a string)
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl Claims {
    /// Build claims for `user_id` valid for `ttl` starting at `issued_at`.
    pub fn new(user_id: i64, username: String, issued_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            user_id,
            username,
            sub: user_id.to_string(),
            iat: issued_at.timestamp(),
            exp: (issued_at + ttl).timestamp(),
        }
    }

    /// A token is expired once `now` reaches its `exp` second.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.exp <= now.timestamp()
    }

    /// `sub` must agree with the embedded user ID.
    pub fn is_consistent(&self) -> bool {
        self.user_id > 0 && self.sub == self.user_id.to_string()
    }
}
