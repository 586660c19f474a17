/// Refresh Session Rotation
///
/// Lifecycle of refresh sessions with single-use rotation and reuse detection:
/// - `issue_new` starts a new family (login / registration)
/// - `rotate` consumes the active leaf of a family and issues its successor
/// - presenting any session that is not the active leaf (consumed, revoked,
///   superseded or expired) revokes the whole family
/// - `revoke` / `revoke_family` end sessions explicitly (logout)

use std::sync::Arc;

use chrono::Duration;
use uuid::Uuid;

use crate::auth::clock::Clock;
use crate::auth::jwt::{AccessToken, TokenSigner};
use crate::auth::refresh_token::{generate_refresh_token, hash_refresh_token};
use crate::error::{AppError, AuthError, ConfigError};
use crate::repository::{NewRefreshSession, RefreshSession, RefreshSessionStore, User, UserStore};

pub const REVOKE_REASON_REUSE: &str = "refresh token reuse or expired token";
pub const REVOKE_REASON_LOGOUT: &str = "user logout";

/// A freshly issued refresh token and the session row it maps to.
///
/// `token` is the only copy of the raw value; it goes to the client and nowhere else.
#[derive(Clone)]
pub struct IssuedRefreshToken {
    pub token: String,
    pub session: RefreshSession,
}

impl std::fmt::Debug for IssuedRefreshToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedRefreshToken")
            .field("token", &"<redacted>")
            .field("session_id", &self.session.id)
            .field("family_id", &self.session.family_id)
            .finish()
    }
}

/// Result of a successful rotation
#[derive(Debug, Clone)]
pub struct RotatedSession {
    pub refresh: IssuedRefreshToken,
    pub access: AccessToken,
    pub user: User,
}

pub struct SessionManager {
    sessions: Arc<dyn RefreshSessionStore>,
    users: Arc<dyn UserStore>,
    signer: Arc<TokenSigner>,
    refresh_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl SessionManager {
    /// # Errors
    /// Returns `ConfigError` if the refresh TTL is not positive
    pub fn new(
        sessions: Arc<dyn RefreshSessionStore>,
        users: Arc<dyn UserStore>,
        signer: Arc<TokenSigner>,
        refresh_ttl_seconds: i64,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        if refresh_ttl_seconds <= 0 {
            return Err(ConfigError::InvalidValue(
                "jwt.refresh_token_expiry must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            sessions,
            users,
            signer,
            refresh_ttl: Duration::seconds(refresh_ttl_seconds),
            clock,
        })
    }

    /// Start a new session family for `user_id`.
    pub async fn issue_new(&self, user_id: i64) -> Result<IssuedRefreshToken, AppError> {
        let token = generate_refresh_token();
        let now = self.clock.now();

        let session = self
            .sessions
            .create_session(NewRefreshSession {
                user_id,
                token_hash: hash_refresh_token(&token),
                family_id: Uuid::new_v4(),
                issued_at: now,
                expires_at: now + self.refresh_ttl,
            })
            .await?;

        tracing::info!(
            user_id = user_id,
            session_id = session.id,
            family_id = %session.family_id,
            "Refresh session family started"
        );

        Ok(IssuedRefreshToken { token, session })
    }

    /// Exchange a refresh token for its successor and a new access token.
    ///
    /// # Errors
    /// - `AuthError::RefreshTokenInvalid` if the token is unknown or its user is gone
    ///   (in the latter case the presented session has already been consumed)
    /// - `AuthError::RefreshTokenInactive` if the session is not the active leaf;
    ///   its whole family is revoked first
    /// - `AppError::Database` if the store fails; a failed rotation changes
    ///   nothing and the caller may retry
    pub async fn rotate(&self, raw_token: &str) -> Result<RotatedSession, AppError> {
        let token_hash = hash_refresh_token(raw_token);
        let session = match self.sessions.find_by_token_hash(&token_hash).await? {
            Some(session) => session,
            None => {
                tracing::warn!("Refresh token not found");
                return Err(AuthError::RefreshTokenInvalid.into());
            }
        };

        let now = self.clock.now();
        if !session.is_active(now) {
            tracing::warn!(
                user_id = session.user_id,
                session_id = session.id,
                family_id = %session.family_id,
                consumed = session.consumed_at.is_some(),
                revoked = session.revoked_at.is_some(),
                expired = session.expires_at <= now,
                "Inactive refresh token presented, revoking family"
            );
            self.revoke_family_after_anomaly(&session).await;
            return Err(AuthError::RefreshTokenInactive.into());
        }

        let token = generate_refresh_token();
        let successor = NewRefreshSession {
            user_id: session.user_id,
            token_hash: hash_refresh_token(&token),
            family_id: session.family_id,
            issued_at: now,
            expires_at: now + self.refresh_ttl,
        };

        let rotated = match self.sessions.rotate_session(session.id, successor).await {
            Ok(Some(rotated)) => rotated,
            Ok(None) => {
                // Another request consumed this session between our read and our write.
                tracing::warn!(
                    session_id = session.id,
                    family_id = %session.family_id,
                    "Refresh session already rotated, revoking family"
                );
                self.revoke_family_after_anomaly(&session).await;
                return Err(AuthError::RefreshTokenInactive.into());
            }
            Err(e) => {
                tracing::error!(
                    session_id = session.id,
                    error = %e,
                    "Refresh session rotation failed"
                );
                return Err(e.into());
            }
        };

        let user = match self.users.find_by_id(session.user_id).await? {
            Some(user) => user,
            None => {
                tracing::warn!(
                    user_id = session.user_id,
                    session_id = session.id,
                    "Refresh session owner no longer exists"
                );
                return Err(AuthError::RefreshTokenInvalid.into());
            }
        };

        let access = self.signer.issue(user.id, &user.username)?;

        tracing::info!(
            user_id = user.id,
            old_session_id = session.id,
            session_id = rotated.id,
            family_id = %rotated.family_id,
            "Refresh session rotated"
        );

        Ok(RotatedSession {
            refresh: IssuedRefreshToken {
                token,
                session: rotated,
            },
            access,
            user,
        })
    }

    /// Revoke the session behind `raw_token`. Unknown or already-revoked tokens are a no-op.
    pub async fn revoke(&self, raw_token: &str, reason: &str) -> Result<(), AppError> {
        let token_hash = hash_refresh_token(raw_token);
        let revoked = self
            .sessions
            .revoke_by_token_hash(&token_hash, reason, self.clock.now())
            .await?;

        tracing::info!(revoked = revoked, reason = reason, "Refresh session revocation");
        Ok(())
    }

    /// Revoke every session of a family. Returns the number of sessions newly revoked.
    pub async fn revoke_family(&self, family_id: Uuid, reason: &str) -> Result<u64, AppError> {
        let revoked = self
            .sessions
            .revoke_family(family_id, reason, self.clock.now())
            .await?;

        tracing::info!(
            family_id = %family_id,
            revoked = revoked,
            reason = reason,
            "Refresh session family revoked"
        );
        Ok(revoked)
    }

    /// The caller is rejected regardless, so a failure here is only logged.
    async fn revoke_family_after_anomaly(&self, session: &RefreshSession) {
        if let Err(e) = self
            .revoke_family(session.family_id, REVOKE_REASON_REUSE)
            .await
        {
            tracing::error!(
                family_id = %session.family_id,
                error = %e,
                "Failed to revoke refresh session family"
            );
        }
    }
}
