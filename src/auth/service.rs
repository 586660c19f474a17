/// Authentication Service
///
/// The four operations exposed to the HTTP layer: register, login, refresh
/// and logout. Each returns an `AuthOutcome` or a classified `AppError`.

use std::sync::Arc;

use crate::auth::clock::Clock;
use crate::auth::jwt::{AccessToken, TokenSigner};
use crate::auth::password::{validate_password, CredentialHasher, MAX_PASSWORD_BYTES};
use crate::auth::session::{IssuedRefreshToken, SessionManager, REVOKE_REASON_LOGOUT};
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError, ValidationError};
use crate::repository::{RefreshSessionStore, User, UserStore};
use crate::validators::is_valid_username;

/// Verified against when the username is unknown, so both failure paths pay
/// the same bcrypt cost.
const DUMMY_PASSWORD: &str = "dummy-password-for-timing";

/// Tokens and identity handed back after a successful authentication
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub access: AccessToken,
    pub refresh: IssuedRefreshToken,
    pub user: User,
}

pub struct AuthService {
    users: Arc<dyn UserStore>,
    hasher: CredentialHasher,
    signer: Arc<TokenSigner>,
    sessions: SessionManager,
    dummy_hash: String,
}

impl AuthService {
    /// Build the service and its collaborators from the JWT settings
    ///
    /// # Errors
    /// Returns `AppError::Config` if the secret or either TTL is invalid
    pub fn new(
        users: Arc<dyn UserStore>,
        refresh_sessions: Arc<dyn RefreshSessionStore>,
        config: &JwtSettings,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AppError> {
        let signer = Arc::new(TokenSigner::new(config, clock.clone())?);
        let sessions = SessionManager::new(
            refresh_sessions,
            users.clone(),
            signer.clone(),
            config.refresh_token_expiry,
            clock,
        )?;
        let hasher = CredentialHasher::new(config.bcrypt_cost);
        let dummy_hash = hasher.hash(DUMMY_PASSWORD)?;

        Ok(Self {
            users,
            hasher,
            signer,
            sessions,
            dummy_hash,
        })
    }

    pub fn signer(&self) -> Arc<TokenSigner> {
        self.signer.clone()
    }

    /// Create an account and sign it in
    ///
    /// # Errors
    /// - `AppError::Validation` for a malformed username or password
    /// - `DatabaseError::UniqueConstraintViolation` if the username is taken
    pub async fn register(&self, username: &str, password: &str) -> Result<AuthOutcome, AppError> {
        let username = is_valid_username(username)?;
        validate_password(password)?;

        let hasher = self.hasher;
        let password = password.to_string();
        let password_hash = run_blocking(move || hasher.hash(&password)).await?;

        let user = self.users.create_user(&username, &password_hash).await?;
        tracing::info!(user_id = user.id, "User registered");

        self.start_session(user).await
    }

    /// Verify credentials and start a new session family
    ///
    /// # Errors
    /// - `AppError::Validation` if the username or password is empty
    /// - `AuthError::InvalidCredentials` for an unknown user and a wrong password alike
    pub async fn login(&self, username: &str, password: &str) -> Result<AuthOutcome, AppError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(ValidationError::EmptyField("username".to_string()).into());
        }
        if password.is_empty() {
            return Err(ValidationError::EmptyField("password".to_string()).into());
        }

        // bcrypt truncates at 72 bytes, so a longer password could match a
        // shorter stored one. Registration refuses those, so none can be right.
        let user = if password.len() > MAX_PASSWORD_BYTES {
            None
        } else {
            self.users.find_by_username(username).await?
        };
        let password_hash = match &user {
            Some(user) => user.password_hash.clone(),
            None => self.dummy_hash.clone(),
        };

        let hasher = self.hasher;
        let password = password.to_string();
        let matches = run_blocking(move || hasher.verify(&password, &password_hash)).await?;

        let user = match user {
            Some(user) if matches => user,
            _ => {
                tracing::warn!("Login rejected");
                return Err(AuthError::InvalidCredentials.into());
            }
        };

        tracing::info!(user_id = user.id, "User logged in");
        self.start_session(user).await
    }

    /// Rotate the presented refresh token
    ///
    /// # Errors
    /// - `AuthError::MissingToken` if no token was presented
    /// - `AuthError::RefreshTokenInvalid` / `RefreshTokenInactive` on rejection
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthOutcome, AppError> {
        if refresh_token.trim().is_empty() {
            return Err(AuthError::MissingToken.into());
        }

        let rotated = self.sessions.rotate(refresh_token).await?;

        Ok(AuthOutcome {
            access: rotated.access,
            refresh: rotated.refresh,
            user: rotated.user,
        })
    }

    /// End the session behind the presented refresh token, if any.
    /// Unknown, expired and already-revoked tokens succeed silently.
    pub async fn logout(&self, refresh_token: Option<&str>) -> Result<(), AppError> {
        match refresh_token.map(str::trim) {
            Some(token) if !token.is_empty() => {
                self.sessions.revoke(token, REVOKE_REASON_LOGOUT).await
            }
            _ => Ok(()),
        }
    }

    async fn start_session(&self, user: User) -> Result<AuthOutcome, AppError> {
        let access = self.signer.issue(user.id, &user.username)?;
        let refresh = self.sessions.issue_new(user.id).await?;

        Ok(AuthOutcome {
            access,
            refresh,
            user,
        })
    }
}

/// bcrypt is CPU-bound; keep it off the async worker threads.
async fn run_blocking<F, T>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(format!("Blocking task failed: {}", e)))?
}
