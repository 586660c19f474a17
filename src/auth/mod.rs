/// Authentication module
///
/// Handles JWT token generation/validation, password hashing,
/// and refresh session rotation.

mod claims;
mod clock;
mod jwt;
mod password;
mod refresh_token;
mod service;
mod session;

pub use claims::Claims;
pub use clock::{Clock, ManualClock, SystemClock};
pub use jwt::{AccessToken, TokenSigner};
pub use password::{validate_password, CredentialHasher, MAX_PASSWORD_BYTES};
pub use refresh_token::{generate_refresh_token, hash_refresh_token};
pub use service::{AuthOutcome, AuthService};
pub use session::{
    IssuedRefreshToken, RotatedSession, SessionManager, REVOKE_REASON_LOGOUT,
    REVOKE_REASON_REUSE,
};
