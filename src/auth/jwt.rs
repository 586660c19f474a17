/// Access Token Signing and Verification
///
/// Issues HS256-signed access tokens and verifies them statelessly. Every
/// verification failure collapses into `AuthError::TokenInvalid`; the reason
/// is only logged.

use std::sync::Arc;

use chrono::Duration;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

use crate::auth::claims::Claims;
use crate::auth::clock::Clock;
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError, ConfigError};

/// The only algorithm accepted on either side.
const SIGNING_ALGORITHM: Algorithm = Algorithm::HS256;

/// A signed access token together with the claims it carries
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub claims: Claims,
}

pub struct TokenSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    access_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl TokenSigner {
    /// Create a signer from settings
    ///
    /// # Errors
    /// Returns `ConfigError` if the secret is blank or the access TTL is not positive
    pub fn new(config: &JwtSettings, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        if config.secret.trim().is_empty() {
            return Err(ConfigError::MissingRequired("jwt.secret".to_string()));
        }
        if config.access_token_expiry <= 0 {
            return Err(ConfigError::InvalidValue(
                "jwt.access_token_expiry must be greater than zero".to_string(),
            ));
        }

        let mut validation = Validation::new(SIGNING_ALGORITHM);
        // Expiry is checked against the injected clock instead of the system time.
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iat", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            access_ttl: Duration::seconds(config.access_token_expiry),
            clock,
        })
    }

    /// Issue a new access token for a user
    ///
    /// # Errors
    /// Returns `AppError::Internal` if signing fails
    pub fn issue(&self, user_id: i64, username: &str) -> Result<AccessToken, AppError> {
        let claims = Claims::new(
            user_id,
            username.to_string(),
            self.clock.now(),
            self.access_ttl,
        );

        let token = encode(&Header::new(SIGNING_ALGORITHM), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))?;

        Ok(AccessToken { token, claims })
    }

    /// Verify an access token and extract its claims
    ///
    /// # Errors
    /// Returns `AuthError::TokenInvalid` for malformed, tampered, foreign-algorithm
    /// or expired tokens alike
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!("Access token rejected: {}", e);
                AuthError::TokenInvalid
            })?;

        if claims.is_expired_at(self.clock.now()) {
            tracing::debug!(user_id = claims.user_id, "Access token expired");
            return Err(AuthError::TokenInvalid);
        }
        if !claims.is_consistent() {
            tracing::warn!("Access token carries inconsistent subject");
            return Err(AuthError::TokenInvalid);
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::ManualClock;
    use chrono::Utc;

    fn get_test_config() -> JwtSettings {
        JwtSettings {
            secret: "test-secret-key-at-least-32-characters-long".to_string(),
            access_token_expiry: 3600,
            refresh_token_expiry: 604800,
            bcrypt_cost: 4,
        }
    }

    fn signer_with_clock() -> (TokenSigner, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let signer = TokenSigner::new(&get_test_config(), clock.clone()).unwrap();
        (signer, clock)
    }

    #[test]
    fn test_issue_and_verify_token() {
        let (signer, _) = signer_with_clock();

        let issued = signer.issue(17, "alice").expect("Failed to issue token");
        let claims = signer.verify(&issued.token).expect("Failed to verify token");

        assert_eq!(claims, issued.claims);
        assert_eq!(claims.user_id, 17);
        assert_eq!(claims.sub, "17");
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_invalid_token() {
        let (signer, _) = signer_with_clock();
        assert!(matches!(
            signer.verify("invalid.token.here"),
            Err(AuthError::TokenInvalid)
        ));
    }

    #[test]
    fn test_tampered_token() {
        let (signer, _) = signer_with_clock();
        let issued = signer.issue(1, "alice").unwrap();

        let tampered = format!("{}X", issued.token);
        assert!(signer.verify(&tampered).is_err());
    }

    #[test]
    fn test_wrong_secret() {
        let (signer, _) = signer_with_clock();
        let mut other_config = get_test_config();
        other_config.secret = "another-secret-key-entirely-different".to_string();
        let other = TokenSigner::new(&other_config, Arc::new(ManualClock::default())).unwrap();

        let issued = other.issue(1, "alice").unwrap();
        assert!(signer.verify(&issued.token).is_err());
    }

    #[test]
    fn test_other_algorithm_is_rejected() {
        let (signer, clock) = signer_with_clock();
        let config = get_test_config();
        let claims = Claims::new(1, "alice".to_string(), clock.now(), Duration::minutes(5));

        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(config.secret.as_bytes()),
        )
        .unwrap();

        assert!(matches!(signer.verify(&token), Err(AuthError::TokenInvalid)));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let (signer, clock) = signer_with_clock();
        let issued = signer.issue(3, "alice").unwrap();

        clock.advance(Duration::seconds(3599));
        assert!(signer.verify(&issued.token).is_ok());

        clock.advance(Duration::seconds(1));
        assert!(matches!(
            signer.verify(&issued.token),
            Err(AuthError::TokenInvalid)
        ));
    }

    #[test]
    fn test_empty_secret_is_rejected() {
        let mut config = get_test_config();
        config.secret = "   ".to_string();

        assert!(matches!(
            TokenSigner::new(&config, Arc::new(ManualClock::default())),
            Err(ConfigError::MissingRequired(_))
        ));
    }

    #[test]
    fn test_non_positive_ttl_is_rejected() {
        let mut config = get_test_config();
        config.access_token_expiry = 0;

        assert!(matches!(
            TokenSigner::new(&config, Arc::new(ManualClock::default())),
            Err(ConfigError::InvalidValue(_))
        ));
    }
}
