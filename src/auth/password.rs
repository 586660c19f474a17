/// Password Hashing and Verification
///
/// Handles password hashing with bcrypt. A mismatch is a normal outcome
/// (`Ok(false)`), distinct from an actual hashing fault.

use bcrypt::{hash, verify};

use crate::error::{AppError, ValidationError};

/// bcrypt only reads the first 72 bytes of its input.
pub const MAX_PASSWORD_BYTES: usize = 72;

#[derive(Debug, Clone, Copy)]
pub struct CredentialHasher {
    cost: u32,
}

impl CredentialHasher {
    /// Costs outside bcrypt's accepted range surface as errors on first use.
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    /// Hash a password using bcrypt
    ///
    /// # Errors
    /// Returns `AppError::Internal` if bcrypt fails
    pub fn hash(&self, password: &str) -> Result<String, AppError> {
        hash(password, self.cost)
            .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
    }

    /// Verify a password against its hash
    ///
    /// # Returns
    /// `Ok(true)` on a match, `Ok(false)` on a mismatch
    ///
    /// # Errors
    /// Returns `AppError::Internal` if the stored hash cannot be parsed
    pub fn verify(&self, password: &str, password_hash: &str) -> Result<bool, AppError> {
        verify(password, password_hash)
            .map_err(|e| AppError::Internal(format!("Password verification failed: {}", e)))
    }
}

impl Default for CredentialHasher {
    fn default() -> Self {
        Self::new(bcrypt::DEFAULT_COST)
    }
}

/// Check the presence and size limits of a submitted password.
pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    if password.is_empty() {
        return Err(ValidationError::EmptyField("password".to_string()));
    }
    if password.len() > MAX_PASSWORD_BYTES {
        return Err(ValidationError::TooLong(
            "password".to_string(),
            MAX_PASSWORD_BYTES,
        ));
    }
    Ok(())
}
