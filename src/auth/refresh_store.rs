/// Refresh Token Store
///
/// Persists at most one hashed refresh token per identity and enforces
/// single-use rotation:
/// - `rotate` overwrites the stored hash unconditionally, invalidating the
///   previous token.
/// - `validate` distinguishes "no active session" from "token mismatch" and
///   compares in constant time.
/// - `invalidate` clears the hash and is idempotent.
///
/// Tokens are never stored in plaintext. bcrypt only reads the first 72 bytes
/// of its input and signed tokens exceed that, so the token is digested with
/// SHA-256 before the cost-parameterized bcrypt pass.

use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::UserRepository;
use crate::error::{AppError, AuthError};

#[derive(Clone)]
pub struct RefreshTokenStore {
    repository: Arc<dyn UserRepository>,
    hash_cost: u32,
}

impl RefreshTokenStore {
    pub fn new(repository: Arc<dyn UserRepository>, hash_cost: u32) -> Self {
        Self {
            repository,
            hash_cost,
        }
    }

    /// Hash `token` and overwrite the identity's stored refresh hash.
    ///
    /// Rotation point: after this call the previously issued refresh token no
    /// longer validates.
    pub async fn rotate(&self, user_id: Uuid, token: &str) -> Result<(), AppError> {
        let hash = bcrypt::hash(token_digest(token), self.hash_cost)
            .map_err(|e| AppError::Internal(format!("Refresh token hashing failed: {}", e)))?;

        self.repository
            .set_refresh_token_hash(user_id, Some(hash))
            .await?;

        tracing::debug!(user_id = %user_id, "Refresh token rotated");
        Ok(())
    }

    /// Check a presented refresh token against the stored hash.
    ///
    /// Mismatch and absence are always rejected, never soft-allowed.
    pub async fn validate(&self, user_id: Uuid, presented: &str) -> Result<(), AppError> {
        let user = self
            .repository
            .find_by_id(user_id)
            .await?
            .ok_or(AppError::Auth(AuthError::IdentityNotFound))?;

        let stored_hash = match user.refresh_token_hash {
            Some(hash) => hash,
            None => {
                tracing::warn!(user_id = %user_id, "Refresh attempt with no active session");
                return Err(AppError::Auth(AuthError::NoActiveSession));
            }
        };

        let matches = bcrypt::verify(token_digest(presented), &stored_hash)
            .map_err(|e| AppError::Internal(format!("Refresh token comparison failed: {}", e)))?;

        if !matches {
            tracing::warn!(user_id = %user_id, "Refresh token does not match stored hash");
            return Err(AppError::Auth(AuthError::TokenMismatch));
        }

        Ok(())
    }

    /// Clear the stored hash. Calling this twice is a no-op the second time,
    /// never an error.
    pub async fn invalidate(&self, user_id: Uuid) -> Result<(), AppError> {
        self.repository.set_refresh_token_hash(user_id, None).await?;
        tracing::debug!(user_id = %user_id, "Session invalidated");
        Ok(())
    }
}

fn token_digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}
