/// Token Issuance and Verification
///
/// Signs and verifies the access/refresh token pair. The two token kinds use
/// independent secrets and lifetimes; verification reports expiry and invalid
/// signature as distinct failure kinds so callers can decide whether a
/// refresh is worth attempting.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::auth::claims::{AccessClaims, RefreshClaims};
use crate::configuration::JwtSettings;
use crate::domain::User;
use crate::error::AppError;

/// Verification failure kinds. Signature and expiry must stay distinguishable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    Expired,
    Invalid,
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Expired => write!(f, "token has expired"),
            TokenError::Invalid => write!(f, "token is invalid"),
        }
    }
}

impl std::error::Error for TokenError {}

/// Signs and verifies both token kinds from one settings block.
#[derive(Clone)]
pub struct TokenIssuer {
    settings: JwtSettings,
}

impl TokenIssuer {
    pub fn new(settings: JwtSettings) -> Self {
        Self { settings }
    }

    pub fn access_token_expiry(&self) -> i64 {
        self.settings.access_token_expiry
    }

    pub fn refresh_token_expiry(&self) -> i64 {
        self.settings.refresh_token_expiry
    }

    /// Sign a new access token for a user.
    pub fn issue_access(&self, user: &User) -> Result<String, AppError> {
        let claims = AccessClaims::new(
            user,
            self.settings.access_token_expiry,
            self.settings.issuer.clone(),
        );
        sign(&claims, &self.settings.access_secret)
    }

    /// Sign a new refresh token carrying only the subject.
    pub fn issue_refresh(&self, user_id: Uuid) -> Result<String, AppError> {
        let claims = RefreshClaims::new(
            user_id,
            self.settings.refresh_token_expiry,
            self.settings.issuer.clone(),
        );
        sign(&claims, &self.settings.refresh_secret)
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
        let claims: AccessClaims =
            verify(token, &self.settings.access_secret, &self.settings.issuer)?;
        // jsonwebtoken only rejects exp strictly in the past; the boundary
        // instant itself must also count as expired.
        if claims.is_expired() {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        let claims: RefreshClaims =
            verify(token, &self.settings.refresh_secret, &self.settings.issuer)?;
        if claims.is_expired() {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}

fn sign<C: Serialize>(claims: &C, secret: &str) -> Result<String, AppError> {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
}

fn verify<C: DeserializeOwned>(token: &str, secret: &str, issuer: &str) -> Result<C, TokenError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[issuer]);
    validation.leeway = 0;

    decode::<C>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
        _ => {
            tracing::warn!("JWT validation error: {}", e);
            TokenError::Invalid
        }
    })
}
