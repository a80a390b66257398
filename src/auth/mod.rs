/// Authentication module
///
/// Token issuance/verification, password hashing, refresh-token rotation,
/// and session cookie handling.

mod claims;
mod cookies;
mod password;
mod refresh_store;
mod tokens;

pub use claims::AccessClaims;
pub use claims::RefreshClaims;
pub use cookies::cookie_value;
pub use cookies::expired_cookies;
pub use cookies::session_cookies;
pub use cookies::ACCESS_COOKIE;
pub use cookies::REFRESH_COOKIE;
pub use password::hash_password;
pub use password::verify_password;
pub use refresh_store::RefreshTokenStore;
pub use tokens::TokenError;
pub use tokens::TokenIssuer;
