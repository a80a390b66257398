/// Session Cookie Handling
///
/// Writes and clears the access/refresh cookie pair. Both cookies are
/// httpOnly with SameSite=Lax on path "/"; `secure` follows the production
/// flag; max-age matches the respective token lifetime.

use actix_web::cookie::time::{Duration, OffsetDateTime};
use actix_web::cookie::{Cookie, SameSite};
use actix_web::http::header::{self, HeaderMap};

use crate::configuration::JwtSettings;

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

/// Build the cookie pair for a freshly issued token pair.
pub fn session_cookies(
    access_token: String,
    refresh_token: String,
    jwt: &JwtSettings,
    production: bool,
) -> (Cookie<'static>, Cookie<'static>) {
    (
        build_cookie(
            ACCESS_COOKIE,
            access_token,
            Duration::seconds(jwt.access_token_expiry),
            production,
        ),
        build_cookie(
            REFRESH_COOKIE,
            refresh_token,
            Duration::seconds(jwt.refresh_token_expiry),
            production,
        ),
    )
}

/// Build the cookie pair that clears a session: empty values, expiry in the
/// past, identical security attributes.
pub fn expired_cookies(production: bool) -> (Cookie<'static>, Cookie<'static>) {
    (
        clearing_cookie(ACCESS_COOKIE, production),
        clearing_cookie(REFRESH_COOKIE, production),
    )
}

/// Read a cookie value straight from the `Cookie` header.
///
/// Middleware that rewrites the header must not go through the request's
/// parsed-cookie cache, so both auth middlewares use this helper instead of
/// `HttpRequest::cookie`.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    for part in raw.split(';') {
        if let Ok(cookie) = Cookie::parse_encoded(part.trim()) {
            if cookie.name() == name {
                return Some(cookie.value().to_string());
            }
        }
    }
    None
}

fn build_cookie(
    name: &'static str,
    value: String,
    max_age: Duration,
    production: bool,
) -> Cookie<'static> {
    Cookie::build(name, value)
        .http_only(true)
        .secure(production)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(max_age)
        .finish()
}

fn clearing_cookie(name: &'static str, production: bool) -> Cookie<'static> {
    Cookie::build(name, "")
        .http_only(true)
        .secure(production)
        .same_site(SameSite::Lax)
        .path("/")
        .expires(OffsetDateTime::UNIX_EPOCH)
        .finish()
}
