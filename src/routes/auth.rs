/// Authentication Routes
///
/// Signup, login, token refresh, logout, and the current-user/role-gated
/// endpoints. Login and refresh deliver the token pair exclusively through
/// httpOnly cookies; bodies only ever carry the sanitized identity.

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;

use crate::auth::{
    cookie_value, expired_cookies, hash_password, session_cookies, verify_password,
    RefreshTokenStore, TokenIssuer, REFRESH_COOKIE,
};
use crate::configuration::{ApplicationSettings, JwtSettings};
use crate::domain::{CurrentUser, NewUser, Role, UserRepository};
use crate::error::{AppError, AuthError};
use crate::validators::{is_valid_email, is_valid_username};

/// User signup request
#[derive(Deserialize)]
pub struct SignupRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// User login request
#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// POST /auth/signup
///
/// Create a new identity. Signing up does not start a session; the client
/// logs in afterwards.
///
/// # Errors
/// - 400: Validation errors (invalid email/username/password)
/// - 409: Duplicate email or username
pub async fn signup(
    form: web::Json<SignupRequest>,
    repository: web::Data<dyn UserRepository>,
) -> Result<HttpResponse, AppError> {
    let email = is_valid_email(&form.email)?;
    let username = is_valid_username(&form.username)?;
    let password_hash = hash_password(&form.password)?;

    let user = repository
        .create(NewUser {
            username,
            email,
            password_hash,
            // Every signup starts as a plain user; admins are provisioned out
            // of band.
            role: Role::User,
        })
        .await?;

    tracing::info!(user_id = %user.id, "User signed up");

    Ok(HttpResponse::Created().json(CurrentUser::from(user)))
}

/// POST /auth/login
///
/// Verify credentials, issue a fresh token pair, persist the rotated refresh
/// hash, and set the cookie pair.
///
/// # Security Notes
/// - "email not found" and "wrong password" are indistinguishable to the
///   caller (prevents user enumeration)
///
/// # Errors
/// - 400: Validation error (invalid email format)
/// - 401: `INVALID_CREDENTIALS`
pub async fn login(
    form: web::Json<LoginRequest>,
    repository: web::Data<dyn UserRepository>,
    issuer: web::Data<TokenIssuer>,
    store: web::Data<RefreshTokenStore>,
    jwt: web::Data<JwtSettings>,
    application: web::Data<ApplicationSettings>,
) -> Result<HttpResponse, AppError> {
    let email = is_valid_email(&form.email)?;

    let user = repository
        .find_by_email(&email)
        .await?
        .ok_or(AppError::Auth(AuthError::InvalidCredentials))?;

    if !verify_password(&form.password, &user.password_hash)? {
        return Err(AppError::Auth(AuthError::InvalidCredentials));
    }

    let access_token = issuer.issue_access(&user)?;
    let refresh_token = issuer.issue_refresh(user.id)?;
    store.rotate(user.id, &refresh_token).await?;

    let (access_cookie, refresh_cookie) = session_cookies(
        access_token,
        refresh_token,
        jwt.get_ref(),
        application.production,
    );

    tracing::info!(user_id = %user.id, "User logged in");

    Ok(HttpResponse::Ok()
        .cookie(access_cookie)
        .cookie(refresh_cookie)
        .json(serde_json::json!({
            "message": "Login successful",
            "user": CurrentUser::from(user),
        })))
}

/// POST /auth/refresh
///
/// Exchange a valid refresh cookie for a new token pair. Implements token
/// rotation: the stored hash is overwritten, so the presented token is
/// single-use and a replay of it afterwards fails with `TOKEN_MISMATCH`.
///
/// # Errors
/// - 401: `UNAUTHORIZED` (no refresh cookie), `TOKEN_MISMATCH`,
///   `NO_ACTIVE_SESSION`
pub async fn refresh(
    req: HttpRequest,
    repository: web::Data<dyn UserRepository>,
    issuer: web::Data<TokenIssuer>,
    store: web::Data<RefreshTokenStore>,
    jwt: web::Data<JwtSettings>,
    application: web::Data<ApplicationSettings>,
) -> Result<HttpResponse, AppError> {
    let presented = cookie_value(req.headers(), REFRESH_COOKIE)
        .ok_or(AppError::Auth(AuthError::MissingToken))?;

    // A refresh token that fails signature or expiry checks is reported the
    // same way as a rotated-away one: callers treat every refresh failure as
    // "session invalid".
    let claims = issuer
        .verify_refresh(&presented)
        .map_err(|_| AppError::Auth(AuthError::TokenMismatch))?;
    let user_id = claims.user_id()?;

    store.validate(user_id, &presented).await?;

    let user = repository
        .find_by_id(user_id)
        .await?
        .ok_or(AppError::Auth(AuthError::IdentityNotFound))?;

    let access_token = issuer.issue_access(&user)?;
    let refresh_token = issuer.issue_refresh(user.id)?;
    store.rotate(user.id, &refresh_token).await?;

    let (access_cookie, refresh_cookie) = session_cookies(
        access_token,
        refresh_token,
        jwt.get_ref(),
        application.production,
    );

    tracing::info!(user_id = %user.id, "Tokens refreshed");

    Ok(HttpResponse::Ok()
        .cookie(access_cookie)
        .cookie(refresh_cookie)
        .json(serde_json::json!({ "message": "Tokens refreshed successfully" })))
}

/// POST /auth/logout
///
/// Requires a valid access cookie (guard-protected). Clears the stored
/// refresh hash and rewrites both cookies with an expiry in the past. An
/// unexpired access token presented after logout still passes the guard until
/// it expires; access tokens are stateless by design.
pub async fn logout(
    user: web::ReqData<CurrentUser>,
    store: web::Data<RefreshTokenStore>,
    application: web::Data<ApplicationSettings>,
) -> Result<HttpResponse, AppError> {
    store.invalidate(user.id).await?;

    let (access_cookie, refresh_cookie) = expired_cookies(application.production);

    tracing::info!(user_id = %user.id, "User logged out");

    Ok(HttpResponse::Ok()
        .cookie(access_cookie)
        .cookie(refresh_cookie)
        .json(serde_json::json!({ "message": "Logout successful" })))
}

/// GET /auth/me
///
/// Return the authenticated identity attached by the guard.
pub async fn me(user: web::ReqData<CurrentUser>) -> HttpResponse {
    HttpResponse::Ok().json(user.into_inner())
}

/// GET /auth/admin-only
pub async fn admin_only(user: web::ReqData<CurrentUser>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "message": format!("Welcome Admin {}!", user.email),
    }))
}

/// GET /auth/user-only
pub async fn user_only(user: web::ReqData<CurrentUser>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "message": format!("Welcome User {}!", user.email),
    }))
}

/// GET /auth/any-role
pub async fn any_role(user: web::ReqData<CurrentUser>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "message": format!("Welcome {} {}!", user.role.as_str(), user.email),
    }))
}
