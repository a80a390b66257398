/// Auto-Refresh Interceptor
///
/// Boundary-level alternative to the caller-side refresh coordinator, for
/// callers that cannot drive their own retries (opaque proxies, plain HTTP
/// clients). Wrapped outside `AuthGuard`: when the access cookie is expired
/// and a valid refresh cookie accompanies it, the interceptor performs exactly
/// one verify-validate-reissue, forwards the request carrying the fresh access
/// token, and, once the forwarded request succeeds, commits the rotation and
/// sets the rotated cookie pair on the response. A request that fails
/// downstream leaves the stored hash untouched, so the client's refresh token
/// is still usable.
///
/// There is no queue here. Two simultaneous requests from the same session can
/// both attempt rotation and the loser is logged out (last writer wins); that
/// cost is accepted for this placement. Any failure during the single attempt
/// forwards the request untouched so the guard's original rejection
/// propagates.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{self, HeaderMap, HeaderValue},
    Error,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;
use std::sync::Arc;

use crate::auth::{
    cookie_value, session_cookies, RefreshTokenStore, TokenError, TokenIssuer, ACCESS_COOKIE,
    REFRESH_COOKIE,
};
use crate::configuration::JwtSettings;
use crate::domain::UserRepository;
use crate::error::AppError;

pub struct AutoRefresh {
    jwt: JwtSettings,
    store: RefreshTokenStore,
    repository: Arc<dyn UserRepository>,
    production: bool,
}

impl AutoRefresh {
    pub fn new(
        jwt: JwtSettings,
        store: RefreshTokenStore,
        repository: Arc<dyn UserRepository>,
        production: bool,
    ) -> Self {
        Self {
            jwt,
            store,
            repository,
            production,
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AutoRefresh
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = AutoRefreshService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(AutoRefreshService {
            service: Rc::new(service),
            issuer: TokenIssuer::new(self.jwt.clone()),
            jwt: self.jwt.clone(),
            store: self.store.clone(),
            repository: self.repository.clone(),
            production: self.production,
        }))
    }
}

pub struct AutoRefreshService<S> {
    service: Rc<S>,
    issuer: TokenIssuer,
    jwt: JwtSettings,
    store: RefreshTokenStore,
    repository: Arc<dyn UserRepository>,
    production: bool,
}

impl<S, B> Service<ServiceRequest> for AutoRefreshService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        let issuer = self.issuer.clone();
        let jwt = self.jwt.clone();
        let store = self.store.clone();
        let repository = self.repository.clone();
        let production = self.production;
        let service = self.service.clone();

        Box::pin(async move {
            let pair = match reissue_if_expired(&issuer, &store, &repository, req.headers()).await
            {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::debug!(error = %e, "Boundary refresh attempt failed, forwarding unchanged");
                    None
                }
            };

            match pair {
                None => service.call(req).await,
                Some((user_id, access_token, refresh_token)) => {
                    replace_access_cookie(req.headers_mut(), &access_token);

                    let mut res = service.call(req).await?;

                    // Rotation commits only now: if the downstream call failed
                    // above, the presented refresh token is still the stored
                    // one and the client session survives.
                    if let Err(e) = store.rotate(user_id, &refresh_token).await {
                        tracing::warn!(
                            user_id = %user_id, error = %e,
                            "Rotation failed after reissue, forwarding without new cookies"
                        );
                        return Ok(res);
                    }

                    let (access_cookie, refresh_cookie) =
                        session_cookies(access_token, refresh_token, &jwt, production);
                    res.response_mut()
                        .add_cookie(&access_cookie)
                        .map_err(|e| AppError::Internal(format!("Failed to set cookie: {}", e)))?;
                    res.response_mut()
                        .add_cookie(&refresh_cookie)
                        .map_err(|e| AppError::Internal(format!("Failed to set cookie: {}", e)))?;

                    Ok(res)
                }
            }
        })
    }
}

/// The single reissue attempt.
///
/// `Ok(None)` means the request is not an expired-access case and must flow
/// through untouched; `Ok(Some(..))` carries the subject and the fresh token
/// pair. The stored hash is NOT rotated here; the caller commits the rotation
/// after the forwarded request succeeds, so a downstream failure leaves the
/// presented refresh token valid.
async fn reissue_if_expired(
    issuer: &TokenIssuer,
    store: &RefreshTokenStore,
    repository: &Arc<dyn UserRepository>,
    headers: &HeaderMap,
) -> Result<Option<(uuid::Uuid, String, String)>, AppError> {
    let access = match cookie_value(headers, ACCESS_COOKIE) {
        Some(access) => access,
        None => return Ok(None),
    };
    // Only the expired case is recoverable here; anything else is the guard's
    // business.
    match issuer.verify_access(&access) {
        Err(TokenError::Expired) => {}
        _ => return Ok(None),
    }

    let refresh_token = match cookie_value(headers, REFRESH_COOKIE) {
        Some(token) => token,
        None => return Ok(None),
    };

    let claims = issuer
        .verify_refresh(&refresh_token)
        .map_err(|_| AppError::Auth(crate::error::AuthError::TokenMismatch))?;
    let user_id = claims.user_id()?;

    store.validate(user_id, &refresh_token).await?;

    let user = repository
        .find_by_id(user_id)
        .await?
        .ok_or(AppError::Auth(crate::error::AuthError::IdentityNotFound))?;

    let new_access = issuer.issue_access(&user)?;
    let new_refresh = issuer.issue_refresh(user.id)?;

    tracing::info!(user_id = %user.id, "Access token auto-refreshed at the boundary");
    Ok(Some((user.id, new_access, new_refresh)))
}

/// Rewrite the request's Cookie header so the downstream guard sees the fresh
/// access token.
fn replace_access_cookie(headers: &mut HeaderMap, access_token: &str) {
    let mut parts: Vec<String> = Vec::new();
    if let Some(raw) = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) {
        for part in raw.split(';') {
            let part = part.trim();
            if part.is_empty() || part.starts_with(concat_name_eq(ACCESS_COOKIE).as_str()) {
                continue;
            }
            parts.push(part.to_string());
        }
    }
    parts.push(format!("{}={}", ACCESS_COOKIE, access_token));

    if let Ok(value) = HeaderValue::from_str(&parts.join("; ")) {
        headers.insert(header::COOKIE, value);
    }
}

fn concat_name_eq(name: &str) -> String {
    format!("{}=", name)
}
