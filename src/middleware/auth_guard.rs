/// Auth Guard Middleware
///
/// Per-request verification state machine. Each request terminates in exactly
/// one of four ways:
/// - no access-token cookie        -> 401 `UNAUTHORIZED`
/// - signature invalid             -> 401 `INVALID_ACCESS_TOKEN`
/// - expired                       -> 401 `ACCESS_TOKEN_EXPIRED`
/// - valid but identity deleted    -> 401 `UNAUTHORIZED`
/// - valid                         -> sanitized identity attached, handler runs
///
/// The expired code is deliberately distinct from the invalid one: callers
/// branch on it to decide whether a refresh attempt is worthwhile. The guard
/// itself never retries.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;
use std::sync::Arc;

use crate::auth::{cookie_value, TokenError, TokenIssuer, ACCESS_COOKIE};
use crate::domain::{CurrentUser, UserRepository};
use crate::error::{AppError, AuthError};

pub struct AuthGuard {
    issuer: TokenIssuer,
    repository: Arc<dyn UserRepository>,
}

impl AuthGuard {
    pub fn new(issuer: TokenIssuer, repository: Arc<dyn UserRepository>) -> Self {
        Self { issuer, repository }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthGuard
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthGuardService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(AuthGuardService {
            service: Rc::new(service),
            issuer: self.issuer.clone(),
            repository: self.repository.clone(),
        }))
    }
}

pub struct AuthGuardService<S> {
    service: Rc<S>,
    issuer: TokenIssuer,
    repository: Arc<dyn UserRepository>,
}

impl<S, B> Service<ServiceRequest> for AuthGuardService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let token = cookie_value(req.headers(), ACCESS_COOKIE);
        let issuer = self.issuer.clone();
        let repository = self.repository.clone();
        let service = self.service.clone();

        Box::pin(async move {
            let token = match token {
                Some(token) => token,
                None => {
                    tracing::warn!(path = req.path(), "Request without access token cookie");
                    return Err(AppError::Auth(AuthError::MissingToken).into());
                }
            };

            let claims = issuer.verify_access(&token).map_err(|e| match e {
                TokenError::Expired => AppError::Auth(AuthError::TokenExpired),
                TokenError::Invalid => AppError::Auth(AuthError::TokenInvalidSignature),
            })?;

            let user_id = claims.user_id()?;
            let user = repository
                .find_by_id(user_id)
                .await?
                .ok_or_else(|| {
                    tracing::warn!(user_id = %user_id, "Valid token for a deleted identity");
                    AppError::Auth(AuthError::IdentityNotFound)
                })?;

            tracing::debug!(user_id = %user.id, "Access token verified");
            req.extensions_mut().insert(CurrentUser::from(user));

            service.call(req).await
        })
    }
}
