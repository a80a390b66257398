/// Role Authorization Middleware
///
/// Enforces a required-role set declared per route at registration time (see
/// `startup.rs` for the route table). Must run after `AuthGuard`, which
/// attaches the verified identity. The check itself is the pure
/// `CurrentUser::authorize` function; this middleware only adapts it to the
/// request chain.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;

use crate::domain::{CurrentUser, Role};
use crate::error::{AppError, AuthError};

pub struct RequireRole {
    required: Vec<Role>,
}

impl RequireRole {
    /// An empty role set makes the route available to any verified identity.
    pub fn new(required: Vec<Role>) -> Self {
        Self { required }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequireRole
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequireRoleService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(RequireRoleService {
            service: Rc::new(service),
            required: self.required.clone(),
        }))
    }
}

pub struct RequireRoleService<S> {
    service: Rc<S>,
    required: Vec<Role>,
}

impl<S, B> Service<ServiceRequest> for RequireRoleService<S>
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
        let user = req.extensions().get::<CurrentUser>().cloned();
        let required = self.required.clone();
        let service = self.service.clone();

        Box::pin(async move {
            let user = match user {
                Some(user) => user,
                // Reachable only if this middleware is wired without the guard.
                None => return Err(AppError::Auth(AuthError::MissingToken).into()),
            };

            if let Err(e) = user.authorize(&required) {
                tracing::warn!(
                    user_id = %user.id,
                    role = user.role.as_str(),
                    path = req.path(),
                    "Role check failed"
                );
                return Err(AppError::Auth(e).into());
            }

            service.call(req).await
        })
    }
}
