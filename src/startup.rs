use actix_web::dev::Server;
use actix_web::{middleware::Logger, web, App, HttpServer};
use std::net::TcpListener;
use std::sync::Arc;

use crate::auth::{RefreshTokenStore, TokenIssuer};
use crate::configuration::Settings;
use crate::domain::{Role, UserRepository};
use crate::logger::LoggerMiddleware;
use crate::middleware::{AuthGuard, AutoRefresh, RequireRole};
use crate::routes::{
    admin_only, any_role, health_check, login, logout, me, refresh, signup, user_only,
};

/// Build and start the server.
///
/// The route table below is the single place where per-route role sets are
/// declared: a route is public, guard-protected (any verified identity), or
/// guard-protected with an explicit `RequireRole` set.
pub fn run(
    listener: TcpListener,
    repository: Arc<dyn UserRepository>,
    settings: Settings,
) -> Result<Server, std::io::Error> {
    let issuer = TokenIssuer::new(settings.jwt.clone());
    let store = RefreshTokenStore::new(repository.clone(), settings.jwt.refresh_hash_cost);
    let production = settings.application.production;

    let repository_data: web::Data<dyn UserRepository> = web::Data::from(repository.clone());
    let issuer_data = web::Data::new(issuer.clone());
    let store_data = web::Data::new(store.clone());
    let jwt_data = web::Data::new(settings.jwt.clone());
    let application_data = web::Data::new(settings.application.clone());

    let server = HttpServer::new(move || {
        App::new()
            // Global middleware
            .wrap(Logger::default())
            .wrap(LoggerMiddleware)
            // Shared state
            .app_data(repository_data.clone())
            .app_data(issuer_data.clone())
            .app_data(store_data.clone())
            .app_data(jwt_data.clone())
            .app_data(application_data.clone())
            // Public
            .route("/health_check", web::get().to(health_check))
            .service(
                web::scope("/auth")
                    .route("/signup", web::post().to(signup))
                    .route("/login", web::post().to(login))
                    .route("/refresh", web::post().to(refresh))
                    // Guard-protected (any verified identity)
                    .service(
                        web::scope("")
                            .wrap(AuthGuard::new(issuer.clone(), repository.clone()))
                            .route("/logout", web::post().to(logout))
                            .route("/me", web::get().to(me))
                            .service(
                                web::resource("/admin-only")
                                    .wrap(RequireRole::new(vec![Role::Admin]))
                                    .route(web::get().to(admin_only)),
                            )
                            .service(
                                web::resource("/user-only")
                                    .wrap(RequireRole::new(vec![Role::User]))
                                    .route(web::get().to(user_only)),
                            )
                            .service(
                                web::resource("/any-role")
                                    .wrap(RequireRole::new(vec![Role::Admin, Role::User]))
                                    .route(web::get().to(any_role)),
                            ),
                    ),
            )
            // Boundary auto-refresh placement: the interceptor runs before
            // the guard and transparently rotates an expired session.
            .service(
                web::scope("/api")
                    .wrap(AuthGuard::new(issuer.clone(), repository.clone()))
                    .wrap(AutoRefresh::new(
                        settings.jwt.clone(),
                        store.clone(),
                        repository.clone(),
                        production,
                    ))
                    .route("/me", web::get().to(me)),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
