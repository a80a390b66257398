//! End-to-end auth flow tests.
//!
//! Each test spins up the real server on a random port, backed by the
//! in-memory repository so no database is required. Cookies are managed by
//! hand (no reqwest cookie store) so the tests can inspect, drop, and replay
//! individual cookies.

use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::Arc;

use reqwest::header::{COOKIE, SET_COOKIE};
use serde_json::{json, Value};

use authgate::auth::{hash_password, TokenIssuer};
use authgate::configuration::{ApplicationSettings, DatabaseSettings, JwtSettings, Settings};
use authgate::domain::{InMemoryUserRepository, NewUser, Role, UserRepository};
use authgate::startup::run;

struct TestApp {
    address: String,
    repository: Arc<InMemoryUserRepository>,
    settings: Settings,
    client: reqwest::Client,
}

fn test_settings(port: u16) -> Settings {
    Settings {
        application: ApplicationSettings {
            port,
            production: false,
        },
        database: DatabaseSettings {
            username: "unused".to_string(),
            password: "unused".to_string(),
            port: 5432,
            host: "127.0.0.1".to_string(),
            database_name: "unused".to_string(),
        },
        jwt: JwtSettings {
            access_secret: "test-access-secret-at-least-32-chars".to_string(),
            refresh_secret: "test-refresh-secret-at-least-32-chars".to_string(),
            access_token_expiry: 900,
            refresh_token_expiry: 604_800,
            issuer: "authgate-test".to_string(),
            // Low bcrypt cost keeps the suite fast.
            refresh_hash_cost: 4,
        },
    }
}

async fn spawn_app() -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let settings = test_settings(port);
    let repository = Arc::new(InMemoryUserRepository::new());

    let server = run(
        listener,
        repository.clone() as Arc<dyn UserRepository>,
        settings.clone(),
    )
    .expect("Failed to start server");
    let _ = tokio::spawn(server);

    TestApp {
        address: format!("http://127.0.0.1:{}", port),
        repository,
        settings,
        client: reqwest::Client::new(),
    }
}

impl TestApp {
    async fn signup(&self, username: &str, email: &str, password: &str) -> reqwest::Response {
        self.client
            .post(format!("{}/auth/signup", self.address))
            .json(&json!({
                "username": username,
                "email": email,
                "password": password,
            }))
            .send()
            .await
            .expect("Failed to execute signup")
    }

    async fn login(&self, email: &str, password: &str) -> reqwest::Response {
        self.client
            .post(format!("{}/auth/login", self.address))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .expect("Failed to execute login")
    }

    /// Sign up and log in, returning the (access, refresh) cookie values.
    async fn login_fresh_user(&self, username: &str, email: &str) -> (String, String) {
        let response = self.signup(username, email, "Password1").await;
        assert_eq!(response.status().as_u16(), 201);

        let response = self.login(email, "Password1").await;
        assert_eq!(response.status().as_u16(), 200);

        let cookies = set_cookies(&response);
        (
            cookies["accessToken"].clone(),
            cookies["refreshToken"].clone(),
        )
    }

    /// Create an admin directly in the repository (admins are provisioned out
    /// of band, there is no signup path for them) and log in.
    async fn login_fresh_admin(&self, username: &str, email: &str) -> (String, String) {
        self.repository
            .create(NewUser {
                username: username.to_string(),
                email: email.to_string(),
                password_hash: hash_password("Password1").unwrap(),
                role: Role::Admin,
            })
            .await
            .expect("Failed to seed admin");

        let response = self.login(email, "Password1").await;
        assert_eq!(response.status().as_u16(), 200);

        let cookies = set_cookies(&response);
        (
            cookies["accessToken"].clone(),
            cookies["refreshToken"].clone(),
        )
    }

    async fn get_with_cookies(&self, path: &str, cookie_header: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.address, path))
            .header(COOKIE, cookie_header)
            .send()
            .await
            .expect("Failed to execute request")
    }

    async fn post_with_cookies(&self, path: &str, cookie_header: &str) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.address, path))
            .header(COOKIE, cookie_header)
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// An access token for this user that is already expired, signed with the
    /// server's real secret.
    async fn expired_access_token(&self, email: &str) -> String {
        let user = self
            .repository
            .find_by_email(email)
            .await
            .unwrap()
            .expect("User not found");

        let mut jwt = self.settings.jwt.clone();
        jwt.access_token_expiry = -60;
        TokenIssuer::new(jwt).issue_access(&user).unwrap()
    }
}

/// Collect the name=value pairs from the response's Set-Cookie headers.
fn set_cookies(response: &reqwest::Response) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for value in response.headers().get_all(SET_COOKIE) {
        let raw = value.to_str().expect("Non-ASCII Set-Cookie header");
        let pair = raw.split(';').next().unwrap_or("");
        if let Some((name, value)) = pair.split_once('=') {
            cookies.insert(name.trim().to_string(), value.to_string());
        }
    }
    cookies
}

fn session_header(access: &str, refresh: &str) -> String {
    format!("accessToken={}; refreshToken={}", access, refresh)
}

#[tokio::test]
async fn health_check_works() {
    let app = spawn_app().await;

    let response = app
        .client
        .get(format!("{}/health_check", app.address))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());
}

#[tokio::test]
async fn signup_returns_sanitized_identity() {
    let app = spawn_app().await;

    let response = app.signup("jdoe", "jdoe@example.com", "Password1").await;

    assert_eq!(response.status().as_u16(), 201);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["username"], "jdoe");
    assert_eq!(body["email"], "jdoe@example.com");
    assert_eq!(body["role"], "user");
    assert!(body.get("password_hash").is_none());
    assert!(body.get("refresh_token_hash").is_none());
}

#[tokio::test]
async fn signup_does_not_start_a_session() {
    let app = spawn_app().await;

    let response = app.signup("jdoe", "jdoe@example.com", "Password1").await;

    assert_eq!(response.status().as_u16(), 201);
    assert!(set_cookies(&response).is_empty());
}

#[tokio::test]
async fn duplicate_signup_conflicts() {
    let app = spawn_app().await;

    app.signup("jdoe", "jdoe@example.com", "Password1").await;
    let response = app.signup("other", "jdoe@example.com", "Password1").await;

    assert_eq!(response.status().as_u16(), 409);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "DUPLICATE_IDENTITY");
}

#[tokio::test]
async fn malformed_signup_is_rejected() {
    let app = spawn_app().await;

    for (username, email, password) in [
        ("jdoe", "not-an-email", "Password1"),
        ("x", "jdoe@example.com", "Password1"),
        ("jdoe", "jdoe@example.com", "weak"),
        ("jdoe", "jdoe@example.com", "alllowercase1"),
    ] {
        let response = app.signup(username, email, password).await;
        assert_eq!(
            response.status().as_u16(),
            400,
            "Payload ({}, {}, {}) should be rejected",
            username,
            email,
            password
        );
    }
}

#[tokio::test]
async fn login_sets_the_session_cookie_pair() {
    let app = spawn_app().await;
    app.signup("jdoe", "jdoe@example.com", "Password1").await;

    let response = app.login("jdoe@example.com", "Password1").await;

    assert_eq!(response.status().as_u16(), 200);

    let mut seen = Vec::new();
    for value in response.headers().get_all(SET_COOKIE) {
        let raw = value.to_str().unwrap();
        assert!(raw.contains("HttpOnly"), "Cookie not httpOnly: {}", raw);
        assert!(raw.contains("SameSite=Lax"), "Cookie not Lax: {}", raw);
        assert!(raw.contains("Path=/"), "Cookie not on /: {}", raw);
        seen.push(raw.split('=').next().unwrap().to_string());
    }
    seen.sort();
    assert_eq!(seen, vec!["accessToken", "refreshToken"]);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["user"]["email"], "jdoe@example.com");
    assert!(body["user"].get("password_hash").is_none());
    // Tokens travel only in cookies.
    assert!(body.get("accessToken").is_none());
    assert!(body.get("refreshToken").is_none());
}

#[tokio::test]
async fn wrong_password_and_unknown_email_are_indistinguishable() {
    let app = spawn_app().await;
    app.signup("jdoe", "jdoe@example.com", "Password1").await;

    let wrong_password = app.login("jdoe@example.com", "Password2").await;
    assert_eq!(wrong_password.status().as_u16(), 401);
    let body: Value = wrong_password.json().await.unwrap();
    assert_eq!(body["code"], "INVALID_CREDENTIALS");

    let unknown_email = app.login("nobody@example.com", "Password1").await;
    assert_eq!(unknown_email.status().as_u16(), 401);
    let body: Value = unknown_email.json().await.unwrap();
    assert_eq!(body["code"], "INVALID_CREDENTIALS");
}

#[tokio::test]
async fn me_without_cookies_is_unauthorized() {
    let app = spawn_app().await;

    let response = app
        .client
        .get(format!("{}/auth/me", app.address))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn garbage_access_token_reports_invalid_not_expired() {
    let app = spawn_app().await;

    let response = app
        .get_with_cookies("/auth/me", "accessToken=not.a.jwt")
        .await;

    assert_eq!(response.status().as_u16(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "INVALID_ACCESS_TOKEN");
}

#[tokio::test]
async fn me_with_valid_session_returns_identity() {
    let app = spawn_app().await;
    let (access, refresh) = app.login_fresh_user("jdoe", "jdoe@example.com").await;

    let response = app
        .get_with_cookies("/auth/me", &session_header(&access, &refresh))
        .await;

    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["email"], "jdoe@example.com");
    assert_eq!(body["role"], "user");
}

#[tokio::test]
async fn expired_access_token_reports_the_expired_code() {
    let app = spawn_app().await;
    let (_, refresh) = app.login_fresh_user("jdoe", "jdoe@example.com").await;
    let expired = app.expired_access_token("jdoe@example.com").await;

    let response = app
        .get_with_cookies("/auth/me", &session_header(&expired, &refresh))
        .await;

    assert_eq!(response.status().as_u16(), 401);
    let body: Value = response.json().await.unwrap();
    // Distinct from INVALID_ACCESS_TOKEN: this is the code that tells a
    // client a refresh is worth attempting.
    assert_eq!(body["code"], "ACCESS_TOKEN_EXPIRED");
}

#[tokio::test]
async fn refresh_rotates_the_pair_and_invalidates_the_old_token() {
    let app = spawn_app().await;
    let (access, refresh) = app.login_fresh_user("jdoe", "jdoe@example.com").await;

    let response = app
        .post_with_cookies("/auth/refresh", &session_header(&access, &refresh))
        .await;
    assert_eq!(response.status().as_u16(), 200);

    let rotated = set_cookies(&response);
    let new_access = rotated["accessToken"].clone();
    let new_refresh = rotated["refreshToken"].clone();
    assert_ne!(new_refresh, refresh, "Refresh token was not rotated");

    // The new pair works.
    let response = app
        .get_with_cookies("/auth/me", &session_header(&new_access, &new_refresh))
        .await;
    assert_eq!(response.status().as_u16(), 200);

    // The presented refresh token was single-use.
    let response = app
        .post_with_cookies("/auth/refresh", &session_header(&new_access, &refresh))
        .await;
    assert_eq!(response.status().as_u16(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "TOKEN_MISMATCH");
}

#[tokio::test]
async fn refresh_without_cookie_is_unauthorized() {
    let app = spawn_app().await;

    let response = app
        .client
        .post(format!("{}/auth/refresh", app.address))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn forged_refresh_token_reports_mismatch() {
    let app = spawn_app().await;
    app.login_fresh_user("jdoe", "jdoe@example.com").await;

    let response = app
        .post_with_cookies("/auth/refresh", "refreshToken=not.a.jwt")
        .await;

    assert_eq!(response.status().as_u16(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "TOKEN_MISMATCH");
}

#[tokio::test]
async fn logout_clears_the_session() {
    let app = spawn_app().await;
    let (access, refresh) = app.login_fresh_user("jdoe", "jdoe@example.com").await;

    let response = app
        .post_with_cookies("/auth/logout", &session_header(&access, &refresh))
        .await;
    assert_eq!(response.status().as_u16(), 200);

    // Both cookies are rewritten empty with a past expiry.
    let cleared = set_cookies(&response);
    assert_eq!(cleared["accessToken"], "");
    assert_eq!(cleared["refreshToken"], "");

    // The stored hash is gone.
    let user = app
        .repository
        .find_by_email("jdoe@example.com")
        .await
        .unwrap()
        .unwrap();
    assert!(user.refresh_token_hash.is_none());

    // The refresh token is dead.
    let response = app
        .post_with_cookies("/auth/refresh", &session_header(&access, &refresh))
        .await;
    assert_eq!(response.status().as_u16(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "NO_ACTIVE_SESSION");
}

#[tokio::test]
async fn unexpired_access_token_outlives_logout() {
    let app = spawn_app().await;
    let (access, refresh) = app.login_fresh_user("jdoe", "jdoe@example.com").await;

    app.post_with_cookies("/auth/logout", &session_header(&access, &refresh))
        .await;

    // Access tokens are stateless: the not-yet-expired one still passes the
    // guard until it times out.
    let response = app
        .get_with_cookies("/auth/me", &format!("accessToken={}", access))
        .await;
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn role_gates_enforce_membership() {
    let app = spawn_app().await;
    let (access, refresh) = app.login_fresh_user("jdoe", "jdoe@example.com").await;
    let cookies = session_header(&access, &refresh);

    let response = app.get_with_cookies("/auth/admin-only", &cookies).await;
    assert_eq!(response.status().as_u16(), 403);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "FORBIDDEN");

    let response = app.get_with_cookies("/auth/user-only", &cookies).await;
    assert_eq!(response.status().as_u16(), 200);

    let response = app.get_with_cookies("/auth/any-role", &cookies).await;
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn admin_passes_the_admin_gate_but_not_the_user_gate() {
    let app = spawn_app().await;
    let (access, refresh) = app.login_fresh_admin("root", "root@example.com").await;
    let cookies = session_header(&access, &refresh);

    let response = app.get_with_cookies("/auth/admin-only", &cookies).await;
    assert_eq!(response.status().as_u16(), 200);

    let response = app.get_with_cookies("/auth/user-only", &cookies).await;
    assert_eq!(response.status().as_u16(), 403);

    let response = app.get_with_cookies("/auth/any-role", &cookies).await;
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn role_gates_without_a_session_report_unauthorized_not_forbidden() {
    let app = spawn_app().await;

    let response = app
        .client
        .get(format!("{}/auth/admin-only", app.address))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn boundary_auto_refresh_recovers_an_expired_session() {
    let app = spawn_app().await;
    let (_, refresh) = app.login_fresh_user("jdoe", "jdoe@example.com").await;
    let expired = app.expired_access_token("jdoe@example.com").await;

    let response = app
        .get_with_cookies("/api/me", &session_header(&expired, &refresh))
        .await;

    // The request succeeds and the response carries the rotated pair.
    assert_eq!(response.status().as_u16(), 200);
    let rotated = set_cookies(&response);
    let new_refresh = rotated["refreshToken"].clone();
    assert!(!rotated["accessToken"].is_empty());
    assert_ne!(new_refresh, refresh);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["email"], "jdoe@example.com");

    // Rotation consumed the presented refresh token.
    let response = app
        .post_with_cookies("/auth/refresh", &format!("refreshToken={}", refresh))
        .await;
    assert_eq!(response.status().as_u16(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "TOKEN_MISMATCH");
}

#[tokio::test]
async fn auto_refresh_without_refresh_cookie_still_rejects() {
    let app = spawn_app().await;
    app.login_fresh_user("jdoe", "jdoe@example.com").await;
    let expired = app.expired_access_token("jdoe@example.com").await;

    let response = app
        .get_with_cookies("/api/me", &format!("accessToken={}", expired))
        .await;

    assert_eq!(response.status().as_u16(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "ACCESS_TOKEN_EXPIRED");
}

#[tokio::test]
async fn auto_refresh_leaves_valid_sessions_untouched() {
    let app = spawn_app().await;
    let (access, refresh) = app.login_fresh_user("jdoe", "jdoe@example.com").await;

    let response = app
        .get_with_cookies("/api/me", &session_header(&access, &refresh))
        .await;

    assert_eq!(response.status().as_u16(), 200);
    // No rotation happened, so no Set-Cookie headers.
    assert!(set_cookies(&response).is_empty());
}
