/// Identity Repository
///
/// The auth components only ever touch the user record through this trait:
/// lookups by id/email, creation, and the single refresh-hash column update.
/// `PgUserRepository` is the production implementation; the in-memory variant
/// backs the integration tests so the server can be exercised without a
/// database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::domain::user::{NewUser, Role, User};
use crate::error::{AppError, AuthError, RepositoryError};

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError>;
    async fn create(&self, new_user: NewUser) -> Result<User, AppError>;
    /// Overwrite the stored refresh-token hash. `None` clears the session.
    async fn set_refresh_token_hash(
        &self,
        id: Uuid,
        hash: Option<String>,
    ) -> Result<(), AppError>;
}

type UserRow = (
    Uuid,
    String,
    String,
    String,
    String,
    Option<String>,
    DateTime<Utc>,
    DateTime<Utc>,
);

fn row_to_user(row: UserRow) -> Result<User, AppError> {
    Ok(User {
        id: row.0,
        username: row.1,
        email: row.2,
        password_hash: row.3,
        role: Role::parse(&row.4)?,
        refresh_token_hash: row.5,
        created_at: row.6,
        updated_at: row.7,
    })
}

/// Postgres-backed identity repository.
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, username, email, password_hash, role, refresh_token_hash,
                   created_at, updated_at
            FROM users WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_user).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, username, email, password_hash, role, refresh_token_hash,
                   created_at, updated_at
            FROM users WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_user).transpose()
    }

    async fn create(&self, new_user: NewUser) -> Result<User, AppError> {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username: new_user.username,
            email: new_user.email,
            password_hash: new_user.password_hash,
            role: new_user.role,
            refresh_token_hash: None,
            created_at: now,
            updated_at: now,
        };

        // The unique constraints on email/username turn races between
        // concurrent signups into a DuplicateIdentity error.
        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, password_hash, role, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(user)
    }

    async fn set_refresh_token_hash(
        &self,
        id: Uuid,
        hash: Option<String>,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE users SET refresh_token_hash = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(&hash)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Auth(AuthError::IdentityNotFound));
        }
        Ok(())
    }
}

/// In-memory identity repository.
///
/// Same visible semantics as the Postgres implementation, including the
/// unsynchronized read-modify-write behavior of the refresh-hash column
/// (last writer wins).
#[derive(Default)]
pub struct InMemoryUserRepository {
    users: Mutex<HashMap<Uuid, User>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, User>>, AppError> {
        self.users
            .lock()
            .map_err(|_| AppError::Internal("User store lock poisoned".to_string()))
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        Ok(self.lock()?.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        Ok(self.lock()?.values().find(|u| u.email == email).cloned())
    }

    async fn create(&self, new_user: NewUser) -> Result<User, AppError> {
        let mut users = self.lock()?;

        if users.values().any(|u| u.email == new_user.email) {
            return Err(AppError::Repository(RepositoryError::DuplicateIdentity(
                "Email already registered".to_string(),
            )));
        }
        if users.values().any(|u| u.username == new_user.username) {
            return Err(AppError::Repository(RepositoryError::DuplicateIdentity(
                "Username already taken".to_string(),
            )));
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username: new_user.username,
            email: new_user.email,
            password_hash: new_user.password_hash,
            role: new_user.role,
            refresh_token_hash: None,
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn set_refresh_token_hash(
        &self,
        id: Uuid,
        hash: Option<String>,
    ) -> Result<(), AppError> {
        let mut users = self.lock()?;
        match users.get_mut(&id) {
            Some(user) => {
                user.refresh_token_hash = hash;
                user.updated_at = Utc::now();
                Ok(())
            }
            None => Err(AppError::Auth(AuthError::IdentityNotFound)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            email: email.to_string(),
            password_hash: "$2b$04$fakefakefakefakefakefake".to_string(),
            role: Role::User,
        }
    }

    #[tokio::test]
    async fn create_and_find_round_trip() {
        let repo = InMemoryUserRepository::new();
        let created = repo.create(new_user("jdoe", "jdoe@example.com")).await.unwrap();

        let by_id = repo.find_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(by_id.email, "jdoe@example.com");
        assert!(by_id.refresh_token_hash.is_none());

        let by_email = repo.find_by_email("jdoe@example.com").await.unwrap().unwrap();
        assert_eq!(by_email.id, created.id);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let repo = InMemoryUserRepository::new();
        repo.create(new_user("jdoe", "jdoe@example.com")).await.unwrap();

        let result = repo.create(new_user("other", "jdoe@example.com")).await;
        assert!(matches!(
            result,
            Err(AppError::Repository(RepositoryError::DuplicateIdentity(_)))
        ));
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let repo = InMemoryUserRepository::new();
        repo.create(new_user("jdoe", "jdoe@example.com")).await.unwrap();

        let result = repo.create(new_user("jdoe", "other@example.com")).await;
        assert!(matches!(
            result,
            Err(AppError::Repository(RepositoryError::DuplicateIdentity(_)))
        ));
    }

    #[tokio::test]
    async fn refresh_hash_update_overwrites_and_clears() {
        let repo = InMemoryUserRepository::new();
        let user = repo.create(new_user("jdoe", "jdoe@example.com")).await.unwrap();

        repo.set_refresh_token_hash(user.id, Some("hash-1".to_string()))
            .await
            .unwrap();
        repo.set_refresh_token_hash(user.id, Some("hash-2".to_string()))
            .await
            .unwrap();
        let stored = repo.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.refresh_token_hash.as_deref(), Some("hash-2"));

        repo.set_refresh_token_hash(user.id, None).await.unwrap();
        let stored = repo.find_by_id(user.id).await.unwrap().unwrap();
        assert!(stored.refresh_token_hash.is_none());
    }

    #[tokio::test]
    async fn refresh_hash_update_for_unknown_identity_fails() {
        let repo = InMemoryUserRepository::new();
        let result = repo.set_refresh_token_hash(Uuid::new_v4(), None).await;
        assert!(matches!(result, Err(AppError::Auth(AuthError::IdentityNotFound))));
    }
}
