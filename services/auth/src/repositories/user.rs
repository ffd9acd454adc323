//! User repository for principal storage

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::DatabaseError;
use sqlx::PgPool;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::models::{NewUser, User};

/// Storage of principal records
#[async_trait]
pub trait UserRepository: Send + Sync + Debug {
    /// Create a new user
    async fn create(&self, new_user: &NewUser) -> Result<User>;

    /// Find a user by email, case-insensitively
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Find a user by ID
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;

    /// Replace the password hash and history in one write
    async fn update_password(&self, id: Uuid, password_hash: &str, history: &[String])
    -> Result<()>;

    /// Stamp the last successful login
    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Enable or disable a user, returning false if it does not exist
    async fn set_active(&self, id: Uuid, active: bool) -> Result<bool>;

    /// Change the role of a user, returning false if it does not exist
    async fn update_role(&self, id: Uuid, role: &str) -> Result<bool>;
}

const USER_COLUMNS: &str = "id, email, password_hash, role, password_history, is_active, \
                            last_login_at, created_at, updated_at";

/// PostgreSQL-backed user repository
#[derive(Debug, Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    /// Create a new user repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, new_user: &NewUser) -> Result<User> {
        info!("Creating new user: {}", new_user.email);

        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, email, password_hash, role)
            VALUES ($1, $2, $3, $4)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(new_user.email.to_lowercase())
        .bind(&new_user.password_hash)
        .bind(&new_user.role)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1)"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let user =
            sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DatabaseError::Query)?;

        Ok(user)
    }

    async fn update_password(
        &self,
        id: Uuid,
        password_hash: &str,
        history: &[String],
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $2, password_history = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .bind(history)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE users SET last_login_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::Query)?;

        Ok(())
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<bool> {
        let result =
            sqlx::query("UPDATE users SET is_active = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(active)
                .execute(&self.pool)
                .await
                .map_err(DatabaseError::Query)?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_role(&self, id: Uuid, role: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET role = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(role)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::Query)?;

        Ok(result.rows_affected() > 0)
    }
}

/// In-memory user repository, used when no database is configured and in tests
#[derive(Debug, Clone, Default)]
pub struct InMemoryUserRepository {
    users: Arc<RwLock<HashMap<Uuid, User>>>,
}

impl InMemoryUserRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn create(&self, new_user: &NewUser) -> Result<User> {
        let email = new_user.email.to_lowercase();
        let mut users = self.users.write().await;

        if users.values().any(|u| u.email == email) {
            anyhow::bail!("User with email {} already exists", email);
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email,
            password_hash: new_user.password_hash.clone(),
            role: new_user.role.clone(),
            password_history: new_user.password_hash.iter().cloned().collect(),
            is_active: true,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id, user.clone());

        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = email.to_lowercase();
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn update_password(
        &self,
        id: Uuid,
        password_hash: &str,
        history: &[String],
    ) -> Result<()> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("User {} not found", id))?;

        user.password_hash = Some(password_hash.to_string());
        user.password_history = history.to_vec();
        user.updated_at = Utc::now();

        Ok(())
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        if let Some(user) = self.users.write().await.get_mut(&id) {
            user.last_login_at = Some(at);
        }
        Ok(())
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<bool> {
        match self.users.write().await.get_mut(&id) {
            Some(user) => {
                user.is_active = active;
                user.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_role(&self, id: Uuid, role: &str) -> Result<bool> {
        match self.users.write().await.get_mut(&id) {
            Some(user) => {
                user.role = role.to_string();
                user.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
