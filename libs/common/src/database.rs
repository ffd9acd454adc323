//! Database module for handling PostgreSQL connections
//!
//! This module provides connection pooling, configuration, schema bootstrap
//! and health checks for the PostgreSQL database that stores principals.

use crate::error::{DatabaseError, DatabaseResult};
use sqlx::{
    PgPool, Pool, Postgres,
    postgres::{PgConnectOptions, PgPoolOptions},
};
use std::env;
use std::time::Duration;
use tracing::{error, info};

/// Database configuration struct
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database connection URL
    pub database_url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    pub min_connections: u32,
    /// Connection timeout in seconds
    pub connection_timeout: u64,
}

impl DatabaseConfig {
    /// Create a new DatabaseConfig from environment variables
    ///
    /// # Environment Variables
    /// - `DATABASE_URL`: PostgreSQL connection URL (required)
    /// - `DATABASE_MAX_CONNECTIONS`: Maximum number of connections (default: 10)
    /// - `DATABASE_MIN_CONNECTIONS`: Minimum number of connections (default: 1)
    /// - `DATABASE_CONNECTION_TIMEOUT`: Connection timeout in seconds (default: 30)
    pub fn from_env() -> DatabaseResult<Self> {
        let database_url = env::var("DATABASE_URL").map_err(|_| {
            DatabaseError::Configuration("DATABASE_URL environment variable not set".to_string())
        })?;

        let max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        let min_connections = env::var("DATABASE_MIN_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1);

        let connection_timeout = env::var("DATABASE_CONNECTION_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        Ok(Self {
            database_url,
            max_connections,
            min_connections,
            connection_timeout,
        })
    }

    /// Like [`DatabaseConfig::from_env`], but `None` when `DATABASE_URL` is unset
    pub fn from_env_optional() -> Option<Self> {
        Self::from_env().ok()
    }
}

/// Initialize a PostgreSQL connection pool
///
/// # Arguments
///
/// * `config` - Database configuration
///
/// # Returns
///
/// * `DatabaseResult<Pool<Postgres>>` - PostgreSQL connection pool or error
pub async fn init_pool(config: &DatabaseConfig) -> DatabaseResult<Pool<Postgres>> {
    info!("Initializing database connection pool");

    let options = config
        .database_url
        .parse::<PgConnectOptions>()
        .map_err(|e| DatabaseError::Configuration(format!("Invalid database URL: {}", e)))?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connection_timeout))
        .connect_with(options)
        .await
        .map_err(DatabaseError::Connection)?;

    info!("Database connection pool initialized successfully");
    Ok(pool)
}

/// Create the principal table if it does not exist yet
pub async fn ensure_schema(pool: &PgPool) -> DatabaseResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id UUID PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT,
            role TEXT NOT NULL,
            password_history TEXT[] NOT NULL DEFAULT '{}',
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            last_login_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::Migration(e.to_string()))?;

    Ok(())
}

/// Check database connectivity
///
/// # Arguments
///
/// * `pool` - PostgreSQL connection pool
///
/// # Returns
///
/// * `DatabaseResult<bool>` - True if connection is successful, false otherwise
pub async fn health_check(pool: &PgPool) -> DatabaseResult<bool> {
    match sqlx::query("SELECT 1").execute(pool).await {
        Ok(_) => Ok(true),
        Err(e) => {
            error!("Database health check failed: {}", e);
            Ok(false)
        }
    }
}
