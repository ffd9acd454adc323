use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{Level, info, warn};
use tracing_subscriber::EnvFilter;

use auth::{
    AppState,
    audit::TracingAuditSink,
    build_app,
    config::SecurityConfig,
    repositories::{InMemoryUserRepository, PgUserRepository, UserRepository},
    sweeper::Sweeper,
};
use common::{SystemClock, database};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_max_level(Level::INFO)
        .init();

    info!("Starting authentication service");

    let config = SecurityConfig::from_env()?;

    let users: Arc<dyn UserRepository> = match database::DatabaseConfig::from_env_optional() {
        Some(db_config) => {
            let pool = database::init_pool(&db_config).await?;

            if database::health_check(&pool).await? {
                info!("Database connection successful");
            } else {
                anyhow::bail!("Failed to connect to database");
            }

            database::ensure_schema(&pool).await?;
            Arc::new(PgUserRepository::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set, users are kept in memory");
            Arc::new(InMemoryUserRepository::new())
        }
    };

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(
        config,
        users,
        Arc::new(TracingAuditSink),
        Arc::new(SystemClock),
    );

    // Keep the scheduler alive for the lifetime of the server
    let _scheduler = Sweeper::new(state.coordinator.clone()).start().await?;

    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Authentication service listening on {}", bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
