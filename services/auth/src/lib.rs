//! Authentication security service
//!
//! Sessions, login lockout, CSRF protection and password policy behind an
//! axum router.

pub mod audit;
pub mod config;
pub mod coordinator;
pub mod csrf;
pub mod error;
pub mod jwt;
pub mod lockout;
pub mod middleware;
pub mod models;
pub mod password_policy;
pub mod repositories;
pub mod routes;
pub mod session;
pub mod sweeper;

use std::sync::Arc;

use axum::Router;
use common::SharedClock;

use crate::audit::AuditSink;
use crate::config::SecurityConfig;
use crate::coordinator::SecurityCoordinator;
use crate::repositories::UserRepository;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<SecurityCoordinator>,
    pub config: Arc<SecurityConfig>,
}

impl AppState {
    pub fn new(
        config: SecurityConfig,
        users: Arc<dyn UserRepository>,
        audit: Arc<dyn AuditSink>,
        clock: SharedClock,
    ) -> Self {
        let coordinator = SecurityCoordinator::new(config.clone(), users, audit, clock);
        Self {
            coordinator: Arc::new(coordinator),
            config: Arc::new(config),
        }
    }
}

/// Build the HTTP application
pub fn build_app(state: AppState) -> Router {
    routes::create_router(state)
}
