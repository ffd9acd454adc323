//! Scheduled removal of idle sessions, expired CSRF tokens and stale lockouts

use anyhow::Result;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info};

use crate::config::{CSRF_SWEEP_SCHEDULE, LOCKOUT_SWEEP_SCHEDULE, SESSION_SWEEP_SCHEDULE};
use crate::coordinator::SecurityCoordinator;

/// Entries removed by one pass over every store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions: usize,
    pub csrf_tokens: usize,
    pub lockouts: usize,
}

/// Periodic cleanup of the in-memory security stores
#[derive(Clone)]
pub struct Sweeper {
    coordinator: Arc<SecurityCoordinator>,
}

impl Sweeper {
    pub fn new(coordinator: Arc<SecurityCoordinator>) -> Self {
        Self { coordinator }
    }

    pub async fn sweep_sessions(&self) -> usize {
        let removed = self.coordinator.sessions().sweep_idle().await;
        if removed > 0 {
            info!("Removed {} idle sessions", removed);
        }
        removed
    }

    pub async fn sweep_csrf_tokens(&self) -> usize {
        let removed = self.coordinator.csrf().sweep_expired().await;
        if removed > 0 {
            info!("Removed {} expired CSRF tokens", removed);
        }
        removed
    }

    pub async fn sweep_lockouts(&self) -> usize {
        let removed = self.coordinator.lockout().sweep_stale().await;
        if removed > 0 {
            info!("Removed {} stale lockout records", removed);
        }
        removed
    }

    /// Sweep every store once
    pub async fn sweep_all(&self) -> SweepReport {
        SweepReport {
            sessions: self.sweep_sessions().await,
            csrf_tokens: self.sweep_csrf_tokens().await,
            lockouts: self.sweep_lockouts().await,
        }
    }

    /// Register the sweep jobs and start the scheduler
    ///
    /// The returned scheduler must be kept alive for the jobs to keep running.
    pub async fn start(&self) -> Result<JobScheduler> {
        let scheduler = JobScheduler::new().await?;

        let sweeper = self.clone();
        let job = Job::new_async(SESSION_SWEEP_SCHEDULE, move |_, _| {
            let sweeper = sweeper.clone();
            Box::pin(async move {
                debug!("Session sweep job executed");
                sweeper.sweep_sessions().await;
            })
        })?;
        scheduler.add(job).await?;

        let sweeper = self.clone();
        let job = Job::new_async(CSRF_SWEEP_SCHEDULE, move |_, _| {
            let sweeper = sweeper.clone();
            Box::pin(async move {
                debug!("CSRF sweep job executed");
                sweeper.sweep_csrf_tokens().await;
            })
        })?;
        scheduler.add(job).await?;

        let sweeper = self.clone();
        let job = Job::new_async(LOCKOUT_SWEEP_SCHEDULE, move |_, _| {
            let sweeper = sweeper.clone();
            Box::pin(async move {
                debug!("Lockout sweep job executed");
                sweeper.sweep_lockouts().await;
            })
        })?;
        scheduler.add(job).await?;

        scheduler.start().await?;

        info!(
            "Started sweep scheduler (sessions: {}, csrf: {}, lockouts: {})",
            SESSION_SWEEP_SCHEDULE, CSRF_SWEEP_SCHEDULE, LOCKOUT_SWEEP_SCHEDULE
        );
        Ok(scheduler)
    }
}
