//! Time-driven transitions
//!
//! One pass starts every UPCOMING competition whose start date has passed and
//! completes every ACTIVE one whose end date has passed. A failing record is
//! logged and skipped.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::CompetitionLifecycleManager;
use crate::error::Result;
use crate::models::{CompetitionFilter, CompetitionStatus};

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub started: Vec<Uuid>,
    pub completed: Vec<Uuid>,
    pub failed: usize,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.completed.is_empty() && self.failed == 0
    }
}

impl CompetitionLifecycleManager {
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        self.reconcile_at(self.now()).await
    }

    /// Listing failures abort the pass; per-competition failures do not
    pub async fn reconcile_at(&self, now: DateTime<Utc>) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        let upcoming = self
            .list(&CompetitionFilter::by_status(CompetitionStatus::Upcoming))
            .await?;
        for c in upcoming.iter().filter(|c| now >= c.start_date) {
            match self.start_at(c.id, now).await {
                Ok(_) => report.started.push(c.id),
                Err(e) => {
                    error!("Failed to start competition {}: {}", c.id, e);
                    report.failed += 1;
                }
            }
        }

        let active = self
            .list(&CompetitionFilter::by_status(CompetitionStatus::Active))
            .await?;
        for c in active.iter().filter(|c| now >= c.end_date) {
            match self.complete_at(c.id, now).await {
                Ok(_) => report.completed.push(c.id),
                Err(e) => {
                    error!("Failed to complete competition {}: {}", c.id, e);
                    report.failed += 1;
                }
            }
        }

        if report.is_empty() {
            debug!("Reconciliation pass: nothing to do");
        } else {
            info!(
                "Reconciliation pass: {} started, {} completed, {} failed",
                report.started.len(),
                report.completed.len(),
                report.failed
            );
        }
        Ok(report)
    }
}

/// Spawn the periodic reconciliation task
pub fn run_reconciliation_loop(
    manager: Arc<CompetitionLifecycleManager>,
    period: Duration,
    initial_delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(initial_delay).await;

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = manager.reconcile().await {
                error!("Reconciliation pass failed: {}", e);
            }
        }
    })
}
