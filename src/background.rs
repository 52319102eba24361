//! Server-side timers.
//!
//! The auto-assign loop replaces the per-page timers: one process-wide
//! timer, with jitter, that only acts while auto-assignment is enabled.
//! The reconcile loop periodically repairs broken token/desk links and
//! purges finished tokens past their retention window.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, NaiveDate, Utc};
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::config::PollConfig;
use crate::service::QueueService;

fn jittered(base: Duration, jitter_ms: u64) -> Duration {
    if jitter_ms == 0 {
        return base;
    }
    base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
}

/// First day whose finished tokens are kept.
fn retention_cutoff(today: NaiveDate, retention_days: u64) -> Option<NaiveDate> {
    today.checked_sub_days(Days::new(retention_days))
}

/// Periodically hands waiting tokens to free desks.
pub struct AutoAssignLoop {
    service: Arc<QueueService>,
    poll: PollConfig,
    shutdown: CancellationToken,
}

impl AutoAssignLoop {
    pub fn new(service: Arc<QueueService>, poll: PollConfig, shutdown: CancellationToken) -> Self {
        Self {
            service,
            poll,
            shutdown,
        }
    }

    /// One tick: check the global switch, then run a pass unless one is
    /// already in flight. Returns how many tokens were assigned.
    pub async fn tick(&self) -> usize {
        match self.service.settings().await {
            Ok(settings) if !settings.auto_assign_enabled => return 0,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read settings, skipping auto-assign");
                return 0;
            }
        }

        match self.service.try_auto_assign().await {
            Ok(Some(assignments)) => {
                if !assignments.is_empty() {
                    tracing::debug!(count = assignments.len(), "Auto-assign pass finished");
                }
                assignments.len()
            }
            Ok(None) => 0,
            Err(e) => {
                tracing::warn!(error = %e, "Auto-assign pass failed");
                0
            }
        }
    }

    pub async fn run(self) {
        tracing::info!(
            interval_ms = self.poll.auto_assign_interval_ms,
            jitter_ms = self.poll.poll_jitter_ms,
            "Auto-assign loop started"
        );

        loop {
            let delay = jittered(self.poll.auto_assign_interval(), self.poll.poll_jitter_ms);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    self.tick().await;
                }
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Auto-assign loop received shutdown signal");
                    return;
                }
            }
        }
    }
}

/// Periodically repairs tokens and desks that no longer point at each other.
pub struct ReconcileLoop {
    service: Arc<QueueService>,
    interval: Duration,
    /// `None` keeps finished tokens forever
    retention_days: Option<u64>,
    shutdown: CancellationToken,
}

impl ReconcileLoop {
    pub fn new(service: Arc<QueueService>, interval: Duration, shutdown: CancellationToken) -> Self {
        Self {
            service,
            interval,
            retention_days: None,
            shutdown,
        }
    }

    pub fn with_retention_days(mut self, days: u64) -> Self {
        self.retention_days = Some(days);
        self
    }

    /// One sweep: repair links, then drop paid and cancelled tokens older
    /// than the retention window.
    pub async fn sweep(&self) {
        match self.service.reconcile().await {
            Ok(repaired) if !repaired.is_empty() => {
                tracing::warn!(count = repaired.len(), "Reconcile sweep repaired rows");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Reconcile sweep failed"),
        }

        let today = Utc::now().date_naive();
        let Some(cutoff) = self
            .retention_days
            .and_then(|days| retention_cutoff(today, days))
        else {
            return;
        };
        if let Err(e) = self.service.purge_finished(cutoff).await {
            tracing::warn!(error = %e, "Purging finished tokens failed");
        }
    }

    pub async fn run(self) {
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            retention_days = ?self.retention_days,
            "Reconcile loop started"
        );
        let mut interval = tokio::time::interval(self.interval);
        // The first tick completes immediately; sweep once on startup
        loop {
            tokio::select! {
                _ = interval.tick() => self.sweep().await,
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Reconcile loop received shutdown signal");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_in_bounds() {
        let base = Duration::from_millis(100);
        for _ in 0..100 {
            let d = jittered(base, 50);
            assert!(d >= base && d <= base + Duration::from_millis(50));
        }
        assert_eq!(jittered(base, 0), base);
    }

    #[test]
    fn retention_cutoff_counts_back_from_today() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        assert_eq!(retention_cutoff(today, 0), Some(today));
        assert_eq!(
            retention_cutoff(today, 7),
            NaiveDate::from_ymd_opt(2024, 3, 3)
        );
        assert_eq!(retention_cutoff(NaiveDate::MIN, 1), None);
    }
}
