use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use ulid::Ulid;

use crate::engine::Engine;
use crate::model::*;
use crate::notify::{Mailer, cancellation_email};
use crate::observability;
use crate::rules::{self, AutoUpdateResult, TransitionError};
use crate::stats::ClientStatsUpdater;
use crate::store::{ReservationStore, StoreError};

/// Cash reservations still pending this long after creation are cancelled.
pub const CASH_GRACE_DAYS: i64 = 5;

pub const CASH_CANCEL_NOTE: &str =
    "cancelled automatically: cash payment not received within 5 days";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReapedReservation {
    pub id: Ulid,
    pub email: String,
    pub stats_updated: bool,
    pub email_sent: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReapReport {
    pub scanned: usize,
    pub cancelled: Vec<ReapedReservation>,
    pub errors: Vec<TransitionError>,
}

/// Cancels stale unpaid cash reservations and tells the client.
///
/// Runs on its own schedule, independent of the lifecycle rules.
pub struct CashReaper {
    store: Arc<dyn ReservationStore>,
    stats: Arc<dyn ClientStatsUpdater>,
    mailer: Arc<dyn Mailer>,
}

impl CashReaper {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        stats: Arc<dyn ClientStatsUpdater>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            store,
            stats,
            mailer,
        }
    }

    pub async fn reap(&self, now: DateTime<Utc>) -> Result<ReapReport, StoreError> {
        let cutoff = now - chrono::Duration::days(CASH_GRACE_DAYS);
        let filter = ReservationFilter::all()
            .payment_method(PaymentMethod::Cash)
            .status(ReservationStatus::Pending)
            .created_before(cutoff);
        let stale = self.store.select(&filter).await?;

        let mut report = ReapReport {
            scanned: stale.len(),
            ..Default::default()
        };
        for r in stale {
            let note = rules::audit_note(now, CASH_CANCEL_NOTE);
            let patch = ReservationPatch::transition(
                ReservationStatus::Pending,
                ReservationStatus::Cancelled,
                note,
            );
            let cancelled = match self.store.update(r.id, patch).await {
                Ok(cancelled) => cancelled,
                Err(StoreError::StatusMismatch { actual, .. }) => {
                    tracing::debug!(id = %r.id, %actual, "reaper skip: status changed");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(id = %r.id, error = %e, "reaper failed to cancel");
                    report.errors.push(TransitionError {
                        id: r.id,
                        message: e.to_string(),
                    });
                    continue;
                }
            };
            info!("reaped unpaid cash reservation {}", cancelled.id);
            metrics::counter!(observability::REAPER_CANCELLED_TOTAL).increment(1);

            let stats_updated = match self.stats.recompute(&cancelled.contact.email).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(id = %cancelled.id, error = %e, "client stats update failed");
                    false
                }
            };
            let delivery = self
                .mailer
                .send(cancellation_email(&cancelled, CASH_GRACE_DAYS))
                .await;
            if !delivery.success {
                tracing::warn!(id = %cancelled.id, "cancellation email not delivered");
            }
            report.cancelled.push(ReapedReservation {
                id: cancelled.id,
                email: cancelled.contact.email.clone(),
                stats_updated,
                email_sent: delivery.success,
            });
        }
        Ok(report)
    }
}

/// Background task: cash reaper on a fixed interval.
pub async fn run_reaper(reaper: Arc<CashReaper>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        match reaper.reap(Utc::now()).await {
            Ok(report) if !report.cancelled.is_empty() || !report.errors.is_empty() => info!(
                cancelled = report.cancelled.len(),
                errors = report.errors.len(),
                "cash reaper pass"
            ),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "cash reaper could not read reservations"),
        }
    }
}

/// Background task: lifecycle rules on a fixed interval.
pub async fn run_lifecycle(store: Arc<dyn ReservationStore>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let result: Result<AutoUpdateResult, _> =
            rules::run_lifecycle_pass(store.as_ref(), Utc::now()).await;
        if let Err(e) = result {
            tracing::warn!(error = %e, "lifecycle pass could not read reservations");
        }
    }
}

/// Background task: compact the journal once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        if engine.wal_appends_since_compact().await < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted reservation journal"),
            Err(e) => tracing::warn!("compaction failed: {e}"),
        }
    }
}
