use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::model::*;
use crate::store::{ReservationStore, StoreError};

/// Per-client aggregates shown on the admin dashboard. Keyed by lowercase email.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClientStats {
    pub email: String,
    pub full_name: String,
    pub total_reservations: u32,
    pub active_reservations: u32,
    pub completed_reservations: u32,
    pub cancelled_reservations: u32,
    /// Sum of confirmed and completed amounts.
    pub total_spent: i64,
    pub last_reservation_at: Option<DateTime<Utc>>,
}

impl ClientStats {
    pub fn from_reservations(email: &str, rows: &[Reservation]) -> Self {
        let mut stats = ClientStats {
            email: email.to_string(),
            ..Default::default()
        };
        for r in rows {
            stats.total_reservations += 1;
            match r.status {
                ReservationStatus::Pending => stats.active_reservations += 1,
                ReservationStatus::Confirmed => {
                    stats.active_reservations += 1;
                    stats.total_spent += r.amount;
                }
                ReservationStatus::Completed => {
                    stats.completed_reservations += 1;
                    stats.total_spent += r.amount;
                }
                ReservationStatus::Cancelled => stats.cancelled_reservations += 1,
            }
            if stats.last_reservation_at.is_none_or(|t| r.created_at > t) {
                stats.last_reservation_at = Some(r.created_at);
                stats.full_name = r.contact.full_name.clone();
            }
        }
        stats
    }
}

/// Best-effort side effect after a status change. Callers log and swallow failures.
#[async_trait]
pub trait ClientStatsUpdater: Send + Sync {
    async fn recompute(&self, client: &str) -> Result<(), StoreError>;
}

pub struct ClientStatsCache {
    store: Arc<dyn ReservationStore>,
    entries: DashMap<String, ClientStats>,
}

impl ClientStatsCache {
    pub fn new(store: Arc<dyn ReservationStore>) -> Self {
        Self {
            store,
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, email: &str) -> Option<ClientStats> {
        self.entries
            .get(&email.trim().to_lowercase())
            .map(|e| e.value().clone())
    }

    /// Every cached client, most recent activity first.
    pub fn all(&self) -> Vec<ClientStats> {
        let mut rows: Vec<ClientStats> = self.entries.iter().map(|e| e.value().clone()).collect();
        rows.sort_by(|a, b| {
            b.last_reservation_at
                .cmp(&a.last_reservation_at)
                .then_with(|| a.email.cmp(&b.email))
        });
        rows
    }

    /// Rebuild the cache for every client currently in the store.
    pub async fn rebuild(&self) -> Result<usize, StoreError> {
        let rows = self.store.select(&ReservationFilter::all()).await?;
        let mut by_client: std::collections::BTreeMap<String, Vec<Reservation>> =
            std::collections::BTreeMap::new();
        for r in rows {
            by_client
                .entry(r.contact.email.trim().to_lowercase())
                .or_default()
                .push(r);
        }
        self.entries.clear();
        let count = by_client.len();
        for (email, rows) in by_client {
            let stats = ClientStats::from_reservations(&email, &rows);
            self.entries.insert(email, stats);
        }
        Ok(count)
    }
}

#[async_trait]
impl ClientStatsUpdater for ClientStatsCache {
    async fn recompute(&self, client: &str) -> Result<(), StoreError> {
        let key = client.trim().to_lowercase();
        let rows = self
            .store
            .select(&ReservationFilter::all().email(key.clone()))
            .await?;
        if rows.is_empty() {
            self.entries.remove(&key);
        } else {
            let stats = ClientStats::from_reservations(&key, &rows);
            self.entries.insert(key, stats);
        }
        Ok(())
    }
}
