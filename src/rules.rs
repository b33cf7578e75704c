//! Automatic status transitions driven by time.
//!
//! Rules are evaluated in order and the first one whose condition holds decides the
//! reservation's fate for this pass. Terminal reservations are never touched.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use ulid::Ulid;

use crate::model::*;
use crate::observability;
use crate::store::{ReservationStore, StoreError};

/// Pending reservations older than this are cancelled.
pub const PENDING_TIMEOUT: Duration = Duration::days(4);

/// Stays ending within this window of now are considered over.
pub const END_WINDOW: Duration = Duration::hours(12);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleId {
    PendingTimeout,
    ConfirmedCompletion,
    PendingExpiration,
}

impl RuleId {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleId::PendingTimeout => "pending_timeout",
            RuleId::ConfirmedCompletion => "confirmed_completion",
            RuleId::PendingExpiration => "pending_expiration",
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct ReservationRule {
    pub id: RuleId,
    pub condition: fn(&Reservation, DateTime<Utc>) -> bool,
    pub action: ReservationStatus,
    pub reason: &'static str,
}

fn pending_timed_out(r: &Reservation, now: DateTime<Utc>) -> bool {
    r.status == ReservationStatus::Pending && r.created_at <= now - PENDING_TIMEOUT
}

fn confirmed_stay_over(r: &Reservation, now: DateTime<Utc>) -> bool {
    r.status == ReservationStatus::Confirmed && r.end_instant() <= now + END_WINDOW
}

fn pending_expired(r: &Reservation, now: DateTime<Utc>) -> bool {
    r.status == ReservationStatus::Pending && r.end_instant() <= now + END_WINDOW
}

pub static RULES: [ReservationRule; 3] = [
    ReservationRule {
        id: RuleId::PendingTimeout,
        condition: pending_timed_out,
        action: ReservationStatus::Cancelled,
        reason: "pending for more than 4 days after creation",
    },
    ReservationRule {
        id: RuleId::ConfirmedCompletion,
        condition: confirmed_stay_over,
        action: ReservationStatus::Completed,
        reason: "stay period elapsed",
    },
    ReservationRule {
        id: RuleId::PendingExpiration,
        condition: pending_expired,
        action: ReservationStatus::Cancelled,
        reason: "deadline exceeded (12h before end date) while still pending",
    },
];

/// The rule that fires for `r` at `now`, if any.
pub fn matching_rule(r: &Reservation, now: DateTime<Utc>) -> Option<&'static ReservationRule> {
    if r.status.is_terminal() {
        return None;
    }
    RULES
        .iter()
        .find(|rule| (rule.condition)(r, now))
        .filter(|rule| rule.action != r.status)
}

pub fn audit_note(now: DateTime<Utc>, reason: &str) -> String {
    format!("[auto {} UTC] {reason}", now.format("%Y-%m-%d %H:%M:%S"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionError {
    pub id: Ulid,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AutoUpdateResult {
    pub updated: usize,
    pub cancelled: usize,
    pub completed: usize,
    pub errors: Vec<TransitionError>,
    pub pending_timeouts: Vec<Ulid>,
    pub completions: Vec<Ulid>,
    pub expirations: Vec<Ulid>,
}

impl AutoUpdateResult {
    fn record(&mut self, rule: RuleId, id: Ulid, to: ReservationStatus) {
        self.updated += 1;
        match to {
            ReservationStatus::Cancelled => self.cancelled += 1,
            ReservationStatus::Completed => self.completed += 1,
            _ => {}
        }
        match rule {
            RuleId::PendingTimeout => self.pending_timeouts.push(id),
            RuleId::ConfirmedCompletion => self.completions.push(id),
            RuleId::PendingExpiration => self.expirations.push(id),
        }
    }
}

/// Outcome of one attempted transition.
#[derive(Debug)]
pub enum TransitionOutcome {
    Applied,
    /// Somebody else moved the reservation first. Not an error.
    Superseded,
}

/// Writes a status transition for the rule engine.
#[async_trait]
pub trait Transitioner: Send + Sync {
    async fn transition(
        &self,
        reservation: &Reservation,
        to: ReservationStatus,
        note: String,
    ) -> Result<TransitionOutcome, StoreError>;
}

#[async_trait]
impl<S: ReservationStore + ?Sized> Transitioner for S {
    async fn transition(
        &self,
        reservation: &Reservation,
        to: ReservationStatus,
        note: String,
    ) -> Result<TransitionOutcome, StoreError> {
        let patch = ReservationPatch::transition(reservation.status, to, note);
        match self.update(reservation.id, patch).await {
            Ok(_) => Ok(TransitionOutcome::Applied),
            Err(StoreError::StatusMismatch { .. }) => Ok(TransitionOutcome::Superseded),
            Err(e) => Err(e),
        }
    }
}

/// Evaluate every reservation and issue at most one transition each. A failed write is
/// recorded and the pass moves on.
pub async fn apply_rules<T: Transitioner + ?Sized>(
    reservations: &[Reservation],
    now: DateTime<Utc>,
    transitioner: &T,
) -> AutoUpdateResult {
    let mut result = AutoUpdateResult::default();
    for r in reservations {
        let Some(rule) = matching_rule(r, now) else {
            continue;
        };
        let note = audit_note(now, rule.reason);
        match transitioner.transition(r, rule.action, note).await {
            Ok(TransitionOutcome::Applied) => {
                tracing::info!(id = %r.id, rule = %rule.id, "{} -> {}", r.status, rule.action);
                metrics::counter!(
                    observability::LIFECYCLE_TRANSITIONS_TOTAL,
                    "rule" => rule.id.as_str()
                )
                .increment(1);
                result.record(rule.id, r.id, rule.action);
            }
            Ok(TransitionOutcome::Superseded) => {
                tracing::debug!(id = %r.id, rule = %rule.id, "skipped, status changed concurrently");
            }
            Err(e) => {
                tracing::warn!(id = %r.id, rule = %rule.id, error = %e, "transition failed");
                metrics::counter!(observability::LIFECYCLE_ERRORS_TOTAL).increment(1);
                result.errors.push(TransitionError {
                    id: r.id,
                    message: e.to_string(),
                });
            }
        }
    }
    result
}

/// Snapshot every pending or confirmed reservation and apply the rules to it.
pub async fn run_lifecycle_pass(
    store: &dyn ReservationStore,
    now: DateTime<Utc>,
) -> Result<AutoUpdateResult, StoreError> {
    let filter = ReservationFilter::all()
        .status_in(&[ReservationStatus::Pending, ReservationStatus::Confirmed]);
    let snapshot = store.select(&filter).await?;
    let result = apply_rules(&snapshot, now, store).await;
    if result.updated > 0 || !result.errors.is_empty() {
        tracing::info!(
            scanned = snapshot.len(),
            updated = result.updated,
            errors = result.errors.len(),
            "lifecycle pass finished"
        );
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::catalog::SpaceCatalog;
    use crate::engine::Engine;
    use crate::model::fixtures::*;

    /// Records transitions, failing for ids in `fail`.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(Ulid, ReservationStatus, String)>>,
        fail: Vec<Ulid>,
    }

    #[async_trait]
    impl Transitioner for Recorder {
        async fn transition(
            &self,
            reservation: &Reservation,
            to: ReservationStatus,
            note: String,
        ) -> Result<TransitionOutcome, StoreError> {
            if self.fail.contains(&reservation.id) {
                return Err(StoreError::Unavailable("timeout".into()));
            }
            self.calls.lock().unwrap().push((reservation.id, to, note));
            Ok(TransitionOutcome::Applied)
        }
    }

    fn pending_office(created_at: &str) -> Reservation {
        reservation(
            SpaceType::PrivateOffice,
            ReservationStatus::Pending,
            "2024-03-01",
            "2024-03-05",
            created_at,
        )
    }

    #[test]
    fn pending_timeout_boundary() {
        let r = pending_office("2024-02-20T10:00:00Z");
        let just_before = instant("2024-02-24T09:59:59Z");
        let exactly = instant("2024-02-24T10:00:00Z");
        assert!(matching_rule(&r, just_before).is_none());
        assert_eq!(matching_rule(&r, exactly).unwrap().id, RuleId::PendingTimeout);
    }

    #[test]
    fn example_office_timeout() {
        let r = pending_office("2024-02-20T10:00:00Z");
        let rule = matching_rule(&r, instant("2024-02-25T11:00:00Z")).unwrap();
        assert_eq!(rule.action, ReservationStatus::Cancelled);
        assert!(rule.reason.contains("4 days"));
    }

    #[test]
    fn confirmed_completes_twelve_hours_before_end() {
        let r = reservation(
            SpaceType::Coworking,
            ReservationStatus::Confirmed,
            "2024-03-01",
            "2024-03-05",
            "2024-02-20T10:00:00Z",
        );
        assert!(matching_rule(&r, instant("2024-03-04T11:59:59Z")).is_none());
        let rule = matching_rule(&r, instant("2024-03-04T12:00:00Z")).unwrap();
        assert_eq!(rule.id, RuleId::ConfirmedCompletion);
        assert_eq!(rule.action, ReservationStatus::Completed);
    }

    #[test]
    fn pending_expiration_when_recent_but_ending() {
        // Created two days ago, so the timeout rule does not apply yet
        let r = pending_office("2024-03-02T13:00:00Z");
        let rule = matching_rule(&r, instant("2024-03-04T13:00:00Z")).unwrap();
        assert_eq!(rule.id, RuleId::PendingExpiration);
    }

    #[test]
    fn timeout_wins_over_expiration() {
        let r = pending_office("2024-02-01T00:00:00Z");
        let rule = matching_rule(&r, instant("2024-03-10T00:00:00Z")).unwrap();
        assert_eq!(rule.id, RuleId::PendingTimeout);
    }

    #[test]
    fn terminal_statuses_never_match() {
        for status in [ReservationStatus::Cancelled, ReservationStatus::Completed] {
            let mut r = pending_office("2020-01-01T00:00:00Z");
            r.status = status;
            assert!(matching_rule(&r, instant("2030-01-01T00:00:00Z")).is_none());
        }
    }

    #[test]
    fn audit_note_format() {
        assert_eq!(
            audit_note(instant("2024-02-25T11:00:00Z"), "stay period elapsed"),
            "[auto 2024-02-25 11:00:00 UTC] stay period elapsed"
        );
    }

    #[tokio::test]
    async fn apply_rules_collects_failures_and_continues() {
        let now = instant("2024-03-10T00:00:00Z");
        let a = pending_office("2024-02-01T00:00:00Z");
        let b = pending_office("2024-02-02T00:00:00Z");
        let mut c = pending_office("2024-02-03T00:00:00Z");
        c.status = ReservationStatus::Confirmed;
        let untouched = reservation(
            SpaceType::Coworking,
            ReservationStatus::Confirmed,
            "2024-04-01",
            "2024-04-05",
            "2024-03-09T00:00:00Z",
        );
        let recorder = Recorder {
            fail: vec![b.id],
            ..Default::default()
        };

        let result = apply_rules(&[a.clone(), b.clone(), c.clone(), untouched], now, &recorder).await;
        assert_eq!(result.updated, 2);
        assert_eq!(result.cancelled, 1);
        assert_eq!(result.completed, 1);
        assert_eq!(result.pending_timeouts, vec![a.id]);
        assert_eq!(result.completions, vec![c.id]);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].id, b.id);
        let calls = recorder.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].2.starts_with("[auto 2024-03-10 00:00:00 UTC]"));
    }

    #[tokio::test]
    async fn lifecycle_pass_is_idempotent() {
        let dir = std::env::temp_dir().join("reservd_test_rules");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("idempotent.wal");
        let _ = std::fs::remove_file(&path);
        let engine = Arc::new(Engine::new(path, Arc::new(SpaceCatalog::default())).unwrap());

        let created = instant("2024-02-20T10:00:00Z");
        let stale = engine
            .create_reservation(
                new_reservation(SpaceType::PrivateOffice, "2024-03-01", "2024-03-05"),
                created,
            )
            .await
            .unwrap();
        let fresh = engine
            .create_reservation(
                new_reservation(SpaceType::Coworking, "2024-04-01", "2024-04-05"),
                instant("2024-02-25T10:00:00Z"),
            )
            .await
            .unwrap();

        let now = instant("2024-02-25T11:00:00Z");
        let first = run_lifecycle_pass(engine.as_ref(), now).await.unwrap();
        assert_eq!(first.updated, 1);
        assert_eq!(first.pending_timeouts, vec![stale.id]);

        let second = run_lifecycle_pass(engine.as_ref(), now).await.unwrap();
        assert_eq!(second, AutoUpdateResult::default());

        let stored = engine.get_reservation(&stale.id).await.unwrap();
        assert_eq!(stored.status, ReservationStatus::Cancelled);
        assert_eq!(stored.admin_notes.as_deref().map(|n| n.lines().count()), Some(1));
        assert_eq!(
            engine.get_reservation(&fresh.id).await.unwrap().status,
            ReservationStatus::Pending
        );
    }

    #[tokio::test]
    async fn timeout_proceeds_when_notes_are_full() {
        let dir = std::env::temp_dir().join("reservd_test_rules");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("full_notes.wal");
        let _ = std::fs::remove_file(&path);
        let engine = Engine::new(path, Arc::new(SpaceCatalog::default())).unwrap();

        let mut new = new_reservation(SpaceType::PrivateOffice, "2024-03-01", "2024-03-05");
        new.admin_notes = Some("n".repeat(crate::limits::MAX_NOTES_LEN));
        let r = engine
            .create_reservation(new, instant("2024-02-20T10:00:00Z"))
            .await
            .unwrap();

        let result = run_lifecycle_pass(&engine, instant("2024-02-25T11:00:00Z"))
            .await
            .unwrap();
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        assert_eq!(result.pending_timeouts, vec![r.id]);

        let stored = engine.get_reservation(&r.id).await.unwrap();
        assert_eq!(stored.status, ReservationStatus::Cancelled);
        let notes = stored.admin_notes.unwrap();
        assert!(notes.len() <= crate::limits::MAX_NOTES_LEN);
        assert!(notes.starts_with("[auto 2024-02-25 11:00:00 UTC]"));
    }

    #[tokio::test]
    async fn superseded_transition_is_not_an_error() {
        let dir = std::env::temp_dir().join("reservd_test_rules");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("superseded.wal");
        let _ = std::fs::remove_file(&path);
        let engine = Engine::new(path, Arc::new(SpaceCatalog::default())).unwrap();

        let r = engine
            .create_reservation(
                new_reservation(SpaceType::PrivateOffice, "2024-03-01", "2024-03-05"),
                instant("2024-02-20T10:00:00Z"),
            )
            .await
            .unwrap();
        // An admin confirms after the snapshot was taken
        engine
            .update_reservation(
                r.id,
                ReservationPatch {
                    status: Some(ReservationStatus::Confirmed),
                    ..Default::default()
                },
                instant("2024-02-25T10:59:00Z"),
            )
            .await
            .unwrap();

        let result = apply_rules(&[r.clone()], instant("2024-02-25T11:00:00Z"), &engine).await;
        assert_eq!(result.updated, 0);
        assert!(result.errors.is_empty());
        assert_eq!(
            engine.get_reservation(&r.id).await.unwrap().status,
            ReservationStatus::Confirmed
        );
    }
}
