use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{
    check_capacity, validate_amount, validate_contact, validate_notes, validate_stay,
};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    /// Validate, price if needed, and insert under the partition lock.
    /// The capacity check and the write are atomic with respect to other inserts.
    pub async fn create_reservation(
        &self,
        new: NewReservation,
        now: DateTime<Utc>,
    ) -> Result<Reservation, EngineError> {
        let range = validate_stay(new.start_date, new.end_date)?;
        self.catalog().check_occupants(new.space_type, new.occupants)?;
        validate_contact(&new.contact)?;
        validate_notes(new.admin_notes.as_deref())?;
        let amount = match new.amount {
            Some(amount) => {
                validate_amount(amount)?;
                amount
            }
            None => self.catalog().quote(
                new.space_type,
                new.subscription_type,
                &range,
                new.occupants,
            )?,
        };
        let status = new.status.unwrap_or(ReservationStatus::Pending);
        let id = new.id.unwrap_or_else(Ulid::new);

        let space = self
            .space(new.space_type)
            .ok_or_else(|| EngineError::Invalid(format!("no partition for {}", new.space_type)))?;
        let mut guard = space.write().await;
        if self.reservation_index.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_SPACE {
            return Err(EngineError::LimitExceeded("too many reservations for space type"));
        }
        if status != ReservationStatus::Cancelled {
            check_capacity(
                &guard,
                range,
                self.catalog().max_concurrent(new.space_type),
                None,
            )?;
        }

        let reservation = Reservation {
            id,
            space_type: new.space_type,
            occupants: new.occupants,
            start_date: range.start,
            end_date: range.end,
            created_at: now,
            updated_at: now,
            amount,
            payment_method: new.payment_method,
            subscription_type: new.subscription_type,
            status,
            contact: new.contact,
            admin_notes: new.admin_notes,
        };
        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(
            crate::observability::RESERVATIONS_CREATED_TOTAL,
            "space_type" => reservation.space_type.as_str()
        )
        .increment(1);
        Ok(reservation)
    }

    /// Apply a partial update. With `expected_status` set this is a compare-and-set:
    /// nothing is written unless the stored status still matches.
    pub async fn update_reservation(
        &self,
        id: Ulid,
        patch: ReservationPatch,
        now: DateTime<Utc>,
    ) -> Result<Reservation, EngineError> {
        let mut guard = self.resolve_reservation_write(&id).await?;
        let current = guard.get(id).cloned().ok_or(EngineError::NotFound(id))?;

        if let Some(expected) = patch.expected_status
            && current.status != expected
        {
            return Err(EngineError::StatusMismatch {
                id,
                expected,
                actual: current.status,
            });
        }
        if patch.is_empty() {
            return Ok(current);
        }

        let mut next = current.clone();
        if let Some(status) = patch.status {
            next.status = status;
        }
        if let Some(start) = patch.start_date {
            next.start_date = start;
        }
        if let Some(end) = patch.end_date {
            next.end_date = end;
        }
        if let Some(occupants) = patch.occupants {
            self.catalog().check_occupants(next.space_type, occupants)?;
            next.occupants = occupants;
        }
        if let Some(amount) = patch.amount {
            validate_amount(amount)?;
            next.amount = amount;
        }
        if let Some(method) = patch.payment_method {
            next.payment_method = method;
        }
        if let Some(subscription) = patch.subscription_type {
            next.subscription_type = subscription;
        }
        if let Some(notes) = patch.admin_notes {
            validate_notes(Some(&notes))?;
            next.admin_notes = Some(notes);
        }
        if let Some(line) = patch.append_note.as_deref() {
            next.append_note(line);
        }
        let range = validate_stay(next.start_date, next.end_date)?;

        let reactivated = current.status == ReservationStatus::Cancelled
            && next.status != ReservationStatus::Cancelled;
        let moved = range != current.range();
        if next.status != ReservationStatus::Cancelled && (reactivated || moved) {
            check_capacity(
                &guard,
                range,
                self.catalog().max_concurrent(next.space_type),
                Some(id),
            )?;
        }

        next.updated_at = now;
        let event = Event::ReservationUpdated {
            reservation: next.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        if next.status != current.status {
            tracing::debug!("reservation {id}: {} -> {}", current.status, next.status);
        }
        Ok(next)
    }

    pub async fn delete_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let mut guard = self.resolve_reservation_write(&id).await?;
        let current = guard.get(id).cloned().ok_or(EngineError::NotFound(id))?;
        let event = Event::ReservationDeleted {
            id,
            space_type: current.space_type,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(current)
    }

    /// Rewrite the WAL as one create event per live reservation.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();
        for space_type in self.space_types() {
            let Some(space) = self.space(space_type) else {
                continue;
            };
            let guard = space.read().await;
            events.extend(guard.reservations.iter().map(|r| Event::ReservationCreated {
                reservation: r.clone(),
            }));
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
