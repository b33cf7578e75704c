use async_trait::async_trait;
use chrono::Utc;
use ulid::Ulid;

use crate::model::*;
use crate::store::{ReservationStore, StoreError};

use super::{Engine, EngineError};

impl From<EngineError> for StoreError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NotFound(id) => StoreError::NotFound(id),
            EngineError::StatusMismatch {
                id,
                expected,
                actual,
            } => StoreError::StatusMismatch {
                id,
                expected,
                actual,
            },
            EngineError::Conflict { space_type, .. } => StoreError::CapacityExceeded {
                space_type,
                capacity: 1,
            },
            EngineError::CapacityExceeded {
                space_type,
                capacity,
            } => StoreError::CapacityExceeded {
                space_type,
                capacity,
            },
            EngineError::WalError(msg) => StoreError::Unavailable(msg),
            other @ (EngineError::AlreadyExists(_)
            | EngineError::Invalid(_)
            | EngineError::Catalog(_)
            | EngineError::LimitExceeded(_)) => StoreError::Rejected(other.to_string()),
        }
    }
}

#[async_trait]
impl ReservationStore for Engine {
    async fn select(&self, filter: &ReservationFilter) -> Result<Vec<Reservation>, StoreError> {
        Ok(self.select_reservations(filter).await)
    }

    async fn insert(&self, new: NewReservation) -> Result<Reservation, StoreError> {
        Ok(self.create_reservation(new, Utc::now()).await?)
    }

    async fn update(&self, id: Ulid, patch: ReservationPatch) -> Result<Reservation, StoreError> {
        Ok(self.update_reservation(id, patch, Utc::now()).await?)
    }
}
