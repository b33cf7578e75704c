use std::fmt;

use async_trait::async_trait;
use ulid::Ulid;

use crate::model::*;

/// Boundary errors of a reservation store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound(Ulid),
    /// Compare-and-set on `status` failed: the row moved on since it was read.
    StatusMismatch {
        id: Ulid,
        expected: ReservationStatus,
        actual: ReservationStatus,
    },
    /// The write would put more non-cancelled reservations on a day than the space holds.
    CapacityExceeded { space_type: SpaceType, capacity: u32 },
    /// Validation failed; the request itself is wrong.
    Rejected(String),
    /// The store could not be reached or failed mid-operation.
    Unavailable(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "reservation not found: {id}"),
            StoreError::StatusMismatch { id, expected, actual } => write!(
                f,
                "reservation {id} is {actual}, expected {expected}"
            ),
            StoreError::CapacityExceeded { space_type, capacity } => write!(
                f,
                "{space_type} is fully booked for these dates (capacity {capacity})"
            ),
            StoreError::Rejected(msg) => write!(f, "rejected: {msg}"),
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// CRUD over the `reservations` table. Every core component talks to this, never to a
/// concrete backend.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn select(&self, filter: &ReservationFilter) -> Result<Vec<Reservation>, StoreError>;

    async fn insert(&self, new: NewReservation) -> Result<Reservation, StoreError>;

    async fn update(&self, id: Ulid, patch: ReservationPatch) -> Result<Reservation, StoreError>;
}
