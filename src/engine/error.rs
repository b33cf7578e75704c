use ulid::Ulid;

use crate::catalog::CatalogError;
use crate::model::{ReservationStatus, SpaceType};

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Single-occupancy space already taken by `with` on an overlapping day.
    Conflict { space_type: SpaceType, with: Ulid },
    CapacityExceeded { space_type: SpaceType, capacity: u32 },
    StatusMismatch {
        id: Ulid,
        expected: ReservationStatus,
        actual: ReservationStatus,
    },
    Invalid(String),
    Catalog(CatalogError),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Conflict { space_type, with } => {
                write!(f, "{space_type} already reserved by {with} on overlapping dates")
            }
            EngineError::CapacityExceeded { space_type, capacity } => {
                write!(f, "{space_type} capacity {capacity} exceeded: all places taken")
            }
            EngineError::StatusMismatch { id, expected, actual } => {
                write!(f, "reservation {id} is {actual}, expected {expected}")
            }
            EngineError::Invalid(msg) => write!(f, "invalid reservation: {msg}"),
            EngineError::Catalog(e) => write!(f, "{e}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<CatalogError> for EngineError {
    fn from(e: CatalogError) -> Self {
        EngineError::Catalog(e)
    }
}
