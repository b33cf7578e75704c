use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub async fn get_reservation(&self, id: &Ulid) -> Result<Reservation, EngineError> {
        let space_type = self
            .reservation_index
            .get(id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(*id))?;
        let space = self.space(space_type).ok_or(EngineError::NotFound(*id))?;
        let guard = space.read().await;
        guard.get(*id).cloned().ok_or(EngineError::NotFound(*id))
    }

    /// Rows matching `filter`, newest first. A space type or date window narrows the
    /// scan to one partition or one binary-searched slice.
    pub async fn select_reservations(&self, filter: &ReservationFilter) -> Vec<Reservation> {
        let space_types = match filter.space_type {
            Some(t) => vec![t],
            None => self.space_types(),
        };
        let mut rows = Vec::new();
        for space_type in space_types {
            let Some(space) = self.space(space_type) else {
                continue;
            };
            let guard = space.read().await;
            match filter.overlapping {
                Some(window) => rows.extend(
                    guard
                        .overlapping(window)
                        .filter(|r| filter.matches(r))
                        .cloned(),
                ),
                None => rows.extend(
                    guard
                        .reservations
                        .iter()
                        .filter(|r| filter.matches(r))
                        .cloned(),
                ),
            }
        }
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        rows
    }

    /// Pending or confirmed reservations whose stay includes `day`.
    pub async fn active_on(&self, space_type: SpaceType, day: NaiveDate) -> usize {
        let Some(space) = self.space(space_type) else {
            return 0;
        };
        let guard = space.read().await;
        guard
            .overlapping(DateRange { start: day, end: day })
            .filter(|r| r.status.is_active())
            .count()
    }

    pub fn reservation_count(&self) -> usize {
        self.reservation_index.len()
    }
}
