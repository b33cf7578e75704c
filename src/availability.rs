//! Date-range availability for a space type, with alternative ranges on rejection.
//!
//! Every check reads a fresh snapshot from the store. Input problems come back as an
//! unavailable result, and a store failure comes back as a degraded "available" result:
//! nothing here returns an error to the caller.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use ulid::Ulid;

use crate::catalog::SpaceCatalog;
use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::store::ReservationStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailabilityResult {
    pub is_available: bool,
    pub message: String,
    pub suggested_dates: Vec<DateRange>,
    pub conflicts: Vec<Ulid>,
    /// Set when the store could not be read and the answer is a fail-open guess.
    pub degraded: bool,
}

impl AvailabilityResult {
    fn rejected(message: String) -> Self {
        Self {
            is_available: false,
            message,
            suggested_dates: Vec::new(),
            conflicts: Vec::new(),
            degraded: false,
        }
    }

    fn fail_open(message: String) -> Self {
        Self {
            is_available: true,
            message,
            suggested_dates: Vec::new(),
            conflicts: Vec::new(),
            degraded: true,
        }
    }
}

/// Non-cancelled reservations overlapping `range`.
pub fn conflict_set(reservations: &[Reservation], range: DateRange) -> Vec<&Reservation> {
    reservations
        .iter()
        .filter(|r| r.status != ReservationStatus::Cancelled && r.range().overlaps(&range))
        .collect()
}

/// Same-length ranges after `requested` with room left, scanning forward from the day
/// after its end in steps of its length. Stops at `MAX_SUGGESTIONS` hits or once a
/// candidate would start more than `SUGGESTION_LOOKAHEAD_DAYS` past the requested end.
pub fn suggest_alternatives(
    reservations: &[Reservation],
    requested: DateRange,
    capacity: u32,
) -> Vec<DateRange> {
    let step = requested.duration_days().max(0) as u64 + 1;
    let horizon = requested
        .end
        .checked_add_days(chrono::Days::new(SUGGESTION_LOOKAHEAD_DAYS as u64));
    let mut suggestions = Vec::new();
    let mut offset = step;
    while suggestions.len() < MAX_SUGGESTIONS {
        let Some(candidate) = requested.shifted(offset) else {
            break;
        };
        if horizon.is_none_or(|h| candidate.start > h) {
            break;
        }
        if conflict_set(reservations, candidate).len() < capacity as usize {
            suggestions.push(candidate);
        }
        offset += step;
    }
    suggestions
}

/// Decide a request against an already loaded snapshot of one space type.
pub fn evaluate(
    reservations: &[Reservation],
    space_type: SpaceType,
    requested: DateRange,
    capacity: u32,
) -> AvailabilityResult {
    let conflicts = conflict_set(reservations, requested);
    let taken = conflicts.len();
    if taken < capacity as usize {
        let message = if capacity <= 1 {
            format!("{space_type} is available from {} to {}", requested.start, requested.end)
        } else {
            format!(
                "{space_type} is available from {} to {} ({} of {capacity} places left)",
                requested.start,
                requested.end,
                capacity as usize - taken
            )
        };
        return AvailabilityResult {
            is_available: true,
            message,
            suggested_dates: Vec::new(),
            conflicts: conflicts.iter().map(|r| r.id).collect(),
            degraded: false,
        };
    }

    let suggested_dates = suggest_alternatives(reservations, requested, capacity);
    let mut message = if capacity <= 1 {
        format!(
            "{space_type} is already reserved between {} and {}",
            requested.start, requested.end
        )
    } else {
        format!(
            "all {capacity} {space_type} places are taken between {} and {}",
            requested.start, requested.end
        )
    };
    match suggested_dates.first() {
        Some(first) => message.push_str(&format!("; next free range starts {}", first.start)),
        None => message.push_str(&format!(
            "; no free range in the next {SUGGESTION_LOOKAHEAD_DAYS} days"
        )),
    }
    AvailabilityResult {
        is_available: false,
        message,
        suggested_dates,
        conflicts: conflicts.iter().map(|r| r.id).collect(),
        degraded: false,
    }
}

pub struct AvailabilityChecker {
    store: Arc<dyn ReservationStore>,
    catalog: Arc<SpaceCatalog>,
}

impl AvailabilityChecker {
    pub fn new(store: Arc<dyn ReservationStore>, catalog: Arc<SpaceCatalog>) -> Self {
        Self { store, catalog }
    }

    pub fn catalog(&self) -> &SpaceCatalog {
        &self.catalog
    }

    pub async fn check_availability(
        &self,
        space_type: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> AvailabilityResult {
        let result = self.check_availability_inner(space_type, start, end).await;
        record_outcome("dates", &result);
        result
    }

    async fn check_availability_inner(
        &self,
        slug: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> AvailabilityResult {
        let space_type = match self.resolve(slug) {
            Ok(t) => t,
            Err(result) => return result,
        };
        let Some(requested) = DateRange::checked(start, end) else {
            return AvailabilityResult::rejected(format!(
                "invalid date range: start {start} must be before end {end}"
            ));
        };

        let filter = ReservationFilter::all()
            .space_type(space_type)
            .not_status(ReservationStatus::Cancelled);
        let reservations = match self.store.select(&filter).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(%space_type, error = %e, "availability check failed open");
                return AvailabilityResult::fail_open(format!(
                    "availability could not be verified ({e}); proceeding as available"
                ));
            }
        };
        evaluate(
            &reservations,
            space_type,
            requested,
            self.catalog.max_concurrent(space_type),
        )
    }

    /// Is there room today, regardless of any requested dates?
    /// Counts pending and confirmed stays that include `today`.
    pub async fn check_general_availability(
        &self,
        space_type: &str,
        today: NaiveDate,
    ) -> AvailabilityResult {
        let result = self.check_general_inner(space_type, today).await;
        record_outcome("general", &result);
        result
    }

    async fn check_general_inner(&self, slug: &str, today: NaiveDate) -> AvailabilityResult {
        let space_type = match self.resolve(slug) {
            Ok(t) => t,
            Err(result) => return result,
        };
        let filter = ReservationFilter::all()
            .space_type(space_type)
            .status_in(&[ReservationStatus::Pending, ReservationStatus::Confirmed])
            .overlapping(DateRange {
                start: today,
                end: today,
            });
        let active = match self.store.select(&filter).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(%space_type, error = %e, "general availability failed open");
                return AvailabilityResult::fail_open(format!(
                    "occupancy could not be verified ({e}); proceeding as available"
                ));
            }
        };
        let capacity = self.catalog.max_concurrent(space_type);
        let is_available = active.len() < capacity as usize;
        let message = if is_available {
            format!("{} of {capacity} {space_type} places free today", capacity as usize - active.len())
        } else {
            format!("every {space_type} place is occupied today")
        };
        AvailabilityResult {
            is_available,
            message,
            suggested_dates: Vec::new(),
            conflicts: active.iter().map(|r| r.id).collect(),
            degraded: false,
        }
    }

    fn resolve(&self, slug: &str) -> Result<SpaceType, AvailabilityResult> {
        if slug.trim().is_empty() || slug.len() > MAX_SLUG_LEN {
            return Err(AvailabilityResult::rejected(
                "a space type is required".to_string(),
            ));
        }
        self.catalog
            .resolve(slug)
            .map(|spec| spec.space_type)
            .map_err(|e| AvailabilityResult::rejected(e.to_string()))
    }
}

fn record_outcome(kind: &'static str, result: &AvailabilityResult) {
    let outcome = match (result.degraded, result.is_available) {
        (true, _) => "degraded",
        (false, true) => "available",
        (false, false) => "unavailable",
    };
    metrics::counter!(
        observability::AVAILABILITY_CHECKS_TOTAL,
        "kind" => kind,
        "outcome" => outcome
    )
    .increment(1);
}
