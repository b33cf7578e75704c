use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_stay(start: NaiveDate, end: NaiveDate) -> Result<DateRange, EngineError> {
    let range = DateRange::checked(start, end).ok_or_else(|| {
        EngineError::Invalid(format!("start_date {start} must be before end_date {end}"))
    })?;
    if range.duration_days() > MAX_STAY_DAYS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(range)
}

pub(crate) fn validate_contact(contact: &Contact) -> Result<(), EngineError> {
    if contact.full_name.trim().is_empty() {
        return Err(EngineError::Invalid("full_name is required".into()));
    }
    if !contact.email.contains('@') {
        return Err(EngineError::Invalid(format!(
            "email {:?} is not an address",
            contact.email
        )));
    }
    let fields = [
        Some(&contact.full_name),
        Some(&contact.email),
        Some(&contact.phone),
        contact.company.as_ref(),
        contact.activity.as_ref(),
        contact.address.as_ref(),
    ];
    if fields.into_iter().flatten().any(|f| f.len() > MAX_FIELD_LEN) {
        return Err(EngineError::LimitExceeded("contact field too long"));
    }
    Ok(())
}

pub(crate) fn validate_notes(notes: Option<&str>) -> Result<(), EngineError> {
    if notes.is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(EngineError::LimitExceeded("admin notes too long"));
    }
    Ok(())
}

pub(crate) fn validate_amount(amount: i64) -> Result<(), EngineError> {
    if amount < 0 {
        return Err(EngineError::Invalid(format!("amount {amount} is negative")));
    }
    Ok(())
}

/// Reject a stay when its conflict set already fills the space.
///
/// Capacity counts whole overlapping reservations, not per-day peaks: two stays that
/// overlap the query on different days both count.
pub fn check_capacity(
    ss: &SpaceState,
    range: DateRange,
    capacity: u32,
    ignore: Option<Ulid>,
) -> Result<(), EngineError> {
    if capacity == 1 {
        // Fast path: any live overlap is a conflict
        if let Some(existing) = ss.conflicts(range, ignore).next() {
            return Err(EngineError::Conflict {
                space_type: ss.space_type,
                with: existing.id,
            });
        }
        return Ok(());
    }
    let taken = ss.conflicts(range, ignore).count();
    if taken >= capacity as usize {
        return Err(EngineError::CapacityExceeded {
            space_type: ss.space_type,
            capacity,
        });
    }
    Ok(())
}
