use chrono::NaiveDate;

use crate::limits::MAX_STAY_NIGHTS;
use crate::model::*;

use super::EngineError;

/// Turn a raw date pair into a `Stay`, rejecting empty, inverted, or
/// overlong ranges.
pub fn validate_stay(check_in: NaiveDate, check_out: NaiveDate) -> Result<Stay, EngineError> {
    if check_in >= check_out {
        return Err(EngineError::InvalidInput(
            "check_out_date must be after check_in_date".into(),
        ));
    }
    let stay = Stay::new(check_in, check_out);
    if stay.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(stay)
}

/// First reservation on the room that overlaps `stay`, if any.
pub fn find_overlapping<'a>(rs: &'a RoomState, stay: &Stay) -> Option<&'a Reservation> {
    rs.overlapping(stay).next()
}

pub fn is_available(rs: &RoomState, stay: &Stay) -> bool {
    find_overlapping(rs, stay).is_none()
}

pub(crate) fn check_no_conflict(rs: &RoomState, stay: &Stay) -> Result<(), EngineError> {
    match find_overlapping(rs, stay) {
        Some(existing) => Err(EngineError::Conflict {
            room: rs.number,
            stay: *stay,
            existing: existing.id,
        }),
        None => Ok(()),
    }
}
