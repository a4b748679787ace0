use crate::domain::model::{ProfileId, SlotId, TimeWindow};

/// A booking held by one profile, committed or staged.
#[derive(Debug, Clone, PartialEq)]
pub struct Booking {
    pub slot_id: SlotId,
    pub profile_id: ProfileId,
    pub window: TimeWindow,
}

/// Bookings of `profile_id` that overlap the candidate window.
///
/// The candidate's own slot never counts against itself, and windows that
/// merely touch (`end == start`) are not conflicts.
pub fn conflicting_bookings<'a>(
    candidate_slot: &SlotId,
    candidate_window: &TimeWindow,
    profile_id: &ProfileId,
    existing: &'a [Booking],
) -> Vec<&'a Booking> {
    existing
        .iter()
        .filter(|booking| &booking.profile_id == profile_id)
        .filter(|booking| &booking.slot_id != candidate_slot)
        .filter(|booking| candidate_window.overlaps(&booking.window))
        .collect()
}

pub fn has_conflict(
    candidate_slot: &SlotId,
    candidate_window: &TimeWindow,
    profile_id: &ProfileId,
    existing: &[Booking],
) -> bool {
    !conflicting_bookings(candidate_slot, candidate_window, profile_id, existing).is_empty()
}
