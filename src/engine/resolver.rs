use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

/// A proposed booking that has not been persisted yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub user_id: Ulid,
    pub place_id: Ulid,
    pub stay: Stay,
    pub guests: u32,
}

/// Why a candidate was turned down. Conflict kinds carry the stay of the
/// existing booking that blocked it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    PlaceNotFound,
    SelfBooking,
    PastCheckIn,
    InvalidRange,
    PlaceConflict(Stay),
    UserConflict(Stay),
    CapacityExceeded { max_guests: u32 },
}

impl Rejection {
    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Rejection::PlaceNotFound => "place_not_found",
            Rejection::SelfBooking => "self_booking",
            Rejection::PastCheckIn => "past_check_in",
            Rejection::InvalidRange => "invalid_range",
            Rejection::PlaceConflict(_) => "place_conflict",
            Rejection::UserConflict(_) => "user_conflict",
            Rejection::CapacityExceeded { .. } => "capacity_exceeded",
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Rejection::PlaceConflict(_) | Rejection::UserConflict(_))
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::PlaceNotFound => write!(f, "place not found"),
            Rejection::SelfBooking => write!(f, "you cannot book your own place"),
            Rejection::PastCheckIn => write!(f, "check-in date cannot be in the past"),
            Rejection::InvalidRange => write!(f, "check-out date must be after check-in date"),
            Rejection::PlaceConflict(stay) => {
                write!(f, "place is already booked for the selected dates: {stay}")
            }
            Rejection::UserConflict(stay) => {
                write!(f, "you already have a booking for this place on these dates: {stay}")
            }
            Rejection::CapacityExceeded { max_guests } => {
                write!(f, "maximum {max_guests} guests allowed for this place")
            }
        }
    }
}

impl std::error::Error for Rejection {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accepted,
    Rejected(Rejection),
}

impl Decision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Decision::Accepted)
    }
}

/// Decide whether `candidate` may be committed against the bookings already
/// stored for its place.
///
/// Checks run in a fixed order and the first failure wins: ownership, dates,
/// place-wide overlap, same-user overlap, capacity. `today` is the calendar
/// date check-in is compared against.
pub fn evaluate(
    candidate: &Candidate,
    place: Option<&Place>,
    existing: &[Booking],
    today: NaiveDate,
) -> Decision {
    let Some(place) = place else {
        return Decision::Rejected(Rejection::PlaceNotFound);
    };

    if candidate.user_id == place.owner_id {
        return Decision::Rejected(Rejection::SelfBooking);
    }

    if candidate.stay.check_in < today {
        return Decision::Rejected(Rejection::PastCheckIn);
    }
    if !candidate.stay.is_valid() {
        return Decision::Rejected(Rejection::InvalidRange);
    }

    if let Some(stay) = first_conflict(existing, &candidate.stay, None) {
        return Decision::Rejected(Rejection::PlaceConflict(stay));
    }
    // Unreachable with a consistent snapshot (the place-wide scan sees the
    // user's bookings too), kept as its own pass so PlaceConflict always wins.
    if let Some(stay) = first_conflict(existing, &candidate.stay, Some(candidate.user_id)) {
        return Decision::Rejected(Rejection::UserConflict(stay));
    }

    if candidate.guests > place.max_guests {
        return Decision::Rejected(Rejection::CapacityExceeded {
            max_guests: place.max_guests,
        });
    }

    Decision::Accepted
}

/// Linear scan for the first booking whose stay intersects `stay`,
/// optionally restricted to one user's bookings.
pub(crate) fn first_conflict(
    existing: &[Booking],
    stay: &Stay,
    user: Option<Ulid>,
) -> Option<Stay> {
    existing
        .iter()
        .filter(|b| user.is_none_or(|u| b.user_id == u))
        .find(|b| b.stay.overlaps(stay))
        .map(|b| b.stay)
}

/// Today's calendar date in UTC.
pub(crate) fn today() -> NaiveDate {
    chrono::Utc::now().date_naive()
}

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}
