use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};

/// Unix milliseconds, used for creation timestamps.
pub type Ms = i64;

/// Half-open stay `[check_in, check_out)` in calendar days.
///
/// The check-out day is not occupied, so a stay ending on the 12th and one
/// starting on the 12th do not overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stay {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl Stay {
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Self {
        Self {
            check_in,
            check_out,
        }
    }

    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    /// True when `check_out` is strictly after `check_in`.
    pub fn is_valid(&self) -> bool {
        self.check_in < self.check_out
    }

    pub fn overlaps(&self, other: &Stay) -> bool {
        self.check_in < other.check_out && other.check_in < self.check_out
    }

    /// Overlap of a new stay (`self`) against an existing one, spelled out as
    /// three cases: the new stay starts during the existing one, ends during
    /// it, or encompasses it. Agrees with [`Stay::overlaps`] for valid stays.
    pub fn overlaps_by_cases(&self, existing: &Stay) -> bool {
        let starts_during =
            existing.check_in <= self.check_in && existing.check_out > self.check_in;
        let ends_during =
            existing.check_in < self.check_out && existing.check_out >= self.check_out;
        let encompasses =
            existing.check_in >= self.check_in && existing.check_out <= self.check_out;
        starts_during || ends_during || encompasses
    }
}

impl std::fmt::Display for Stay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.check_in, self.check_out)
    }
}

/// A listed accommodation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub title: String,
    pub address: String,
    pub description: String,
    pub perks: Vec<String>,
    pub extra_info: Option<String>,
    /// Hour of day (0-23) from which guests may check in.
    pub check_in_hour: u8,
    /// Hour of day (0-23) by which guests must check out.
    pub check_out_hour: u8,
    pub max_guests: u32,
    pub price: f64,
    pub photos: Vec<String>,
    pub created_at: Ms,
}

/// Listing fields supplied when a place is created.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPlace {
    pub title: String,
    pub address: String,
    pub description: String,
    pub perks: Vec<String>,
    pub extra_info: Option<String>,
    pub check_in_hour: u8,
    pub check_out_hour: u8,
    pub max_guests: u32,
    pub price: f64,
    pub photos: Vec<String>,
}

impl NewPlace {
    pub fn into_place(self, id: Ulid, owner_id: Ulid, created_at: Ms) -> Place {
        Place {
            id,
            owner_id,
            title: self.title,
            address: self.address,
            description: self.description,
            perks: self.perks,
            extra_info: self.extra_info.filter(|s| !s.is_empty()),
            check_in_hour: self.check_in_hour,
            check_out_hour: self.check_out_hour,
            max_guests: self.max_guests,
            price: self.price,
            photos: self.photos,
            created_at,
        }
    }
}

/// Partial update of a place's listing fields. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlacePatch {
    pub title: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub perks: Option<Vec<String>>,
    pub extra_info: Option<String>,
    pub check_in_hour: Option<u8>,
    pub check_out_hour: Option<u8>,
    pub max_guests: Option<u32>,
    pub price: Option<f64>,
}

impl PlacePatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.address.is_none()
            && self.description.is_none()
            && self.perks.is_none()
            && self.extra_info.is_none()
            && self.check_in_hour.is_none()
            && self.check_out_hour.is_none()
            && self.max_guests.is_none()
            && self.price.is_none()
    }

    pub fn apply(&self, place: &mut Place) {
        if let Some(ref v) = self.title {
            place.title = v.clone();
        }
        if let Some(ref v) = self.address {
            place.address = v.clone();
        }
        if let Some(ref v) = self.description {
            place.description = v.clone();
        }
        if let Some(ref v) = self.perks {
            place.perks = v.clone();
        }
        if let Some(ref v) = self.extra_info {
            place.extra_info = Some(v.clone()).filter(|s| !s.is_empty());
        }
        if let Some(v) = self.check_in_hour {
            place.check_in_hour = v;
        }
        if let Some(v) = self.check_out_hour {
            place.check_out_hour = v;
        }
        if let Some(v) = self.max_guests {
            place.max_guests = v;
        }
        if let Some(v) = self.price {
            place.price = v;
        }
    }
}

/// A committed reservation of a place by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub place_id: Ulid,
    pub user_id: Ulid,
    pub stay: Stay,
    pub guests: u32,
    pub name: String,
    pub phone: String,
    pub price: f64,
    pub created_at: Ms,
}

/// Booking request fields; the booking user comes from the session.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBooking {
    pub place_id: Ulid,
    pub stay: Stay,
    pub guests: u32,
    pub name: String,
    pub phone: String,
    pub price: f64,
}

#[derive(Debug, Clone)]
pub struct PlaceState {
    pub place: Place,
    /// Bookings on this place, sorted by `stay.check_in`.
    pub bookings: Vec<Booking>,
}

impl PlaceState {
    pub fn new(place: Place) -> Self {
        Self {
            place,
            bookings: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by check-in.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.stay.check_in <= booking.stay.check_in);
        self.bookings.insert(pos, booking);
    }

    pub fn find_booking(&self, id: &Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == *id)
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    PlaceCreated {
        place: Place,
    },
    PlaceUpdated {
        id: Ulid,
        patch: PlacePatch,
    },
    PhotosAdded {
        place_id: Ulid,
        urls: Vec<String>,
    },
    BookingCreated {
        booking: Booking,
    },
}

impl Event {
    pub fn place_id(&self) -> Ulid {
        match self {
            Event::PlaceCreated { place } => place.id,
            Event::PlaceUpdated { id, .. } => *id,
            Event::PhotosAdded { place_id, .. } => *place_id,
            Event::BookingCreated { booking } => booking.place_id,
        }
    }
}

// ── Pagination ───────────────────────────────────────────────────

/// Limit/offset window over a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl Page {
    /// Returns `None` when `limit` is outside `1..=MAX_PAGE_LIMIT`.
    pub fn new(limit: usize, offset: usize) -> Option<Self> {
        if limit == 0 || limit > MAX_PAGE_LIMIT {
            return None;
        }
        Some(Self { limit, offset })
    }

    /// Slice an already-sorted listing and remember the total.
    pub fn apply<T>(&self, items: Vec<T>) -> Paged<T> {
        let total = items.len();
        let items = items
            .into_iter()
            .skip(self.offset)
            .take(self.limit)
            .collect();
        Paged {
            limit: self.limit,
            offset: self.offset,
            total,
            items,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Paged<T> {
    pub limit: usize,
    pub offset: usize,
    pub total: usize,
    pub items: Vec<T>,
}
