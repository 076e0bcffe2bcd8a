//! Hard limits enforced by the engine, the SQL surface and the tenant manager.

// ── Tenants ──────────────────────────────────────────────────────

pub const MAX_TENANTS: usize = 64;
pub const MAX_TENANT_NAME_LEN: usize = 128;

// ── Store sizes ──────────────────────────────────────────────────

pub const MAX_PLACES_PER_TENANT: usize = 100_000;
pub const MAX_BOOKINGS_PER_PLACE: usize = 10_000;
pub const MAX_PHOTOS_PER_PLACE: usize = 10;
pub const MAX_PHOTO_URL_LEN: usize = 2048;

// ── Place fields ─────────────────────────────────────────────────

pub const TITLE_LEN: (usize, usize) = (3, 50);
pub const ADDRESS_LEN: (usize, usize) = (5, 200);
pub const DESCRIPTION_LEN: (usize, usize) = (10, 100);
pub const MAX_PERKS: usize = 15;
pub const MAX_EXTRA_INFO_LEN: usize = 50;
/// Largest value accepted for a check-in/check-out hour.
pub const MAX_HOUR: u8 = 23;
pub const MAX_GUESTS: u32 = 50;
pub const MAX_PRICE: f64 = 1_000_000.0;

// ── Booking fields ───────────────────────────────────────────────

pub const GUEST_NAME_LEN: (usize, usize) = (2, 100);
pub const PHONE_LEN: (usize, usize) = (10, 20);

// ── Pagination ───────────────────────────────────────────────────

pub const DEFAULT_PAGE_LIMIT: usize = 10;
pub const MAX_PAGE_LIMIT: usize = 50;
