use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError, SharedPlaceState};

/// Newest first; ULID breaks ties between same-millisecond records.
fn newest_first<T>(items: &mut [T], key: impl Fn(&T) -> (Ms, Ulid)) {
    items.sort_by(|a, b| key(b).cmp(&key(a)));
}

impl Engine {
    fn all_place_states(&self) -> Vec<SharedPlaceState> {
        self.state.iter().map(|e| e.value().clone()).collect()
    }

    pub fn place_count(&self) -> usize {
        self.state.len()
    }

    pub async fn get_place(&self, id: Ulid) -> Option<Place> {
        let ps = self.get_place_state(&id)?;
        let guard = ps.read().await;
        Some(guard.place.clone())
    }

    /// All places, newest first.
    pub async fn list_places(&self, page: Page) -> Paged<Place> {
        self.collect_places(page, |_| true).await
    }

    /// Places listed by `owner_id`, newest first.
    pub async fn list_places_by_owner(&self, owner_id: Ulid, page: Page) -> Paged<Place> {
        self.collect_places(page, |p| p.owner_id == owner_id).await
    }

    async fn collect_places(&self, page: Page, keep: impl Fn(&Place) -> bool) -> Paged<Place> {
        let mut places = Vec::new();
        for ps in self.all_place_states() {
            let guard = ps.read().await;
            if keep(&guard.place) {
                places.push(guard.place.clone());
            }
        }
        newest_first(&mut places, |p| (p.created_at, p.id));
        page.apply(places)
    }

    /// Fetch one booking. Only the user who made it may see it.
    pub async fn get_booking(&self, actor: Ulid, id: Ulid) -> Result<Booking, EngineError> {
        let booking = self.find_booking(id).await.ok_or(EngineError::NotFound(id))?;
        if booking.user_id != actor {
            tracing::warn!("user {actor} denied access to booking {id}");
            return Err(EngineError::Forbidden(id));
        }
        Ok(booking)
    }

    /// Bookings made by `user_id`, newest first.
    pub async fn list_user_bookings(&self, user_id: Ulid, page: Page) -> Paged<Booking> {
        let ids = self
            .user_bookings
            .get(&user_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut bookings = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(b) = self.find_booking(id).await {
                bookings.push(b);
            }
        }
        newest_first(&mut bookings, |b| (b.created_at, b.id));
        page.apply(bookings)
    }

    async fn find_booking(&self, id: Ulid) -> Option<Booking> {
        let place_id = self.get_place_for_booking(&id)?;
        let ps = self.get_place_state(&place_id)?;
        let guard = ps.read().await;
        guard.find_booking(&id).cloned()
    }
}
