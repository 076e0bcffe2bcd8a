use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::BOOKING_DECISIONS_TOTAL;

use super::resolver::{evaluate, now_ms, today, Candidate, Decision, Rejection};
use super::validation::{validate_booking_fields, validate_patch, validate_photos, validate_place};
use super::{Engine, EngineError, WalCommand};

fn record_decision(label: &'static str) {
    metrics::counter!(BOOKING_DECISIONS_TOTAL, "decision" => label).increment(1);
}

impl Engine {
    pub async fn create_place(
        &self,
        id: Ulid,
        owner_id: Ulid,
        new: NewPlace,
    ) -> Result<Place, EngineError> {
        if self.state.len() >= MAX_PLACES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many places"));
        }
        let place = new.into_place(id, owner_id, now_ms());
        validate_place(&place)?;
        let _gate = self.commit_gate.read().await;
        // The claim is released only after the place is in `state`, so a
        // second insert with the same id sees one or the other.
        if !self.pending_places.insert(id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let result = self.commit_place(place).await;
        self.pending_places.remove(&id);
        let place = result?;
        info!("place {id} created by {owner_id}");
        Ok(place)
    }

    async fn commit_place(&self, place: Place) -> Result<Place, EngineError> {
        if self.state.contains_key(&place.id) {
            return Err(EngineError::AlreadyExists(place.id));
        }
        let event = Event::PlaceCreated {
            place: place.clone(),
        };
        self.wal_append(&event).await?;
        self.state
            .insert(place.id, Arc::new(RwLock::new(PlaceState::new(place.clone()))));
        Ok(place)
    }

    /// Apply a partial update. Only the owner may update a place.
    pub async fn update_place(
        &self,
        actor: Ulid,
        id: Ulid,
        patch: PlacePatch,
    ) -> Result<Place, EngineError> {
        validate_patch(&patch)?;
        let _gate = self.commit_gate.read().await;
        let ps = self.get_place_state(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = ps.write().await;
        if guard.place.owner_id != actor {
            return Err(EngineError::Forbidden(id));
        }

        let event = Event::PlaceUpdated { id, patch };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("place {id} updated");
        Ok(guard.place.clone())
    }

    /// Append already-hosted photo URLs to a place. Returns the new photo count.
    pub async fn add_photos(
        &self,
        actor: Ulid,
        place_id: Ulid,
        urls: Vec<String>,
    ) -> Result<usize, EngineError> {
        if urls.is_empty() {
            return Err(EngineError::Invalid("no photos given"));
        }
        validate_photos(&urls)?;
        let _gate = self.commit_gate.read().await;
        let ps = self
            .get_place_state(&place_id)
            .ok_or(EngineError::NotFound(place_id))?;
        let mut guard = ps.write().await;
        if guard.place.owner_id != actor {
            return Err(EngineError::Forbidden(place_id));
        }
        if guard.place.photos.len() + urls.len() > MAX_PHOTOS_PER_PLACE {
            return Err(EngineError::LimitExceeded("maximum 10 photos per place"));
        }

        let event = Event::PhotosAdded { place_id, urls };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(guard.place.photos.len())
    }

    /// Evaluate and commit a booking.
    ///
    /// The place's write lock is held from the conflict check through the WAL
    /// append, so two overlapping requests for one place cannot both pass.
    pub async fn create_booking(
        &self,
        id: Ulid,
        user_id: Ulid,
        req: NewBooking,
    ) -> Result<Booking, EngineError> {
        validate_booking_fields(req.guests, &req.name, &req.phone, req.price)?;
        if self.booking_to_place.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let candidate = Candidate {
            user_id,
            place_id: req.place_id,
            stay: req.stay,
            guests: req.guests,
        };

        let _gate = self.commit_gate.read().await;
        let Some(ps) = self.get_place_state(&req.place_id) else {
            return Err(self.reject(&candidate, Rejection::PlaceNotFound));
        };
        let mut guard = ps.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_PLACE {
            return Err(EngineError::LimitExceeded("too many bookings on place"));
        }

        if let Decision::Rejected(r) = evaluate(&candidate, Some(&guard.place), &guard.bookings, today()) {
            return Err(self.reject(&candidate, r));
        }

        let booking = Booking {
            id,
            place_id: req.place_id,
            user_id,
            stay: req.stay,
            guests: req.guests,
            name: req.name,
            phone: req.phone,
            price: req.price,
            created_at: now_ms(),
        };
        // Claim the id before the WAL append. Another place's lock does not
        // cover this booking, so the index is the only shared point.
        match self.booking_to_place.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(booking.place_id);
            }
        }
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        if let Err(e) = self.persist_and_apply(&mut guard, &event).await {
            self.booking_to_place.remove(&id);
            return Err(e);
        }
        record_decision("accepted");
        info!(
            "booking {id} created: place {} user {user_id} {} ({} nights)",
            booking.place_id,
            booking.stay,
            booking.stay.nights()
        );
        Ok(booking)
    }

    fn reject(&self, candidate: &Candidate, r: Rejection) -> EngineError {
        record_decision(r.kind());
        debug!(
            "booking rejected ({}): place {} user {} {}",
            r.kind(),
            candidate.place_id,
            candidate.user_id,
            candidate.stay
        );
        EngineError::Rejected(r)
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;
        let places: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::with_capacity(places.len());

        for ps in places {
            let guard = ps.read().await;
            events.push(Event::PlaceCreated {
                place: guard.place.clone(),
            });
            let mut bookings: Vec<&Booking> = guard.bookings.iter().collect();
            bookings.sort_by_key(|b| (b.created_at, b.id));
            events.extend(bookings.into_iter().map(|b| Event::BookingCreated {
                booking: b.clone(),
            }));
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        debug!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
