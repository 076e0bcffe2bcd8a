mod error;
mod mutations;
mod queries;
mod resolver;
mod validation;

pub use error::EngineError;
pub use resolver::{evaluate, Candidate, Decision, Rejection};

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedPlaceState = Arc<RwLock<PlaceState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
///
/// Blocks for the first append, drains whatever else is already queued,
/// then fsyncs once for the whole batch and answers every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        flush_and_respond(&mut wal, &mut batch);
        // Non-append commands run after the batch they interrupted.
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let append_result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes don't bleed
    // into the next batch.
    let flush_result = wal.flush_sync();
    append_result.and(flush_result)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// In-memory store of places and bookings for one tenant.
pub struct Engine {
    pub state: DashMap<Ulid, SharedPlaceState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: booking id → place id
    pub(super) booking_to_place: DashMap<Ulid, Ulid>,
    /// User id → ids of that user's bookings, oldest first.
    pub(super) user_bookings: DashMap<Ulid, Vec<Ulid>>,
    /// Place ids claimed by an in-flight `create_place`.
    pub(super) pending_places: DashSet<Ulid>,
    /// Mutations hold this shared; compaction holds it exclusively so no
    /// append lands between the snapshot and the file swap.
    pub(super) commit_gate: RwLock<()>,
}

/// Apply an event to a place. The caller holds the place lock.
fn apply_to_place(
    ps: &mut PlaceState,
    event: &Event,
    booking_to_place: &DashMap<Ulid, Ulid>,
    user_bookings: &DashMap<Ulid, Vec<Ulid>>,
) {
    match event {
        Event::PlaceUpdated { patch, .. } => patch.apply(&mut ps.place),
        Event::PhotosAdded { urls, .. } => ps.place.photos.extend(urls.iter().cloned()),
        Event::BookingCreated { booking } => {
            booking_to_place.insert(booking.id, booking.place_id);
            user_bookings
                .entry(booking.user_id)
                .or_default()
                .push(booking.id);
            ps.insert_booking(booking.clone());
        }
        // Creation is handled at the DashMap level.
        Event::PlaceCreated { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            booking_to_place: DashMap::new(),
            user_bookings: DashMap::new(),
            pending_places: DashSet::new(),
            commit_gate: RwLock::new(()),
        };

        // Rebuild plain states first and share them once replay is done.
        let mut places: HashMap<Ulid, PlaceState> = HashMap::new();
        for event in &events {
            match event {
                Event::PlaceCreated { place } => {
                    places.insert(place.id, PlaceState::new(place.clone()));
                }
                other => {
                    if let Some(ps) = places.get_mut(&other.place_id()) {
                        engine.apply(ps, other);
                    }
                }
            }
        }
        for (id, ps) in places {
            engine.state.insert(id, Arc::new(RwLock::new(ps)));
        }

        tracing::debug!(
            "replayed {} events: {} places, {} bookings",
            events.len(),
            engine.state.len(),
            engine.booking_to_place.len()
        );
        Ok(engine)
    }

    fn apply(&self, ps: &mut PlaceState, event: &Event) {
        apply_to_place(ps, event, &self.booking_to_place, &self.user_bookings);
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_place_state(&self, id: &Ulid) -> Option<SharedPlaceState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_place_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_place.get(booking_id).map(|e| *e.value())
    }

    /// WAL-append then apply, under the caller's write lock.
    pub(super) async fn persist_and_apply(
        &self,
        ps: &mut PlaceState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply(ps, event);
        Ok(())
    }
}
