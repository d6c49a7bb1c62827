mod conflict;
mod error;
mod filter;
mod mutations;
mod queries;

pub use conflict::{find_overlapping, is_available, validate_stay};
pub use error::EngineError;
pub use filter::{RoomFilter, SortOrder};

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

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

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to every sender with the batch result.
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
                    // Commit what we have before touching the file in any other way.
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
    tracing::debug!("WAL writer for {} stopped", wal.path().display());
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush of {} events failed: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            // Every caller in the batch gets the error, so none of it may land.
            wal.discard_pending();
            return Err(e);
        }
    }
    // Rolls the file back to the last committed entry on failure.
    wal.flush_sync()
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

/// Room catalog, reservation ledger, and account registry, backed by the WAL.
pub struct Engine {
    rooms: DashMap<RoomNumber, SharedRoomState>,
    /// Reverse lookup: reservation id → room number.
    reservation_to_room: DashMap<Ulid, RoomNumber>,
    users: DashMap<Ulid, UserRecord>,
    usernames: DashMap<String, Ulid>,
    /// Keyed by lowercased email.
    emails: DashMap<String, Ulid>,
    tokens: DashMap<String, Ulid>,
    user_tokens: DashMap<Ulid, String>,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Serializes room create/update/delete and every account mutation.
    registry_lock: Mutex<()>,
    /// Mutations hold it shared from WAL append through apply; compaction
    /// holds it exclusively. Always taken before any room lock.
    commit_gate: RwLock<()>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("rooms", &self.rooms.len())
            .field("users", &self.users.len())
            .finish_non_exhaustive()
    }
}

pub(crate) fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Apply a reservation event to a room (no locking: caller holds the lock).
fn apply_to_room(rs: &mut RoomState, event: &Event, index: &DashMap<Ulid, RoomNumber>) {
    match event {
        Event::ReservationCreated { id, room, user_id, stay } => {
            rs.insert_reservation(Reservation {
                id: *id,
                room: *room,
                user_id: *user_id,
                stay: *stay,
            });
            index.insert(*id, *room);
        }
        Event::ReservationCancelled { id, .. } => {
            rs.remove_reservation(*id);
            index.remove(id);
        }
        Event::RoomUpdated { price_per_night, capacity, .. } => {
            rs.price_per_night = *price_per_night;
            rs.capacity = *capacity;
        }
        // Room lifecycle and accounts live at the map level, not here.
        _ => {}
    }
}

/// Drop every reservation held by `user_id`. Returns how many went.
fn purge_user(rs: &mut RoomState, user_id: Ulid, index: &DashMap<Ulid, RoomNumber>) -> usize {
    let before = rs.reservations.len();
    rs.reservations.retain(|r| {
        let keep = r.user_id != user_id;
        if !keep {
            index.remove(&r.id);
        }
        keep
    });
    before - rs.reservations.len()
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            reservation_to_room: DashMap::new(),
            users: DashMap::new(),
            usernames: DashMap::new(),
            emails: DashMap::new(),
            tokens: DashMap::new(),
            user_tokens: DashMap::new(),
            wal_tx,
            registry_lock: Mutex::new(()),
            commit_gate: RwLock::new(()),
        };

        // Rebuild rooms unlocked, then publish them.
        let replayed = events.len();
        let mut rooms: HashMap<RoomNumber, RoomState> = HashMap::new();
        for event in &events {
            engine.replay_event(&mut rooms, event);
        }
        for (number, rs) in rooms {
            engine.rooms.insert(number, Arc::new(RwLock::new(rs)));
        }
        metrics::gauge!(crate::observability::ROOMS_ACTIVE).set(engine.rooms.len() as f64);
        tracing::info!(
            "replayed {replayed} events from {}: {} rooms, {} users, {} reservations",
            wal_path.display(),
            engine.rooms.len(),
            engine.users.len(),
            engine.reservation_to_room.len()
        );

        Ok(engine)
    }

    fn replay_event(&self, rooms: &mut HashMap<RoomNumber, RoomState>, event: &Event) {
        match event {
            Event::RoomCreated { number, price_per_night, capacity } => {
                rooms.insert(*number, RoomState::new(*number, *price_per_night, *capacity));
            }
            Event::RoomDeleted { number } => {
                if let Some(rs) = rooms.remove(number) {
                    for r in &rs.reservations {
                        self.reservation_to_room.remove(&r.id);
                    }
                }
            }
            Event::RoomUpdated { number, .. } | Event::ReservationCancelled { room: number, .. } => {
                if let Some(rs) = rooms.get_mut(number) {
                    apply_to_room(rs, event, &self.reservation_to_room);
                }
            }
            Event::ReservationCreated { id, room, user_id, stay } => {
                // A reservation can land in the log just after its owner's
                // deletion; the live cascade removed it, so skip it here too.
                if !self.users.contains_key(user_id) {
                    return;
                }
                if let Some(rs) = rooms.get_mut(room) {
                    // The first booking of a night wins; never rebuild a double booking.
                    if let Err(e) = conflict::check_no_conflict(rs, stay) {
                        tracing::warn!("WAL replay: skipping reservation {id} on room {room}: {e}");
                        return;
                    }
                    apply_to_room(rs, event, &self.reservation_to_room);
                }
            }
            Event::UserDeleted { id } => {
                self.apply_account(event);
                for rs in rooms.values_mut() {
                    purge_user(rs, *id, &self.reservation_to_room);
                }
            }
            Event::UserRegistered { .. } | Event::TokenIssued { .. } | Event::TokenRevoked { .. } => {
                self.apply_account(event);
            }
        }
    }

    /// Apply a user/token event to the account maps.
    fn apply_account(&self, event: &Event) {
        match event {
            Event::UserRegistered { id, username, email, password_hash } => {
                self.usernames.insert(username.clone(), *id);
                self.emails.insert(email_key(email), *id);
                self.users.insert(
                    *id,
                    UserRecord {
                        id: *id,
                        username: username.clone(),
                        email: email.clone(),
                        password_hash: password_hash.clone(),
                    },
                );
            }
            Event::UserDeleted { id } => {
                if let Some((_, user)) = self.users.remove(id) {
                    self.usernames.remove(&user.username);
                    self.emails.remove(&email_key(&user.email));
                }
                if let Some((_, token)) = self.user_tokens.remove(id) {
                    self.tokens.remove(&token);
                }
            }
            Event::TokenIssued { user_id, token } => {
                if !self.users.contains_key(user_id) {
                    return;
                }
                if let Some(old) = self.user_tokens.insert(*user_id, token.clone()) {
                    self.tokens.remove(&old);
                }
                self.tokens.insert(token.clone(), *user_id);
            }
            Event::TokenRevoked { token } => {
                if let Some((_, user_id)) = self.tokens.remove(token) {
                    self.user_tokens.remove(&user_id);
                }
            }
            _ => {}
        }
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
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

    pub(super) fn get_room(&self, number: RoomNumber) -> Option<SharedRoomState> {
        self.rooms.get(&number).map(|e| e.value().clone())
    }

    /// Snapshot of all room handles, so no map guard is held across an await.
    pub(super) fn room_handles(&self) -> Vec<SharedRoomState> {
        self.rooms.iter().map(|e| e.value().clone()).collect()
    }

    /// WAL-append + apply for a reservation-level event on a locked room.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_room(rs, event, &self.reservation_to_room);
        Ok(())
    }

    /// WAL-append + apply for an account event. Caller holds `registry_lock`.
    pub(super) async fn persist_account(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply_account(event);
        Ok(())
    }
}
