use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::{RwLock, oneshot};
use ulid::Ulid;

use crate::auth;
use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, validate_stay};
use super::{Engine, EngineError, WalCommand, email_key, purge_user};

/// Two decimal places, matching how prices are displayed.
fn normalize_price(price: Decimal) -> Result<Decimal, EngineError> {
    if price.is_sign_negative() && !price.is_zero() {
        return Err(EngineError::InvalidInput("price_per_night must not be negative".into()));
    }
    let mut price = price.round_dp(2);
    price.rescale(2);
    Ok(price)
}

fn validate_room(number: RoomNumber, capacity: u32) -> Result<(), EngineError> {
    if number == 0 {
        return Err(EngineError::InvalidInput("room number must be positive".into()));
    }
    if capacity == 0 {
        return Err(EngineError::InvalidInput("capacity must be positive".into()));
    }
    Ok(())
}

/// Run argon2 off the async workers.
async fn blocking<T: Send + 'static>(
    f: impl FnOnce() -> T + Send + 'static,
) -> Result<T, EngineError> {
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| EngineError::Internal(format!("password task failed: {e}")))
}

impl Engine {
    // ── Room catalog ─────────────────────────────────────────

    pub async fn create_room(
        &self,
        number: RoomNumber,
        price_per_night: Decimal,
        capacity: u32,
    ) -> Result<RoomInfo, EngineError> {
        validate_room(number, capacity)?;
        let price_per_night = normalize_price(price_per_night)?;

        let _gate = self.commit_gate.read().await;
        let _registry = self.registry_lock.lock().await;
        if self.rooms.contains_key(&number) {
            return Err(EngineError::RoomExists(number));
        }
        if self.rooms.len() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }

        self.wal_append(&Event::RoomCreated { number, price_per_night, capacity })
            .await?;
        let rs = RoomState::new(number, price_per_night, capacity);
        let info = rs.info();
        self.rooms.insert(number, Arc::new(RwLock::new(rs)));
        metrics::gauge!(crate::observability::ROOMS_ACTIVE).set(self.rooms.len() as f64);
        tracing::info!("room {number} created");
        Ok(info)
    }

    /// Reprice or resize a room. Rejected once the room has reservations.
    pub async fn update_room(
        &self,
        number: RoomNumber,
        price_per_night: Decimal,
        capacity: u32,
    ) -> Result<RoomInfo, EngineError> {
        validate_room(number, capacity)?;
        let price_per_night = normalize_price(price_per_night)?;

        let _gate = self.commit_gate.read().await;
        let _registry = self.registry_lock.lock().await;
        let rs = self.get_room(number).ok_or(EngineError::RoomNotFound(number))?;
        let mut guard = rs.write().await;
        if !guard.reservations.is_empty() {
            return Err(EngineError::RoomInUse(number));
        }

        let event = Event::RoomUpdated { number, price_per_night, capacity };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(guard.info())
    }

    /// Remove a room along with its reservations. Returns how many
    /// reservations went with it.
    pub async fn delete_room(&self, number: RoomNumber) -> Result<usize, EngineError> {
        let _gate = self.commit_gate.read().await;
        let _registry = self.registry_lock.lock().await;
        let rs = self.get_room(number).ok_or(EngineError::RoomNotFound(number))?;
        // Wait out in-flight bookings on this room.
        let guard = rs.write().await;

        self.wal_append(&Event::RoomDeleted { number }).await?;
        self.rooms.remove(&number);
        for r in &guard.reservations {
            self.reservation_to_room.remove(&r.id);
        }
        metrics::gauge!(crate::observability::ROOMS_ACTIVE).set(self.rooms.len() as f64);
        tracing::info!(
            "room {number} deleted with {} reservations",
            guard.reservations.len()
        );
        Ok(guard.reservations.len())
    }

    // ── Accounts ─────────────────────────────────────────────

    pub async fn register_user(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<UserInfo, EngineError> {
        let email = email.trim();
        auth::validate_username(username).map_err(EngineError::InvalidInput)?;
        auth::validate_email(email).map_err(EngineError::InvalidInput)?;
        auth::validate_password(password).map_err(EngineError::InvalidInput)?;

        let pw = password.to_owned();
        let password_hash = blocking(move || auth::hash_password(&pw))
            .await?
            .map_err(|e| EngineError::InvalidInput(format!("password rejected: {e}")))?;

        let _gate = self.commit_gate.read().await;
        let _registry = self.registry_lock.lock().await;
        if self.usernames.contains_key(username) {
            return Err(EngineError::UsernameTaken(username.to_owned()));
        }
        if self.emails.contains_key(&email_key(email)) {
            return Err(EngineError::EmailTaken(email.to_owned()));
        }
        if self.users.len() >= MAX_USERS {
            return Err(EngineError::LimitExceeded("too many users"));
        }

        let id = Ulid::new();
        let event = Event::UserRegistered {
            id,
            username: username.to_owned(),
            email: email.to_owned(),
            password_hash,
        };
        self.persist_account(&event).await?;
        tracing::info!(user_id = %id, username, "user registered");
        Ok(UserInfo {
            id,
            username: username.to_owned(),
            email: email.to_owned(),
        })
    }

    /// Check credentials and hand out the user's token, issuing one on first
    /// login.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(UserInfo, String), EngineError> {
        if password.len() > MAX_PASSWORD_LEN {
            return Err(EngineError::InvalidCredentials);
        }
        let pw = password.to_owned();
        let Some(user) = self
            .usernames
            .get(username)
            .and_then(|id| self.users.get(id.value()).map(|u| u.value().clone()))
        else {
            // Same argon2 cost as a wrong password for a known user.
            blocking(move || auth::verify_password(&pw, auth::dummy_hash())).await?;
            return Err(EngineError::InvalidCredentials);
        };

        let hash = user.password_hash.clone();
        if !blocking(move || auth::verify_password(&pw, &hash)).await? {
            return Err(EngineError::InvalidCredentials);
        }

        let _gate = self.commit_gate.read().await;
        let _registry = self.registry_lock.lock().await;
        if !self.users.contains_key(&user.id) {
            return Err(EngineError::InvalidCredentials);
        }
        if let Some(token) = self.user_tokens.get(&user.id) {
            return Ok((user.info(), token.value().clone()));
        }

        let token = auth::generate_token();
        self.persist_account(&Event::TokenIssued { user_id: user.id, token: token.clone() })
            .await?;
        tracing::info!(user_id = %user.id, "token issued");
        Ok((user.info(), token))
    }

    /// Revoke a token. Unknown tokens are a no-op.
    pub async fn logout(&self, token: &str) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        let _registry = self.registry_lock.lock().await;
        if !self.tokens.contains_key(token) {
            return Ok(());
        }
        self.persist_account(&Event::TokenRevoked { token: token.to_owned() })
            .await
    }

    /// Remove a user, their token, and all their reservations. Returns how
    /// many reservations were dropped.
    pub async fn delete_user(&self, id: Ulid) -> Result<usize, EngineError> {
        let _gate = self.commit_gate.read().await;
        let _registry = self.registry_lock.lock().await;
        if !self.users.contains_key(&id) {
            return Err(EngineError::UserNotFound(id));
        }

        // Account maps first: bookings that check the owner after this point fail.
        self.persist_account(&Event::UserDeleted { id }).await?;
        let mut dropped = 0;
        for rs in self.room_handles() {
            let mut guard = rs.write().await;
            dropped += purge_user(&mut guard, id, &self.reservation_to_room);
        }
        tracing::info!(user_id = %id, "user deleted with {dropped} reservations");
        Ok(dropped)
    }

    // ── Reservations ─────────────────────────────────────────

    /// Book `room` for `stay` on behalf of `user_id`. The availability check
    /// and the insert run under the room's write lock, so two overlapping
    /// requests can't both succeed.
    pub async fn create_reservation(
        &self,
        room: RoomNumber,
        user_id: Ulid,
        stay: Stay,
    ) -> Result<Reservation, EngineError> {
        let stay = validate_stay(stay.check_in, stay.check_out)?;

        let _gate = self.commit_gate.read().await;
        let rs = self.get_room(room).ok_or(EngineError::RoomNotFound(room))?;
        let mut guard = rs.write().await;
        // Deleted while we waited for the lock.
        if !self.rooms.contains_key(&room) {
            return Err(EngineError::RoomNotFound(room));
        }
        if !self.users.contains_key(&user_id) {
            return Err(EngineError::UserNotFound(user_id));
        }
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many reservations on room"));
        }

        if let Err(e) = check_no_conflict(&guard, &stay) {
            metrics::counter!(crate::observability::RESERVATION_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let reservation = Reservation {
            id: Ulid::new(),
            room,
            user_id,
            stay,
        };
        let event = Event::ReservationCreated {
            id: reservation.id,
            room,
            user_id,
            stay,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::RESERVATIONS_CREATED_TOTAL).increment(1);
        tracing::info!(
            reservation_id = %reservation.id,
            room,
            "reserved {} to {}",
            stay.check_in,
            stay.check_out
        );
        Ok(reservation)
    }

    /// Cancel a reservation if `requester` owns it.
    pub async fn cancel_reservation(
        &self,
        id: Ulid,
        requester: Ulid,
    ) -> Result<Reservation, EngineError> {
        let _gate = self.commit_gate.read().await;
        let room = self
            .reservation_to_room
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::ReservationNotFound(id))?;
        let rs = self.get_room(room).ok_or(EngineError::ReservationNotFound(id))?;
        let mut guard = rs.write().await;
        let reservation = guard
            .reservations
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(EngineError::ReservationNotFound(id))?;
        if reservation.user_id != requester {
            return Err(EngineError::Forbidden(id));
        }

        self.persist_and_apply(&mut guard, &Event::ReservationCancelled { id, room })
            .await?;
        metrics::counter!(crate::observability::RESERVATIONS_CANCELLED_TOTAL).increment(1);
        tracing::info!(reservation_id = %id, room, "reservation cancelled");
        Ok(reservation)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;

        let mut snapshot = Vec::new();
        for rs in self.room_handles() {
            snapshot.push(rs.read().await.clone());
        }
        snapshot.sort_by_key(|rs| rs.number);

        let mut users: Vec<UserRecord> = self.users.iter().map(|e| e.value().clone()).collect();
        users.sort_by_key(|u| u.id);

        let mut events = Vec::new();
        for rs in &snapshot {
            events.push(Event::RoomCreated {
                number: rs.number,
                price_per_night: rs.price_per_night,
                capacity: rs.capacity,
            });
        }
        for user in users {
            let token = self.user_tokens.get(&user.id).map(|t| t.value().clone());
            let user_id = user.id;
            events.push(Event::UserRegistered {
                id: user.id,
                username: user.username,
                email: user.email,
                password_hash: user.password_hash,
            });
            if let Some(token) = token {
                events.push(Event::TokenIssued { user_id, token });
            }
        }
        for rs in &snapshot {
            for r in &rs.reservations {
                events.push(Event::ReservationCreated {
                    id: r.id,
                    room: r.room,
                    user_id: r.user_id,
                    stay: r.stay,
                });
            }
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
        tracing::info!("WAL compacted to {count} events");
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
