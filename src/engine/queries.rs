use ulid::Ulid;

use crate::model::*;

use super::conflict::is_available;
use super::{Engine, EngineError, RoomFilter};

impl Engine {
    pub async fn room_info(&self, number: RoomNumber) -> Option<RoomInfo> {
        let rs = self.get_room(number)?;
        let guard = rs.read().await;
        Some(guard.info())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// True iff no reservation on `room` overlaps `stay`.
    pub async fn is_available(&self, room: RoomNumber, stay: &Stay) -> Result<bool, EngineError> {
        let rs = self.get_room(room).ok_or(EngineError::RoomNotFound(room))?;
        let guard = rs.read().await;
        Ok(is_available(&guard, stay))
    }

    /// All rooms matching `filter`, sorted the way it asks.
    pub async fn list_rooms(&self, filter: &RoomFilter) -> Vec<RoomInfo> {
        let mut out = Vec::new();
        for rs in self.room_handles() {
            let guard = rs.read().await;
            if filter.matches(&guard) {
                out.push(guard.info());
            }
        }
        filter.sort(&mut out);
        out
    }

    pub async fn get_reservation(&self, id: Ulid) -> Option<Reservation> {
        let room = self.reservation_to_room.get(&id).map(|e| *e.value())?;
        let rs = self.get_room(room)?;
        let guard = rs.read().await;
        guard.reservations.iter().find(|r| r.id == id).cloned()
    }

    /// A user's reservations ordered by check-in.
    pub async fn reservations_for_user(&self, user_id: Ulid) -> Vec<Reservation> {
        let mut out = Vec::new();
        for rs in self.room_handles() {
            let guard = rs.read().await;
            out.extend(guard.reservations.iter().filter(|r| r.user_id == user_id).cloned());
        }
        out.sort_by(|a, b| {
            a.stay
                .check_in
                .cmp(&b.stay.check_in)
                .then(a.room.cmp(&b.room))
        });
        out
    }

    pub fn get_user(&self, id: Ulid) -> Option<UserInfo> {
        self.users.get(&id).map(|u| u.value().info())
    }

    /// Resolve the principal behind an API token.
    pub fn authenticate(&self, token: &str) -> Option<UserInfo> {
        let user_id = self.tokens.get(token).map(|e| *e.value())?;
        self.get_user(user_id)
    }
}
