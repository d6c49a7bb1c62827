use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Rooms are keyed by their door number.
pub type RoomNumber = u32;

/// Half-open stay `[check_in, check_out)`. The guest leaves on `check_out`,
/// so that night is free for the next reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stay {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl Stay {
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Self {
        debug_assert!(check_in < check_out, "Stay check_in must be before check_out");
        Self { check_in, check_out }
    }

    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    pub fn overlaps(&self, other: &Stay) -> bool {
        self.check_in < other.check_out && other.check_in < self.check_out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub room: RoomNumber,
    pub user_id: Ulid,
    pub stay: Stay,
}

#[derive(Debug, Clone)]
pub struct RoomState {
    pub number: RoomNumber,
    pub price_per_night: Decimal,
    pub capacity: u32,
    /// Sorted by `stay.check_in`. Never overlapping.
    pub reservations: Vec<Reservation>,
}

impl RoomState {
    pub fn new(number: RoomNumber, price_per_night: Decimal, capacity: u32) -> Self {
        Self {
            number,
            price_per_night,
            capacity,
            reservations: Vec::new(),
        }
    }

    /// Insert keeping check-in order.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.stay.check_in <= reservation.stay.check_in);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    /// Reservations whose stay overlaps `query`.
    /// Everything from the first reservation checking in on or after
    /// `query.check_out` onwards is skipped by binary search.
    pub fn overlapping(&self, query: &Stay) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.stay.check_in < query.check_out);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.stay.check_out > query.check_in)
    }

    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            number: self.number,
            price_per_night: self.price_per_night,
            capacity: self.capacity,
        }
    }
}

/// A registered account. `password_hash` is a PHC-format argon2 string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: Ulid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

impl UserRecord {
    pub fn info(&self) -> UserInfo {
        UserInfo {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
        }
    }
}

/// WAL record format. One variant per state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        number: RoomNumber,
        #[serde(with = "rust_decimal::serde::str")]
        price_per_night: Decimal,
        capacity: u32,
    },
    RoomUpdated {
        number: RoomNumber,
        #[serde(with = "rust_decimal::serde::str")]
        price_per_night: Decimal,
        capacity: u32,
    },
    RoomDeleted {
        number: RoomNumber,
    },
    UserRegistered {
        id: Ulid,
        username: String,
        email: String,
        password_hash: String,
    },
    UserDeleted {
        id: Ulid,
    },
    TokenIssued {
        user_id: Ulid,
        token: String,
    },
    TokenRevoked {
        token: String,
    },
    ReservationCreated {
        id: Ulid,
        room: RoomNumber,
        user_id: Ulid,
        stay: Stay,
    },
    ReservationCancelled {
        id: Ulid,
        room: RoomNumber,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub number: RoomNumber,
    #[serde(with = "rust_decimal::serde::str")]
    pub price_per_night: Decimal,
    pub capacity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: Ulid,
    pub username: String,
    pub email: String,
}
