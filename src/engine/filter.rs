use std::str::FromStr;

use rust_decimal::Decimal;

use crate::model::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Cheapest first.
    Asc,
    /// Most expensive first.
    Desc,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(format!("sort_by must be 'asc' or 'desc', got '{other}'")),
        }
    }
}

/// Conjunctive room listing filter. `None` fields don't constrain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomFilter {
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub min_capacity: Option<u32>,
    /// Exclude rooms with any reservation overlapping this stay.
    pub stay: Option<Stay>,
    pub sort: Option<SortOrder>,
}

impl RoomFilter {
    pub fn matches(&self, rs: &RoomState) -> bool {
        if self.min_price.is_some_and(|min| rs.price_per_night < min) {
            return false;
        }
        if self.max_price.is_some_and(|max| rs.price_per_night > max) {
            return false;
        }
        if self.min_capacity.is_some_and(|min| rs.capacity < min) {
            return false;
        }
        match &self.stay {
            Some(stay) => super::is_available(rs, stay),
            None => true,
        }
    }

    /// By price when a direction was requested (ties by room number),
    /// otherwise by room number.
    pub fn sort(&self, rooms: &mut [RoomInfo]) {
        match self.sort {
            Some(SortOrder::Asc) => rooms.sort_by(|a, b| {
                a.price_per_night
                    .cmp(&b.price_per_night)
                    .then(a.number.cmp(&b.number))
            }),
            Some(SortOrder::Desc) => rooms.sort_by(|a, b| {
                b.price_per_night
                    .cmp(&a.price_per_night)
                    .then(a.number.cmp(&b.number))
            }),
            None => rooms.sort_by_key(|r| r.number),
        }
    }
}
