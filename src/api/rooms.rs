use std::str::FromStr;

use axum::Json;
use axum::extract::{Query, State};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::engine::{RoomFilter, SortOrder, validate_stay};
use crate::model::RoomInfo;

use super::{ApiError, AppState};

/// Raw query string. Everything arrives as text so bad values get a
/// field-specific message.
#[derive(Debug, Default, Deserialize)]
pub struct RoomQuery {
    pub min_price: Option<String>,
    pub max_price: Option<String>,
    pub min_capacity: Option<String>,
    pub check_in_date: Option<String>,
    pub check_out_date: Option<String>,
    pub sort_by: Option<String>,
}

/// Blank parameters count as absent.
fn field<'a>(raw: &'a Option<String>) -> Option<&'a str> {
    raw.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn parse_field<T: FromStr>(raw: &Option<String>, name: &str) -> Result<Option<T>, ApiError> {
    field(raw)
        .map(|s| {
            s.parse()
                .map_err(|_| ApiError::Validation(format!("invalid {name}: '{s}'")))
        })
        .transpose()
}

pub fn parse_date(raw: &str, name: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::Validation(format!("{name} must be a date in YYYY-MM-DD format")))
}

impl RoomQuery {
    pub fn into_filter(self) -> Result<RoomFilter, ApiError> {
        let min_price: Option<Decimal> = parse_field(&self.min_price, "min_price")?;
        let max_price: Option<Decimal> = parse_field(&self.max_price, "max_price")?;
        if [min_price, max_price].iter().flatten().any(|p| p.is_sign_negative() && !p.is_zero()) {
            return Err(ApiError::Validation("price bounds must not be negative".into()));
        }
        let min_capacity: Option<u32> = parse_field(&self.min_capacity, "min_capacity")?;
        let sort = field(&self.sort_by)
            .map(SortOrder::from_str)
            .transpose()
            .map_err(ApiError::Validation)?;

        // The date filter applies only when both ends are given.
        let stay = match (field(&self.check_in_date), field(&self.check_out_date)) {
            (Some(check_in), Some(check_out)) => {
                let check_in = parse_date(check_in, "check_in_date")?;
                let check_out = parse_date(check_out, "check_out_date")?;
                Some(validate_stay(check_in, check_out)?)
            }
            _ => None,
        };

        Ok(RoomFilter { min_price, max_price, min_capacity, stay, sort })
    }
}

/// `GET /rooms/`
pub async fn list_rooms(
    State(state): State<AppState>,
    query: Result<Query<RoomQuery>, axum::extract::rejection::QueryRejection>,
) -> Result<Json<Vec<RoomInfo>>, ApiError> {
    let Query(query) = query?;
    let filter = query.into_filter()?;
    Ok(Json(state.engine.list_rooms(&filter).await))
}
