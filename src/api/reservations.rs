use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use ulid::Ulid;

use crate::engine::validate_stay;
use crate::model::{Reservation, RoomNumber};

use super::{ApiError, AppState, Principal};

#[derive(Debug, Deserialize)]
pub struct CreateReservation {
    pub room: RoomNumber,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationView {
    pub id: Ulid,
    pub room: RoomNumber,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
}

impl From<&Reservation> for ReservationView {
    fn from(r: &Reservation) -> Self {
        Self {
            id: r.id,
            room: r.room,
            check_in_date: r.stay.check_in,
            check_out_date: r.stay.check_out,
        }
    }
}

pub fn parse_reservation_id(raw: &str) -> Result<Ulid, ApiError> {
    Ulid::from_string(raw.trim())
        .map_err(|_| ApiError::Validation(format!("invalid reservation id: '{raw}'")))
}

/// `POST /reservations/`
pub async fn create(
    State(state): State<AppState>,
    principal: Principal,
    body: Result<Json<CreateReservation>, JsonRejection>,
) -> Result<(StatusCode, Json<ReservationView>), ApiError> {
    let Json(req) = body?;
    if req.room == 0 {
        return Err(ApiError::Validation("room must be a positive integer".into()));
    }
    let stay = validate_stay(req.check_in_date, req.check_out_date)?;
    let reservation = state
        .engine
        .create_reservation(req.room, principal.user.id, stay)
        .await?;
    Ok((StatusCode::CREATED, Json(ReservationView::from(&reservation))))
}

/// `GET /reservations/`
pub async fn list(
    State(state): State<AppState>,
    principal: Principal,
) -> Json<Vec<ReservationView>> {
    let reservations = state.engine.reservations_for_user(principal.user.id).await;
    Json(reservations.iter().map(ReservationView::from).collect())
}

/// `GET /reservations/{id}/`
pub async fn get(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<String>,
) -> Result<Json<ReservationView>, ApiError> {
    let id = parse_reservation_id(&id)?;
    let reservation = state
        .engine
        .get_reservation(id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("reservation not found: {id}")))?;
    if reservation.user_id != principal.user.id {
        return Err(ApiError::Forbidden("you do not own this reservation".into()));
    }
    Ok(Json(ReservationView::from(&reservation)))
}

/// `DELETE /reservations/{id}/`
pub async fn cancel(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_reservation_id(&id)?;
    state.engine.cancel_reservation(id, principal.user.id).await?;
    Ok(Json(json!({ "message": "reservation cancelled" })))
}
