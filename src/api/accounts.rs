use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::{Form, Json};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::engine::EngineError;
use crate::model::UserInfo;
use crate::observability::AUTH_FAILURES_TOTAL;

use super::reservations::{ReservationView, parse_reservation_id};
use super::{ApiError, AppState, Principal};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProfileAction {
    pub reservation_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Profile {
    pub user: UserInfo,
    pub reservations: Vec<ReservationView>,
}

/// `POST /register/`
pub async fn register(
    State(state): State<AppState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<UserInfo>), ApiError> {
    let Json(req) = body?;
    let user = state
        .engine
        .register_user(req.username.trim(), &req.email, &req.password)
        .await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// `POST /login/`
pub async fn login(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = body?;
    match state.engine.login(req.username.trim(), &req.password).await {
        Ok((_, token)) => Ok(Json(json!({ "token": token }))),
        Err(EngineError::InvalidCredentials) => {
            metrics::counter!(AUTH_FAILURES_TOTAL).increment(1);
            tracing::warn!(username = %req.username, "login failed");
            Err(ApiError::Unauthorized("invalid credentials".into()))
        }
        Err(e) => Err(e.into()),
    }
}

/// `GET /logout/`
pub async fn logout(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<Value>, ApiError> {
    state.engine.logout(&principal.token).await?;
    tracing::info!(user_id = %principal.user.id, "logged out");
    Ok(Json(json!({ "message": "logged out" })))
}

async fn profile_of(state: &AppState, principal: Principal) -> Json<Profile> {
    let reservations = state.engine.reservations_for_user(principal.user.id).await;
    Json(Profile {
        user: principal.user,
        reservations: reservations.iter().map(ReservationView::from).collect(),
    })
}

/// `GET /accounts/profile/`
pub async fn profile(State(state): State<AppState>, principal: Principal) -> Json<Profile> {
    profile_of(&state, principal).await
}

/// `POST /accounts/profile/`: cancel one of the caller's reservations, then
/// show the profile. An id that is missing, unknown, or someone else's is
/// logged and otherwise ignored.
pub async fn profile_cancel(
    State(state): State<AppState>,
    principal: Principal,
    request: Request,
) -> Result<Json<Profile>, ApiError> {
    let user_id = principal.user.id;
    let action = read_profile_action(request).await.unwrap_or_else(|reason| {
        tracing::warn!(%user_id, "profile cancel body ignored: {reason}");
        ProfileAction::default()
    });
    match action.reservation_id.as_deref().map(parse_reservation_id) {
        None => tracing::warn!(%user_id, "profile cancel without reservation_id"),
        Some(Err(e)) => tracing::warn!(%user_id, "profile cancel ignored: {e}"),
        Some(Ok(id)) => match state.engine.cancel_reservation(id, user_id).await {
            Ok(_) => {}
            Err(e @ (EngineError::ReservationNotFound(_) | EngineError::Forbidden(_))) => {
                tracing::warn!(%user_id, "profile cancel ignored: {e}");
            }
            Err(e) => return Err(e.into()),
        },
    }
    Ok(profile_of(&state, principal).await)
}

/// The profile page posts either a urlencoded form or JSON.
async fn read_profile_action(request: Request) -> Result<ProfileAction, String> {
    let is_form = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
    if is_form {
        Form::<ProfileAction>::from_request(request, &())
            .await
            .map(|Form(action)| action)
            .map_err(|e| e.body_text())
    } else {
        Json::<ProfileAction>::from_request(request, &())
            .await
            .map(|Json(action)| action)
            .map_err(|e| e.body_text())
    }
}

/// `GET /health/`
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "rooms": state.engine.room_count(),
    }))
}
