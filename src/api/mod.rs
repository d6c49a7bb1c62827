//! HTTP surface: axum routes over a shared [`Engine`].

mod accounts;
mod error;
mod principal;
mod reservations;
mod rooms;

pub use accounts::{LoginRequest, Profile, RegisterRequest};
pub use error::ApiError;
pub use principal::{Principal, parse_authorization};
pub use reservations::{CreateReservation, ReservationView};
pub use rooms::RoomQuery;

use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::engine::Engine;
use crate::observability::track_requests;

#[derive(Debug, Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/rooms/", get(rooms::list_rooms))
        .route(
            "/reservations/",
            get(reservations::list).post(reservations::create),
        )
        .route(
            "/reservations/{id}/",
            get(reservations::get).delete(reservations::cancel),
        )
        .route("/register/", post(accounts::register))
        .route("/login/", post(accounts::login))
        .route("/logout/", get(accounts::logout))
        .route(
            "/accounts/profile/",
            get(accounts::profile).post(accounts::profile_cancel),
        )
        .route("/health/", get(accounts::health))
        .route_layer(middleware::from_fn(track_requests))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
