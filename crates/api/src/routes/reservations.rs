//! Reservation endpoints.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use library::{LibraryMessage, MemberId, Reservation};
use saga_engine::{SagaInstance, SagaStore};
use serde::{Deserialize, Serialize};

use super::parse_id;
use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct RequestReservation {
    pub reservation_id: Option<String>,
    pub book_id: String,
    pub member_id: String,
    pub duration_hours: Option<u64>,
}

#[derive(Serialize)]
pub struct ReservationAccepted {
    pub reservation_id: String,
}

#[derive(Serialize)]
pub struct ReservationResponse {
    pub id: String,
    pub state: String,
    pub book_id: Option<String>,
    pub member_id: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub reserved: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl From<SagaInstance<Reservation>> for ReservationResponse {
    fn from(reservation: SagaInstance<Reservation>) -> Self {
        let data = reservation.data;
        Self {
            id: reservation.correlation_id.to_string(),
            state: reservation.state.to_string(),
            book_id: data.book_id.map(|id| id.to_string()),
            member_id: data.member_id.map(|id| id.to_string()),
            created: data.created,
            reserved: data.reserved,
            expires_at: data.expires_at,
            version: reservation.version.as_i64(),
        }
    }
}

/// POST /reservations: ask to hold a book for a member.
#[tracing::instrument(skip(state, req))]
pub async fn request<S: SagaStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<RequestReservation>,
) -> Result<(StatusCode, Json<ReservationAccepted>), ApiError> {
    let book_id = parse_id("book_id", &req.book_id)?;
    let member_id = MemberId::from_uuid(parse_id("member_id", &req.member_id)?.as_uuid());
    let reservation_id = match req.reservation_id.as_deref() {
        Some(id) => parse_id("reservation_id", id)?,
        None => common::CorrelationId::new(),
    };
    let now = state.clock.now();
    let duration = req
        .duration_hours
        .map(|hours| hold_duration(hours, now))
        .transpose()?;

    let message = LibraryMessage::reservation_requested(
        reservation_id,
        book_id,
        member_id,
        now,
        duration,
    );
    state.publish(message).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ReservationAccepted {
            reservation_id: reservation_id.to_string(),
        }),
    ))
}

/// Converts a requested hold, rejecting one whose deadline cannot be represented.
fn hold_duration(hours: u64, now: DateTime<Utc>) -> Result<Duration, ApiError> {
    if hours == 0 {
        return Err(ApiError::BadRequest(
            "duration_hours must be positive".to_string(),
        ));
    }
    let too_long = || ApiError::BadRequest(format!("duration_hours {hours} is too long"));
    let duration = hours
        .checked_mul(3600)
        .map(Duration::from_secs)
        .ok_or_else(too_long)?;
    chrono::TimeDelta::from_std(duration)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .ok_or_else(too_long)?;
    Ok(duration)
}

/// GET /reservations/:id: current state of a reservation.
#[tracing::instrument(skip(state))]
pub async fn get<S: SagaStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<ReservationResponse>, ApiError> {
    let reservation_id = parse_id("reservation id", &id)?;
    let reservation = state
        .library
        .reservation(reservation_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Reservation {id} not found")))?;

    Ok(Json(reservation.into()))
}

/// POST /reservations/:id/cancel: ask to cancel a reservation.
#[tracing::instrument(skip(state))]
pub async fn cancel<S: SagaStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let reservation_id = parse_id("reservation id", &id)?;

    let message = LibraryMessage::cancellation_requested(reservation_id, state.clock.now());
    state.publish(message).await?;

    Ok(StatusCode::ACCEPTED)
}
