use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use ulid::Ulid;

use crate::auth::Credentials;
use crate::engine::EngineError;
use crate::limits::{MAX_PASSWORD_LEN, MIN_PASSWORD_LEN};
use crate::model::*;
use crate::store::{ReservationStore, StoreError};

use super::{ApiError, ApiResult, AppState, AuthUser};

/// Wall-clock times travel as `HH:MM`, from `00:00` to `23:59`.
///
/// Bookings live inside one calendar date, so the latest expressible end is
/// `23:59`. `24:00` is rejected with a message saying so rather than rolled
/// over to the next day.
mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(time: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        if raw.trim() == "24:00" {
            return Err(serde::de::Error::custom(
                "invalid time \"24:00\": the latest time of day is 23:59",
            ));
        }
        NaiveTime::parse_from_str(&raw, FORMAT)
            .map_err(|_| serde::de::Error::custom(format!("invalid time {raw:?}, expected HH:MM")))
    }
}

// ── DTOs ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    pub tutor_id: Ulid,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserView {
    pub id: UserId,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TutorView {
    pub id: TutorId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingView {
    pub id: BookingId,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub user: UserView,
    pub tutor: TutorView,
}

impl BookingView {
    /// Join a booking with its parties. A party removed since the booking
    /// was read shows up with an empty email or name.
    fn resolve(store: &ReservationStore, booking: Booking) -> Self {
        let email = store
            .get_user(&booking.user_id)
            .map(|u| u.email)
            .unwrap_or_default();
        let name = store
            .get_tutor(&booking.tutor_id)
            .map(|t| t.name)
            .unwrap_or_default();
        Self {
            id: booking.id,
            date: booking.date,
            start_time: booking.start,
            end_time: booking.end,
            user: UserView {
                id: booking.user_id,
                email,
            },
            tutor: TutorView {
                id: booking.tutor_id,
                name,
            },
        }
    }
}

// ── Handlers ─────────────────────────────────────────────

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn signup(
    State(state): State<AppState>,
    payload: Result<Json<SignupRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Json(req) = payload?;
    let email = req.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(EngineError::Validation("invalid email".into()).into());
    }
    let password_len = req.password.chars().count();
    if password_len < MIN_PASSWORD_LEN {
        return Err(EngineError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters long"
        ))
        .into());
    }
    if password_len > MAX_PASSWORD_LEN {
        return Err(EngineError::Validation("password too long".into()).into());
    }
    let store = state.engine.store();
    // Cheap pre-check so a taken email does not pay for a hash. The store
    // still enforces uniqueness on insert.
    if store.find_user_by_email(email).is_some() {
        return Err(StoreError::EmailTaken(email.to_lowercase()).into());
    }
    let credential = state.auth.hash_password(&req.password).await?;
    let user = store.register_user_with_credential(email, credential).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "user registered", "id": user.id })),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Json(req) = payload?;
    let token = state
        .auth
        .issue(&Credentials {
            email: req.email,
            password: req.password,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "access_token": token }))))
}

pub async fn list_tutors(State(state): State<AppState>) -> Json<Vec<TutorView>> {
    let tutors = state
        .directory
        .list_tutors()
        .await
        .into_iter()
        .map(|t| TutorView {
            id: t.id,
            name: t.name,
        })
        .collect();
    Json(tutors)
}

pub async fn create_booking(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    payload: Result<Json<CreateBookingRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<BookingView>)> {
    let Json(req) = payload?;
    let booking = state
        .engine
        .create(req.tutor_id, user_id, req.date, req.start_time, req.end_time)
        .await?;
    let view = BookingView::resolve(state.engine.store(), booking);
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn list_bookings(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Json<Vec<BookingView>> {
    let store = state.engine.store();
    let views = state
        .engine
        .list(user_id)
        .await
        .into_iter()
        .map(|b| BookingView::resolve(store, b))
        .collect();
    Json(views)
}

pub async fn cancel_booking(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    // An id that cannot exist is simply not found.
    let id: BookingId = id
        .parse()
        .map_err(|_| ApiError::NotFound("booking not found".into()))?;
    state.engine.cancel(id, user_id).await?;
    Ok(Json(json!({ "message": "booking cancelled" })))
}
