//! HTTP surface.
//!
//! ```text
//! /
//! ├── GET    /health
//! ├── POST   /auth/signup
//! ├── POST   /auth/login
//! ├── GET    /tutors
//! ├── POST   /bookings          (bearer)
//! ├── GET    /bookings          (bearer)
//! └── DELETE /bookings/:id      (bearer)
//! ```

pub mod error;
mod routes;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::{BookingView, TutorView, UserView};

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::extract::{FromRequestParts, MatchedPath, Request};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::Router;

use crate::auth::{AuthError, AuthGateway};
use crate::directory::Directory;
use crate::engine::ReservationEngine;
use crate::model::UserId;
use crate::observability;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ReservationEngine>,
    pub auth: Arc<dyn AuthGateway>,
    pub directory: Arc<dyn Directory>,
}

impl AppState {
    pub fn new(
        engine: Arc<ReservationEngine>,
        auth: Arc<dyn AuthGateway>,
        directory: Arc<dyn Directory>,
    ) -> Self {
        Self {
            engine,
            auth,
            directory,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/auth/signup", post(routes::signup))
        .route("/auth/login", post(routes::login))
        .route("/tutors", get(routes::list_tutors))
        .route(
            "/bookings",
            post(routes::create_booking).get(routes::list_bookings),
        )
        .route("/bookings/:id", delete(routes::cancel_booking))
        .route_layer(middleware::from_fn(track_metrics))
        .with_state(state)
}

/// Caller identity resolved from `Authorization: Bearer <token>`.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub UserId);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken);

        let result = match token {
            Ok(token) => state.auth.verify(token).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(user_id) => Ok(AuthUser(user_id)),
            Err(e) => {
                metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
                tracing::debug!("rejected request: {e}");
                Err(e.into())
            }
        }
    }
}

async fn track_metrics(req: Request, next: Next) -> Response {
    let started = Instant::now();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".into());
    let method = req.method().to_string();

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    metrics::counter!(
        observability::HTTP_REQUESTS_TOTAL,
        "method" => method,
        "route" => route.clone(),
        "status" => status
    )
    .increment(1);
    metrics::histogram!(observability::HTTP_REQUEST_DURATION_SECONDS, "route" => route)
        .record(started.elapsed().as_secs_f64());
    response
}
