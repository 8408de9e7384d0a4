use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use tower_cookies::Cookies;

use crate::{
    error::{AppError, Result, SubmitError},
    models::session::SessionDescriptor,
    services::{access as access_service, duplicate::has_responded, identity::AnonymousIdentityProvider},
    state::AppState,
};

/// The request payload of the code-entry screen.
#[derive(Deserialize, Debug, Validate)]
pub struct AccessRequest {
    #[garde(length(min = 1, max = 32))]
    pub access_code: String,
}

/// Everything the form screen needs.
#[derive(Serialize)]
pub struct AccessResponse {
    pub session: SessionDescriptor,
    /// Echoed back on submission to measure completion time.
    pub started_at: DateTime<Utc>,
}

/// Redeems an access code for the current participant.
///
/// Issues the anonymous ID cookie on first contact and short-circuits with
/// `already_submitted` if this browser already answered the session.
#[axum::debug_handler]
pub async fn redeem_code(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(req): Json<AccessRequest>,
) -> Result<Response> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let anonymous_id = state.identity(cookies).get_or_create();
    let now = Utc::now();

    let session = access_service::resolve(state.sessions.as_ref(), &req.access_code, now).await?;

    if has_responded(state.responses.as_ref(), session.id, &anonymous_id).await? {
        tracing::info!("🔁 Participant already answered session {}", session.id);
        return Err(SubmitError::AlreadySubmitted.into());
    }

    let body = sonic_rs::to_string(&AccessResponse {
        session,
        started_at: now,
    })
    .map_err(|e| AppError::Internal(format!("Failed to encode session: {}", e)))?;

    Ok((StatusCode::OK, [(http::header::CONTENT_TYPE, "application/json")], body).into_response())
}
