use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use garde::Validate;
use serde::Deserialize;
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::response::Ack,
    services::{
        identity::AnonymousIdentityProvider,
        metadata::{ClientContext, ClientSignals},
        submission::RawAnswers,
    },
    state::AppState,
};

/// Upper bound on answers per payload.
const MAX_ANSWERS: usize = 200;

/// The request payload of the form screen.
#[derive(Deserialize, Debug, Validate)]
pub struct SubmitRequest {
    #[garde(skip)]
    pub response_data: RawAnswers,
    /// The `started_at` handed out when the code was redeemed.
    #[garde(skip)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    #[garde(dive)]
    pub client: ClientSignals,
}

impl SubmitRequest {
    fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;
        if self.response_data.len() > MAX_ANSWERS {
            return Err(AppError::Validation(format!(
                "At most {} answers may be submitted",
                MAX_ANSWERS
            )));
        }
        Ok(())
    }
}

fn ack_response(status: StatusCode, message: &str, ack: &Ack) -> Result<Response> {
    let body = sonic_rs::to_string(&sonic_rs::json!({
        "message": message,
        "response_id": ack.response_id.to_string(),
        "submitted_at": ack.submitted_at.to_rfc3339()
    }))
    .map_err(|e| AppError::Internal(format!("Failed to encode acknowledgement: {}", e)))?;

    Ok((status, [(http::header::CONTENT_TYPE, "application/json")], body).into_response())
}

/// Submits the participant's response.
#[axum::debug_handler]
pub async fn submit_response(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    cookies: Cookies,
    client: ClientContext,
    Json(req): Json<SubmitRequest>,
) -> Result<Response> {
    req.check()?;

    let anonymous_id = state.identity(cookies).get_or_create();
    let metadata = state
        .metadata
        .collect(&client, &req.client, req.started_at, Utc::now());

    let ack = state
        .pipeline
        .submit(session_id, &anonymous_id, &req.response_data, metadata)
        .await?;

    ack_response(StatusCode::CREATED, "Thank you for your feedback!", &ack)
}

/// Replaces the participant's earlier response.
#[axum::debug_handler]
pub async fn update_response(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    cookies: Cookies,
    client: ClientContext,
    Json(req): Json<SubmitRequest>,
) -> Result<Response> {
    req.check()?;

    let anonymous_id = state.identity(cookies).get_or_create();
    let metadata = state
        .metadata
        .collect(&client, &req.client, req.started_at, Utc::now());

    let ack = state
        .pipeline
        .update(session_id, &anonymous_id, &req.response_data, metadata)
        .await?;

    ack_response(StatusCode::OK, "Your feedback has been updated.", &ack)
}
