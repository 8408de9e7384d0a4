use uuid::Uuid;

use crate::{error::Result, repositories::store::ResponseRepository};

/// Whether this anonymous ID already answered this session.
///
/// Only the (session, anonymous ID) pair is consulted. IP and fingerprint are
/// ignored so that classmates sharing a network or identical hardware can
/// all respond.
pub async fn has_responded(
    responses: &dyn ResponseRepository,
    session_id: Uuid,
    anonymous_id: &str,
) -> Result<bool> {
    responses.exists(session_id, anonymous_id).await
}
