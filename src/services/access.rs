use chrono::{DateTime, Utc};

use crate::{
    error::{AccessError, Result},
    models::session::{Session, SessionDescriptor, SessionStatus},
    repositories::store::SessionRepository,
};

/// Length of an access code.
pub const ACCESS_CODE_LEN: usize = 8;

/// Uppercases a typed code. `None` if it cannot be an access code at all.
pub fn normalize_access_code(raw: &str) -> Option<String> {
    let code = raw.trim().to_ascii_uppercase();
    (code.len() == ACCESS_CODE_LEN && code.bytes().all(|b| b.is_ascii_alphanumeric())).then_some(code)
}

/// The gating state machine. Pure: same session and clock, same answer.
pub fn check_gate(session: &Session, now: DateTime<Utc>) -> std::result::Result<(), AccessError> {
    match session.status {
        SessionStatus::Pending => Err(AccessError::NotStarted),
        SessionStatus::Completed => Err(AccessError::Ended),
        SessionStatus::Expired | SessionStatus::Cancelled => Err(AccessError::Unavailable),
        SessionStatus::Active if !session.settings.allow_late_entry && now > session.end_time => {
            Err(AccessError::LateEntryDisallowed)
        }
        SessionStatus::Active => Ok(()),
    }
}

/// Redeems an access code: one read, then the gate.
///
/// # Arguments
///
/// * `sessions` - The session store.
/// * `access_code` - The code as typed by the participant.
/// * `now` - The current time.
///
/// # Returns
///
/// A `Result` containing the `SessionDescriptor` the form is rendered from.
pub async fn resolve(
    sessions: &dyn SessionRepository,
    access_code: &str,
    now: DateTime<Utc>,
) -> Result<SessionDescriptor> {
    let Some(code) = normalize_access_code(access_code) else {
        tracing::debug!("Rejected malformed access code");
        return Err(AccessError::NotFound.into());
    };

    let session = sessions
        .find_by_access_code(&code)
        .await?
        .ok_or(AccessError::NotFound)?;

    if let Err(denied) = check_gate(&session, now) {
        tracing::info!("🚫 Access to session {} denied: {}", session.id, denied);
        return Err(denied.into());
    }

    if let Some(broken) = session
        .questions
        .iter()
        .find_map(|q| q.check_invariants().err())
    {
        tracing::error!("Session {} has an unusable form: {}", session.id, broken);
        return Err(AccessError::Unavailable.into());
    }

    tracing::debug!("✅ Access granted to session {}", session.id);
    Ok(session.into())
}
