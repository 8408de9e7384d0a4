use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::session::OrgRefs;

/// A single answer. Ratings are integers; every other question type is text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Answer {
    Rating(i64),
    Text(String),
}

/// Question ID to answer.
pub type ResponseData = BTreeMap<String, Answer>;

/// Coarse device class derived from the user agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Mobile,
    Tablet,
    Desktop,
}

/// Collection metadata recorded with a response. Advisory only: nothing
/// here is used to gate access or to identify a participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub ip: String,
    pub user_agent: String,
    pub fingerprint: String,
    pub device_type: DeviceType,
    pub started_at: Option<DateTime<Utc>>,
    pub completion_time_seconds: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSql, FromSql)]
#[serde(rename_all = "snake_case")]
#[postgres(name = "response_status")]
pub enum ResponseStatus {
    #[postgres(name = "submitted")]
    Submitted,
}

/// One participant's submission for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: Uuid,
    pub session_id: Uuid,
    pub org: OrgRefs,
    pub student_anonymous_id: String,
    pub response_data: ResponseData,
    pub metadata: ResponseMetadata,
    pub status: ResponseStatus,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A response that has been validated but not yet persisted.
#[derive(Debug, Clone)]
pub struct NewResponse {
    pub id: Uuid,
    pub session_id: Uuid,
    pub org: OrgRefs,
    pub student_anonymous_id: String,
    pub response_data: ResponseData,
    pub metadata: ResponseMetadata,
}

/// What an insert attempt produced.
#[derive(Debug)]
pub enum InsertOutcome {
    Inserted(Response),
    /// The (session, anonymous ID) pair already had a row.
    Duplicate,
}

/// Count and timing aggregates over a session's responses.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResponseAggregate {
    pub total: i64,
    pub average_completion_seconds: Option<f64>,
}

/// Acknowledgement returned to the participant.
#[derive(Debug, Clone, Serialize)]
pub struct Ack {
    pub response_id: Uuid,
    pub submitted_at: DateTime<Utc>,
}
