use chrono::{DateTime, NaiveDate, Utc};
use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::question::{sort_by_priority, Question};

/// Lifecycle state of a session. Transitions are owned by the teacher-facing
/// side; this service only reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSql, FromSql)]
#[serde(rename_all = "snake_case")]
#[postgres(name = "session_status")]
pub enum SessionStatus {
    #[postgres(name = "pending")]
    Pending,
    #[postgres(name = "active")]
    Active,
    #[postgres(name = "completed")]
    Completed,
    #[postgres(name = "expired")]
    Expired,
    #[postgres(name = "cancelled")]
    Cancelled,
}

fn default_true() -> bool {
    true
}

/// Per-session behavior switches. Missing fields take the defaults below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default)]
    pub allow_late_entry: bool,
    #[serde(default = "default_true")]
    pub require_completion: bool,
    #[serde(default = "default_true")]
    pub anonymous_responses: bool,
    #[serde(default)]
    pub show_results: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            allow_late_entry: false,
            require_completion: true,
            anonymous_responses: true,
            show_results: false,
        }
    }
}

/// Aggregate counters maintained by the statistics refresher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_responses: i64,
    pub target_responses: Option<i32>,
    pub completion_rate: Option<f64>,
    pub average_completion_seconds: Option<f64>,
    pub refreshed_at: DateTime<Utc>,
}

/// Organizational references copied onto every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgRefs {
    pub university_id: Option<Uuid>,
    pub faculty_id: Option<Uuid>,
    pub department_id: Option<Uuid>,
    pub course_id: Uuid,
    pub teacher_id: Uuid,
}

/// A single scheduled evaluation window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    /// Always stored uppercase.
    pub access_code: String,
    pub org: OrgRefs,
    pub course_name: String,
    pub course_code: Option<String>,
    pub teacher_name: String,
    pub section: String,
    pub room: Option<String>,
    pub scheduled_date: NaiveDate,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_minutes: i32,
    pub questions: Vec<Question>,
    pub settings: SessionSettings,
    pub status: SessionStatus,
    pub expected_responses: Option<i32>,
    pub stats: Option<SessionStats>,
}

/// The fields the submission pipeline re-reads at write time.
#[derive(Debug, Clone)]
pub struct SubmissionContext {
    pub session_id: Uuid,
    pub org: OrgRefs,
    pub questions: Vec<Question>,
    pub expected_responses: Option<i32>,
    pub duration_minutes: i32,
}

/// What a participant receives after redeeming a code: everything needed to
/// render the form, nothing about other participants.
#[derive(Debug, Clone, Serialize)]
pub struct SessionDescriptor {
    pub id: Uuid,
    pub course_name: String,
    pub course_code: Option<String>,
    pub teacher_name: String,
    pub section: String,
    pub room: Option<String>,
    pub scheduled_date: NaiveDate,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_minutes: i32,
    pub questions: Vec<Question>,
    pub settings: SessionSettings,
}

impl Session {
    pub fn submission_context(&self) -> SubmissionContext {
        SubmissionContext {
            session_id: self.id,
            org: self.org,
            questions: self.questions.clone(),
            expected_responses: self.expected_responses,
            duration_minutes: self.duration_minutes,
        }
    }
}

impl From<Session> for SessionDescriptor {
    fn from(session: Session) -> Self {
        let mut questions = session.questions;
        sort_by_priority(&mut questions);

        Self {
            id: session.id,
            course_name: session.course_name,
            course_code: session.course_code,
            teacher_name: session.teacher_name,
            section: session.section,
            room: session.room,
            scheduled_date: session.scheduled_date,
            start_time: session.start_time,
            end_time: session.end_time,
            duration_minutes: session.duration_minutes,
            questions,
            settings: session.settings,
        }
    }
}
