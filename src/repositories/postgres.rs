use deadpool_postgres::Pool;
use futures::{future::BoxFuture, FutureExt};
use tokio_postgres::{error::SqlState, types::FromSql, types::Json, Row};
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::{
        question::Question,
        response::{
            InsertOutcome, NewResponse, Response, ResponseAggregate, ResponseData, ResponseMetadata,
        },
        session::{OrgRefs, Session, SessionSettings, SessionStats, SubmissionContext},
    },
    repositories::store::{ResponseRepository, SessionRepository},
};

const SESSION_BY_CODE: &str = r#"
    SELECT id, access_code, university_id, faculty_id, department_id, course_id, teacher_id,
           course_name, course_code, teacher_name, section, room, scheduled_date,
           start_time, end_time, duration_minutes, questions, settings, status,
           expected_responses, stats
    FROM sessions
    WHERE access_code = $1
"#;

const SUBMISSION_CONTEXT: &str = r#"
    SELECT id, university_id, faculty_id, department_id, course_id, teacher_id,
           questions, expected_responses, duration_minutes
    FROM sessions
    WHERE id = $1
"#;

const WRITE_STATS: &str = r#"
    UPDATE sessions
    SET stats = $2, updated_at = NOW()
    WHERE id = $1
"#;

const RESPONSE_EXISTS: &str = r#"
    SELECT EXISTS(
        SELECT 1 FROM responses
        WHERE session_id = $1 AND student_anonymous_id = $2
    ) AS present
"#;

const INSERT_RESPONSE: &str = r#"
    INSERT INTO responses (
        id, session_id, university_id, faculty_id, department_id, course_id, teacher_id,
        student_anonymous_id, response_data, metadata, status
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'submitted')
    RETURNING id, session_id, university_id, faculty_id, department_id, course_id, teacher_id,
              student_anonymous_id, response_data, metadata, status, submitted_at, updated_at
"#;

const UPDATE_RESPONSE: &str = r#"
    UPDATE responses
    SET response_data = $3, metadata = $4, updated_at = NOW()
    WHERE session_id = $1 AND student_anonymous_id = $2
    RETURNING id, session_id, university_id, faculty_id, department_id, course_id, teacher_id,
              student_anonymous_id, response_data, metadata, status, submitted_at, updated_at
"#;

const AGGREGATE_RESPONSES: &str = r#"
    SELECT COUNT(*) AS total,
           AVG((metadata->>'completion_time_seconds')::float8) AS average_seconds
    FROM responses
    WHERE session_id = $1
"#;

/// Reads a column, reporting the column name when it is absent or undecodable.
fn col<'a, T: FromSql<'a>>(row: &'a Row, name: &str) -> Result<T> {
    row.try_get(name)
        .map_err(|_| AppError::MissingData(name.to_string()))
}

fn row_to_org(row: &Row) -> Result<OrgRefs> {
    Ok(OrgRefs {
        university_id: col(row, "university_id")?,
        faculty_id: col(row, "faculty_id")?,
        department_id: col(row, "department_id")?,
        course_id: col(row, "course_id")?,
        teacher_id: col(row, "teacher_id")?,
    })
}

fn row_to_session(row: &Row) -> Result<Session> {
    let Json(questions): Json<Vec<Question>> = col(row, "questions")?;
    let settings: Option<Json<SessionSettings>> = col(row, "settings")?;
    let stats: Option<Json<SessionStats>> = col(row, "stats")?;

    Ok(Session {
        id: col(row, "id")?,
        access_code: col(row, "access_code")?,
        org: row_to_org(row)?,
        course_name: col(row, "course_name")?,
        course_code: col(row, "course_code")?,
        teacher_name: col(row, "teacher_name")?,
        section: col(row, "section")?,
        room: col(row, "room")?,
        scheduled_date: col(row, "scheduled_date")?,
        start_time: col(row, "start_time")?,
        end_time: col(row, "end_time")?,
        duration_minutes: col(row, "duration_minutes")?,
        questions,
        settings: settings.map(|Json(s)| s).unwrap_or_default(),
        status: col(row, "status")?,
        expected_responses: col(row, "expected_responses")?,
        stats: stats.map(|Json(s)| s),
    })
}

fn row_to_response(row: &Row) -> Result<Response> {
    let Json(response_data): Json<ResponseData> = col(row, "response_data")?;
    let Json(metadata): Json<ResponseMetadata> = col(row, "metadata")?;

    Ok(Response {
        id: col(row, "id")?,
        session_id: col(row, "session_id")?,
        org: row_to_org(row)?,
        student_anonymous_id: col(row, "student_anonymous_id")?,
        response_data,
        metadata,
        status: col(row, "status")?,
        submitted_at: col(row, "submitted_at")?,
        updated_at: col(row, "updated_at")?,
    })
}

/// PostgreSQL-backed store. Uniqueness of responses per participant rests on
/// the `responses_session_participant_key` constraint.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

impl SessionRepository for PgStore {
    fn find_by_access_code<'a>(&'a self, access_code: &'a str) -> BoxFuture<'a, Result<Option<Session>>> {
        async move {
            let client = self.pool.get().await?;
            let stmt = client.prepare_cached(SESSION_BY_CODE).await?;
            let row = client.query_opt(&stmt, &[&access_code]).await?;
            row.map(|r| row_to_session(&r)).transpose()
        }
        .boxed()
    }

    fn find_submission_context(&self, session_id: Uuid) -> BoxFuture<'_, Result<Option<SubmissionContext>>> {
        async move {
            let client = self.pool.get().await?;
            let stmt = client.prepare_cached(SUBMISSION_CONTEXT).await?;
            let row = client.query_opt(&stmt, &[&session_id]).await?;

            row.map(|r| {
                let Json(questions): Json<Vec<Question>> = col(&r, "questions")?;
                Ok(SubmissionContext {
                    session_id: col(&r, "id")?,
                    org: row_to_org(&r)?,
                    questions,
                    expected_responses: col(&r, "expected_responses")?,
                    duration_minutes: col(&r, "duration_minutes")?,
                })
            })
            .transpose()
        }
        .boxed()
    }

    fn write_stats<'a>(&'a self, session_id: Uuid, stats: &'a SessionStats) -> BoxFuture<'a, Result<()>> {
        async move {
            let client = self.pool.get().await?;
            let stmt = client.prepare_cached(WRITE_STATS).await?;
            client.execute(&stmt, &[&session_id, &Json(stats)]).await?;
            Ok(())
        }
        .boxed()
    }
}

impl ResponseRepository for PgStore {
    fn exists<'a>(&'a self, session_id: Uuid, anonymous_id: &'a str) -> BoxFuture<'a, Result<bool>> {
        async move {
            let client = self.pool.get().await?;
            let stmt = client.prepare_cached(RESPONSE_EXISTS).await?;
            let row = client.query_one(&stmt, &[&session_id, &anonymous_id]).await?;
            col(&row, "present")
        }
        .boxed()
    }

    fn insert(&self, response: NewResponse) -> BoxFuture<'_, Result<InsertOutcome>> {
        async move {
            let client = self.pool.get().await?;
            let stmt = client.prepare_cached(INSERT_RESPONSE).await?;
            let inserted = client
                .query_one(
                    &stmt,
                    &[
                        &response.id,
                        &response.session_id,
                        &response.org.university_id,
                        &response.org.faculty_id,
                        &response.org.department_id,
                        &response.org.course_id,
                        &response.org.teacher_id,
                        &response.student_anonymous_id,
                        &Json(&response.response_data),
                        &Json(&response.metadata),
                    ],
                )
                .await;

            match inserted {
                Ok(row) => Ok(InsertOutcome::Inserted(row_to_response(&row)?)),
                Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => {
                    tracing::debug!(
                        "Unique constraint rejected response for session {}",
                        response.session_id
                    );
                    Ok(InsertOutcome::Duplicate)
                }
                Err(e) => Err(e.into()),
            }
        }
        .boxed()
    }

    fn update<'a>(
        &'a self,
        session_id: Uuid,
        anonymous_id: &'a str,
        response_data: &'a ResponseData,
        metadata: &'a ResponseMetadata,
    ) -> BoxFuture<'a, Result<Option<Response>>> {
        async move {
            let client = self.pool.get().await?;
            let stmt = client.prepare_cached(UPDATE_RESPONSE).await?;
            let row = client
                .query_opt(
                    &stmt,
                    &[&session_id, &anonymous_id, &Json(response_data), &Json(metadata)],
                )
                .await?;
            row.map(|r| row_to_response(&r)).transpose()
        }
        .boxed()
    }

    fn aggregate(&self, session_id: Uuid) -> BoxFuture<'_, Result<ResponseAggregate>> {
        async move {
            let client = self.pool.get().await?;
            let stmt = client.prepare_cached(AGGREGATE_RESPONSES).await?;
            let row = client.query_one(&stmt, &[&session_id]).await?;
            Ok(ResponseAggregate {
                total: col(&row, "total")?,
                average_completion_seconds: col(&row, "average_seconds")?,
            })
        }
        .boxed()
    }
}
