use std::collections::{hash_map::Entry, HashMap};

use chrono::{DateTime, Duration, Utc};
use futures::{future::BoxFuture, FutureExt};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::{
    error::Result,
    models::{
        question::{Question, QuestionCategory, QuestionType},
        response::{
            InsertOutcome, NewResponse, Response, ResponseAggregate, ResponseData, ResponseMetadata,
            ResponseStatus,
        },
        session::{OrgRefs, Session, SessionSettings, SessionStats, SessionStatus, SubmissionContext},
    },
    repositories::store::{ResponseRepository, SessionRepository},
};

/// Access code of the session seeded by [`MemoryStore::with_demo_session`].
pub const DEMO_ACCESS_CODE: &str = "DEMO123A";

type ParticipantKey = (Uuid, String);

/// Process-local store for demos and tests.
///
/// Responses are keyed by (session, anonymous ID) under one lock, which gives
/// the same all-or-nothing insert a unique index gives the SQL store.
#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<Uuid, Session>>,
    responses: Mutex<HashMap<ParticipantKey, Response>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store holding the sample session returned by [`demo_session`].
    pub async fn with_demo_session() -> Self {
        let store = Self::new();
        store.insert_session(demo_session(Utc::now())).await;
        store
    }

    pub async fn insert_session(&self, mut session: Session) {
        session.access_code = session.access_code.to_uppercase();
        self.sessions.write().await.insert(session.id, session);
    }

    pub async fn remove_session(&self, session_id: Uuid) -> Option<Session> {
        self.sessions.write().await.remove(&session_id)
    }

    pub async fn session(&self, session_id: Uuid) -> Option<Session> {
        self.sessions.read().await.get(&session_id).cloned()
    }

    pub async fn responses_for(&self, session_id: Uuid) -> Vec<Response> {
        self.responses
            .lock()
            .await
            .values()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect()
    }
}

impl SessionRepository for MemoryStore {
    fn find_by_access_code<'a>(&'a self, access_code: &'a str) -> BoxFuture<'a, Result<Option<Session>>> {
        async move {
            let sessions = self.sessions.read().await;
            Ok(sessions
                .values()
                .find(|s| s.access_code == access_code)
                .cloned())
        }
        .boxed()
    }

    fn find_submission_context(&self, session_id: Uuid) -> BoxFuture<'_, Result<Option<SubmissionContext>>> {
        async move {
            let sessions = self.sessions.read().await;
            Ok(sessions.get(&session_id).map(Session::submission_context))
        }
        .boxed()
    }

    fn write_stats<'a>(&'a self, session_id: Uuid, stats: &'a SessionStats) -> BoxFuture<'a, Result<()>> {
        async move {
            if let Some(session) = self.sessions.write().await.get_mut(&session_id) {
                session.stats = Some(stats.clone());
            }
            Ok(())
        }
        .boxed()
    }
}

impl ResponseRepository for MemoryStore {
    fn exists<'a>(&'a self, session_id: Uuid, anonymous_id: &'a str) -> BoxFuture<'a, Result<bool>> {
        async move {
            let responses = self.responses.lock().await;
            Ok(responses.contains_key(&(session_id, anonymous_id.to_string())))
        }
        .boxed()
    }

    fn insert(&self, response: NewResponse) -> BoxFuture<'_, Result<InsertOutcome>> {
        async move {
            let mut responses = self.responses.lock().await;
            let key = (response.session_id, response.student_anonymous_id.clone());

            match responses.entry(key) {
                Entry::Occupied(_) => Ok(InsertOutcome::Duplicate),
                Entry::Vacant(slot) => {
                    let now = Utc::now();
                    let stored = Response {
                        id: response.id,
                        session_id: response.session_id,
                        org: response.org,
                        student_anonymous_id: response.student_anonymous_id,
                        response_data: response.response_data,
                        metadata: response.metadata,
                        status: ResponseStatus::Submitted,
                        submitted_at: now,
                        updated_at: now,
                    };
                    slot.insert(stored.clone());
                    Ok(InsertOutcome::Inserted(stored))
                }
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
            let mut responses = self.responses.lock().await;
            Ok(responses
                .get_mut(&(session_id, anonymous_id.to_string()))
                .map(|existing| {
                    existing.response_data = response_data.clone();
                    existing.metadata = metadata.clone();
                    existing.updated_at = Utc::now();
                    existing.clone()
                }))
        }
        .boxed()
    }

    fn aggregate(&self, session_id: Uuid) -> BoxFuture<'_, Result<ResponseAggregate>> {
        async move {
            let responses = self.responses.lock().await;
            let mut total = 0i64;
            let mut timed = 0u32;
            let mut seconds = 0f64;

            for response in responses.values().filter(|r| r.session_id == session_id) {
                total += 1;
                if let Some(s) = response.metadata.completion_time_seconds {
                    timed += 1;
                    seconds += s as f64;
                }
            }

            Ok(ResponseAggregate {
                total,
                average_completion_seconds: (timed > 0).then(|| seconds / f64::from(timed)),
            })
        }
        .boxed()
    }
}

/// The sample session: code `DEMO123A`, active, late entry allowed, two
/// required 5-point ratings and one optional comment.
pub fn demo_session(now: DateTime<Utc>) -> Session {
    let rating = |id: &str, text: &str, category: QuestionCategory, priority: i32| Question {
        id: id.to_string(),
        text: text.to_string(),
        question_type: QuestionType::Rating,
        category,
        required: true,
        priority,
        scale: Some(5),
        options: Vec::new(),
    };

    Session {
        id: Uuid::new_v4(),
        access_code: DEMO_ACCESS_CODE.to_string(),
        org: OrgRefs {
            university_id: Some(Uuid::new_v4()),
            faculty_id: Some(Uuid::new_v4()),
            department_id: Some(Uuid::new_v4()),
            course_id: Uuid::new_v4(),
            teacher_id: Uuid::new_v4(),
        },
        course_name: "Introduction to Systems Programming".to_string(),
        course_code: Some("CS-210".to_string()),
        teacher_name: "Dr. Demo".to_string(),
        section: "A".to_string(),
        room: Some("B-204".to_string()),
        scheduled_date: now.date_naive(),
        start_time: now - Duration::minutes(10),
        end_time: now + Duration::minutes(50),
        duration_minutes: 60,
        questions: vec![
            rating("q1", "How clear were the explanations?", QuestionCategory::Instructor, 1),
            rating("q2", "How well was the session paced?", QuestionCategory::Delivery, 2),
            Question {
                id: "q3".to_string(),
                text: "Anything else you would like to share?".to_string(),
                question_type: QuestionType::Text,
                category: QuestionCategory::Overall,
                required: false,
                priority: 3,
                scale: None,
                options: Vec::new(),
            },
        ],
        settings: SessionSettings {
            allow_late_entry: true,
            ..SessionSettings::default()
        },
        status: SessionStatus::Active,
        expected_responses: Some(30),
        stats: None,
    }
}
