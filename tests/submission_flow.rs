use std::sync::Arc;

use chrono::{Duration, Utc};
use classpulse::{
    error::{AccessError, AppError, Result, SubmitError},
    models::{
        response::{Answer, DeviceType, NewResponse, ResponseMetadata},
        session::{Session, SessionStats, SessionStatus, SubmissionContext},
    },
    repositories::{
        memory::{demo_session, MemoryStore, DEMO_ACCESS_CODE},
        store::{ResponseRepository, SessionRepository},
    },
    services::{access, duplicate::has_responded, submission::{RawAnswers, SubmissionPipeline}},
};
use futures::{future::BoxFuture, FutureExt};
use serde_json::json;
use uuid::Uuid;

fn metadata(completion_time_seconds: Option<i64>) -> ResponseMetadata {
    ResponseMetadata {
        ip: "unknown".to_string(),
        user_agent: "integration-test".to_string(),
        fingerprint: "0000000000000000".to_string(),
        device_type: DeviceType::Desktop,
        started_at: None,
        completion_time_seconds,
    }
}

fn answers(value: serde_json::Value) -> RawAnswers {
    serde_json::from_value(value).unwrap()
}

/// Reads like the memory store but refuses every stats write.
struct StatsWriteFails(Arc<MemoryStore>);

impl SessionRepository for StatsWriteFails {
    fn find_by_access_code<'a>(&'a self, access_code: &'a str) -> BoxFuture<'a, Result<Option<Session>>> {
        self.0.find_by_access_code(access_code)
    }

    fn find_submission_context(&self, session_id: Uuid) -> BoxFuture<'_, Result<Option<SubmissionContext>>> {
        self.0.find_submission_context(session_id)
    }

    fn write_stats<'a>(&'a self, _session_id: Uuid, _stats: &'a SessionStats) -> BoxFuture<'a, Result<()>> {
        async { Err(AppError::Internal("stats table unavailable".to_string())) }.boxed()
    }
}

async fn wait_for_total(store: &MemoryStore, session_id: Uuid, expected: i64) -> bool {
    for _ in 0..100 {
        let total = store
            .session(session_id)
            .await
            .and_then(|s| s.stats)
            .map(|s| s.total_responses);
        if total == Some(expected) {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    false
}

fn pipeline(store: &Arc<MemoryStore>) -> SubmissionPipeline {
    let sessions: Arc<dyn SessionRepository> = store.clone();
    let responses: Arc<dyn ResponseRepository> = store.clone();
    SubmissionPipeline::new(sessions, responses)
}

#[tokio::test]
async fn demo_session_accepts_one_response_per_participant() {
    let store = Arc::new(MemoryStore::with_demo_session().await);
    let pipeline = pipeline(&store);

    let descriptor = access::resolve(store.as_ref(), "demo123a", Utc::now())
        .await
        .unwrap();
    assert_eq!(descriptor.questions.len(), 3);
    assert_eq!(descriptor.questions[0].id, "q1");

    let ack = pipeline
        .submit(
            descriptor.id,
            "student_abc_123456",
            &answers(json!({ "q1": 5, "q2": 4 })),
            metadata(Some(75)),
        )
        .await
        .unwrap();

    let stored = store.responses_for(descriptor.id).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, ack.response_id);
    assert_eq!(stored[0].response_data.get("q1"), Some(&Answer::Rating(5)));
    assert!(!stored[0].response_data.contains_key("q3"));

    assert!(has_responded(store.as_ref(), descriptor.id, "student_abc_123456")
        .await
        .unwrap());

    let again = pipeline
        .submit(
            descriptor.id,
            "student_abc_123456",
            &answers(json!({ "q1": 1, "q2": 1 })),
            metadata(None),
        )
        .await;
    assert!(matches!(
        again,
        Err(AppError::Submit(SubmitError::AlreadySubmitted))
    ));
    assert_eq!(store.responses_for(descriptor.id).await.len(), 1);
}

#[tokio::test]
async fn concurrent_submissions_store_exactly_one_response() {
    let store = Arc::new(MemoryStore::with_demo_session().await);
    let pipeline = pipeline(&store);
    let session_id = access::resolve(store.as_ref(), DEMO_ACCESS_CODE, Utc::now())
        .await
        .unwrap()
        .id;

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                pipeline
                    .submit(
                        session_id,
                        "student_race_000000",
                        &answers(json!({ "q1": 1 + i % 5, "q2": 3 })),
                        metadata(None),
                    )
                    .await
            })
        })
        .collect();

    let mut accepted = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(AppError::Submit(SubmitError::AlreadySubmitted)) => duplicates += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(accepted, 1);
    assert_eq!(duplicates, 15);
    assert_eq!(store.responses_for(session_id).await.len(), 1);
}

#[tokio::test]
async fn pending_session_is_not_started() {
    let store = MemoryStore::new();
    let mut session = demo_session(Utc::now());
    session.status = SessionStatus::Pending;
    session.start_time = Utc::now() + Duration::minutes(30);
    store.insert_session(session).await;

    let err = access::resolve(&store, DEMO_ACCESS_CODE, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Access(AccessError::NotStarted)));
}

#[tokio::test]
async fn removed_session_rejects_submission() {
    let store = Arc::new(MemoryStore::with_demo_session().await);
    let pipeline = pipeline(&store);
    let session_id = access::resolve(store.as_ref(), DEMO_ACCESS_CODE, Utc::now())
        .await
        .unwrap()
        .id;

    store.remove_session(session_id).await;

    let result = pipeline
        .submit(
            session_id,
            "student_late_111111",
            &answers(json!({ "q1": 4, "q2": 4 })),
            metadata(None),
        )
        .await;
    assert!(matches!(
        result,
        Err(AppError::Submit(SubmitError::SessionNotFound))
    ));
}

#[tokio::test]
async fn missing_required_answers_are_listed() {
    let store = Arc::new(MemoryStore::with_demo_session().await);
    let pipeline = pipeline(&store);
    let session_id = access::resolve(store.as_ref(), DEMO_ACCESS_CODE, Utc::now())
        .await
        .unwrap()
        .id;

    let result = pipeline
        .submit(
            session_id,
            "student_partial_222222",
            &answers(json!({ "q1": 4, "q3": "great" })),
            metadata(None),
        )
        .await;

    match result {
        Err(AppError::Submit(SubmitError::IncompleteResponse { missing })) => {
            assert_eq!(missing, vec!["q2".to_string()]);
        }
        other => panic!("expected incomplete response, got {other:?}"),
    }
    assert!(store.responses_for(session_id).await.is_empty());
}

#[tokio::test]
async fn update_overwrites_without_inserting() {
    let store = Arc::new(MemoryStore::with_demo_session().await);
    let pipeline = pipeline(&store);
    let session_id = access::resolve(store.as_ref(), DEMO_ACCESS_CODE, Utc::now())
        .await
        .unwrap()
        .id;

    let missing = pipeline
        .update(
            session_id,
            "student_edit_333333",
            &answers(json!({ "q1": 2, "q2": 2 })),
            metadata(None),
        )
        .await;
    assert!(matches!(
        missing,
        Err(AppError::Submit(SubmitError::ResponseNotFound))
    ));

    let first = pipeline
        .submit(
            session_id,
            "student_edit_333333",
            &answers(json!({ "q1": 2, "q2": 2 })),
            metadata(None),
        )
        .await
        .unwrap();
    let updated = pipeline
        .update(
            session_id,
            "student_edit_333333",
            &answers(json!({ "q1": 5, "q2": 5, "q3": "changed my mind" })),
            metadata(Some(40)),
        )
        .await
        .unwrap();

    assert_eq!(updated.response_id, first.response_id);
    let stored = store.responses_for(session_id).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].response_data.get("q1"), Some(&Answer::Rating(5)));
    assert_eq!(
        stored[0].response_data.get("q3"),
        Some(&Answer::Text("changed my mind".to_string()))
    );
}

#[tokio::test]
async fn stats_refresh_counts_responses() {
    let store = Arc::new(MemoryStore::with_demo_session().await);
    let pipeline = pipeline(&store);
    let session_id = access::resolve(store.as_ref(), DEMO_ACCESS_CODE, Utc::now())
        .await
        .unwrap()
        .id;

    for (participant, seconds) in [("student_a_000001", 30), ("student_b_000002", 90)] {
        pipeline
            .submit(
                session_id,
                participant,
                &answers(json!({ "q1": 3, "q2": 3 })),
                metadata(Some(seconds)),
            )
            .await
            .unwrap();
    }

    let stats = pipeline.stats().refresh(session_id).await.unwrap().unwrap();
    assert_eq!(stats.total_responses, 2);
    assert_eq!(stats.target_responses, Some(30));
    assert_eq!(stats.average_completion_seconds, Some(60.0));

    let session = store.session(session_id).await.unwrap();
    assert_eq!(session.stats.map(|s| s.total_responses), Some(2));
}

#[tokio::test]
async fn accepted_submission_refreshes_stats_in_background() {
    let store = Arc::new(MemoryStore::with_demo_session().await);
    let pipeline = pipeline(&store);
    let session_id = access::resolve(store.as_ref(), DEMO_ACCESS_CODE, Utc::now())
        .await
        .unwrap()
        .id;
    assert!(store.session(session_id).await.unwrap().stats.is_none());

    pipeline
        .submit(
            session_id,
            "student_bg_444444",
            &answers(json!({ "q1": 4, "q2": 5 })),
            metadata(Some(120)),
        )
        .await
        .unwrap();

    assert!(wait_for_total(&store, session_id, 1).await);
}

#[tokio::test]
async fn update_refreshes_stats_in_background() {
    let store = Arc::new(MemoryStore::with_demo_session().await);
    let pipeline = pipeline(&store);
    let session = store
        .find_by_access_code(DEMO_ACCESS_CODE)
        .await
        .unwrap()
        .unwrap();

    store
        .insert(NewResponse {
            id: Uuid::new_v4(),
            session_id: session.id,
            org: session.org,
            student_anonymous_id: "student_seed_555555".to_string(),
            response_data: Default::default(),
            metadata: metadata(None),
        })
        .await
        .unwrap();
    assert!(store.session(session.id).await.unwrap().stats.is_none());

    pipeline
        .update(
            session.id,
            "student_seed_555555",
            &answers(json!({ "q1": 2, "q2": 3 })),
            metadata(None),
        )
        .await
        .unwrap();

    assert!(wait_for_total(&store, session.id, 1).await);
}

#[tokio::test]
async fn failing_stats_write_does_not_fail_submission() {
    let store = Arc::new(MemoryStore::with_demo_session().await);
    let sessions: Arc<dyn SessionRepository> = Arc::new(StatsWriteFails(store.clone()));
    let responses: Arc<dyn ResponseRepository> = store.clone();
    let pipeline = SubmissionPipeline::new(sessions, responses);
    let session_id = access::resolve(store.as_ref(), DEMO_ACCESS_CODE, Utc::now())
        .await
        .unwrap()
        .id;

    let ack = pipeline
        .submit(
            session_id,
            "student_nostats_666666",
            &answers(json!({ "q1": 3, "q2": 3 })),
            metadata(Some(45)),
        )
        .await
        .unwrap();

    let stored = store.responses_for(session_id).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, ack.response_id);

    assert!(pipeline.stats().refresh(session_id).await.is_err());
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(store.session(session_id).await.unwrap().stats.is_none());
}

#[tokio::test]
async fn backdated_start_does_not_inflate_completion_time() {
    let store = Arc::new(MemoryStore::with_demo_session().await);
    let pipeline = pipeline(&store);
    let session_id = access::resolve(store.as_ref(), DEMO_ACCESS_CODE, Utc::now())
        .await
        .unwrap()
        .id;

    pipeline
        .submit(
            session_id,
            "student_slow_777777",
            &answers(json!({ "q1": 3, "q2": 3 })),
            metadata(Some(30 * 86_400)),
        )
        .await
        .unwrap();

    let stored = store.responses_for(session_id).await;
    // demo session runs 60 minutes
    assert_eq!(stored[0].metadata.completion_time_seconds, Some(90 * 60));
}
