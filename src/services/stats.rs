use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::{
    error::Result,
    models::session::SessionStats,
    repositories::store::{ResponseRepository, SessionRepository},
};

/// Recomputes a session's stats block from the live response set.
///
/// Safe to run concurrently with itself: every run recounts from scratch and
/// the last write wins.
#[derive(Clone)]
pub struct StatsRefresher {
    sessions: Arc<dyn SessionRepository>,
    responses: Arc<dyn ResponseRepository>,
}

impl StatsRefresher {
    pub fn new(sessions: Arc<dyn SessionRepository>, responses: Arc<dyn ResponseRepository>) -> Self {
        Self {
            sessions,
            responses,
        }
    }

    /// Recounts and stores the stats. Returns `None` if the session is gone.
    pub async fn refresh(&self, session_id: Uuid) -> Result<Option<SessionStats>> {
        let Some(context) = self.sessions.find_submission_context(session_id).await? else {
            return Ok(None);
        };

        let aggregate = self.responses.aggregate(session_id).await?;
        let target = context.expected_responses.filter(|t| *t > 0);

        let stats = SessionStats {
            total_responses: aggregate.total,
            target_responses: target,
            completion_rate: target.map(|t| aggregate.total as f64 / f64::from(t) * 100.0),
            average_completion_seconds: aggregate.average_completion_seconds,
            refreshed_at: Utc::now(),
        };

        self.sessions.write_stats(session_id, &stats).await?;
        tracing::debug!(
            "📊 Session {} stats refreshed: {} responses",
            session_id,
            stats.total_responses
        );
        Ok(Some(stats))
    }

    /// Runs [`refresh`](Self::refresh) detached from the caller. Failures are
    /// logged and go nowhere else.
    pub fn spawn_refresh(&self, session_id: Uuid) -> tokio::task::JoinHandle<()> {
        let refresher = self.clone();
        tokio::spawn(async move {
            if let Err(e) = refresher.refresh(session_id).await {
                tracing::warn!("⚠️ Stats refresh for session {} failed: {}", session_id, e);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::response::{DeviceType, NewResponse, ResponseData, ResponseMetadata},
        repositories::memory::{demo_session, MemoryStore},
    };

    async fn add_response(store: &MemoryStore, session_id: Uuid, n: usize, seconds: Option<i64>) {
        let session = store.session(session_id).await.unwrap();
        store
            .insert(NewResponse {
                id: Uuid::new_v4(),
                session_id,
                org: session.org,
                student_anonymous_id: format!("student_test_{n:06}"),
                response_data: ResponseData::new(),
                metadata: ResponseMetadata {
                    ip: "unknown".to_string(),
                    user_agent: String::new(),
                    fingerprint: String::new(),
                    device_type: DeviceType::Desktop,
                    started_at: None,
                    completion_time_seconds: seconds,
                },
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn computes_count_rate_and_average() {
        let store = Arc::new(MemoryStore::new());
        let session = demo_session(Utc::now());
        let session_id = session.id;
        store.insert_session(session).await;

        add_response(&store, session_id, 1, Some(60)).await;
        add_response(&store, session_id, 2, Some(120)).await;
        add_response(&store, session_id, 3, None).await;

        let refresher = StatsRefresher::new(store.clone(), store.clone());
        let stats = refresher.refresh(session_id).await.unwrap().unwrap();

        assert_eq!(stats.total_responses, 3);
        assert_eq!(stats.target_responses, Some(30));
        assert_eq!(stats.completion_rate, Some(10.0));
        assert_eq!(stats.average_completion_seconds, Some(90.0));

        let stored = store.session(session_id).await.unwrap().stats.unwrap();
        assert_eq!(stored.total_responses, 3);
    }

    #[tokio::test]
    async fn refresh_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let mut session = demo_session(Utc::now());
        session.expected_responses = None;
        let session_id = session.id;
        store.insert_session(session).await;
        add_response(&store, session_id, 1, Some(30)).await;

        let refresher = StatsRefresher::new(store.clone(), store.clone());
        let first = refresher.refresh(session_id).await.unwrap().unwrap();
        let second = refresher.refresh(session_id).await.unwrap().unwrap();

        assert_eq!(first.total_responses, second.total_responses);
        assert_eq!(second.completion_rate, None);
    }

    #[tokio::test]
    async fn missing_session_is_not_an_error() {
        let store = Arc::new(MemoryStore::new());
        let refresher = StatsRefresher::new(store.clone(), store);
        assert!(refresher.refresh(Uuid::new_v4()).await.unwrap().is_none());
    }
}
