use redis::aio::ConnectionManager;
use std::sync::Arc;
use tower_cookies::Cookies;

use crate::config::{Config, StorageBackend};
use crate::error::{AppError, Result};
use crate::repositories::{
    memory::{MemoryStore, DEMO_ACCESS_CODE},
    postgres::PgStore,
    store::{ResponseRepository, SessionRepository},
};
use crate::services::{
    identity::CookieIdentity, metadata::MetadataCollector, submission::SubmissionPipeline,
};

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The application's configuration.
    pub config: Config,
    /// Session lookups.
    pub sessions: Arc<dyn SessionRepository>,
    /// Response storage.
    pub responses: Arc<dyn ResponseRepository>,
    /// The submission pipeline.
    pub pipeline: SubmissionPipeline,
    /// Best-effort metadata collection.
    pub metadata: MetadataCollector,
    /// The Redis connection manager, when access throttling is enabled.
    pub redis: Option<ConnectionManager>,
}

impl AppState {
    /// Creates a new `AppState`, connecting to the configured backends.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub async fn new(config: &Config) -> Result<Self> {
        let (sessions, responses): (Arc<dyn SessionRepository>, Arc<dyn ResponseRepository>) =
            match config.storage {
                StorageBackend::Postgres => {
                    let url = config.database_url.as_deref().ok_or_else(|| {
                        AppError::Internal("DATABASE_URL is not configured".to_string())
                    })?;
                    let pool = crate::db::create_pool(url, config.db_pool_size)?;
                    crate::db::run_migrations(&pool).await?;
                    tracing::info!("✅ PostgreSQL pool initialized with deadpool-postgres");

                    let store = Arc::new(PgStore::new(pool));
                    (store.clone(), store)
                }
                StorageBackend::Memory => {
                    let store = Arc::new(MemoryStore::with_demo_session().await);
                    tracing::info!(
                        "✅ In-memory store initialized with demo session {}",
                        DEMO_ACCESS_CODE
                    );
                    (store.clone(), store)
                }
            };

        let redis = match &config.redis_url {
            Some(url) => {
                let client = redis::Client::open(url.as_str())?;
                let manager = ConnectionManager::new(client).await?;
                tracing::info!("✅ Redis Connection Manager initialized (access throttling on)");
                Some(manager)
            }
            None => {
                tracing::info!("ℹ️ REDIS_URL not set, access-code throttling disabled");
                None
            }
        };

        Ok(Self::with_stores(config, sessions, responses, redis))
    }

    /// Assembles the state around already-built stores.
    pub fn with_stores(
        config: &Config,
        sessions: Arc<dyn SessionRepository>,
        responses: Arc<dyn ResponseRepository>,
        redis: Option<ConnectionManager>,
    ) -> Self {
        let pipeline = SubmissionPipeline::new(sessions.clone(), responses.clone());
        let metadata = MetadataCollector::new(config);

        Self {
            config: config.clone(),
            sessions,
            responses,
            pipeline,
            metadata,
            redis,
        }
    }

    /// The identity provider for one request.
    pub fn identity(&self, cookies: Cookies) -> CookieIdentity {
        CookieIdentity::new(cookies, self.config.anon_cookie_days, self.config.secure_cookies)
    }
}
