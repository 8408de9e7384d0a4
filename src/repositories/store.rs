use futures::future::BoxFuture;
use uuid::Uuid;

use crate::{
    error::Result,
    models::{
        response::{InsertOutcome, NewResponse, Response, ResponseAggregate, ResponseData, ResponseMetadata},
        session::{Session, SessionStats, SubmissionContext},
    },
};

/// Read access to sessions, plus the one field this service writes.
pub trait SessionRepository: Send + Sync {
    /// Looks a session up by its (already uppercased) access code.
    fn find_by_access_code<'a>(&'a self, access_code: &'a str) -> BoxFuture<'a, Result<Option<Session>>>;

    /// Loads the fields needed to validate and denormalize a submission.
    fn find_submission_context(&self, session_id: Uuid) -> BoxFuture<'_, Result<Option<SubmissionContext>>>;

    /// Overwrites the session's stats block.
    fn write_stats<'a>(&'a self, session_id: Uuid, stats: &'a SessionStats) -> BoxFuture<'a, Result<()>>;
}

/// Storage for responses.
///
/// Implementations must enforce uniqueness of (session_id,
/// student_anonymous_id) themselves: `insert` reports a clash as
/// [`InsertOutcome::Duplicate`] no matter how many callers race on it.
pub trait ResponseRepository: Send + Sync {
    fn exists<'a>(&'a self, session_id: Uuid, anonymous_id: &'a str) -> BoxFuture<'a, Result<bool>>;

    fn insert(&self, response: NewResponse) -> BoxFuture<'_, Result<InsertOutcome>>;

    /// Replaces data and metadata of an existing row. `None` if there is no
    /// row for the pair.
    fn update<'a>(
        &'a self,
        session_id: Uuid,
        anonymous_id: &'a str,
        response_data: &'a ResponseData,
        metadata: &'a ResponseMetadata,
    ) -> BoxFuture<'a, Result<Option<Response>>>;

    fn aggregate(&self, session_id: Uuid) -> BoxFuture<'_, Result<ResponseAggregate>>;
}
