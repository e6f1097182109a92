use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entities::{MultipartSession, SessionId};

/// Persistence for multipart audit rows. The upload hot path never touches
/// this; only initiate, complete, abort and the expiry sweeper do.
#[async_trait]
pub trait MultipartSessionsRepository {
    type Error;

    async fn insert(&mut self, session: &MultipartSession) -> Result<(), Self::Error>;

    /// Idempotent; deleting an absent row is not an error.
    async fn delete(&mut self, id: SessionId) -> Result<(), Self::Error>;

    async fn list_expired(
        &mut self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<MultipartSession>, Self::Error>;
}
