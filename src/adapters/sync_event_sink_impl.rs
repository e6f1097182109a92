use async_trait::async_trait;
use sqlx::{Acquire, Postgres};
use ulid::Ulid;

use crate::entities::{FileId, SyncEventKind, UserId};
use crate::error::DriveError;
use crate::ports;

/// Append-only sync-event writer.
///
/// The feed is gated behind a config flag; when disabled the sink accepts
/// and drops every event, so callers never branch on the flag themselves.
#[derive(Debug, Clone)]
pub struct SyncEventSinkImpl<A> {
    db: A,
    enabled: bool,
}

impl<A> SyncEventSinkImpl<A> {
    pub fn new(db: A, enabled: bool) -> Self {
        Self { db, enabled }
    }
}

#[async_trait]
impl<A> ports::SyncEventSink for SyncEventSinkImpl<A>
where
    A: Send + Sync,
    for<'c> &'c A: Acquire<'c, Database = Postgres>,
{
    type Error = DriveError;

    async fn append(
        &mut self,
        user_id: &UserId,
        file_id: FileId,
        kind: SyncEventKind,
        content_updated: bool,
    ) -> Result<(), Self::Error> {
        if !self.enabled {
            return Ok(());
        }

        let mut conn = self.db.acquire().await?;

        sqlx::query(
            r#"
                INSERT INTO sync_events (user_id, file_id, event_kind, content_updated)
                VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(user_id.as_str())
        .bind(Ulid::from(file_id).to_string())
        .bind(kind.as_str())
        .bind(content_updated)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}
