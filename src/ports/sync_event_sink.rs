use async_trait::async_trait;

use crate::entities::{FileId, SyncEventKind, UserId};

/// Append-only feed of state mutations, consumed by the sync timeline.
///
/// Appending is best-effort from the orchestrator's point of view: a failed
/// append is logged, never surfaced to the caller.
#[async_trait]
pub trait SyncEventSink {
    type Error;

    async fn append(
        &mut self,
        user_id: &UserId,
        file_id: FileId,
        kind: SyncEventKind,
        content_updated: bool,
    ) -> Result<(), Self::Error>;
}
