use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use ulid::Ulid;

use crate::adapters::{
    FileNodesRepositoryImpl, MultipartSessionsRepositoryImpl, QuotaLedgerImpl,
};
use crate::error::DriveError;
use crate::ports::{FileNodesRepository, MultipartSessionsRepository, QuotaLedger};
use crate::storage::StorageProvider;

const SWEEP_BATCH: i64 = 100;

#[derive(Clone)]
pub struct Ctx {
    pub pool: PgPool,
    pub provider: Arc<StorageProvider>,
}

/// Spawns the periodic reaper for abandoned multipart sessions.
pub fn spawn_expiry_sweeper(ctx: Ctx, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;

            let mut nodes = FileNodesRepositoryImpl::new(ctx.pool.clone());
            let mut quota = QuotaLedgerImpl::new(ctx.pool.clone());
            let mut sessions = MultipartSessionsRepositoryImpl::new(ctx.pool.clone());

            match sweep_expired(&mut nodes, &mut quota, &mut sessions, &ctx.provider, Utc::now())
                .await
            {
                Ok(0) => {}
                Ok(n) => log::info!("expiry sweeper reclaimed {} multipart sessions", n),
                Err(err) => log::error!("expiry sweep failed: {}", err),
            }
        }
    })
}

/// One sweep pass: for every session past its expiry, abort the provider
/// upload, release the reservation and drop the row. Sessions whose file
/// node already exists were completed and only leaked their row; their
/// accounting is left untouched.
pub async fn sweep_expired<N, Q, M>(
    nodes: &mut N,
    quota: &mut Q,
    sessions: &mut M,
    provider: &StorageProvider,
    now: DateTime<Utc>,
) -> Result<u64, DriveError>
where
    N: FileNodesRepository<Error = DriveError> + Send,
    Q: QuotaLedger<Error = DriveError> + Send,
    M: MultipartSessionsRepository<Error = DriveError> + Send,
{
    let expired = sessions.list_expired(now, SWEEP_BATCH).await?;
    let mut reclaimed = 0u64;

    for session in expired {
        match nodes.find_any(session.file_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                if let Err(err) = provider
                    .abort_multipart(session.file_id, &session.user_id, &session.upload_id)
                    .await
                {
                    log::warn!(
                        "provider abort failed for expired session {}: {}",
                        Ulid::from(session.id),
                        err
                    );
                }
                if let Err(err) = quota.release(&session.user_id, session.total_size).await {
                    // Keep the row; the next pass retries the release.
                    log::error!(
                        "quota release failed for expired session {}: {}",
                        Ulid::from(session.id),
                        err
                    );
                    continue;
                }
            }
            Err(err) => {
                log::warn!(
                    "completion check failed for expired session {}: {}",
                    Ulid::from(session.id),
                    err
                );
                continue;
            }
        }

        sessions.delete(session.id).await?;
        reclaimed += 1;
    }

    Ok(reclaimed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{FileId, FileName, FileNode, MultipartSession, UserId};
    use crate::services::fakes::{MemBackend, MemNodes, MemQuota, MemSessions};
    use crate::storage::LocalStorage;
    use bytes::Bytes;
    use futures_util::stream;
    use tempfile::TempDir;

    fn user() -> UserId {
        UserId::from("user-a".to_string())
    }

    fn setup() -> (TempDir, MemBackend, StorageProvider) {
        let dir = TempDir::new().unwrap();
        let provider = StorageProvider::Local(LocalStorage::new(dir.path()).unwrap());
        (dir, MemBackend::new(1024 * 1024), provider)
    }

    fn expired_session(file_id: FileId, upload_id: &str, total: i64) -> MultipartSession {
        MultipartSession::new(
            file_id,
            upload_id.to_string(),
            user(),
            FileName::try_from("big.bin").unwrap(),
            total,
            Utc::now() - chrono::Duration::hours(25),
        )
    }

    #[tokio::test]
    async fn sweep_reclaims_expired_sessions() {
        let (_dir, backend, provider) = setup();
        let file_id = FileId::from(Ulid::new());

        let upload_id = provider.initiate_multipart(file_id, &user()).await.unwrap();
        provider
            .upload_part(
                file_id,
                &user(),
                &upload_id,
                1,
                stream::iter(vec![Ok(Bytes::from_static(b"chunk"))]),
                1024,
            )
            .await
            .unwrap();

        backend.insert_session(expired_session(file_id, &upload_id, 100));
        backend.set_used_bytes(100);

        let reclaimed = sweep_expired(
            &mut MemNodes(backend.clone()),
            &mut MemQuota(backend.clone()),
            &mut MemSessions(backend.clone()),
            &provider,
            Utc::now(),
        )
        .await
        .unwrap();

        assert_eq!(reclaimed, 1);
        assert_eq!(backend.session_count(), 0);
        assert_eq!(backend.used_bytes(), 0);
    }

    #[tokio::test]
    async fn sweep_ignores_sessions_that_are_not_expired_yet() {
        let (_dir, backend, provider) = setup();
        let file_id = FileId::from(Ulid::new());

        let mut session = expired_session(file_id, "live-upload", 100);
        session.expires_at = Utc::now() + chrono::Duration::hours(1);
        backend.insert_session(session);
        backend.set_used_bytes(100);

        let reclaimed = sweep_expired(
            &mut MemNodes(backend.clone()),
            &mut MemQuota(backend.clone()),
            &mut MemSessions(backend.clone()),
            &provider,
            Utc::now(),
        )
        .await
        .unwrap();

        assert_eq!(reclaimed, 0);
        assert_eq!(backend.session_count(), 1);
        assert_eq!(backend.used_bytes(), 100);
    }

    #[tokio::test]
    async fn sweep_keeps_accounting_of_completed_sessions() {
        let (_dir, backend, provider) = setup();
        let file_id = FileId::from(Ulid::new());

        // The node committed but the session row leaked.
        let node = FileNode::new_file(
            file_id,
            user(),
            None,
            FileName::try_from("big.bin").unwrap(),
            "application/octet-stream".to_string(),
            100,
            Utc::now(),
            None,
        );
        MemNodes(backend.clone()).insert(&node).await.unwrap();
        backend.insert_session(expired_session(file_id, "done-upload", 100));
        backend.set_used_bytes(100);

        let reclaimed = sweep_expired(
            &mut MemNodes(backend.clone()),
            &mut MemQuota(backend.clone()),
            &mut MemSessions(backend.clone()),
            &provider,
            Utc::now(),
        )
        .await
        .unwrap();

        assert_eq!(reclaimed, 1);
        assert_eq!(backend.session_count(), 0);
        assert_eq!(backend.used_bytes(), 100);
        backend.assert_quota_conserved();
    }
}
