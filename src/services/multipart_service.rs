use std::io;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::Stream;
use ulid::Ulid;

use crate::entities::{
    FileId, FileName, FileNode, MultipartSession, SessionId, SyncEventKind, UserId,
};
use crate::error::{DriveError, Result};
use crate::ports::{
    FileNodesRepository, MultipartSessionsRepository, QuotaLedger, SyncEventSink,
};
use crate::storage::{StorageProvider, UploadedPart};
use crate::token::{UploadTokenClaims, UploadTokenSigner};

/// Provider-imposed ceiling on part numbers.
pub const MAX_PARTS: i32 = 10_000;

#[derive(Clone, Debug)]
pub struct InitiateRequest {
    pub filename: FileName,
    pub content_type: String,
    pub total_size: i64,
    pub parent_id: Option<FileId>,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug)]
pub struct InitiateOutcome {
    pub session_id: SessionId,
    pub file_id: FileId,
    pub upload_id: String,
    pub max_chunk_size: i64,
    pub token: String,
}

/// Stateless multipart coordinator.
///
/// Initiate reserves the full claimed size and mints a signed token; part
/// uploads authenticate by token alone and touch no database row; complete
/// validates the client-kept manifest and commits; abort and the expiry
/// sweeper reclaim whatever was reserved.
pub struct MultipartService<N, Q, M, E> {
    nodes: N,
    quota: Q,
    sessions: M,
    events: E,
    provider: Arc<StorageProvider>,
    signer: Arc<UploadTokenSigner>,
    max_chunk_size: i64,
}

impl<N, Q, M, E> MultipartService<N, Q, M, E>
where
    N: FileNodesRepository<Error = DriveError> + Send,
    Q: QuotaLedger<Error = DriveError> + Send,
    M: MultipartSessionsRepository<Error = DriveError> + Send,
    E: SyncEventSink<Error = DriveError> + Send,
{
    pub fn new(
        nodes: N,
        quota: Q,
        sessions: M,
        events: E,
        provider: Arc<StorageProvider>,
        signer: Arc<UploadTokenSigner>,
        max_chunk_size: i64,
    ) -> Self {
        Self {
            nodes,
            quota,
            sessions,
            events,
            provider,
            signer,
            max_chunk_size,
        }
    }

    pub async fn initiate(
        &mut self,
        user_id: &UserId,
        now: DateTime<Utc>,
        req: InitiateRequest,
    ) -> Result<InitiateOutcome> {
        if req.total_size <= 0 {
            return Err(DriveError::Conflict(
                "total size must be positive".to_string(),
            ));
        }

        self.validate_parent(user_id, req.parent_id).await?;
        if self
            .nodes
            .find_live_by_name(user_id, req.parent_id, &req.filename)
            .await?
            .is_some()
        {
            return Err(DriveError::NameConflict(req.filename.as_str().to_string()));
        }

        // The full claimed size is reserved up-front so racing uploads
        // cannot collectively overshoot the tier.
        self.quota.reserve(user_id, req.total_size).await?;

        let file_id = FileId::from(Ulid::from_datetime(now.into()));
        let upload_id = match self.provider.initiate_multipart(file_id, user_id).await {
            Ok(id) => id,
            Err(err) => {
                self.release_or_log(user_id, req.total_size).await;
                return Err(err.into());
            }
        };

        let session = MultipartSession::new(
            file_id,
            upload_id.clone(),
            user_id.clone(),
            req.filename.clone(),
            req.total_size,
            now,
        );
        if let Err(err) = self.sessions.insert(&session).await {
            self.abort_provider_or_log(file_id, user_id, &upload_id).await;
            self.release_or_log(user_id, req.total_size).await;
            return Err(err);
        }

        let token = match self.signer.mint(
            &session,
            &req.content_type,
            self.max_chunk_size,
            req.parent_id,
            req.last_modified,
            now,
        ) {
            Ok(token) => token,
            Err(err) => {
                if let Err(e) = self.sessions.delete(session.id).await {
                    log::warn!("session cleanup failed after mint error: {}", e);
                }
                self.abort_provider_or_log(file_id, user_id, &upload_id).await;
                self.release_or_log(user_id, req.total_size).await;
                return Err(err);
            }
        };

        Ok(InitiateOutcome {
            session_id: session.id,
            file_id,
            upload_id,
            max_chunk_size: self.max_chunk_size,
            token,
        })
    }

    /// The hot path: thousands of calls per large upload, zero database
    /// work. Authentication, session binding and the chunk-size ceiling are
    /// all settled before a single body byte is read.
    pub async fn upload_part<S>(
        &mut self,
        session_id: SessionId,
        part_number: i32,
        content_length: i64,
        token: &str,
        body: S,
    ) -> Result<UploadedPart>
    where
        S: Stream<Item = std::result::Result<Bytes, io::Error>> + Unpin,
    {
        let claims = self.verify(token, session_id)?;

        if !(1..=MAX_PARTS).contains(&part_number) {
            return Err(DriveError::Conflict(format!(
                "part number must be between 1 and {}",
                MAX_PARTS
            )));
        }
        if content_length > claims.max_chunk_size {
            return Err(DriveError::OversizeStream {
                limit: claims.max_chunk_size as u64,
            });
        }

        let part = self
            .provider
            .upload_part(
                claims.file_id,
                &claims.owner_id,
                &claims.upload_id,
                part_number,
                body,
                content_length as u64,
            )
            .await?;

        Ok(part)
    }

    pub async fn complete(
        &mut self,
        session_id: SessionId,
        now: DateTime<Utc>,
        token: &str,
        manifest: Vec<UploadedPart>,
    ) -> Result<FileNode> {
        let claims = self.verify(token, session_id)?;

        // Duplicate-completion guard: file_id is the primary key, so each
        // token is effectively single-use.
        if self.nodes.find_any(claims.file_id).await?.is_some() {
            return Err(DriveError::Conflict(
                "upload already completed".to_string(),
            ));
        }

        let parts = validate_manifest(manifest)?;

        // An etag mismatch or missing part fails here. Neither the session
        // nor the reservation is touched: the client may retry completion
        // with a corrected manifest.
        let final_size = self
            .provider
            .complete_multipart(claims.file_id, &claims.owner_id, &claims.upload_id, &parts)
            .await?;

        if final_size != claims.total_size {
            self.discard_object(claims.file_id, &claims.owner_id).await;
            self.release_or_log(&claims.owner_id, claims.total_size).await;
            if let Err(err) = self.sessions.delete(claims.session_id).await {
                log::warn!("session cleanup failed after size mismatch: {}", err);
            }
            return Err(DriveError::SizeMismatch {
                claimed: claims.total_size,
                actual: final_size,
            });
        }

        let node = FileNode::new_file(
            claims.file_id,
            claims.owner_id.clone(),
            claims.parent_id,
            claims.filename.clone(),
            claims.content_type.clone(),
            claims.total_size,
            now,
            claims.last_modified,
        );
        if let Err(err) = self.nodes.insert(&node).await {
            if matches!(err, DriveError::Conflict(_)) {
                // Lost a completion race on the primary key; the winner owns
                // the object and the reservation.
                return Err(err);
            }
            self.discard_object(claims.file_id, &claims.owner_id).await;
            self.release_or_log(&claims.owner_id, claims.total_size).await;
            return Err(err);
        }

        if let Err(err) = self.sessions.delete(claims.session_id).await {
            // The sweeper skips sessions whose node already exists, so a
            // leaked row costs nothing but a retry there.
            log::warn!(
                "session row cleanup failed after completion of {}: {}",
                Ulid::from(claims.file_id),
                err
            );
        }

        self.emit(&claims.owner_id, claims.file_id, SyncEventKind::Created, true)
            .await;
        Ok(node)
    }

    /// Best-effort throughout: the caller always gets success for a valid
    /// token; the expiry sweeper is the safety net for anything missed.
    pub async fn abort(&mut self, session_id: SessionId, token: &str) -> Result<()> {
        let claims = self.verify(token, session_id)?;

        match self.nodes.find_any(claims.file_id).await {
            // Already completed: the reservation is spoken for.
            Ok(Some(_)) => {}
            Ok(None) => {
                self.release_or_log(&claims.owner_id, claims.total_size).await;
                self.abort_provider_or_log(claims.file_id, &claims.owner_id, &claims.upload_id)
                    .await;
            }
            Err(err) => {
                // Cannot tell whether completion happened; leave everything
                // for the sweeper rather than double-release.
                log::warn!(
                    "abort of session {} skipped cleanup: {}",
                    Ulid::from(session_id),
                    err
                );
                return Ok(());
            }
        }

        if let Err(err) = self.sessions.delete(claims.session_id).await {
            log::warn!(
                "session row cleanup failed during abort of {}: {}",
                Ulid::from(session_id),
                err
            );
        }
        Ok(())
    }

    fn verify(&self, token: &str, session_id: SessionId) -> Result<UploadTokenClaims> {
        let claims = self.signer.verify(token)?;
        if claims.session_id != session_id {
            return Err(DriveError::Forbidden(
                "token does not belong to this session".to_string(),
            ));
        }
        Ok(claims)
    }

    async fn validate_parent(&mut self, user_id: &UserId, parent_id: Option<FileId>) -> Result<()> {
        if let Some(parent_id) = parent_id {
            let parent = self.nodes.find_owned(user_id, parent_id).await?;
            if parent.is_deleted() {
                return Err(DriveError::NotFound("directory".to_string()));
            }
            if !parent.is_directory {
                return Err(DriveError::Conflict(
                    "parent is not a directory".to_string(),
                ));
            }
        }
        Ok(())
    }

    async fn release_or_log(&mut self, user_id: &UserId, amount: i64) {
        if amount <= 0 {
            return;
        }
        if let Err(err) = self.quota.release(user_id, amount).await {
            log::error!(
                "quota release of {} bytes failed for {}: {}",
                amount,
                user_id.as_str(),
                err
            );
        }
    }

    async fn abort_provider_or_log(&mut self, file_id: FileId, user_id: &UserId, upload_id: &str) {
        if let Err(err) = self
            .provider
            .abort_multipart(file_id, user_id, upload_id)
            .await
        {
            log::warn!(
                "provider abort failed for upload {} of {}: {}",
                upload_id,
                Ulid::from(file_id),
                err
            );
        }
    }

    async fn discard_object(&mut self, file_id: FileId, user_id: &UserId) {
        if let Err(err) = self.provider.delete(file_id, user_id).await {
            log::warn!(
                "object cleanup failed for {}: {}",
                Ulid::from(file_id),
                err
            );
        }
    }

    async fn emit(
        &mut self,
        user_id: &UserId,
        file_id: FileId,
        kind: SyncEventKind,
        content_updated: bool,
    ) {
        if let Err(err) = self
            .events
            .append(user_id, file_id, kind, content_updated)
            .await
        {
            log::warn!(
                "sync event append failed for {}: {}",
                Ulid::from(file_id),
                err
            );
        }
    }
}

/// Checks that the manifest is non-empty and that its part numbers form the
/// contiguous set `{1..N}` with no duplicates, and returns it sorted
/// ascending as providers require.
pub fn validate_manifest(mut parts: Vec<UploadedPart>) -> Result<Vec<UploadedPart>> {
    if parts.is_empty() {
        return Err(DriveError::BadChunkSet("empty manifest".to_string()));
    }
    if parts.len() > MAX_PARTS as usize {
        return Err(DriveError::BadChunkSet(format!(
            "manifest exceeds {} parts",
            MAX_PARTS
        )));
    }

    parts.sort_by_key(|p| p.part_number);
    for (idx, part) in parts.iter().enumerate() {
        if part.part_number != idx as i32 + 1 {
            return Err(DriveError::BadChunkSet(
                "part numbers must form the contiguous set 1..N with no duplicates".to_string(),
            ));
        }
    }

    Ok(parts)
}
