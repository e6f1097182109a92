use std::io;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::Stream;
use ulid::Ulid;

use crate::entities::{
    Breadcrumb, FileId, FileName, FileNode, ListFilter, SyncEventKind, UserId,
};
use crate::error::{DriveError, Result};
use crate::ports::{FileNodesRepository, QuotaLedger, SyncEventSink};
use crate::storage::{DownloadStream, StorageError, StorageProvider};

/// Hard tolerance between claimed and actual sizes (1 MiB). Uploads may
/// drift this far before the mismatch is treated as an error, and quota is
/// only reconciled when the drift exceeds it.
pub const SIZE_TOLERANCE: i64 = 1024 * 1024;

/// Ceiling for a single-shot upload: the claimed size plus 5% (at least the
/// hard tolerance), absorbing transport-encoding overhead without letting a
/// lying client stream unbounded data.
pub fn max_allowed_size(claimed: i64) -> u64 {
    (claimed + (claimed / 20).max(SIZE_TOLERANCE)) as u64
}

#[derive(Clone, Debug)]
pub struct UploadRequest {
    pub filename: FileName,
    pub parent_id: Option<FileId>,
    pub content_type: String,
    pub claimed_size: i64,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug)]
pub struct Listing {
    pub files: Vec<FileNode>,
    pub parent_id: Option<FileId>,
    pub breadcrumbs: Vec<Breadcrumb>,
}

/// The orchestrator: composes the provider, the quota ledger and the
/// hierarchy into the user-visible operations, and owns every
/// compensation path.
///
/// Control flow for a write is always: validate hierarchy invariants →
/// reserve quota → stream to the provider → reconcile quota → commit
/// metadata → compensate backwards on any failure.
pub struct StorageService<N, Q, E> {
    nodes: N,
    quota: Q,
    events: E,
    provider: Arc<StorageProvider>,
}

impl<N, Q, E> StorageService<N, Q, E>
where
    N: FileNodesRepository<Error = DriveError> + Send,
    Q: QuotaLedger<Error = DriveError> + Send,
    E: SyncEventSink<Error = DriveError> + Send,
{
    pub fn new(nodes: N, quota: Q, events: E, provider: Arc<StorageProvider>) -> Self {
        Self {
            nodes,
            quota,
            events,
            provider,
        }
    }

    pub async fn upload<S>(
        &mut self,
        user_id: &UserId,
        now: DateTime<Utc>,
        req: UploadRequest,
        body: S,
    ) -> Result<FileNode>
    where
        S: Stream<Item = std::result::Result<Bytes, io::Error>> + Unpin,
    {
        self.validate_parent(user_id, req.parent_id).await?;
        self.ensure_unique_name(user_id, req.parent_id, &req.filename)
            .await?;

        let claimed = req.claimed_size;
        self.quota.reserve(user_id, claimed).await?;

        let file_id = FileId::from(Ulid::from_datetime(now.into()));
        let actual = match self
            .provider
            .save(body, file_id, user_id, max_allowed_size(claimed))
            .await
        {
            Ok(n) => n as i64,
            Err(err) => {
                self.release_or_log(user_id, claimed).await;
                // A body that blows through the ceiling is a client lying
                // about its size, not a chunk-protocol violation.
                return Err(match err {
                    StorageError::Oversize { limit } => DriveError::SizeMismatch {
                        claimed,
                        actual: limit as i64,
                    },
                    other => other.into(),
                });
            }
        };

        if actual > claimed + SIZE_TOLERANCE {
            self.discard_object(file_id, user_id).await;
            self.release_or_log(user_id, claimed).await;
            return Err(DriveError::SizeMismatch { claimed, actual });
        }
        if claimed - actual > SIZE_TOLERANCE {
            self.release_or_log(user_id, claimed - actual).await;
        }

        let node = FileNode::new_file(
            file_id,
            user_id.clone(),
            req.parent_id,
            req.filename,
            req.content_type,
            actual,
            now,
            req.last_modified,
        );
        if let Err(err) = self.nodes.insert(&node).await {
            self.discard_object(file_id, user_id).await;
            self.release_or_log(user_id, actual).await;
            return Err(err);
        }

        self.emit(user_id, file_id, SyncEventKind::Created, true).await;
        Ok(node)
    }

    pub async fn update_content<S>(
        &mut self,
        user_id: &UserId,
        now: DateTime<Utc>,
        file_id: FileId,
        claimed: i64,
        content_type: String,
        last_modified: Option<DateTime<Utc>>,
        body: S,
    ) -> Result<FileNode>
    where
        S: Stream<Item = std::result::Result<Bytes, io::Error>> + Unpin,
    {
        let mut node = self.nodes.find_owned(user_id, file_id).await?;
        if node.is_deleted() {
            return Err(DriveError::NotFound("file".to_string()));
        }
        if node.is_directory {
            return Err(DriveError::Conflict(
                "cannot overwrite a directory".to_string(),
            ));
        }

        let existing_size = node.size;
        let estimated_delta = claimed - existing_size;
        if estimated_delta > 0 {
            self.quota.reserve(user_id, estimated_delta).await?;
        }

        let actual = match self
            .provider
            .save(body, file_id, user_id, max_allowed_size(claimed))
            .await
        {
            Ok(n) => n as i64,
            Err(err) => {
                self.release_or_log(user_id, estimated_delta.max(0)).await;
                return Err(match err {
                    StorageError::Oversize { limit } => DriveError::SizeMismatch {
                        claimed,
                        actual: limit as i64,
                    },
                    other => other.into(),
                });
            }
        };

        // Reconcile so the net ledger change equals the actual delta; only
        // a positive estimate was debited up-front.
        let actual_delta = actual - existing_size;
        let correction = actual_delta - estimated_delta.max(0);
        if correction > 0 {
            if let Err(err) = self.quota.reserve(user_id, correction).await {
                // The old object is already gone; there is nothing to
                // restore it from. Surface the quota failure regardless.
                log::error!(
                    "quota reconciliation failed after overwrite of {} for {}: content replaced but not committed",
                    Ulid::from(file_id),
                    user_id.as_str(),
                );
                self.release_or_log(user_id, estimated_delta.max(0)).await;
                return Err(err);
            }
        } else if correction < 0 {
            self.release_or_log(user_id, -correction).await;
        }

        node.size = actual;
        node.content_type = content_type;
        node.updated_at = now;
        node.last_modified_at = last_modified.unwrap_or(now);

        if let Err(err) = self.nodes.update_content(&node).await {
            // The provider object was replaced before the metadata commit
            // and cannot be reverted; undo the accounting and log loudly.
            log::error!(
                "metadata commit failed after overwrite of {} for {}: provider object is ahead of metadata",
                Ulid::from(file_id),
                user_id.as_str(),
            );
            if let Err(e) = self.quota.adjust(user_id, -actual_delta).await {
                log::error!(
                    "quota rollback failed for {}: {}",
                    user_id.as_str(),
                    e
                );
            }
            return Err(err);
        }

        self.emit(user_id, file_id, SyncEventKind::Updated, true).await;
        Ok(node)
    }

    pub async fn rename(
        &mut self,
        user_id: &UserId,
        now: DateTime<Utc>,
        file_id: FileId,
        new_name: FileName,
    ) -> Result<FileNode> {
        let mut node = self.nodes.find_owned(user_id, file_id).await?;
        if node.is_deleted() {
            return Err(DriveError::NotFound("file".to_string()));
        }
        if node.filename == new_name {
            return Ok(node);
        }

        self.ensure_unique_name(user_id, node.parent_id, &new_name)
            .await?;

        node.filename = new_name;
        node.updated_at = now;
        self.nodes.update_metadata(&node).await?;

        self.emit(user_id, file_id, SyncEventKind::Renamed, false).await;
        Ok(node)
    }

    pub async fn move_node(
        &mut self,
        user_id: &UserId,
        now: DateTime<Utc>,
        file_id: FileId,
        new_parent: Option<FileId>,
    ) -> Result<FileNode> {
        let mut node = self.nodes.find_owned(user_id, file_id).await?;
        if node.is_deleted() {
            return Err(DriveError::NotFound("file".to_string()));
        }
        if node.parent_id == new_parent {
            return Ok(node);
        }

        if let Some(parent_id) = new_parent {
            if parent_id == node.id {
                return Err(DriveError::Conflict(
                    "cannot move an entry into itself".to_string(),
                ));
            }
            let parent = self.nodes.find_owned(user_id, parent_id).await?;
            if parent.is_deleted() {
                return Err(DriveError::NotFound("directory".to_string()));
            }
            if !parent.is_directory {
                return Err(DriveError::Conflict(
                    "move target is not a directory".to_string(),
                ));
            }
            self.ensure_not_descendant(user_id, node.id, parent_id)
                .await?;
        }

        self.ensure_unique_name(user_id, new_parent, &node.filename)
            .await?;

        node.parent_id = new_parent;
        node.updated_at = now;
        self.nodes.update_metadata(&node).await?;

        self.emit(user_id, file_id, SyncEventKind::Moved, false).await;
        Ok(node)
    }

    pub async fn set_favorite(
        &mut self,
        user_id: &UserId,
        now: DateTime<Utc>,
        file_id: FileId,
        is_favorite: Option<bool>,
    ) -> Result<FileNode> {
        let mut node = self.nodes.find_owned(user_id, file_id).await?;
        if node.is_deleted() {
            return Err(DriveError::NotFound("file".to_string()));
        }

        node.is_favorite = is_favorite.unwrap_or(!node.is_favorite);
        node.updated_at = now;
        self.nodes.update_metadata(&node).await?;

        self.emit(user_id, file_id, SyncEventKind::Favorited, false)
            .await;
        Ok(node)
    }

    pub async fn soft_delete(
        &mut self,
        user_id: &UserId,
        now: DateTime<Utc>,
        file_id: FileId,
    ) -> Result<()> {
        let mut node = self.nodes.find_owned(user_id, file_id).await?;
        if node.is_deleted() {
            return Err(DriveError::Conflict("already in the trash".to_string()));
        }

        node.deleted_at = Some(now);
        node.updated_at = now;
        self.nodes.update_metadata(&node).await?;

        self.emit(user_id, file_id, SyncEventKind::Trashed, false).await;
        Ok(())
    }

    pub async fn restore(
        &mut self,
        user_id: &UserId,
        now: DateTime<Utc>,
        file_id: FileId,
    ) -> Result<FileNode> {
        let mut node = self.nodes.find_owned(user_id, file_id).await?;
        if !node.is_deleted() {
            return Err(DriveError::Conflict("not in the trash".to_string()));
        }

        // The original parent may have been deleted in the meantime; fall
        // back to the root rather than resurrecting into limbo.
        if let Some(parent_id) = node.parent_id {
            match self.nodes.find_owned(user_id, parent_id).await {
                Ok(parent) if parent.is_directory && !parent.is_deleted() => {}
                Ok(_) => node.parent_id = None,
                Err(DriveError::NotFound(_)) => node.parent_id = None,
                Err(err) => return Err(err),
            }
        }

        let mut name = node.filename.clone();
        loop {
            if self
                .nodes
                .find_live_by_name(user_id, node.parent_id, &name)
                .await?
                .is_none()
            {
                break;
            }
            name = restored_name(&name, node.is_directory)?;
        }

        node.filename = name;
        node.deleted_at = None;
        node.updated_at = now;
        self.nodes.update_metadata(&node).await?;

        self.emit(user_id, file_id, SyncEventKind::Restored, false).await;
        Ok(node)
    }

    /// Removes the node and its whole subtree: provider objects best-effort
    /// first (orphaned bytes are preferable to orphaned metadata), then all
    /// rows children-first, then the quota credit.
    pub async fn hard_delete(&mut self, user_id: &UserId, file_id: FileId) -> Result<()> {
        let subtree = self.nodes.descendants(user_id, file_id).await?;
        if subtree.is_empty() {
            return Err(DriveError::NotFound("file".to_string()));
        }

        let reclaim: i64 = subtree
            .iter()
            .filter(|n| !n.is_directory)
            .map(|n| n.size)
            .sum();

        for node in subtree.iter().filter(|n| !n.is_directory) {
            if let Err(err) = self.provider.delete(node.id, user_id).await {
                log::warn!(
                    "object delete failed for {} during recursive delete: {}",
                    Ulid::from(node.id),
                    err
                );
            }
        }

        let ids: Vec<FileId> = subtree.iter().rev().map(|n| n.id).collect();
        self.nodes.delete_many(user_id, &ids).await?;
        self.quota.release(user_id, reclaim).await?;

        self.emit(user_id, file_id, SyncEventKind::Deleted, false).await;
        Ok(())
    }

    pub async fn create_directory(
        &mut self,
        user_id: &UserId,
        now: DateTime<Utc>,
        name: FileName,
        parent_id: Option<FileId>,
    ) -> Result<FileNode> {
        self.validate_parent(user_id, parent_id).await?;
        self.ensure_unique_name(user_id, parent_id, &name).await?;

        let node = FileNode::new_directory(user_id.clone(), parent_id, name, now);
        self.nodes.insert(&node).await?;

        self.emit(user_id, node.id, SyncEventKind::Created, false).await;
        Ok(node)
    }

    pub async fn list(&mut self, user_id: &UserId, filter: ListFilter) -> Result<Listing> {
        let (parent_id, breadcrumbs) = match &filter {
            ListFilter::Folder(parent_id) => {
                self.validate_parent(user_id, *parent_id).await?;
                let crumbs = self.nodes.breadcrumbs(user_id, *parent_id).await?;
                (*parent_id, crumbs)
            }
            _ => (None, Vec::new()),
        };

        let files = self.nodes.list(user_id, &filter).await?;
        Ok(Listing {
            files,
            parent_id,
            breadcrumbs,
        })
    }

    pub async fn show(&mut self, user_id: &UserId, file_id: FileId) -> Result<FileNode> {
        self.nodes.find_owned(user_id, file_id).await
    }

    pub async fn download(
        &mut self,
        user_id: &UserId,
        file_id: FileId,
    ) -> Result<(FileNode, DownloadStream, i64)> {
        let node = self.nodes.find_owned(user_id, file_id).await?;
        if node.is_deleted() {
            return Err(DriveError::NotFound("file".to_string()));
        }
        if node.is_directory {
            return Err(DriveError::Conflict(
                "cannot download a directory".to_string(),
            ));
        }

        let (stream, len) = self.provider.get_response(file_id, user_id).await?;
        Ok((node, stream, len))
    }

    async fn ensure_unique_name(
        &mut self,
        user_id: &UserId,
        parent_id: Option<FileId>,
        name: &FileName,
    ) -> Result<()> {
        if self
            .nodes
            .find_live_by_name(user_id, parent_id, name)
            .await?
            .is_some()
        {
            return Err(DriveError::NameConflict(name.as_str().to_string()));
        }
        Ok(())
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

    /// Rejects moves that would put `node_id` inside its own subtree by
    /// walking the destination's ancestry up to the root.
    async fn ensure_not_descendant(
        &mut self,
        user_id: &UserId,
        node_id: FileId,
        destination: FileId,
    ) -> Result<()> {
        let mut cursor = Some(destination);
        let mut depth = 0usize;

        while let Some(id) = cursor {
            if id == node_id {
                return Err(DriveError::Conflict(
                    "cannot move an entry into its own subtree".to_string(),
                ));
            }
            depth += 1;
            if depth > crate::entities::MAX_TREE_DEPTH {
                return Err(DriveError::Internal(anyhow::anyhow!(
                    "ancestry deeper than {} levels",
                    crate::entities::MAX_TREE_DEPTH
                )));
            }
            cursor = match self.nodes.find_owned(user_id, id).await {
                Ok(node) => node.parent_id,
                Err(DriveError::NotFound(_)) => None,
                Err(err) => return Err(err),
            };
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

/// Next restore candidate: `"a.txt"` becomes `"a (restored).txt"`,
/// directories get the suffix appended at the end. Applied repeatedly until
/// the name is free.
fn restored_name(name: &FileName, is_directory: bool) -> Result<FileName> {
    let candidate = if is_directory {
        format!("{} (restored)", name.as_str())
    } else {
        let (stem, ext) = name.split_extension();
        format!("{} (restored){}", stem, ext)
    };

    FileName::try_from(candidate)
        .map_err(|_| DriveError::Conflict("cannot derive a restore name".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fakes::{MemBackend, MemEvents, MemNodes, MemQuota};
    use crate::storage::LocalStorage;
    use futures_util::stream;
    use tempfile::TempDir;

    const MIB: i64 = 1024 * 1024;

    type TestService = StorageService<MemNodes, MemQuota, MemEvents>;

    fn setup(limit: i64) -> (TempDir, MemBackend, Arc<StorageProvider>, TestService) {
        let dir = TempDir::new().unwrap();
        let provider = Arc::new(StorageProvider::Local(
            LocalStorage::new(dir.path()).unwrap(),
        ));
        let backend = MemBackend::new(limit);
        let service = StorageService::new(
            MemNodes(backend.clone()),
            MemQuota(backend.clone()),
            MemEvents(backend.clone()),
            provider.clone(),
        );
        (dir, backend, provider, service)
    }

    fn body_of(data: &[u8]) -> impl Stream<Item = std::result::Result<Bytes, io::Error>> + Unpin
    {
        stream::iter(vec![Ok(Bytes::copy_from_slice(data))])
    }

    fn upload_req(name: &str, parent: Option<FileId>, claimed: i64) -> UploadRequest {
        UploadRequest {
            filename: FileName::try_from(name).unwrap(),
            parent_id: parent,
            content_type: "text/plain".to_string(),
            claimed_size: claimed,
            last_modified: None,
        }
    }

    fn user() -> UserId {
        UserId::from("user-a".to_string())
    }

    #[tokio::test]
    async fn happy_path_single_upload() {
        let (_dir, backend, provider, mut service) = setup(10 * MIB);
        let data = vec![0xABu8; 1024];

        let node = service
            .upload(&user(), Utc::now(), upload_req("notes.txt", None, 1024), body_of(&data))
            .await
            .unwrap();

        assert_eq!(node.size, 1024);
        assert_eq!(node.filename.as_str(), "notes.txt");
        assert!(!node.is_directory);
        assert_eq!(backend.used_bytes(), 1024);
        assert!(provider.exists(node.id, &user()).await.unwrap());
        backend.assert_quota_conserved();
    }

    #[tokio::test]
    async fn oversize_stream_is_rejected_and_compensated() {
        let (_dir, backend, _provider, mut service) = setup(20 * MIB);
        let data = vec![0u8; 10 * MIB as usize];

        let err = service
            .upload(&user(), Utc::now(), upload_req("notes.txt", None, 1024), body_of(&data))
            .await
            .unwrap_err();

        assert!(matches!(err, DriveError::SizeMismatch { claimed: 1024, .. }));
        assert_eq!(backend.used_bytes(), 0);
        assert_eq!(backend.node_count(), 0);
    }

    #[tokio::test]
    async fn quota_exceeded_at_reservation() {
        let (_dir, backend, _provider, mut service) = setup(10 * MIB);
        backend.set_used_bytes(9 * MIB);

        let err = service
            .upload(
                &user(),
                Utc::now(),
                upload_req("big.bin", None, 2 * MIB),
                body_of(b"irrelevant"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DriveError::QuotaExceeded));
        assert_eq!(backend.used_bytes(), 9 * MIB);
        assert_eq!(backend.node_count(), 0);
    }

    #[tokio::test]
    async fn upload_name_conflict() {
        let (_dir, backend, _provider, mut service) = setup(10 * MIB);

        service
            .upload(&user(), Utc::now(), upload_req("a.txt", None, 4), body_of(b"data"))
            .await
            .unwrap();
        let err = service
            .upload(&user(), Utc::now(), upload_req("a.txt", None, 4), body_of(b"data"))
            .await
            .unwrap_err();

        assert!(matches!(err, DriveError::NameConflict(_)));
        assert_eq!(backend.used_bytes(), 4);
        backend.assert_quota_conserved();
    }

    #[tokio::test]
    async fn short_stream_reconciles_quota_downwards() {
        let (_dir, backend, _provider, mut service) = setup(100 * MIB);

        let node = service
            .upload(
                &user(),
                Utc::now(),
                upload_req("short.bin", None, 5 * MIB),
                body_of(&vec![1u8; 1024]),
            )
            .await
            .unwrap();

        assert_eq!(node.size, 1024);
        // claimed - actual > 1 MiB, so the surplus reservation was returned.
        assert_eq!(backend.used_bytes(), 1024);
        backend.assert_quota_conserved();
    }

    #[tokio::test]
    async fn persist_failure_rolls_back_object_and_quota() {
        let (_dir, backend, _provider, mut service) = setup(10 * MIB);
        backend.fail_next_insert();

        let err = service
            .upload(&user(), Utc::now(), upload_req("a.txt", None, 4), body_of(b"data"))
            .await
            .unwrap_err();

        assert!(matches!(err, DriveError::Internal(_)));
        assert_eq!(backend.used_bytes(), 0);
        assert_eq!(backend.node_count(), 0);
    }

    #[tokio::test]
    async fn update_content_adjusts_quota_both_ways() {
        let (_dir, backend, _provider, mut service) = setup(10 * MIB);

        let node = service
            .upload(&user(), Utc::now(), upload_req("doc.txt", None, 4), body_of(b"1234"))
            .await
            .unwrap();
        assert_eq!(backend.used_bytes(), 4);

        // Grow.
        let grown = service
            .update_content(
                &user(),
                Utc::now(),
                node.id,
                10,
                "text/plain".to_string(),
                None,
                body_of(b"0123456789"),
            )
            .await
            .unwrap();
        assert_eq!(grown.size, 10);
        assert_eq!(backend.used_bytes(), 10);

        // Shrink.
        let shrunk = service
            .update_content(
                &user(),
                Utc::now(),
                node.id,
                2,
                "text/plain".to_string(),
                None,
                body_of(b"xy"),
            )
            .await
            .unwrap();
        assert_eq!(shrunk.size, 2);
        assert_eq!(backend.used_bytes(), 2);
        backend.assert_quota_conserved();
    }

    #[tokio::test]
    async fn update_content_rejects_directories() {
        let (_dir, _backend, _provider, mut service) = setup(10 * MIB);

        let dir_node = service
            .create_directory(&user(), Utc::now(), FileName::try_from("docs").unwrap(), None)
            .await
            .unwrap();

        let err = service
            .update_content(
                &user(),
                Utc::now(),
                dir_node.id,
                4,
                "text/plain".to_string(),
                None,
                body_of(b"data"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DriveError::Conflict(_)));
    }

    #[tokio::test]
    async fn folder_listing_sorts_directories_first() {
        let (_dir, _backend, _provider, mut service) = setup(10 * MIB);
        let now = Utc::now();

        service
            .upload(&user(), now, upload_req("zebra.txt", None, 1), body_of(b"z"))
            .await
            .unwrap();
        service
            .create_directory(&user(), now, FileName::try_from("beta").unwrap(), None)
            .await
            .unwrap();
        service
            .upload(&user(), now, upload_req("alpha.txt", None, 1), body_of(b"a"))
            .await
            .unwrap();
        service
            .create_directory(&user(), now, FileName::try_from("alpha").unwrap(), None)
            .await
            .unwrap();

        let listing = service.list(&user(), ListFilter::Folder(None)).await.unwrap();
        let names: Vec<_> = listing
            .files
            .iter()
            .map(|n| (n.filename.as_str().to_string(), n.is_directory))
            .collect();
        assert_eq!(
            names,
            vec![
                ("alpha".to_string(), true),
                ("beta".to_string(), true),
                ("alpha.txt".to_string(), false),
                ("zebra.txt".to_string(), false),
            ]
        );
    }

    #[tokio::test]
    async fn folder_listing_builds_breadcrumbs() {
        let (_dir, _backend, _provider, mut service) = setup(10 * MIB);
        let now = Utc::now();

        let top = service
            .create_directory(&user(), now, FileName::try_from("top").unwrap(), None)
            .await
            .unwrap();
        let inner = service
            .create_directory(&user(), now, FileName::try_from("inner").unwrap(), Some(top.id))
            .await
            .unwrap();

        let listing = service
            .list(&user(), ListFilter::Folder(Some(inner.id)))
            .await
            .unwrap();
        let path: Vec<_> = listing
            .breadcrumbs
            .iter()
            .map(|c| c.filename.as_str())
            .collect();
        assert_eq!(path, vec!["top", "inner"]);
        assert_eq!(listing.parent_id, Some(inner.id));
    }

    #[tokio::test]
    async fn rename_enforces_uniqueness() {
        let (_dir, _backend, _provider, mut service) = setup(10 * MIB);
        let now = Utc::now();

        let a = service
            .upload(&user(), now, upload_req("a.txt", None, 1), body_of(b"a"))
            .await
            .unwrap();
        service
            .upload(&user(), now, upload_req("b.txt", None, 1), body_of(b"b"))
            .await
            .unwrap();

        let err = service
            .rename(&user(), now, a.id, FileName::try_from("b.txt").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, DriveError::NameConflict(_)));

        let renamed = service
            .rename(&user(), now, a.id, FileName::try_from("c.txt").unwrap())
            .await
            .unwrap();
        assert_eq!(renamed.filename.as_str(), "c.txt");
    }

    #[tokio::test]
    async fn move_into_own_subtree_is_rejected() {
        let (_dir, _backend, _provider, mut service) = setup(10 * MIB);
        let now = Utc::now();

        let top = service
            .create_directory(&user(), now, FileName::try_from("top").unwrap(), None)
            .await
            .unwrap();
        let inner = service
            .create_directory(&user(), now, FileName::try_from("inner").unwrap(), Some(top.id))
            .await
            .unwrap();

        let err = service
            .move_node(&user(), now, top.id, Some(inner.id))
            .await
            .unwrap_err();
        assert!(matches!(err, DriveError::Conflict(_)));

        let err = service
            .move_node(&user(), now, top.id, Some(top.id))
            .await
            .unwrap_err();
        assert!(matches!(err, DriveError::Conflict(_)));
    }

    #[tokio::test]
    async fn move_requires_directory_target() {
        let (_dir, _backend, _provider, mut service) = setup(10 * MIB);
        let now = Utc::now();

        let file = service
            .upload(&user(), now, upload_req("a.txt", None, 1), body_of(b"a"))
            .await
            .unwrap();
        let other = service
            .upload(&user(), now, upload_req("b.txt", None, 1), body_of(b"b"))
            .await
            .unwrap();

        let err = service
            .move_node(&user(), now, file.id, Some(other.id))
            .await
            .unwrap_err();
        assert!(matches!(err, DriveError::Conflict(_)));
    }

    #[tokio::test]
    async fn move_between_directories() {
        let (_dir, _backend, _provider, mut service) = setup(10 * MIB);
        let now = Utc::now();

        let docs = service
            .create_directory(&user(), now, FileName::try_from("docs").unwrap(), None)
            .await
            .unwrap();
        let file = service
            .upload(&user(), now, upload_req("a.txt", None, 1), body_of(b"a"))
            .await
            .unwrap();

        let moved = service
            .move_node(&user(), now, file.id, Some(docs.id))
            .await
            .unwrap();
        assert_eq!(moved.parent_id, Some(docs.id));

        let listing = service
            .list(&user(), ListFilter::Folder(Some(docs.id)))
            .await
            .unwrap();
        assert_eq!(listing.files.len(), 1);
    }

    #[tokio::test]
    async fn soft_delete_hides_from_listings_and_fills_trash() {
        let (_dir, backend, _provider, mut service) = setup(10 * MIB);
        let now = Utc::now();

        let node = service
            .upload(&user(), now, upload_req("a.txt", None, 1), body_of(b"a"))
            .await
            .unwrap();
        service.soft_delete(&user(), now, node.id).await.unwrap();

        let folder = service.list(&user(), ListFilter::Folder(None)).await.unwrap();
        assert!(folder.files.is_empty());

        let trash = service.list(&user(), ListFilter::Trash).await.unwrap();
        assert_eq!(trash.files.len(), 1);

        // Soft delete keeps the bytes and the quota.
        assert_eq!(backend.used_bytes(), 1);
    }

    #[tokio::test]
    async fn restore_round_trip_keeps_identity() {
        let (_dir, _backend, provider, mut service) = setup(10 * MIB);
        let now = Utc::now();

        let node = service
            .upload(&user(), now, upload_req("a.txt", None, 4), body_of(b"data"))
            .await
            .unwrap();
        service.soft_delete(&user(), now, node.id).await.unwrap();
        let restored = service.restore(&user(), now, node.id).await.unwrap();

        assert_eq!(restored.id, node.id);
        assert_eq!(restored.filename.as_str(), "a.txt");
        assert!(restored.deleted_at.is_none());
        assert!(provider.exists(node.id, &user()).await.unwrap());
    }

    #[tokio::test]
    async fn restore_collision_appends_suffix() {
        let (_dir, _backend, _provider, mut service) = setup(10 * MIB);
        let now = Utc::now();

        let first = service
            .upload(&user(), now, upload_req("a.txt", None, 1), body_of(b"1"))
            .await
            .unwrap();
        service.soft_delete(&user(), now, first.id).await.unwrap();
        service
            .upload(&user(), now, upload_req("a.txt", None, 1), body_of(b"2"))
            .await
            .unwrap();

        let restored = service.restore(&user(), now, first.id).await.unwrap();
        assert_eq!(restored.filename.as_str(), "a (restored).txt");
    }

    #[tokio::test]
    async fn restore_reparents_to_root_when_parent_is_gone() {
        let (_dir, _backend, _provider, mut service) = setup(10 * MIB);
        let now = Utc::now();

        let docs = service
            .create_directory(&user(), now, FileName::try_from("docs").unwrap(), None)
            .await
            .unwrap();
        let file = service
            .upload(&user(), now, upload_req("a.txt", Some(docs.id), 1), body_of(b"a"))
            .await
            .unwrap();

        service.soft_delete(&user(), now, file.id).await.unwrap();
        service.soft_delete(&user(), now, docs.id).await.unwrap();

        let restored = service.restore(&user(), now, file.id).await.unwrap();
        assert_eq!(restored.parent_id, None);
    }

    #[tokio::test]
    async fn recursive_delete_reclaims_exactly_the_subtree() {
        let (_dir, backend, provider, mut service) = setup(10 * MIB);
        let now = Utc::now();

        let top = service
            .create_directory(&user(), now, FileName::try_from("top").unwrap(), None)
            .await
            .unwrap();
        let inner = service
            .create_directory(&user(), now, FileName::try_from("inner").unwrap(), Some(top.id))
            .await
            .unwrap();
        let f1 = service
            .upload(&user(), now, upload_req("f1.bin", Some(top.id), 4), body_of(b"1111"))
            .await
            .unwrap();
        let f2 = service
            .upload(&user(), now, upload_req("f2.bin", Some(inner.id), 6), body_of(b"222222"))
            .await
            .unwrap();
        let outside = service
            .upload(&user(), now, upload_req("keep.bin", None, 2), body_of(b"00"))
            .await
            .unwrap();
        assert_eq!(backend.used_bytes(), 12);

        service.hard_delete(&user(), top.id).await.unwrap();

        assert_eq!(backend.used_bytes(), 2);
        assert_eq!(backend.node_count(), 1);
        assert!(!provider.exists(f1.id, &user()).await.unwrap());
        assert!(!provider.exists(f2.id, &user()).await.unwrap());
        assert!(provider.exists(outside.id, &user()).await.unwrap());
        backend.assert_quota_conserved();
    }

    #[tokio::test]
    async fn hard_delete_of_missing_node_is_not_found() {
        let (_dir, _backend, _provider, mut service) = setup(10 * MIB);

        let err = service
            .hard_delete(&user(), FileId::from(Ulid::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, DriveError::NotFound(_)));
    }

    #[tokio::test]
    async fn other_users_cannot_see_or_touch_nodes() {
        let (_dir, _backend, _provider, mut service) = setup(10 * MIB);
        let now = Utc::now();
        let stranger = UserId::from("user-b".to_string());

        let node = service
            .upload(&user(), now, upload_req("a.txt", None, 1), body_of(b"a"))
            .await
            .unwrap();

        assert!(matches!(
            service.show(&stranger, node.id).await.unwrap_err(),
            DriveError::NotFound(_)
        ));
        assert!(matches!(
            service.soft_delete(&stranger, now, node.id).await.unwrap_err(),
            DriveError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn download_round_trip() {
        use futures_util::StreamExt;

        let (_dir, _backend, _provider, mut service) = setup(10 * MIB);
        let now = Utc::now();

        let node = service
            .upload(&user(), now, upload_req("a.txt", None, 11), body_of(b"hello world"))
            .await
            .unwrap();

        let (meta, mut stream, len) = service.download(&user(), node.id).await.unwrap();
        assert_eq!(meta.id, node.id);
        assert_eq!(len, 11);

        let mut data = Vec::new();
        while let Some(chunk) = stream.next().await {
            data.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(data, b"hello world");
    }

    #[tokio::test]
    async fn recent_listing_excludes_directories() {
        let (_dir, _backend, _provider, mut service) = setup(10 * MIB);
        let now = Utc::now();

        service
            .create_directory(&user(), now, FileName::try_from("dir").unwrap(), None)
            .await
            .unwrap();
        service
            .upload(&user(), now, upload_req("a.txt", None, 1), body_of(b"a"))
            .await
            .unwrap();

        let recent = service.list(&user(), ListFilter::Recent).await.unwrap();
        assert_eq!(recent.files.len(), 1);
        assert!(!recent.files[0].is_directory);
    }

    #[test]
    fn restored_name_for_files_and_directories() {
        let file = FileName::try_from("a.txt").unwrap();
        assert_eq!(
            restored_name(&file, false).unwrap().as_str(),
            "a (restored).txt"
        );

        let twice = restored_name(&restored_name(&file, false).unwrap(), false).unwrap();
        assert_eq!(twice.as_str(), "a (restored) (restored).txt");

        let dir = FileName::try_from("photos").unwrap();
        assert_eq!(
            restored_name(&dir, true).unwrap().as_str(),
            "photos (restored)"
        );

        let dotted = FileName::try_from("archive.tar.gz").unwrap();
        assert_eq!(
            restored_name(&dotted, false).unwrap().as_str(),
            "archive.tar (restored).gz"
        );
    }

    #[test]
    fn max_allowed_size_has_a_floor() {
        assert_eq!(max_allowed_size(1024), 1024 + MIB as u64);
        // 100 MiB claimed: 5% slack wins over the floor.
        let claimed = 100 * MIB;
        assert_eq!(max_allowed_size(claimed), (claimed + claimed / 20) as u64);
    }
}
