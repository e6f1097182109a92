use async_trait::async_trait;

use crate::entities::{Breadcrumb, FileId, FileName, FileNode, ListFilter, UserId};

/// Metadata model of files and directories: parent links, soft delete,
/// favorites, ownership, name uniqueness within a parent.
#[async_trait]
pub trait FileNodesRepository {
    type Error;

    async fn insert(&mut self, node: &FileNode) -> Result<(), Self::Error>;

    /// Returns the node owned by `user_id`, soft-deleted or not. A node
    /// belonging to someone else is indistinguishable from an absent one.
    async fn find_owned(&mut self, user_id: &UserId, id: FileId)
        -> Result<FileNode, Self::Error>;

    /// Looks a node up by primary key alone, regardless of owner. Used as
    /// the duplicate-completion guard.
    async fn find_any(&mut self, id: FileId) -> Result<Option<FileNode>, Self::Error>;

    /// Finds a live (non-deleted) sibling with the given name.
    async fn find_live_by_name(
        &mut self,
        user_id: &UserId,
        parent_id: Option<FileId>,
        name: &FileName,
    ) -> Result<Option<FileNode>, Self::Error>;

    async fn list(
        &mut self,
        user_id: &UserId,
        filter: &ListFilter,
    ) -> Result<Vec<FileNode>, Self::Error>;

    /// Ordered path from the root down to `leaf`, inclusive. Bounded by
    /// [`crate::entities::MAX_TREE_DEPTH`].
    async fn breadcrumbs(
        &mut self,
        user_id: &UserId,
        leaf: Option<FileId>,
    ) -> Result<Vec<Breadcrumb>, Self::Error>;

    /// The subtree rooted at `root`, including the root itself, in
    /// parents-before-children order. Empty when the root does not exist.
    async fn descendants(
        &mut self,
        user_id: &UserId,
        root: FileId,
    ) -> Result<Vec<FileNode>, Self::Error>;

    /// Persists name, parent, favorite/shared flags, `deleted_at` and
    /// `updated_at` of an already-loaded node.
    async fn update_metadata(&mut self, node: &FileNode) -> Result<(), Self::Error>;

    /// Persists size, content type and timestamps after a content write.
    async fn update_content(&mut self, node: &FileNode) -> Result<(), Self::Error>;

    /// Removes rows in the given order within one transaction; callers pass
    /// children first so parent references never dangle.
    async fn delete_many(&mut self, user_id: &UserId, ids: &[FileId])
        -> Result<(), Self::Error>;
}
