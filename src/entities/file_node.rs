use chrono::{DateTime, Utc};
use ulid::Ulid;

use super::{FileId, FileName, UserId};

/// Content type recorded for directory nodes.
pub const DIRECTORY_CONTENT_TYPE: &str = "directory";

/// A single row of the hierarchy: both files and directories.
#[derive(Clone, Debug)]
pub struct FileNode {
    pub id: FileId,
    pub user_id: UserId,
    pub parent_id: Option<FileId>,
    pub filename: FileName,
    pub content_type: String,
    pub size: i64,
    pub is_directory: bool,
    pub is_favorite: bool,
    pub is_shared: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl FileNode {
    pub fn new_file(
        id: FileId,
        user_id: UserId,
        parent_id: Option<FileId>,
        filename: FileName,
        content_type: String,
        size: i64,
        now: DateTime<Utc>,
        last_modified_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            user_id,
            parent_id,
            filename,
            content_type,
            size,
            is_directory: false,
            is_favorite: false,
            is_shared: false,
            created_at: now,
            updated_at: now,
            last_modified_at: last_modified_at.unwrap_or(now),
            deleted_at: None,
        }
    }

    pub fn new_directory(
        user_id: UserId,
        parent_id: Option<FileId>,
        filename: FileName,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: FileId::from(Ulid::from_datetime(now.into())),
            user_id,
            parent_id,
            filename,
            content_type: DIRECTORY_CONTENT_TYPE.to_string(),
            size: 0,
            is_directory: true,
            is_favorite: false,
            is_shared: false,
            created_at: now,
            updated_at: now,
            last_modified_at: now,
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}
