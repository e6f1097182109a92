use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::entities::{Breadcrumb, FileId, FileNode, SessionId};
use crate::error::DriveError;
use crate::services::Listing;
use crate::storage::UploadedPart;

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct FileNodeDto {
    pub id: String,
    #[serde(rename = "parentID")]
    pub parent_id: Option<String>,
    pub filename: String,
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

impl From<FileNode> for FileNodeDto {
    fn from(node: FileNode) -> Self {
        Self {
            id: Ulid::from(node.id).to_string(),
            parent_id: node.parent_id.map(|p| Ulid::from(p).to_string()),
            filename: node.filename.into(),
            content_type: node.content_type,
            size: node.size,
            is_directory: node.is_directory,
            is_favorite: node.is_favorite,
            is_shared: node.is_shared,
            created_at: node.created_at,
            updated_at: node.updated_at,
            last_modified_at: node.last_modified_at,
            deleted_at: node.deleted_at,
        }
    }
}

#[derive(Serialize, Debug)]
pub struct BreadcrumbDto {
    pub id: String,
    pub filename: String,
}

impl From<Breadcrumb> for BreadcrumbDto {
    fn from(crumb: Breadcrumb) -> Self {
        Self {
            id: Ulid::from(crumb.id).to_string(),
            filename: crumb.filename.into(),
        }
    }
}

#[derive(Serialize, Debug)]
pub struct ListingDto {
    pub files: Vec<FileNodeDto>,
    #[serde(rename = "parentID")]
    pub parent_id: Option<String>,
    pub breadcrumbs: Vec<BreadcrumbDto>,
}

impl From<Listing> for ListingDto {
    fn from(listing: Listing) -> Self {
        Self {
            files: listing.files.into_iter().map(FileNodeDto::from).collect(),
            parent_id: listing.parent_id.map(|p| Ulid::from(p).to_string()),
            breadcrumbs: listing
                .breadcrumbs
                .into_iter()
                .map(BreadcrumbDto::from)
                .collect(),
        }
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UploadedPartDto {
    pub part_number: i32,
    pub etag: String,
    pub size: i64,
}

impl From<UploadedPart> for UploadedPartDto {
    fn from(part: UploadedPart) -> Self {
        Self {
            part_number: part.part_number,
            etag: part.etag,
            size: part.size,
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ManifestPartDto {
    pub part_number: i32,
    pub etag: String,
    pub size: i64,
}

impl From<ManifestPartDto> for UploadedPart {
    fn from(part: ManifestPartDto) -> Self {
        Self {
            part_number: part.part_number,
            etag: part.etag,
            size: part.size,
        }
    }
}

/// Parses a path/query id into a [`FileId`]; malformed ids read as absent
/// resources rather than bad requests.
pub(crate) fn parse_file_id(raw: &str) -> Result<FileId, DriveError> {
    Ulid::from_string(raw)
        .map(FileId::from)
        .map_err(|_| DriveError::NotFound("file".to_string()))
}

pub(crate) fn parse_session_id(raw: &str) -> Result<SessionId, DriveError> {
    Ulid::from_string(raw)
        .map(SessionId::from)
        .map_err(|_| DriveError::NotFound("session".to_string()))
}

pub(crate) fn parse_last_modified(millis: Option<i64>) -> Option<DateTime<Utc>> {
    millis.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}
