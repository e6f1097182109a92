use std::io;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;
use thiserror::Error;

use crate::entities::{FileId, UserId};
use crate::error::DriveError;

mod body;
mod local;
mod s3;

pub use body::{BodyError, ByteCountingBody};
pub use local::LocalStorage;
pub use s3::S3Storage;

/// Byte stream handed back to the HTTP layer for downloads.
pub type DownloadStream =
    Pin<Box<dyn Stream<Item = std::result::Result<Bytes, io::Error>> + Send>>;

/// One uploaded chunk: the provider's receipt and the manifest entry the
/// client replays at completion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadedPart {
    pub part_number: i32,
    pub etag: String,
    pub size: i64,
}

/// Error conditions surfaced by storage backends.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("object not found")]
    NotFound,
    #[error("stream exceeds the declared maximum of {limit} bytes")]
    Oversize { limit: u64 },
    #[error("invalid chunk set: {0}")]
    BadChunkSet(String),
    #[error("transient backend error")]
    Transient(#[source] anyhow::Error),
    #[error("backend failure")]
    Fatal(#[source] anyhow::Error),
}

impl From<BodyError> for StorageError {
    fn from(err: BodyError) -> Self {
        match err {
            BodyError::Oversize { limit } => StorageError::Oversize { limit },
            // The inbound body failed (client disconnect, reset); the client
            // may retry the whole request.
            BodyError::Io(e) => StorageError::Transient(anyhow::Error::new(e)),
        }
    }
}

impl From<StorageError> for DriveError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => DriveError::NotFound("object".to_string()),
            StorageError::Oversize { limit } => DriveError::OversizeStream { limit },
            StorageError::BadChunkSet(reason) => DriveError::BadChunkSet(reason),
            StorageError::Transient(e) => DriveError::ProviderTransient(e),
            StorageError::Fatal(e) => DriveError::ProviderFatal(e),
        }
    }
}

/// Pluggable physical storage. A closed set of backends; the host owns the
/// value and shares it by reference across requests.
#[derive(Debug)]
pub enum StorageProvider {
    Local(LocalStorage),
    S3(S3Storage),
}

impl StorageProvider {
    /// Writes the entire stream to the object addressed by
    /// `(owner_id, file_id)`. After a failure the object is absent; no torn
    /// writes are observable.
    pub async fn save<S>(
        &self,
        body: S,
        file_id: FileId,
        owner_id: &UserId,
        max_size: u64,
    ) -> Result<u64, StorageError>
    where
        S: Stream<Item = std::result::Result<Bytes, io::Error>> + Unpin,
    {
        match self {
            StorageProvider::Local(backend) => backend.save(body, file_id, max_size).await,
            StorageProvider::S3(backend) => backend.save(body, file_id, owner_id, max_size).await,
        }
    }

    pub async fn get_response(
        &self,
        file_id: FileId,
        owner_id: &UserId,
    ) -> Result<(DownloadStream, i64), StorageError> {
        match self {
            StorageProvider::Local(backend) => backend.get_response(file_id).await,
            StorageProvider::S3(backend) => backend.get_response(file_id, owner_id).await,
        }
    }

    /// Idempotent; absence is not an error.
    pub async fn delete(&self, file_id: FileId, owner_id: &UserId) -> Result<(), StorageError> {
        match self {
            StorageProvider::Local(backend) => backend.delete(file_id).await,
            StorageProvider::S3(backend) => backend.delete(file_id, owner_id).await,
        }
    }

    pub async fn exists(&self, file_id: FileId, owner_id: &UserId) -> Result<bool, StorageError> {
        match self {
            StorageProvider::Local(backend) => backend.exists(file_id).await,
            StorageProvider::S3(backend) => backend.exists(file_id, owner_id).await,
        }
    }

    pub async fn initiate_multipart(
        &self,
        file_id: FileId,
        owner_id: &UserId,
    ) -> Result<String, StorageError> {
        match self {
            StorageProvider::Local(backend) => backend.initiate_multipart(file_id).await,
            StorageProvider::S3(backend) => backend.initiate_multipart(file_id, owner_id).await,
        }
    }

    pub async fn upload_part<S>(
        &self,
        file_id: FileId,
        owner_id: &UserId,
        upload_id: &str,
        part_number: i32,
        body: S,
        max_size: u64,
    ) -> Result<UploadedPart, StorageError>
    where
        S: Stream<Item = std::result::Result<Bytes, io::Error>> + Unpin,
    {
        match self {
            StorageProvider::Local(backend) => {
                backend
                    .upload_part(file_id, upload_id, part_number, body, max_size)
                    .await
            }
            StorageProvider::S3(backend) => {
                backend
                    .upload_part(file_id, owner_id, upload_id, part_number, body, max_size)
                    .await
            }
        }
    }

    /// Assembles the final object from `parts`, which must already be in
    /// ascending part-number order. Each etag is verified.
    pub async fn complete_multipart(
        &self,
        file_id: FileId,
        owner_id: &UserId,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<i64, StorageError> {
        match self {
            StorageProvider::Local(backend) => {
                backend.complete_multipart(file_id, upload_id, parts).await
            }
            StorageProvider::S3(backend) => {
                backend
                    .complete_multipart(file_id, owner_id, upload_id, parts)
                    .await
            }
        }
    }

    /// Idempotent; succeeds even when some (or all) chunks are missing.
    pub async fn abort_multipart(
        &self,
        file_id: FileId,
        owner_id: &UserId,
        upload_id: &str,
    ) -> Result<(), StorageError> {
        match self {
            StorageProvider::Local(backend) => backend.abort_multipart(file_id, upload_id).await,
            StorageProvider::S3(backend) => {
                backend.abort_multipart(file_id, owner_id, upload_id).await
            }
        }
    }

    /// Removes every object belonging to `owner_id`. Consumed by the admin
    /// subsystem when an account is purged. The local backend keys objects
    /// by content id only and cannot attribute them to an owner.
    pub async fn delete_user_data(&self, owner_id: &UserId) -> Result<(), StorageError> {
        match self {
            StorageProvider::Local(_) => Err(StorageError::Fatal(anyhow::anyhow!(
                "the local backend cannot enumerate objects per owner"
            ))),
            StorageProvider::S3(backend) => backend.delete_user_data(owner_id).await,
        }
    }

    /// Sums stored bytes for `owner_id` via prefix listing. Same caveat as
    /// [`delete_user_data`](Self::delete_user_data) for the local backend.
    pub async fn user_storage_size(&self, owner_id: &UserId) -> Result<i64, StorageError> {
        match self {
            StorageProvider::Local(_) => Err(StorageError::Fatal(anyhow::anyhow!(
                "the local backend cannot enumerate objects per owner"
            ))),
            StorageProvider::S3(backend) => backend.user_storage_size(owner_id).await,
        }
    }
}
