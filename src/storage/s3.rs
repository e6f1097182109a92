use std::io;

use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, Delete, ObjectIdentifier};
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};

use super::{ByteCountingBody, DownloadStream, StorageError, UploadedPart};
use crate::entities::{FileId, UserId};

/// S3-compatible object storage. Objects are keyed `{owner_id}/{file_id}`;
/// multipart uploads map onto the provider-native primitives verbatim.
///
/// The client is cheap to clone and internally thread-safe; one instance is
/// shared across all requests.
#[derive(Debug, Clone)]
pub struct S3Storage {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(client: aws_sdk_s3::Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    fn key(&self, file_id: FileId, owner_id: &UserId) -> String {
        format!("{}/{}", owner_id.as_str(), ulid::Ulid::from(file_id))
    }

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
        // PutObject needs a sized body, so the stream is buffered here; the
        // counting body bounds the allocation at max_size.
        let buf = buffer_body(body, max_size).await?;
        let len = buf.len() as u64;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.key(file_id, owner_id))
            .body(buf.into())
            .send()
            .await
            .map_err(classify)?;

        Ok(len)
    }

    pub async fn get_response(
        &self,
        file_id: FileId,
        owner_id: &UserId,
    ) -> Result<(DownloadStream, i64), StorageError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.key(file_id, owner_id))
            .send()
            .await
            .map_err(|err| {
                if err.as_service_error().map_or(false, |se| se.is_no_such_key()) {
                    StorageError::NotFound
                } else {
                    classify(err)
                }
            })?;

        let len = output.content_length().unwrap_or(0);
        let stream: DownloadStream =
            Box::pin(futures_util::stream::try_unfold(output.body, |mut body| async move {
                match body.try_next().await {
                    Ok(Some(bytes)) => Ok(Some((bytes, body))),
                    Ok(None) => Ok(None),
                    Err(e) => Err(io::Error::new(io::ErrorKind::Other, e)),
                }
            }));

        Ok((stream, len))
    }

    pub async fn delete(&self, file_id: FileId, owner_id: &UserId) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.key(file_id, owner_id))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    pub async fn exists(&self, file_id: FileId, owner_id: &UserId) -> Result<bool, StorageError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.key(file_id, owner_id))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                if err.as_service_error().map_or(false, |se| se.is_not_found()) {
                    Ok(false)
                } else {
                    Err(classify(err))
                }
            }
        }
    }

    pub async fn initiate_multipart(
        &self,
        file_id: FileId,
        owner_id: &UserId,
    ) -> Result<String, StorageError> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(self.key(file_id, owner_id))
            .send()
            .await
            .map_err(classify)?;

        output
            .upload_id()
            .map(|id| id.to_string())
            .ok_or_else(|| StorageError::Fatal(anyhow::anyhow!("no upload id in response")))
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
        let buf = buffer_body(body, max_size).await?;
        let size = buf.len() as i64;

        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(self.key(file_id, owner_id))
            .upload_id(upload_id)
            .part_number(part_number)
            .body(buf.into())
            .send()
            .await
            .map_err(classify)?;

        let etag = output
            .e_tag()
            .map(|t| t.to_string())
            .ok_or_else(|| StorageError::Fatal(anyhow::anyhow!("no etag in response")))?;

        Ok(UploadedPart {
            part_number,
            etag,
            size,
        })
    }

    pub async fn complete_multipart(
        &self,
        file_id: FileId,
        owner_id: &UserId,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<i64, StorageError> {
        let completed = parts
            .iter()
            .map(|p| {
                CompletedPart::builder()
                    .part_number(p.part_number)
                    .e_tag(&p.etag)
                    .build()
            })
            .collect::<Vec<_>>();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(self.key(file_id, owner_id))
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(|err| {
                let code = err.code().map(|c| c.to_string());
                let message = err
                    .message()
                    .unwrap_or("rejected part set")
                    .to_string();
                match code.as_deref() {
                    Some("InvalidPart") | Some("InvalidPartOrder") | Some("EntityTooSmall") => {
                        StorageError::BadChunkSet(message)
                    }
                    Some("NoSuchUpload") => StorageError::NotFound,
                    _ => classify(err),
                }
            })?;

        // The completion response carries no size; read it back.
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.key(file_id, owner_id))
            .send()
            .await
            .map_err(classify)?;

        Ok(head.content_length().unwrap_or(0))
    }

    pub async fn abort_multipart(
        &self,
        file_id: FileId,
        owner_id: &UserId,
        upload_id: &str,
    ) -> Result<(), StorageError> {
        match self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(self.key(file_id, owner_id))
            .upload_id(upload_id)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            // Already aborted or expired server-side; abort stays idempotent.
            Err(err) if err.code() == Some("NoSuchUpload") => Ok(()),
            Err(err) => Err(classify(err)),
        }
    }

    pub async fn delete_user_data(&self, owner_id: &UserId) -> Result<(), StorageError> {
        let prefix = format!("{}/", owner_id.as_str());
        let mut continuation: Option<String> = None;

        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(classify)?;

            let ids = page
                .contents()
                .iter()
                .filter_map(|obj| obj.key())
                .map(|key| {
                    ObjectIdentifier::builder()
                        .key(key)
                        .build()
                        .map_err(|e| StorageError::Fatal(anyhow::Error::new(e)))
                })
                .collect::<Result<Vec<_>, _>>()?;

            if !ids.is_empty() {
                let delete = Delete::builder()
                    .set_objects(Some(ids))
                    .build()
                    .map_err(|e| StorageError::Fatal(anyhow::Error::new(e)))?;
                self.client
                    .delete_objects()
                    .bucket(&self.bucket)
                    .delete(delete)
                    .send()
                    .await
                    .map_err(classify)?;
            }

            match page.next_continuation_token() {
                Some(token) if page.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => return Ok(()),
            }
        }
    }

    pub async fn user_storage_size(&self, owner_id: &UserId) -> Result<i64, StorageError> {
        let prefix = format!("{}/", owner_id.as_str());
        let mut continuation: Option<String> = None;
        let mut total: i64 = 0;

        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(classify)?;

            total += page
                .contents()
                .iter()
                .filter_map(|obj| obj.size())
                .sum::<i64>();

            match page.next_continuation_token() {
                Some(token) if page.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => return Ok(total),
            }
        }
    }
}

async fn buffer_body<S>(body: S, max_size: u64) -> Result<Bytes, StorageError>
where
    S: Stream<Item = std::result::Result<Bytes, io::Error>> + Unpin,
{
    let mut counting = ByteCountingBody::new(body, max_size);
    let mut buf = BytesMut::with_capacity(max_size.min(1024 * 1024) as usize);
    while let Some(chunk) = counting.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

fn classify<E>(err: SdkError<E>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            StorageError::Transient(anyhow::Error::new(err))
        }
        _ => StorageError::Fatal(anyhow::Error::new(err)),
    }
}
