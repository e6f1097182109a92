use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use md5::{Digest, Md5};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use ulid::Ulid;

use super::{ByteCountingBody, DownloadStream, StorageError, UploadedPart};
use crate::entities::FileId;

const COPY_BUF_SIZE: usize = 64 * 1024;

/// Filesystem-backed storage.
///
/// Objects live in a sharded layout keyed by the first two characters of the
/// file id:
///
/// ```text
/// {root}/
/// ├── 01/
/// │   └── 01HV4K1N8Q0QJ1W2X3Y4Z5A6B7
/// └── _chunks/
///     └── {file id}/{upload id}/part_{N}
/// ```
///
/// The directory tree is the only multipart state; an upload id is just a
/// fresh opaque id naming a chunk directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn object_path(&self, file_id: FileId) -> PathBuf {
        let key = Ulid::from(file_id).to_string().to_lowercase();
        self.root.join(&key[..2]).join(key)
    }

    fn upload_dir(&self, file_id: FileId, upload_id: &str) -> PathBuf {
        self.root
            .join("_chunks")
            .join(Ulid::from(file_id).to_string().to_lowercase())
            .join(upload_id)
    }

    fn part_path(&self, file_id: FileId, upload_id: &str, part_number: i32) -> PathBuf {
        self.upload_dir(file_id, upload_id)
            .join(format!("part_{}", part_number))
    }

    pub async fn save<S>(
        &self,
        body: S,
        file_id: FileId,
        max_size: u64,
    ) -> Result<u64, StorageError>
    where
        S: Stream<Item = std::result::Result<Bytes, io::Error>> + Unpin,
    {
        let path = self.object_path(file_id);
        let written = self.write_stream(body, &path, max_size).await?;
        Ok(written.0)
    }

    pub async fn get_response(
        &self,
        file_id: FileId,
    ) -> Result<(DownloadStream, i64), StorageError> {
        let path = self.object_path(file_id);
        let file = fs::File::open(&path).await.map_err(map_open_error)?;
        let len = file.metadata().await.map_err(fatal_io)?.len() as i64;

        let stream: DownloadStream = Box::pin(ReaderStream::new(file));
        Ok((stream, len))
    }

    pub async fn delete(&self, file_id: FileId) -> Result<(), StorageError> {
        match fs::remove_file(self.object_path(file_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(fatal_io(e)),
        }
    }

    pub async fn exists(&self, file_id: FileId) -> Result<bool, StorageError> {
        match fs::metadata(self.object_path(file_id)).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(fatal_io(e)),
        }
    }

    pub async fn initiate_multipart(&self, file_id: FileId) -> Result<String, StorageError> {
        let upload_id = Ulid::new().to_string().to_lowercase();
        fs::create_dir_all(self.upload_dir(file_id, &upload_id))
            .await
            .map_err(fatal_io)?;
        Ok(upload_id)
    }

    pub async fn upload_part<S>(
        &self,
        file_id: FileId,
        upload_id: &str,
        part_number: i32,
        body: S,
        max_size: u64,
    ) -> Result<UploadedPart, StorageError>
    where
        S: Stream<Item = std::result::Result<Bytes, io::Error>> + Unpin,
    {
        let path = self.part_path(file_id, upload_id, part_number);
        let (size, etag) = self.write_stream(body, &path, max_size).await?;

        Ok(UploadedPart {
            part_number,
            etag,
            size: size as i64,
        })
    }

    /// Concatenates the chunks into the final object, re-verifying each
    /// chunk's MD5 against the manifest etag, then removes the chunk
    /// directory. `parts` must be in ascending part-number order.
    pub async fn complete_multipart(
        &self,
        file_id: FileId,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<i64, StorageError> {
        let final_path = self.object_path(file_id);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await.map_err(fatal_io)?;
        }

        let mut out = fs::File::create(&final_path).await.map_err(fatal_io)?;
        let mut total: i64 = 0;

        for part in parts {
            let part_path = self.part_path(file_id, upload_id, part.part_number);
            let mut chunk = match fs::File::open(&part_path).await {
                Ok(f) => f,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    discard(&final_path).await;
                    return Err(StorageError::BadChunkSet(format!(
                        "part {} was never uploaded",
                        part.part_number
                    )));
                }
                Err(e) => {
                    discard(&final_path).await;
                    return Err(fatal_io(e));
                }
            };

            let mut hasher = Md5::new();
            let mut buf = vec![0u8; COPY_BUF_SIZE];
            loop {
                let n = match chunk.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        discard(&final_path).await;
                        return Err(fatal_io(e));
                    }
                };
                hasher.update(&buf[..n]);
                if let Err(e) = out.write_all(&buf[..n]).await {
                    discard(&final_path).await;
                    return Err(fatal_io(e));
                }
                total += n as i64;
            }

            let etag = hex::encode(hasher.finalize());
            if etag != part.etag {
                discard(&final_path).await;
                return Err(StorageError::BadChunkSet(format!(
                    "part {} etag mismatch",
                    part.part_number
                )));
            }
        }

        if let Err(e) = out.flush().await {
            discard(&final_path).await;
            return Err(fatal_io(e));
        }
        drop(out);

        self.remove_upload_dir(file_id, upload_id).await;
        Ok(total)
    }

    pub async fn abort_multipart(
        &self,
        file_id: FileId,
        upload_id: &str,
    ) -> Result<(), StorageError> {
        self.remove_upload_dir(file_id, upload_id).await;
        Ok(())
    }

    /// Streams `body` into `path`, enforcing `max_size` and computing a
    /// running MD5. The file is removed again on any failure.
    async fn write_stream<S>(
        &self,
        body: S,
        path: &Path,
        max_size: u64,
    ) -> Result<(u64, String), StorageError>
    where
        S: Stream<Item = std::result::Result<Bytes, io::Error>> + Unpin,
    {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(fatal_io)?;
        }

        let mut counting = ByteCountingBody::new(body, max_size);
        let mut file = fs::File::create(path).await.map_err(fatal_io)?;
        let mut hasher = Md5::new();

        while let Some(chunk) = counting.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    discard(path).await;
                    return Err(e.into());
                }
            };
            hasher.update(&chunk);
            if let Err(e) = file.write_all(&chunk).await {
                drop(file);
                discard(path).await;
                return Err(fatal_io(e));
            }
        }

        if let Err(e) = file.flush().await {
            drop(file);
            discard(path).await;
            return Err(fatal_io(e));
        }

        Ok((counting.bytes_received(), hex::encode(hasher.finalize())))
    }

    async fn remove_upload_dir(&self, file_id: FileId, upload_id: &str) {
        let dir = self.upload_dir(file_id, upload_id);
        if let Err(e) = fs::remove_dir_all(&dir).await {
            if e.kind() != io::ErrorKind::NotFound {
                log::warn!("failed to remove chunk directory {}: {}", dir.display(), e);
            }
        }
        // Drop the per-file directory too once its last upload is gone.
        if let Some(parent) = dir.parent() {
            let _ = fs::remove_dir(parent).await;
        }
    }
}

async fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != io::ErrorKind::NotFound {
            log::warn!("failed to remove partial object {}: {}", path.display(), e);
        }
    }
}

fn map_open_error(e: io::Error) -> StorageError {
    if e.kind() == io::ErrorKind::NotFound {
        StorageError::NotFound
    } else {
        fatal_io(e)
    }
}

fn fatal_io(e: io::Error) -> StorageError {
    StorageError::Fatal(anyhow::Error::new(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use tempfile::TempDir;

    fn setup() -> (TempDir, LocalStorage) {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();
        (dir, storage)
    }

    fn body_of(parts: &[&[u8]]) -> impl Stream<Item = Result<Bytes, io::Error>> + Unpin {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::copy_from_slice(p)))
                .collect::<Vec<_>>(),
        )
    }

    async fn read_back(storage: &LocalStorage, id: FileId) -> Vec<u8> {
        let (mut stream, _) = storage.get_response(id).await.unwrap();
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn save_and_get_round_trip() {
        let (_dir, storage) = setup();
        let id = FileId::from(Ulid::new());

        let written = storage
            .save(body_of(&[b"hello ", b"world"]), id, 1024)
            .await
            .unwrap();
        assert_eq!(written, 11);
        assert!(storage.exists(id).await.unwrap());

        let (_, len) = storage.get_response(id).await.unwrap();
        assert_eq!(len, 11);
        assert_eq!(read_back(&storage, id).await, b"hello world");
    }

    #[tokio::test]
    async fn objects_are_sharded_by_id_prefix() {
        let (dir, storage) = setup();
        let id = FileId::from(Ulid::new());
        storage.save(body_of(&[b"x"]), id, 16).await.unwrap();

        let key = Ulid::from(id).to_string().to_lowercase();
        assert!(dir.path().join(&key[..2]).join(&key).is_file());
    }

    #[tokio::test]
    async fn oversize_save_leaves_nothing_behind() {
        let (_dir, storage) = setup();
        let id = FileId::from(Ulid::new());

        let err = storage
            .save(body_of(&[b"aaaa", b"bbbb", b"cccc"]), id, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Oversize { limit: 10 }));
        assert!(!storage.exists(id).await.unwrap());
    }

    #[tokio::test]
    async fn transport_failure_removes_partial_object() {
        let (_dir, storage) = setup();
        let id = FileId::from(Ulid::new());
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "gone")),
        ]);

        let result = storage.save(body, id, 1024).await;
        assert!(matches!(result, Err(StorageError::Transient(_))));
        assert!(!storage.exists(id).await.unwrap());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_dir, storage) = setup();
        let id = FileId::from(Ulid::new());

        storage.save(body_of(&[b"data"]), id, 16).await.unwrap();
        storage.delete(id).await.unwrap();
        assert!(!storage.exists(id).await.unwrap());
        storage.delete(id).await.unwrap();
    }

    #[tokio::test]
    async fn get_response_missing_is_not_found() {
        let (_dir, storage) = setup();
        let result = storage.get_response(FileId::from(Ulid::new())).await;
        assert!(matches!(result, Err(StorageError::NotFound)));
    }

    #[tokio::test]
    async fn multipart_happy_path_concatenates_in_order() {
        let (_dir, storage) = setup();
        let id = FileId::from(Ulid::new());
        let upload_id = storage.initiate_multipart(id).await.unwrap();

        // Upload out of order; completion order is what matters.
        let p2 = storage
            .upload_part(id, &upload_id, 2, body_of(&[b"BBBB"]), 1024)
            .await
            .unwrap();
        let p1 = storage
            .upload_part(id, &upload_id, 1, body_of(&[b"AAAA"]), 1024)
            .await
            .unwrap();
        let p3 = storage
            .upload_part(id, &upload_id, 3, body_of(&[b"CC"]), 1024)
            .await
            .unwrap();

        let total = storage
            .complete_multipart(id, &upload_id, &[p1, p2, p3])
            .await
            .unwrap();
        assert_eq!(total, 10);
        assert_eq!(read_back(&storage, id).await, b"AAAABBBBCC");
    }

    #[tokio::test]
    async fn part_etag_is_md5_hex() {
        let (_dir, storage) = setup();
        let id = FileId::from(Ulid::new());
        let upload_id = storage.initiate_multipart(id).await.unwrap();

        let part = storage
            .upload_part(id, &upload_id, 1, body_of(&[b"hello"]), 1024)
            .await
            .unwrap();
        // md5("hello")
        assert_eq!(part.etag, "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(part.size, 5);
    }

    #[tokio::test]
    async fn completion_with_missing_part_is_bad_chunk_set() {
        let (_dir, storage) = setup();
        let id = FileId::from(Ulid::new());
        let upload_id = storage.initiate_multipart(id).await.unwrap();

        let p1 = storage
            .upload_part(id, &upload_id, 1, body_of(&[b"AAAA"]), 1024)
            .await
            .unwrap();
        let ghost = UploadedPart {
            part_number: 2,
            etag: "0".repeat(32),
            size: 4,
        };

        let err = storage
            .complete_multipart(id, &upload_id, &[p1, ghost])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::BadChunkSet(_)));
        assert!(!storage.exists(id).await.unwrap());
    }

    #[tokio::test]
    async fn completion_with_wrong_etag_is_bad_chunk_set() {
        let (_dir, storage) = setup();
        let id = FileId::from(Ulid::new());
        let upload_id = storage.initiate_multipart(id).await.unwrap();

        let mut p1 = storage
            .upload_part(id, &upload_id, 1, body_of(&[b"AAAA"]), 1024)
            .await
            .unwrap();
        p1.etag = "f".repeat(32);

        let err = storage
            .complete_multipart(id, &upload_id, &[p1])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::BadChunkSet(_)));
        assert!(!storage.exists(id).await.unwrap());
    }

    #[tokio::test]
    async fn completion_removes_chunk_directory() {
        let (dir, storage) = setup();
        let id = FileId::from(Ulid::new());
        let upload_id = storage.initiate_multipart(id).await.unwrap();

        let p1 = storage
            .upload_part(id, &upload_id, 1, body_of(&[b"data"]), 1024)
            .await
            .unwrap();
        storage
            .complete_multipart(id, &upload_id, &[p1])
            .await
            .unwrap();

        let key = Ulid::from(id).to_string().to_lowercase();
        assert!(!dir.path().join("_chunks").join(key).exists());
    }

    #[tokio::test]
    async fn repeated_part_upload_is_last_writer_wins() {
        let (_dir, storage) = setup();
        let id = FileId::from(Ulid::new());
        let upload_id = storage.initiate_multipart(id).await.unwrap();

        storage
            .upload_part(id, &upload_id, 1, body_of(&[b"old contents"]), 1024)
            .await
            .unwrap();
        let replacement = storage
            .upload_part(id, &upload_id, 1, body_of(&[b"new"]), 1024)
            .await
            .unwrap();

        let total = storage
            .complete_multipart(id, &upload_id, &[replacement])
            .await
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(read_back(&storage, id).await, b"new");
    }

    #[tokio::test]
    async fn oversize_part_is_rejected() {
        let (_dir, storage) = setup();
        let id = FileId::from(Ulid::new());
        let upload_id = storage.initiate_multipart(id).await.unwrap();

        let err = storage
            .upload_part(id, &upload_id, 1, body_of(&[b"too much data"]), 4)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Oversize { limit: 4 }));
    }

    #[tokio::test]
    async fn abort_is_idempotent_and_tolerates_missing_chunks() {
        let (_dir, storage) = setup();
        let id = FileId::from(Ulid::new());
        let upload_id = storage.initiate_multipart(id).await.unwrap();

        storage
            .upload_part(id, &upload_id, 1, body_of(&[b"x"]), 16)
            .await
            .unwrap();
        storage.abort_multipart(id, &upload_id).await.unwrap();
        storage.abort_multipart(id, &upload_id).await.unwrap();
        storage.abort_multipart(id, "never-existed").await.unwrap();
    }
}
