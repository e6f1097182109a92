use chrono::{DateTime, Duration, Utc};
use ulid::Ulid;

use super::{FileId, FileName, SessionId, UserId};

/// How long a multipart session (and its upload token) stays valid.
pub const SESSION_TTL_HOURS: i64 = 24;

/// Audit and cleanup record for an in-flight multipart upload.
///
/// The hot path never reads this row; it exists so the expiry sweeper can
/// abort abandoned uploads and reclaim their quota reservation.
#[derive(Clone, Debug)]
pub struct MultipartSession {
    pub id: SessionId,
    pub file_id: FileId,
    pub upload_id: String,
    pub user_id: UserId,
    pub filename: FileName,
    pub total_size: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl MultipartSession {
    pub fn new(
        file_id: FileId,
        upload_id: String,
        user_id: UserId,
        filename: FileName,
        total_size: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SessionId::from(Ulid::from_datetime(now.into())),
            file_id,
            upload_id,
            user_id,
            filename,
            total_size,
            created_at: now,
            expires_at: now + Duration::hours(SESSION_TTL_HOURS),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}
