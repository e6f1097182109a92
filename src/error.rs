use thiserror::Error;

/// Crate-wide error taxonomy.
///
/// Every user-visible failure carries a stable kind (see [`DriveError::kind`])
/// plus a human-readable reason; anything beyond that is logged server-side.
#[derive(Error, Debug)]
pub enum DriveError {
    #[error("missing or invalid credentials")]
    Unauthorized,

    #[error("not allowed: {0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("an entry named \"{0}\" already exists here")]
    NameConflict(String),

    #[error("storage quota exceeded")]
    QuotaExceeded,

    #[error("declared size {claimed} does not match received size {actual}")]
    SizeMismatch { claimed: i64, actual: i64 },

    #[error("invalid chunk set: {0}")]
    BadChunkSet(String),

    #[error("stream exceeds the declared maximum of {limit} bytes")]
    OversizeStream { limit: u64 },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage backend temporarily unavailable")]
    ProviderTransient(#[source] anyhow::Error),

    #[error("storage backend failure")]
    ProviderFatal(#[source] anyhow::Error),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl DriveError {
    /// Stable machine-readable kind, also used as the localization key prefix.
    pub fn kind(&self) -> &'static str {
        match self {
            DriveError::Unauthorized => "unauthorized",
            DriveError::Forbidden(_) => "forbidden",
            DriveError::NotFound(_) => "not_found",
            DriveError::NameConflict(_) => "name_conflict",
            DriveError::QuotaExceeded => "quota_exceeded",
            DriveError::SizeMismatch { .. } => "size_mismatch",
            DriveError::BadChunkSet(_) => "bad_chunk_set",
            DriveError::OversizeStream { .. } => "oversize_stream",
            DriveError::Conflict(_) => "conflict",
            DriveError::ProviderTransient(_) => "provider_transient",
            DriveError::ProviderFatal(_) => "provider_fatal",
            DriveError::Internal(_) => "internal",
        }
    }

    /// Localization key for clients that translate error messages.
    pub fn localization_key(&self) -> Option<&'static str> {
        match self {
            DriveError::NameConflict(_) => Some("errors.storage.name_conflict"),
            DriveError::QuotaExceeded => Some("errors.storage.quota_exceeded"),
            DriveError::SizeMismatch { .. } => Some("errors.storage.size_mismatch"),
            DriveError::OversizeStream { .. } => Some("errors.storage.oversize_stream"),
            DriveError::BadChunkSet(_) => Some("errors.storage.bad_chunk_set"),
            _ => None,
        }
    }

    /// Whether a client retry of the same request can be expected to succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DriveError::ProviderTransient(_))
    }
}

impl From<sqlx::Error> for DriveError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DriveError::NotFound("record".to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                DriveError::Conflict("a conflicting record already exists".to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => {
                DriveError::ProviderTransient(anyhow::Error::new(err))
            }
            other => DriveError::ProviderFatal(anyhow::Error::new(other)),
        }
    }
}

pub type Result<T> = std::result::Result<T, DriveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_stable() {
        assert_eq!(DriveError::QuotaExceeded.kind(), "quota_exceeded");
        assert_eq!(
            DriveError::SizeMismatch {
                claimed: 1,
                actual: 2
            }
            .kind(),
            "size_mismatch"
        );
        assert_eq!(
            DriveError::NameConflict("a.txt".to_string()).kind(),
            "name_conflict"
        );
    }

    #[test]
    fn name_conflict_display() {
        let err = DriveError::NameConflict("notes.txt".to_string());
        assert_eq!(
            err.to_string(),
            "an entry named \"notes.txt\" already exists here"
        );
    }

    #[test]
    fn only_transient_is_retryable() {
        assert!(DriveError::ProviderTransient(anyhow::anyhow!("timeout")).is_retryable());
        assert!(!DriveError::QuotaExceeded.is_retryable());
        assert!(!DriveError::ProviderFatal(anyhow::anyhow!("boom")).is_retryable());
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err: DriveError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.kind(), "not_found");
    }
}
