use std::str::FromStr;

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::entities::{FileId, FileName, MultipartSession, SessionId, UserId, SESSION_TTL_HOURS};
use crate::error::{DriveError, Result};

/// Wire form of the signed upload token (HS256).
///
/// Every claim is tainted input until the signature verifies; handlers must
/// go through [`UploadTokenSigner::verify`] before consulting any field.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawClaims {
    session_id: String,
    file_id: String,
    upload_id: String,
    owner_id: String,
    filename: String,
    content_type: String,
    total_size: i64,
    max_chunk_size: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_modified: Option<i64>,
    iat: i64,
    exp: i64,
}

/// Verified claims of an upload token.
#[derive(Debug, Clone)]
pub struct UploadTokenClaims {
    pub session_id: SessionId,
    pub file_id: FileId,
    pub upload_id: String,
    pub owner_id: UserId,
    pub filename: FileName,
    pub content_type: String,
    pub total_size: i64,
    pub max_chunk_size: i64,
    pub parent_id: Option<FileId>,
    pub last_modified: Option<DateTime<Utc>>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct UploadTokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl UploadTokenSigner {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }

    /// Mints a token carrying everything needed for stateless completion.
    pub fn mint(
        &self,
        session: &MultipartSession,
        content_type: &str,
        max_chunk_size: i64,
        parent_id: Option<FileId>,
        last_modified: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let claims = RawClaims {
            session_id: Ulid::from(session.id).to_string(),
            file_id: Ulid::from(session.file_id).to_string(),
            upload_id: session.upload_id.clone(),
            owner_id: session.user_id.clone().into(),
            filename: session.filename.clone().into(),
            content_type: content_type.to_string(),
            total_size: session.total_size,
            max_chunk_size,
            parent_id: parent_id.map(|id| Ulid::from(id).to_string()),
            last_modified: last_modified.map(|t| t.timestamp_millis()),
            iat: now.timestamp(),
            exp: (now + Duration::hours(SESSION_TTL_HOURS)).timestamp(),
        };

        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| DriveError::Internal(anyhow::Error::new(e)))
    }

    /// Verifies the signature and expiry, then decodes the claims.
    ///
    /// Any failure (bad signature, malformed claims, expired token) is
    /// reported as `Unauthorized` without detail.
    pub fn verify(&self, token: &str) -> Result<UploadTokenClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp"]);

        let data = jsonwebtoken::decode::<RawClaims>(token, &self.decoding, &validation)
            .map_err(|_| DriveError::Unauthorized)?;
        let raw = data.claims;

        let session_id = Ulid::from_str(&raw.session_id).map_err(|_| DriveError::Unauthorized)?;
        let file_id = Ulid::from_str(&raw.file_id).map_err(|_| DriveError::Unauthorized)?;
        let parent_id = raw
            .parent_id
            .map(|s| Ulid::from_str(&s).map(FileId::from))
            .transpose()
            .map_err(|_| DriveError::Unauthorized)?;
        let filename =
            FileName::try_from(raw.filename).map_err(|_| DriveError::Unauthorized)?;

        Ok(UploadTokenClaims {
            session_id: SessionId::from(session_id),
            file_id: FileId::from(file_id),
            upload_id: raw.upload_id,
            owner_id: UserId::from(raw.owner_id),
            filename,
            content_type: raw.content_type,
            total_size: raw.total_size,
            max_chunk_size: raw.max_chunk_size,
            parent_id,
            last_modified: raw
                .last_modified
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
            issued_at: Utc
                .timestamp_opt(raw.iat, 0)
                .single()
                .ok_or(DriveError::Unauthorized)?,
            expires_at: Utc
                .timestamp_opt(raw.exp, 0)
                .single()
                .ok_or(DriveError::Unauthorized)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::MultipartSession;

    fn session(now: DateTime<Utc>) -> MultipartSession {
        MultipartSession::new(
            FileId::from(Ulid::new()),
            "upload-123".to_string(),
            UserId::from("user-a".to_string()),
            FileName::try_from("big.bin").unwrap(),
            15 * 1024 * 1024,
            now,
        )
    }

    #[test]
    fn mint_and_verify_round_trip() {
        let signer = UploadTokenSigner::new(b"test-secret-key");
        let now = Utc::now();
        let session = session(now);

        let token = signer
            .mint(&session, "application/octet-stream", 8 * 1024 * 1024, None, None, now)
            .unwrap();
        let claims = signer.verify(&token).unwrap();

        assert_eq!(claims.session_id, session.id);
        assert_eq!(claims.file_id, session.file_id);
        assert_eq!(claims.upload_id, "upload-123");
        assert_eq!(claims.owner_id, session.user_id);
        assert_eq!(claims.total_size, 15 * 1024 * 1024);
        assert_eq!(claims.max_chunk_size, 8 * 1024 * 1024);
        assert_eq!(claims.content_type, "application/octet-stream");
        assert!(claims.parent_id.is_none());
    }

    #[test]
    fn carries_parent_and_last_modified() {
        let signer = UploadTokenSigner::new(b"test-secret-key");
        let now = Utc::now();
        let session = session(now);
        let parent = FileId::from(Ulid::new());
        let modified = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();

        let token = signer
            .mint(&session, "video/mp4", 1024, Some(parent), Some(modified), now)
            .unwrap();
        let claims = signer.verify(&token).unwrap();

        assert_eq!(claims.parent_id, Some(parent));
        assert_eq!(claims.last_modified, Some(modified));
    }

    #[test]
    fn rejects_tampered_token() {
        let signer = UploadTokenSigner::new(b"test-secret-key");
        let now = Utc::now();
        let token = signer
            .mint(&session(now), "text/plain", 1024, None, None, now)
            .unwrap();

        let mut tampered = token.clone();
        tampered.pop();
        assert!(matches!(
            signer.verify(&tampered),
            Err(DriveError::Unauthorized)
        ));
    }

    #[test]
    fn rejects_wrong_key() {
        let now = Utc::now();
        let token = UploadTokenSigner::new(b"key-one")
            .mint(&session(now), "text/plain", 1024, None, None, now)
            .unwrap();

        assert!(matches!(
            UploadTokenSigner::new(b"key-two").verify(&token),
            Err(DriveError::Unauthorized)
        ));
    }

    #[test]
    fn rejects_expired_token() {
        let signer = UploadTokenSigner::new(b"test-secret-key");
        let then = Utc::now() - Duration::hours(SESSION_TTL_HOURS) - Duration::hours(1);
        let token = signer
            .mint(&session(then), "text/plain", 1024, None, None, then)
            .unwrap();

        assert!(matches!(
            signer.verify(&token),
            Err(DriveError::Unauthorized)
        ));
    }
}
