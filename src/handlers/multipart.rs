use std::sync::Arc;

use actix_web::{delete, post, put, web, HttpRequest, HttpResponse};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use ulid::Ulid;

use super::auth::bearer_token;
use super::dto::{
    parse_file_id, parse_last_modified, parse_session_id, FileNodeDto, ManifestPartDto,
    UploadedPartDto,
};
use super::{content_length, io_stream, multipart_service, AuthedUser};
use crate::app_config::AppConfig;
use crate::entities::FileName;
use crate::error::DriveError;
use crate::services::InitiateRequest;
use crate::storage::{StorageProvider, UploadedPart};
use crate::token::UploadTokenSigner;

#[derive(Deserialize, Debug)]
pub struct InitiateBody {
    filename: String,
    #[serde(rename = "contentType")]
    content_type: Option<String>,
    #[serde(rename = "totalSize")]
    total_size: i64,
    #[serde(rename = "parentID")]
    parent_id: Option<String>,
    #[serde(rename = "lastModified")]
    last_modified: Option<i64>,
}

#[derive(Serialize, Debug)]
pub struct InitiateResponse {
    #[serde(rename = "sessionID")]
    session_id: String,
    #[serde(rename = "fileID")]
    file_id: String,
    #[serde(rename = "uploadID")]
    upload_id: String,
    #[serde(rename = "maxChunkSize")]
    max_chunk_size: i64,
    token: String,
}

#[post("/multipart/initiate")]
pub async fn initiate(
    user: AuthedUser,
    body: web::Json<InitiateBody>,
    pool: web::Data<PgPool>,
    provider: web::Data<Arc<StorageProvider>>,
    config: web::Data<AppConfig>,
    signer: web::Data<Arc<UploadTokenSigner>>,
) -> Result<HttpResponse, actix_web::Error> {
    let filename = FileName::try_from(body.filename.clone())
        .map_err(|e| DriveError::Conflict(e.to_string()))?;
    let parent_id = body.parent_id.as_deref().map(parse_file_id).transpose()?;

    let mut service = multipart_service(&pool, &provider, &config, &signer);
    let outcome = service
        .initiate(
            &user.0,
            Utc::now(),
            InitiateRequest {
                filename,
                content_type: body
                    .content_type
                    .clone()
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                total_size: body.total_size,
                parent_id,
                last_modified: parse_last_modified(body.last_modified),
            },
        )
        .await?;

    Ok(HttpResponse::Ok().json(InitiateResponse {
        session_id: Ulid::from(outcome.session_id).to_string(),
        file_id: Ulid::from(outcome.file_id).to_string(),
        upload_id: outcome.upload_id,
        max_chunk_size: outcome.max_chunk_size,
        token: outcome.token,
    }))
}

/// The hot path. Authenticated by the upload token alone; no session
/// cookie, no database row.
#[put("/multipart/{session_id}/part/{part_number}")]
pub async fn upload_part(
    req: HttpRequest,
    path: web::Path<(String, i32)>,
    payload: web::Payload,
    pool: web::Data<PgPool>,
    provider: web::Data<Arc<StorageProvider>>,
    config: web::Data<AppConfig>,
    signer: web::Data<Arc<UploadTokenSigner>>,
) -> Result<HttpResponse, actix_web::Error> {
    let token = bearer_token(&req).ok_or(DriveError::Unauthorized)?.to_string();
    let (session_raw, part_number) = path.into_inner();
    let session_id = parse_session_id(&session_raw)?;
    let declared = content_length(&req)?;

    let mut service = multipart_service(&pool, &provider, &config, &signer);
    let part = service
        .upload_part(session_id, part_number, declared, &token, io_stream(payload))
        .await?;

    Ok(HttpResponse::Ok().json(UploadedPartDto::from(part)))
}

#[derive(Deserialize, Debug)]
pub struct CompleteBody {
    parts: Vec<ManifestPartDto>,
}

#[post("/multipart/{session_id}/complete")]
pub async fn complete(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<CompleteBody>,
    pool: web::Data<PgPool>,
    provider: web::Data<Arc<StorageProvider>>,
    config: web::Data<AppConfig>,
    signer: web::Data<Arc<UploadTokenSigner>>,
) -> Result<HttpResponse, actix_web::Error> {
    let token = bearer_token(&req).ok_or(DriveError::Unauthorized)?.to_string();
    let session_id = parse_session_id(&path)?;
    let manifest: Vec<UploadedPart> = body
        .into_inner()
        .parts
        .into_iter()
        .map(UploadedPart::from)
        .collect();

    let mut service = multipart_service(&pool, &provider, &config, &signer);
    let node = service
        .complete(session_id, Utc::now(), &token, manifest)
        .await?;

    Ok(HttpResponse::Ok().json(FileNodeDto::from(node)))
}

#[delete("/multipart/{session_id}/abort")]
pub async fn abort(
    req: HttpRequest,
    path: web::Path<String>,
    pool: web::Data<PgPool>,
    provider: web::Data<Arc<StorageProvider>>,
    config: web::Data<AppConfig>,
    signer: web::Data<Arc<UploadTokenSigner>>,
) -> Result<HttpResponse, actix_web::Error> {
    let token = bearer_token(&req).ok_or(DriveError::Unauthorized)?.to_string();
    let session_id = parse_session_id(&path)?;

    let mut service = multipart_service(&pool, &provider, &config, &signer);
    service.abort(session_id, &token).await?;

    Ok(HttpResponse::NoContent().finish())
}
