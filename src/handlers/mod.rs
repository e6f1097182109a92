use std::io;
use std::sync::Arc;

use actix_web::http::header::CONTENT_LENGTH;
use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use sqlx::PgPool;

use crate::adapters::{
    FileNodesRepositoryImpl, MultipartSessionsRepositoryImpl, QuotaLedgerImpl, SyncEventSinkImpl,
};
use crate::app_config::AppConfig;
use crate::error::DriveError;
use crate::services::{MultipartService, StorageService};
use crate::storage::StorageProvider;
use crate::token::UploadTokenSigner;

pub mod auth;
mod dto;
mod files;
mod multipart;

pub use auth::AuthedUser;
pub use dto::*;

/// Mounts the whole `/files` surface. Fixed segments are registered before
/// the `/{id}` catch-alls so view names never parse as ids.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/files")
            .service(files::create_directory)
            .service(files::move_file)
            .service(files::list_recent)
            .service(files::list_favorites)
            .service(files::list_shared)
            .service(files::list_trash)
            .service(files::list_all)
            .service(multipart::initiate)
            .service(multipart::upload_part)
            .service(multipart::complete)
            .service(multipart::abort)
            .service(files::list)
            .service(files::upload)
            .service(files::download)
            .service(files::favorite)
            .service(files::restore)
            .service(files::permanent_delete)
            .service(files::show)
            .service(files::update_content)
            .service(files::rename)
            .service(files::soft_delete),
    );
}

type PgStorageService =
    StorageService<FileNodesRepositoryImpl<PgPool>, QuotaLedgerImpl<PgPool>, SyncEventSinkImpl<PgPool>>;

type PgMultipartService = MultipartService<
    FileNodesRepositoryImpl<PgPool>,
    QuotaLedgerImpl<PgPool>,
    MultipartSessionsRepositoryImpl<PgPool>,
    SyncEventSinkImpl<PgPool>,
>;

pub(crate) fn storage_service(
    pool: &web::Data<PgPool>,
    provider: &web::Data<Arc<StorageProvider>>,
    config: &web::Data<AppConfig>,
) -> PgStorageService {
    StorageService::new(
        FileNodesRepositoryImpl::new(pool.get_ref().clone()),
        QuotaLedgerImpl::new(pool.get_ref().clone()),
        SyncEventSinkImpl::new(pool.get_ref().clone(), config.sync_events_enabled),
        provider.get_ref().clone(),
    )
}

pub(crate) fn multipart_service(
    pool: &web::Data<PgPool>,
    provider: &web::Data<Arc<StorageProvider>>,
    config: &web::Data<AppConfig>,
    signer: &web::Data<Arc<UploadTokenSigner>>,
) -> PgMultipartService {
    MultipartService::new(
        FileNodesRepositoryImpl::new(pool.get_ref().clone()),
        QuotaLedgerImpl::new(pool.get_ref().clone()),
        MultipartSessionsRepositoryImpl::new(pool.get_ref().clone()),
        SyncEventSinkImpl::new(pool.get_ref().clone(), config.sync_events_enabled),
        provider.get_ref().clone(),
        signer.get_ref().clone(),
        config.max_chunk_size,
    )
}

/// Adapts the inbound actix payload into the `io::Error`-itemed stream the
/// storage layer consumes.
pub(crate) fn io_stream(
    payload: web::Payload,
) -> impl Stream<Item = std::result::Result<Bytes, io::Error>> + Unpin {
    payload.map(|chunk| {
        chunk.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    })
}

/// The declared body size; uploads without one are refused before any byte
/// is read.
pub(crate) fn content_length(req: &HttpRequest) -> Result<i64, actix_web::Error> {
    req.headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|len| *len >= 0)
        .ok_or_else(|| actix_web::error::ErrorLengthRequired("Content-Length required"))
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<&'a str>,
}

impl actix_web::ResponseError for DriveError {
    fn status_code(&self) -> StatusCode {
        match self {
            DriveError::Unauthorized => StatusCode::UNAUTHORIZED,
            DriveError::Forbidden(_) => StatusCode::FORBIDDEN,
            DriveError::NotFound(_) => StatusCode::NOT_FOUND,
            DriveError::NameConflict(_) | DriveError::Conflict(_) => StatusCode::CONFLICT,
            DriveError::QuotaExceeded => StatusCode::INSUFFICIENT_STORAGE,
            DriveError::SizeMismatch { .. } | DriveError::BadChunkSet(_) => {
                StatusCode::BAD_REQUEST
            }
            DriveError::OversizeStream { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            DriveError::ProviderTransient(_) => StatusCode::SERVICE_UNAVAILABLE,
            DriveError::ProviderFatal(_) => StatusCode::BAD_GATEWAY,
            DriveError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if self.status_code().is_server_error() {
            log::error!("request failed: {:?}", self);
        }
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.kind(),
            message: self.to_string(),
            key: self.localization_key(),
        })
    }
}
