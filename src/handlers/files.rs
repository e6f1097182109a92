use std::sync::Arc;

use actix_web::http::header;
use actix_web::{delete, get, patch, post, put, web, HttpRequest, HttpResponse};
use chrono::Utc;
use serde::Deserialize;
use sqlx::PgPool;

use super::dto::{parse_file_id, parse_last_modified, FileNodeDto, ListingDto};
use super::{content_length, io_stream, storage_service, AuthedUser};
use crate::app_config::AppConfig;
use crate::entities::{FileName, ListFilter};
use crate::error::DriveError;
use crate::services::UploadRequest;
use crate::storage::StorageProvider;

#[derive(Deserialize, Debug)]
pub struct ListQuery {
    #[serde(rename = "parentID")]
    parent_id: Option<String>,
}

#[get("")]
pub async fn list(
    user: AuthedUser,
    query: web::Query<ListQuery>,
    pool: web::Data<PgPool>,
    provider: web::Data<Arc<StorageProvider>>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, actix_web::Error> {
    let parent_id = query
        .parent_id
        .as_deref()
        .map(parse_file_id)
        .transpose()?;

    let mut service = storage_service(&pool, &provider, &config);
    let listing = service.list(&user.0, ListFilter::Folder(parent_id)).await?;
    Ok(HttpResponse::Ok().json(ListingDto::from(listing)))
}

macro_rules! view_listing {
    ($name:ident, $path:literal, $filter:expr) => {
        #[get($path)]
        pub async fn $name(
            user: AuthedUser,
            pool: web::Data<PgPool>,
            provider: web::Data<Arc<StorageProvider>>,
            config: web::Data<AppConfig>,
        ) -> Result<HttpResponse, actix_web::Error> {
            let mut service = storage_service(&pool, &provider, &config);
            let listing = service.list(&user.0, $filter).await?;
            Ok(HttpResponse::Ok().json(ListingDto::from(listing)))
        }
    };
}

view_listing!(list_recent, "/recent", ListFilter::Recent);
view_listing!(list_favorites, "/favorites", ListFilter::Favorites);
view_listing!(list_shared, "/shared", ListFilter::Shared);
view_listing!(list_trash, "/trash", ListFilter::Trash);
view_listing!(list_all, "/all", ListFilter::All);

#[get("/{id}")]
pub async fn show(
    user: AuthedUser,
    path: web::Path<String>,
    pool: web::Data<PgPool>,
    provider: web::Data<Arc<StorageProvider>>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, actix_web::Error> {
    let id = parse_file_id(&path)?;
    let mut service = storage_service(&pool, &provider, &config);
    let node = service.show(&user.0, id).await?;
    Ok(HttpResponse::Ok().json(FileNodeDto::from(node)))
}

#[derive(Deserialize, Debug)]
pub struct UploadQuery {
    filename: String,
    #[serde(rename = "contentType")]
    content_type: Option<String>,
    #[serde(rename = "parentID")]
    parent_id: Option<String>,
    #[serde(rename = "lastModified")]
    last_modified: Option<i64>,
}

#[put("")]
pub async fn upload(
    user: AuthedUser,
    query: web::Query<UploadQuery>,
    req: HttpRequest,
    payload: web::Payload,
    pool: web::Data<PgPool>,
    provider: web::Data<Arc<StorageProvider>>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, actix_web::Error> {
    let claimed = content_length(&req)?;
    let filename = FileName::try_from(query.filename.clone())
        .map_err(|e| DriveError::Conflict(e.to_string()))?;
    let parent_id = query
        .parent_id
        .as_deref()
        .map(parse_file_id)
        .transpose()?;

    let upload = UploadRequest {
        filename,
        parent_id,
        content_type: query
            .content_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string()),
        claimed_size: claimed,
        last_modified: parse_last_modified(query.last_modified),
    };

    let mut service = storage_service(&pool, &provider, &config);
    let node = service
        .upload(&user.0, Utc::now(), upload, io_stream(payload))
        .await?;
    Ok(HttpResponse::Created().json(FileNodeDto::from(node)))
}

#[derive(Deserialize, Debug)]
pub struct UpdateQuery {
    size: i64,
    #[serde(rename = "contentType")]
    content_type: Option<String>,
    #[serde(rename = "lastModified")]
    last_modified: Option<i64>,
}

#[put("/{id}")]
pub async fn update_content(
    user: AuthedUser,
    path: web::Path<String>,
    query: web::Query<UpdateQuery>,
    payload: web::Payload,
    pool: web::Data<PgPool>,
    provider: web::Data<Arc<StorageProvider>>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, actix_web::Error> {
    let id = parse_file_id(&path)?;
    let mut service = storage_service(&pool, &provider, &config);
    let node = service
        .update_content(
            &user.0,
            Utc::now(),
            id,
            query.size,
            query
                .content_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            parse_last_modified(query.last_modified),
            io_stream(payload),
        )
        .await?;
    Ok(HttpResponse::Ok().json(FileNodeDto::from(node)))
}

#[derive(Deserialize, Debug)]
pub struct CreateDirectoryBody {
    name: String,
    #[serde(rename = "parentID")]
    parent_id: Option<String>,
}

#[post("/create-directory")]
pub async fn create_directory(
    user: AuthedUser,
    body: web::Json<CreateDirectoryBody>,
    pool: web::Data<PgPool>,
    provider: web::Data<Arc<StorageProvider>>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, actix_web::Error> {
    let name = FileName::try_from(body.name.clone())
        .map_err(|e| DriveError::Conflict(e.to_string()))?;
    let parent_id = body.parent_id.as_deref().map(parse_file_id).transpose()?;

    let mut service = storage_service(&pool, &provider, &config);
    let node = service
        .create_directory(&user.0, Utc::now(), name, parent_id)
        .await?;
    Ok(HttpResponse::Created().json(FileNodeDto::from(node)))
}

#[derive(Deserialize, Debug)]
pub struct RenameBody {
    name: String,
}

#[patch("/{id}")]
pub async fn rename(
    user: AuthedUser,
    path: web::Path<String>,
    body: web::Json<RenameBody>,
    pool: web::Data<PgPool>,
    provider: web::Data<Arc<StorageProvider>>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, actix_web::Error> {
    let id = parse_file_id(&path)?;
    let name = FileName::try_from(body.name.clone())
        .map_err(|e| DriveError::Conflict(e.to_string()))?;

    let mut service = storage_service(&pool, &provider, &config);
    let node = service.rename(&user.0, Utc::now(), id, name).await?;
    Ok(HttpResponse::Ok().json(FileNodeDto::from(node)))
}

#[derive(Deserialize, Debug)]
pub struct MoveBody {
    #[serde(rename = "fileID")]
    file_id: String,
    #[serde(rename = "parentID")]
    parent_id: Option<String>,
}

#[post("/move-file")]
pub async fn move_file(
    user: AuthedUser,
    body: web::Json<MoveBody>,
    pool: web::Data<PgPool>,
    provider: web::Data<Arc<StorageProvider>>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, actix_web::Error> {
    let id = parse_file_id(&body.file_id)?;
    let parent_id = body.parent_id.as_deref().map(parse_file_id).transpose()?;

    let mut service = storage_service(&pool, &provider, &config);
    let node = service.move_node(&user.0, Utc::now(), id, parent_id).await?;
    Ok(HttpResponse::Ok().json(FileNodeDto::from(node)))
}

#[derive(Deserialize, Debug)]
pub struct FavoriteBody {
    #[serde(rename = "isFavorite")]
    is_favorite: Option<bool>,
}

#[post("/{id}/favorite")]
pub async fn favorite(
    user: AuthedUser,
    path: web::Path<String>,
    body: Option<web::Json<FavoriteBody>>,
    pool: web::Data<PgPool>,
    provider: web::Data<Arc<StorageProvider>>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, actix_web::Error> {
    let id = parse_file_id(&path)?;
    let is_favorite = body.and_then(|b| b.is_favorite);

    let mut service = storage_service(&pool, &provider, &config);
    let node = service
        .set_favorite(&user.0, Utc::now(), id, is_favorite)
        .await?;
    Ok(HttpResponse::Ok().json(FileNodeDto::from(node)))
}

#[get("/{id}/download")]
pub async fn download(
    user: AuthedUser,
    path: web::Path<String>,
    pool: web::Data<PgPool>,
    provider: web::Data<Arc<StorageProvider>>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, actix_web::Error> {
    let id = parse_file_id(&path)?;
    let mut service = storage_service(&pool, &provider, &config);
    let (node, stream, len) = service.download(&user.0, id).await?;

    let mut response = HttpResponse::Ok();
    response
        .content_type(node.content_type.clone())
        .insert_header((
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", node.filename.as_str()),
        ))
        .no_chunking(len as u64);
    Ok(response.streaming(stream))
}

#[delete("/{id}")]
pub async fn soft_delete(
    user: AuthedUser,
    path: web::Path<String>,
    pool: web::Data<PgPool>,
    provider: web::Data<Arc<StorageProvider>>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, actix_web::Error> {
    let id = parse_file_id(&path)?;
    let mut service = storage_service(&pool, &provider, &config);
    service.soft_delete(&user.0, Utc::now(), id).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[post("/{id}/restore")]
pub async fn restore(
    user: AuthedUser,
    path: web::Path<String>,
    pool: web::Data<PgPool>,
    provider: web::Data<Arc<StorageProvider>>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, actix_web::Error> {
    let id = parse_file_id(&path)?;
    let mut service = storage_service(&pool, &provider, &config);
    let node = service.restore(&user.0, Utc::now(), id).await?;
    Ok(HttpResponse::Ok().json(FileNodeDto::from(node)))
}

#[delete("/{id}/permanent-delete")]
pub async fn permanent_delete(
    user: AuthedUser,
    path: web::Path<String>,
    pool: web::Data<PgPool>,
    provider: web::Data<Arc<StorageProvider>>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, actix_web::Error> {
    let id = parse_file_id(&path)?;
    let mut service = storage_service(&pool, &provider, &config);
    service.hard_delete(&user.0, id).await?;
    Ok(HttpResponse::NoContent().finish())
}
