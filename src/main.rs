use std::io;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{middleware, web, App, HttpServer};
use sqlx::postgres::PgPoolOptions;

use nimbus_drive::app_config::{AppConfig, StorageConfig};
use nimbus_drive::jobs::{spawn_expiry_sweeper, Ctx};
use nimbus_drive::storage::{LocalStorage, S3Storage, StorageProvider};
use nimbus_drive::token::UploadTokenSigner;
use nimbus_drive::{handlers, DriveError};

async fn build_provider(config: &AppConfig) -> Result<StorageProvider, DriveError> {
    match &config.storage {
        StorageConfig::Local { root } => {
            let backend = LocalStorage::new(root.clone())
                .map_err(|e| DriveError::Internal(anyhow::Error::new(e)))?;
            Ok(StorageProvider::Local(backend))
        }
        StorageConfig::S3 {
            bucket,
            region,
            endpoint,
        } => {
            let sdk_config =
                aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
            let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
            if let Some(region) = region {
                builder = builder.region(aws_sdk_s3::config::Region::new(region.clone()));
            }
            if let Some(endpoint) = endpoint {
                builder = builder.endpoint_url(endpoint.clone()).force_path_style(true);
            }
            let client = aws_sdk_s3::Client::from_conf(builder.build());
            Ok(StorageProvider::S3(S3Storage::new(client, bucket.clone())))
        }
    }
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    env_logger::init();
    let config = AppConfig::from_env().map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;

    let pool = PgPoolOptions::new()
        .connect(&config.database_url)
        .await
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;

    let provider = Arc::new(
        build_provider(&config)
            .await
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))?,
    );
    let signer = Arc::new(UploadTokenSigner::new(&config.upload_token_key));

    spawn_expiry_sweeper(
        Ctx {
            pool: pool.clone(),
            provider: provider.clone(),
        },
        Duration::from_secs(config.sweep_interval_secs),
    );

    let host = config.host.clone();
    let port = config.port;
    log::info!("listening on {}:{}", host, port);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(config.clone()))
            .app_data(web::Data::new(pool.clone()))
            .app_data(web::Data::new(provider.clone()))
            .app_data(web::Data::new(signer.clone()))
            .configure(handlers::configure)
            .wrap(middleware::Logger::default())
    })
    .bind((host.as_str(), port))?
    .run()
    .await
}
