use anyhow::{anyhow, Context};
use std::env;
use std::path::PathBuf;

const DEFAULT_MAX_CHUNK_SIZE: i64 = 16 * 1024 * 1024;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

#[derive(Debug, Clone)]
pub enum StorageConfig {
    Local {
        root: PathBuf,
    },
    S3 {
        bucket: String,
        region: Option<String>,
        endpoint: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub storage: StorageConfig,
    pub upload_token_key: Vec<u8>,
    pub session_token_key: Vec<u8>,
    pub max_chunk_size: i64,
    pub sweep_interval_secs: u64,
    pub sync_events_enabled: bool,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<AppConfig> {
        let host = env::var("HOST").unwrap_or_else(|_| "localhost".to_owned());
        let port = env::var("PORT")
            .map(|x| x.parse::<u16>())
            .unwrap_or(Ok(8080))
            .context("PORT")?;
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL")?;

        let storage = match env::var("STORAGE_KIND").context("STORAGE_KIND")?.as_str() {
            "LOCAL" => {
                let root = env::var("STORAGE_LOCAL_ROOT").context("STORAGE_LOCAL_ROOT")?;
                StorageConfig::Local {
                    root: PathBuf::from(root),
                }
            }
            "S3" => {
                let bucket = env::var("STORAGE_S3_BUCKET").context("STORAGE_S3_BUCKET")?;
                StorageConfig::S3 {
                    bucket,
                    region: env::var("STORAGE_S3_REGION").ok(),
                    endpoint: env::var("STORAGE_S3_ENDPOINT").ok(),
                }
            }
            _ => Err(anyhow!("Invalid storage kind"))?,
        };

        let upload_token_key = base64::decode(
            env::var("UPLOAD_TOKEN_KEY").context("UPLOAD_TOKEN_KEY")?,
        )
        .context("UPLOAD_TOKEN_KEY")?;
        let session_token_key = base64::decode(
            env::var("SESSION_TOKEN_KEY").context("SESSION_TOKEN_KEY")?,
        )
        .context("SESSION_TOKEN_KEY")?;

        let max_chunk_size = env::var("MAX_CHUNK_SIZE")
            .map(|x| x.parse::<i64>())
            .unwrap_or(Ok(DEFAULT_MAX_CHUNK_SIZE))
            .context("MAX_CHUNK_SIZE")?;
        let sweep_interval_secs = env::var("SWEEP_INTERVAL_SECS")
            .map(|x| x.parse::<u64>())
            .unwrap_or(Ok(DEFAULT_SWEEP_INTERVAL_SECS))
            .context("SWEEP_INTERVAL_SECS")?;
        let sync_events_enabled = env::var("SYNC_EVENTS_ENABLED")
            .map(|v| v == "TRUE")
            .unwrap_or(false);

        Ok(AppConfig {
            host,
            port,
            database_url,
            storage,
            upload_token_key,
            session_token_key,
            max_chunk_size,
            sweep_interval_secs,
            sync_events_enabled,
        })
    }
}
