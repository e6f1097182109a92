use std::str::FromStr;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Acquire, Postgres};
use ulid::Ulid;

use crate::entities::{FileId, FileName, MultipartSession, SessionId, UserId};
use crate::error::DriveError;
use crate::ports;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MultipartSessionModel {
    pub id: String,
    pub file_id: String,
    pub upload_id: String,
    pub user_id: String,
    pub filename: String,
    pub total_size: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl MultipartSessionModel {
    pub fn into_entity(self) -> anyhow::Result<MultipartSession> {
        let id = Ulid::from_str(&self.id).context("ulid decode error")?;
        let file_id = Ulid::from_str(&self.file_id).context("file ulid decode error")?;

        Ok(MultipartSession {
            id: SessionId::from(id),
            file_id: FileId::from(file_id),
            upload_id: self.upload_id,
            user_id: UserId::from(self.user_id),
            filename: FileName::from_unchecked(self.filename),
            total_size: self.total_size,
            created_at: self.created_at,
            expires_at: self.expires_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct MultipartSessionsRepositoryImpl<A> {
    db: A,
}

impl<A> MultipartSessionsRepositoryImpl<A> {
    pub fn new(db: A) -> Self {
        Self { db }
    }
}

#[async_trait]
impl<A> ports::MultipartSessionsRepository for MultipartSessionsRepositoryImpl<A>
where
    A: Send + Sync,
    for<'c> &'c A: Acquire<'c, Database = Postgres>,
{
    type Error = DriveError;

    async fn insert(&mut self, session: &MultipartSession) -> Result<(), Self::Error> {
        let mut trx = self.db.begin().await?;

        sqlx::query(
            r#"
                INSERT INTO multipart_sessions
                    (id, file_id, upload_id, user_id, filename, total_size, created_at, expires_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(Ulid::from(session.id).to_string())
        .bind(Ulid::from(session.file_id).to_string())
        .bind(&session.upload_id)
        .bind(session.user_id.as_str())
        .bind(session.filename.as_str())
        .bind(session.total_size)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&mut *trx)
        .await?;

        trx.commit().await?;
        Ok(())
    }

    async fn delete(&mut self, id: SessionId) -> Result<(), Self::Error> {
        let mut conn = self.db.acquire().await?;

        sqlx::query("DELETE FROM multipart_sessions WHERE id = $1")
            .bind(Ulid::from(id).to_string())
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    async fn list_expired(
        &mut self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<MultipartSession>, Self::Error> {
        let mut conn = self.db.acquire().await?;

        let models = sqlx::query_as::<_, MultipartSessionModel>(
            r#"
                SELECT id, file_id, upload_id, user_id, filename, total_size, created_at, expires_at
                FROM multipart_sessions
                WHERE expires_at < $1
                ORDER BY expires_at ASC
                LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;

        let sessions = models
            .into_iter()
            .map(|model| model.into_entity())
            .collect::<anyhow::Result<Vec<_>>>()
            .context("convert MultipartSession")?;

        Ok(sessions)
    }
}
