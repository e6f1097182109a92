use std::str::FromStr;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Acquire, Postgres};
use ulid::Ulid;

use crate::entities::{
    Breadcrumb, FileId, FileName, FileNode, ListFilter, UserId, MAX_TREE_DEPTH, RECENT_LIMIT,
};
use crate::error::DriveError;
use crate::ports;

const FILE_NODE_COLUMNS: &str = "id, user_id, parent_id, filename, content_type, size, \
     is_directory, is_favorite, is_shared, created_at, updated_at, last_modified_at, deleted_at";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FileNodeModel {
    pub id: String,
    pub user_id: String,
    pub parent_id: Option<String>,
    pub filename: String,
    pub content_type: String,
    pub size: i64,
    pub is_directory: bool,
    pub is_favorite: bool,
    pub is_shared: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl FileNodeModel {
    pub fn into_entity(self) -> anyhow::Result<FileNode> {
        let id = Ulid::from_str(&self.id).context("ulid decode error")?;
        let parent_id = self
            .parent_id
            .map(|p| Ulid::from_str(&p).map(FileId::from))
            .transpose()
            .context("parent ulid decode error")?;

        Ok(FileNode {
            id: FileId::from(id),
            user_id: UserId::from(self.user_id),
            parent_id,
            filename: FileName::from_unchecked(self.filename),
            content_type: self.content_type,
            size: self.size,
            is_directory: self.is_directory,
            is_favorite: self.is_favorite,
            is_shared: self.is_shared,
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_modified_at: self.last_modified_at,
            deleted_at: self.deleted_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct FileNodesRepositoryImpl<A> {
    db: A,
}

impl<A> FileNodesRepositoryImpl<A> {
    pub fn new(db: A) -> Self {
        Self { db }
    }
}

#[async_trait]
impl<A> ports::FileNodesRepository for FileNodesRepositoryImpl<A>
where
    A: Send + Sync,
    for<'c> &'c A: Acquire<'c, Database = Postgres>,
{
    type Error = DriveError;

    async fn insert(&mut self, node: &FileNode) -> Result<(), Self::Error> {
        let mut trx = self.db.begin().await?;

        sqlx::query(
            r#"
                INSERT INTO file_nodes
                    (id, user_id, parent_id, filename, content_type, size, is_directory,
                     is_favorite, is_shared, created_at, updated_at, last_modified_at, deleted_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(Ulid::from(node.id).to_string())
        .bind(node.user_id.as_str())
        .bind(node.parent_id.map(|p| Ulid::from(p).to_string()))
        .bind(node.filename.as_str())
        .bind(&node.content_type)
        .bind(node.size)
        .bind(node.is_directory)
        .bind(node.is_favorite)
        .bind(node.is_shared)
        .bind(node.created_at)
        .bind(node.updated_at)
        .bind(node.last_modified_at)
        .bind(node.deleted_at)
        .execute(&mut *trx)
        .await?;

        trx.commit().await?;
        Ok(())
    }

    async fn find_owned(
        &mut self,
        user_id: &UserId,
        id: FileId,
    ) -> Result<FileNode, Self::Error> {
        let mut conn = self.db.acquire().await?;

        let model = sqlx::query_as::<_, FileNodeModel>(&format!(
            "SELECT {FILE_NODE_COLUMNS} FROM file_nodes WHERE id = $1 AND user_id = $2"
        ))
        .bind(Ulid::from(id).to_string())
        .bind(user_id.as_str())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DriveError::NotFound("file".to_string()))?;

        Ok(model.into_entity()?)
    }

    async fn find_any(&mut self, id: FileId) -> Result<Option<FileNode>, Self::Error> {
        let mut conn = self.db.acquire().await?;

        let model = sqlx::query_as::<_, FileNodeModel>(&format!(
            "SELECT {FILE_NODE_COLUMNS} FROM file_nodes WHERE id = $1"
        ))
        .bind(Ulid::from(id).to_string())
        .fetch_optional(&mut *conn)
        .await?;

        Ok(model.map(|m| m.into_entity()).transpose()?)
    }

    async fn find_live_by_name(
        &mut self,
        user_id: &UserId,
        parent_id: Option<FileId>,
        name: &FileName,
    ) -> Result<Option<FileNode>, Self::Error> {
        let mut conn = self.db.acquire().await?;

        let model = sqlx::query_as::<_, FileNodeModel>(&format!(
            r#"
                SELECT {FILE_NODE_COLUMNS} FROM file_nodes
                WHERE user_id = $1
                    AND parent_id IS NOT DISTINCT FROM $2
                    AND filename = $3
                    AND deleted_at IS NULL
            "#
        ))
        .bind(user_id.as_str())
        .bind(parent_id.map(|p| Ulid::from(p).to_string()))
        .bind(name.as_str())
        .fetch_optional(&mut *conn)
        .await?;

        Ok(model.map(|m| m.into_entity()).transpose()?)
    }

    async fn list(
        &mut self,
        user_id: &UserId,
        filter: &ListFilter,
    ) -> Result<Vec<FileNode>, Self::Error> {
        let mut conn = self.db.acquire().await?;

        let models = match filter {
            ListFilter::Folder(parent_id) => {
                sqlx::query_as::<_, FileNodeModel>(&format!(
                    r#"
                        SELECT {FILE_NODE_COLUMNS} FROM file_nodes
                        WHERE user_id = $1
                            AND parent_id IS NOT DISTINCT FROM $2
                            AND deleted_at IS NULL
                        ORDER BY is_directory DESC, filename ASC
                    "#
                ))
                .bind(user_id.as_str())
                .bind(parent_id.map(|p| Ulid::from(p).to_string()))
                .fetch_all(&mut *conn)
                .await?
            }
            ListFilter::All => {
                sqlx::query_as::<_, FileNodeModel>(&format!(
                    r#"
                        SELECT {FILE_NODE_COLUMNS} FROM file_nodes
                        WHERE user_id = $1 AND deleted_at IS NULL
                        ORDER BY updated_at DESC
                    "#
                ))
                .bind(user_id.as_str())
                .fetch_all(&mut *conn)
                .await?
            }
            ListFilter::Favorites => {
                sqlx::query_as::<_, FileNodeModel>(&format!(
                    r#"
                        SELECT {FILE_NODE_COLUMNS} FROM file_nodes
                        WHERE user_id = $1 AND is_favorite AND deleted_at IS NULL
                        ORDER BY updated_at DESC
                    "#
                ))
                .bind(user_id.as_str())
                .fetch_all(&mut *conn)
                .await?
            }
            ListFilter::Recent => {
                sqlx::query_as::<_, FileNodeModel>(&format!(
                    r#"
                        SELECT {FILE_NODE_COLUMNS} FROM file_nodes
                        WHERE user_id = $1 AND NOT is_directory AND deleted_at IS NULL
                        ORDER BY updated_at DESC
                        LIMIT $2
                    "#
                ))
                .bind(user_id.as_str())
                .bind(RECENT_LIMIT)
                .fetch_all(&mut *conn)
                .await?
            }
            ListFilter::Shared => {
                sqlx::query_as::<_, FileNodeModel>(&format!(
                    r#"
                        SELECT {FILE_NODE_COLUMNS} FROM file_nodes
                        WHERE user_id = $1 AND is_shared AND deleted_at IS NULL
                        ORDER BY updated_at DESC
                    "#
                ))
                .bind(user_id.as_str())
                .fetch_all(&mut *conn)
                .await?
            }
            ListFilter::Trash => {
                sqlx::query_as::<_, FileNodeModel>(&format!(
                    r#"
                        SELECT {FILE_NODE_COLUMNS} FROM file_nodes
                        WHERE user_id = $1 AND deleted_at IS NOT NULL
                        ORDER BY deleted_at DESC
                    "#
                ))
                .bind(user_id.as_str())
                .fetch_all(&mut *conn)
                .await?
            }
        };

        let nodes = models
            .into_iter()
            .map(|model| model.into_entity())
            .collect::<anyhow::Result<Vec<_>>>()
            .context("convert FileNode")?;

        Ok(nodes)
    }

    async fn breadcrumbs(
        &mut self,
        user_id: &UserId,
        leaf: Option<FileId>,
    ) -> Result<Vec<Breadcrumb>, Self::Error> {
        let mut conn = self.db.acquire().await?;
        let mut crumbs = Vec::new();
        let mut cursor = leaf;

        while let Some(id) = cursor {
            if crumbs.len() >= MAX_TREE_DEPTH {
                return Err(DriveError::Internal(anyhow::anyhow!(
                    "ancestry deeper than {} levels",
                    MAX_TREE_DEPTH
                )));
            }

            let model = sqlx::query_as::<_, FileNodeModel>(&format!(
                "SELECT {FILE_NODE_COLUMNS} FROM file_nodes WHERE id = $1 AND user_id = $2"
            ))
            .bind(Ulid::from(id).to_string())
            .bind(user_id.as_str())
            .fetch_optional(&mut *conn)
            .await?;

            let Some(model) = model else {
                break;
            };
            let node = model.into_entity()?;
            cursor = node.parent_id;
            crumbs.push(Breadcrumb {
                id: node.id,
                filename: node.filename,
            });
        }

        crumbs.reverse();
        Ok(crumbs)
    }

    async fn descendants(
        &mut self,
        user_id: &UserId,
        root: FileId,
    ) -> Result<Vec<FileNode>, Self::Error> {
        let mut conn = self.db.acquire().await?;

        let models = sqlx::query_as::<_, FileNodeModel>(
            r#"
                WITH RECURSIVE subtree AS (
                    SELECT id, user_id, parent_id, filename, content_type, size,
                           is_directory, is_favorite, is_shared, created_at, updated_at,
                           last_modified_at, deleted_at, 0 AS depth
                    FROM file_nodes
                    WHERE id = $1 AND user_id = $2
                  UNION ALL
                    SELECT c.id, c.user_id, c.parent_id, c.filename, c.content_type, c.size,
                           c.is_directory, c.is_favorite, c.is_shared, c.created_at, c.updated_at,
                           c.last_modified_at, c.deleted_at, s.depth + 1
                    FROM file_nodes c
                    JOIN subtree s ON c.parent_id = s.id
                    WHERE c.user_id = $2
                )
                SELECT id, user_id, parent_id, filename, content_type, size,
                       is_directory, is_favorite, is_shared, created_at, updated_at,
                       last_modified_at, deleted_at
                FROM subtree
                ORDER BY depth ASC
            "#,
        )
        .bind(Ulid::from(root).to_string())
        .bind(user_id.as_str())
        .fetch_all(&mut *conn)
        .await?;

        let nodes = models
            .into_iter()
            .map(|model| model.into_entity())
            .collect::<anyhow::Result<Vec<_>>>()
            .context("convert FileNode")?;

        Ok(nodes)
    }

    async fn update_metadata(&mut self, node: &FileNode) -> Result<(), Self::Error> {
        let mut trx = self.db.begin().await?;

        let result = sqlx::query(
            r#"
                UPDATE file_nodes
                SET parent_id = $1,
                    filename = $2,
                    is_favorite = $3,
                    is_shared = $4,
                    deleted_at = $5,
                    updated_at = $6
                WHERE id = $7 AND user_id = $8
            "#,
        )
        .bind(node.parent_id.map(|p| Ulid::from(p).to_string()))
        .bind(node.filename.as_str())
        .bind(node.is_favorite)
        .bind(node.is_shared)
        .bind(node.deleted_at)
        .bind(node.updated_at)
        .bind(Ulid::from(node.id).to_string())
        .bind(node.user_id.as_str())
        .execute(&mut *trx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DriveError::NotFound("file".to_string()));
        }

        trx.commit().await?;
        Ok(())
    }

    async fn update_content(&mut self, node: &FileNode) -> Result<(), Self::Error> {
        let mut trx = self.db.begin().await?;

        let result = sqlx::query(
            r#"
                UPDATE file_nodes
                SET size = $1,
                    content_type = $2,
                    updated_at = $3,
                    last_modified_at = $4
                WHERE id = $5 AND user_id = $6
            "#,
        )
        .bind(node.size)
        .bind(&node.content_type)
        .bind(node.updated_at)
        .bind(node.last_modified_at)
        .bind(Ulid::from(node.id).to_string())
        .bind(node.user_id.as_str())
        .execute(&mut *trx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DriveError::NotFound("file".to_string()));
        }

        trx.commit().await?;
        Ok(())
    }

    async fn delete_many(
        &mut self,
        user_id: &UserId,
        ids: &[FileId],
    ) -> Result<(), Self::Error> {
        let mut trx = self.db.begin().await?;

        for id in ids {
            sqlx::query("DELETE FROM file_nodes WHERE id = $1 AND user_id = $2")
                .bind(Ulid::from(*id).to_string())
                .bind(user_id.as_str())
                .execute(&mut *trx)
                .await?;
        }

        trx.commit().await?;
        Ok(())
    }
}
