//! In-memory implementations of the ports, backing the service-level tests.
//!
//! One shared state cell stands in for the database so quota, hierarchy and
//! session fakes observe each other the way the Postgres adapters would.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::entities::{
    Breadcrumb, FileId, FileName, FileNode, ListFilter, MultipartSession, SessionId,
    SyncEventKind, UserId, MAX_TREE_DEPTH, RECENT_LIMIT,
};
use crate::error::DriveError;
use crate::ports::{
    FileNodesRepository, MultipartSessionsRepository, QuotaLedger, SyncEventSink,
};

#[derive(Default)]
pub struct MemoryState {
    pub nodes: BTreeMap<Ulid, FileNode>,
    pub used_bytes: i64,
    pub limit_bytes: i64,
    pub sessions: BTreeMap<Ulid, MultipartSession>,
    pub events: Vec<(UserId, FileId, SyncEventKind, bool)>,
    pub fail_next_insert: bool,
}

#[derive(Clone)]
pub struct MemBackend(Arc<Mutex<MemoryState>>);

impl MemBackend {
    pub fn new(limit_bytes: i64) -> Self {
        Self(Arc::new(Mutex::new(MemoryState {
            limit_bytes,
            ..MemoryState::default()
        })))
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.0.lock().unwrap()
    }

    pub fn used_bytes(&self) -> i64 {
        self.lock().used_bytes
    }

    pub fn set_used_bytes(&self, used: i64) {
        self.lock().used_bytes = used;
    }

    pub fn node_count(&self) -> usize {
        self.lock().nodes.len()
    }

    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn event_count(&self) -> usize {
        self.lock().events.len()
    }

    pub fn fail_next_insert(&self) {
        self.lock().fail_next_insert = true;
    }

    pub fn insert_session(&self, session: MultipartSession) {
        self.lock()
            .sessions
            .insert(Ulid::from(session.id), session);
    }

    /// The at-rest invariant: used bytes equal the summed sizes of every
    /// stored file row (trash included; only hard delete releases quota).
    pub fn assert_quota_conserved(&self) {
        let state = self.lock();
        let expected: i64 = state
            .nodes
            .values()
            .filter(|n| !n.is_directory)
            .map(|n| n.size)
            .sum();
        assert_eq!(
            state.used_bytes, expected,
            "used_bytes diverged from the stored sizes"
        );
    }
}

pub struct MemNodes(pub MemBackend);

#[async_trait]
impl FileNodesRepository for MemNodes {
    type Error = DriveError;

    async fn insert(&mut self, node: &FileNode) -> Result<(), Self::Error> {
        let mut state = self.0.lock();
        if state.fail_next_insert {
            state.fail_next_insert = false;
            return Err(DriveError::Internal(anyhow::anyhow!("injected failure")));
        }
        let key = Ulid::from(node.id);
        if state.nodes.contains_key(&key) {
            return Err(DriveError::Conflict(
                "a conflicting record already exists".to_string(),
            ));
        }
        state.nodes.insert(key, node.clone());
        Ok(())
    }

    async fn find_owned(
        &mut self,
        user_id: &UserId,
        id: FileId,
    ) -> Result<FileNode, Self::Error> {
        let state = self.0.lock();
        state
            .nodes
            .get(&Ulid::from(id))
            .filter(|n| &n.user_id == user_id)
            .cloned()
            .ok_or_else(|| DriveError::NotFound("file".to_string()))
    }

    async fn find_any(&mut self, id: FileId) -> Result<Option<FileNode>, Self::Error> {
        Ok(self.0.lock().nodes.get(&Ulid::from(id)).cloned())
    }

    async fn find_live_by_name(
        &mut self,
        user_id: &UserId,
        parent_id: Option<FileId>,
        name: &FileName,
    ) -> Result<Option<FileNode>, Self::Error> {
        let state = self.0.lock();
        Ok(state
            .nodes
            .values()
            .find(|n| {
                &n.user_id == user_id
                    && n.parent_id == parent_id
                    && &n.filename == name
                    && !n.is_deleted()
            })
            .cloned())
    }

    async fn list(
        &mut self,
        user_id: &UserId,
        filter: &ListFilter,
    ) -> Result<Vec<FileNode>, Self::Error> {
        let state = self.0.lock();
        let mine = state.nodes.values().filter(|n| &n.user_id == user_id);

        let mut out: Vec<FileNode> = match filter {
            ListFilter::Folder(parent_id) => mine
                .filter(|n| n.parent_id == *parent_id && !n.is_deleted())
                .cloned()
                .collect(),
            ListFilter::All => mine.filter(|n| !n.is_deleted()).cloned().collect(),
            ListFilter::Favorites => mine
                .filter(|n| n.is_favorite && !n.is_deleted())
                .cloned()
                .collect(),
            ListFilter::Recent => mine
                .filter(|n| !n.is_directory && !n.is_deleted())
                .cloned()
                .collect(),
            ListFilter::Shared => mine
                .filter(|n| n.is_shared && !n.is_deleted())
                .cloned()
                .collect(),
            ListFilter::Trash => mine.filter(|n| n.is_deleted()).cloned().collect(),
        };

        match filter {
            ListFilter::Folder(_) => out.sort_by(|a, b| {
                b.is_directory
                    .cmp(&a.is_directory)
                    .then_with(|| a.filename.cmp(&b.filename))
            }),
            ListFilter::Trash => out.sort_by(|a, b| b.deleted_at.cmp(&a.deleted_at)),
            _ => out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at)),
        }

        if matches!(filter, ListFilter::Recent) {
            out.truncate(RECENT_LIMIT as usize);
        }
        Ok(out)
    }

    async fn breadcrumbs(
        &mut self,
        user_id: &UserId,
        leaf: Option<FileId>,
    ) -> Result<Vec<Breadcrumb>, Self::Error> {
        let state = self.0.lock();
        let mut crumbs = Vec::new();
        let mut cursor = leaf;

        while let Some(id) = cursor {
            if crumbs.len() >= MAX_TREE_DEPTH {
                return Err(DriveError::Internal(anyhow::anyhow!("tree too deep")));
            }
            let Some(node) = state
                .nodes
                .get(&Ulid::from(id))
                .filter(|n| &n.user_id == user_id)
            else {
                break;
            };
            crumbs.push(Breadcrumb {
                id: node.id,
                filename: node.filename.clone(),
            });
            cursor = node.parent_id;
        }

        crumbs.reverse();
        Ok(crumbs)
    }

    async fn descendants(
        &mut self,
        user_id: &UserId,
        root: FileId,
    ) -> Result<Vec<FileNode>, Self::Error> {
        let state = self.0.lock();
        let Some(root_node) = state
            .nodes
            .get(&Ulid::from(root))
            .filter(|n| &n.user_id == user_id)
        else {
            return Ok(Vec::new());
        };

        let mut out = vec![root_node.clone()];
        let mut frontier = vec![root];
        while let Some(parent) = frontier.pop() {
            for node in state.nodes.values() {
                if &node.user_id == user_id && node.parent_id == Some(parent) {
                    out.push(node.clone());
                    frontier.push(node.id);
                }
            }
        }
        Ok(out)
    }

    async fn update_metadata(&mut self, node: &FileNode) -> Result<(), Self::Error> {
        let mut state = self.0.lock();
        let key = Ulid::from(node.id);
        let Some(stored) = state
            .nodes
            .get_mut(&key)
            .filter(|n| n.user_id == node.user_id)
        else {
            return Err(DriveError::NotFound("file".to_string()));
        };
        stored.parent_id = node.parent_id;
        stored.filename = node.filename.clone();
        stored.is_favorite = node.is_favorite;
        stored.is_shared = node.is_shared;
        stored.deleted_at = node.deleted_at;
        stored.updated_at = node.updated_at;
        Ok(())
    }

    async fn update_content(&mut self, node: &FileNode) -> Result<(), Self::Error> {
        let mut state = self.0.lock();
        let key = Ulid::from(node.id);
        let Some(stored) = state
            .nodes
            .get_mut(&key)
            .filter(|n| n.user_id == node.user_id)
        else {
            return Err(DriveError::NotFound("file".to_string()));
        };
        stored.size = node.size;
        stored.content_type = node.content_type.clone();
        stored.updated_at = node.updated_at;
        stored.last_modified_at = node.last_modified_at;
        Ok(())
    }

    async fn delete_many(
        &mut self,
        user_id: &UserId,
        ids: &[FileId],
    ) -> Result<(), Self::Error> {
        let mut state = self.0.lock();
        for id in ids {
            let key = Ulid::from(*id);
            if state
                .nodes
                .get(&key)
                .map_or(false, |n| &n.user_id == user_id)
            {
                state.nodes.remove(&key);
            }
        }
        Ok(())
    }
}

pub struct MemQuota(pub MemBackend);

#[async_trait]
impl QuotaLedger for MemQuota {
    type Error = DriveError;

    async fn reserve(&mut self, _user_id: &UserId, amount: i64) -> Result<(), Self::Error> {
        let mut state = self.0.lock();
        if state.used_bytes + amount > state.limit_bytes {
            return Err(DriveError::QuotaExceeded);
        }
        state.used_bytes += amount;
        Ok(())
    }

    async fn release(&mut self, _user_id: &UserId, amount: i64) -> Result<(), Self::Error> {
        let mut state = self.0.lock();
        state.used_bytes = (state.used_bytes - amount).max(0);
        Ok(())
    }
}

pub struct MemSessions(pub MemBackend);

#[async_trait]
impl MultipartSessionsRepository for MemSessions {
    type Error = DriveError;

    async fn insert(&mut self, session: &MultipartSession) -> Result<(), Self::Error> {
        self.0
            .lock()
            .sessions
            .insert(Ulid::from(session.id), session.clone());
        Ok(())
    }

    async fn delete(&mut self, id: SessionId) -> Result<(), Self::Error> {
        self.0.lock().sessions.remove(&Ulid::from(id));
        Ok(())
    }

    async fn list_expired(
        &mut self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<MultipartSession>, Self::Error> {
        let state = self.0.lock();
        Ok(state
            .sessions
            .values()
            .filter(|s| s.expires_at < now)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

pub struct MemEvents(pub MemBackend);

#[async_trait]
impl SyncEventSink for MemEvents {
    type Error = DriveError;

    async fn append(
        &mut self,
        user_id: &UserId,
        file_id: FileId,
        kind: SyncEventKind,
        content_updated: bool,
    ) -> Result<(), Self::Error> {
        self.0
            .lock()
            .events
            .push((user_id.clone(), file_id, kind, content_updated));
        Ok(())
    }
}
