/// Kinds of mutations appended to the sync-event feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SyncEventKind {
    Created,
    Updated,
    Renamed,
    Moved,
    Favorited,
    Trashed,
    Restored,
    Deleted,
}

impl SyncEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncEventKind::Created => "created",
            SyncEventKind::Updated => "updated",
            SyncEventKind::Renamed => "renamed",
            SyncEventKind::Moved => "moved",
            SyncEventKind::Favorited => "favorited",
            SyncEventKind::Trashed => "trashed",
            SyncEventKind::Restored => "restored",
            SyncEventKind::Deleted => "deleted",
        }
    }
}
