use super::FileId;

/// Listing views over a user's hierarchy.
///
/// Ordering rules: `Folder` sorts directories first then filename ascending;
/// `Trash` sorts by deletion time descending; everything else sorts by
/// `updated_at` descending. `Recent` is capped and excludes directories.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListFilter {
    Folder(Option<FileId>),
    All,
    Favorites,
    Recent,
    Shared,
    Trash,
}

/// Maximum number of entries returned by the `Recent` view.
pub const RECENT_LIMIT: i64 = 50;
