mod breadcrumb;
mod file_id;
mod file_name;
mod file_node;
mod list_filter;
mod multipart_session;
mod session_id;
mod sync_event;
mod user_id;

pub use breadcrumb::{Breadcrumb, MAX_TREE_DEPTH};
pub use file_id::FileId;
pub use file_name::{FileName, FileNameTryFromError};
pub use file_node::{FileNode, DIRECTORY_CONTENT_TYPE};
pub use list_filter::{ListFilter, RECENT_LIMIT};
pub use multipart_session::{MultipartSession, SESSION_TTL_HOURS};
pub use session_id::SessionId;
pub use sync_event::SyncEventKind;
pub use user_id::UserId;
