mod file_nodes_repository;
mod multipart_sessions_repository;
mod quota_ledger;
mod sync_event_sink;

pub use file_nodes_repository::*;
pub use multipart_sessions_repository::*;
pub use quota_ledger::*;
pub use sync_event_sink::*;
