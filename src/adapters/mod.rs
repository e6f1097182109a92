mod file_nodes_repository_impl;
mod multipart_sessions_repository_impl;
mod quota_ledger_impl;
mod sync_event_sink_impl;

pub use file_nodes_repository_impl::*;
pub use multipart_sessions_repository_impl::*;
pub use quota_ledger_impl::*;
pub use sync_event_sink_impl::*;
