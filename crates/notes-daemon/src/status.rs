//! Save status reporting, consumed by anything surfacing save progress to
//! a user: whatever subscribes to the coordinator's status channel.

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveStatus {
    InProgress { path: PathBuf },
    Success { path: PathBuf },
    Failure { path: PathBuf, retrying: bool },
}
