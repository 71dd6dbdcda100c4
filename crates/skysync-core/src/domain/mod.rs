//! Domain entities and business logic
//!
//! - Newtypes for identifiers, normalized paths, hashes and delta tokens
//! - Per-path sync metadata (`FileRecord`)
//! - Conflicts, accounts and the file operation log
//! - Tri-state folder selection
//! - Sync run state and progress snapshots

pub mod account;
pub mod conflict;
pub mod errors;
pub mod file_record;
pub mod newtypes;
pub mod operation_log;
pub mod progress;
pub mod selection;

pub use account::Account;
pub use conflict::{ConflictSide, ConflictStrategy, SyncConflict};
pub use errors::DomainError;
pub use file_record::{FileRecord, RemoteVersion, SyncBaseline, SyncDirection, SyncStatus};
pub use newtypes::*;
pub use operation_log::{FileOperation, FileOperationLog, OperationOutcome};
pub use progress::{SyncProgress, SyncState};
pub use selection::{
    resolve_inherited, FolderNode, FolderSelection, FolderTree, NodeId, SelectionScope,
    SelectionState,
};
