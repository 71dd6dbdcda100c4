//! Port definitions (hexagonal architecture interfaces)
//!
//! Ports are the traits the sync engine depends on; their implementations
//! live in adapter crates or in the host application.
//!
//! ## Ports Overview
//!
//! - [`IRemoteDrive`] - Remote drive listing, delta queries and transfers
//! - [`ILocalFileSystem`] - Local tree scanning, hashing and file moves
//! - [`IStateRepository`] - File records, conflicts, delta tokens, operation log, folder selections
//! - [`IAccountRepository`] - Account lookup and persistence

pub mod local_filesystem;
pub mod remote_drive;
pub mod state_repository;

pub use local_filesystem::{
    is_partial, partial_path, FileSystemState, ILocalFileSystem, LocalFileState, LocalScan,
    LocalSnapshot, PARTIAL_SUFFIX,
};
pub use remote_drive::{DeltaPage, IRemoteDrive, RemoteError, RemoteItem, TransferProgressFn};
pub use state_repository::{IAccountRepository, IStateRepository};
