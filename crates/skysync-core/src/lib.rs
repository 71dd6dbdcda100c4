//! SkySync Core - Domain logic and port definitions
//!
//! This crate is the hexagonal core of the sync engine:
//! - **Domain entities** - `FileRecord`, `SyncConflict`, `Account`, `FileOperationLog`
//! - **Folder selection** - tri-state `FolderTree` and path-based `SelectionScope`
//! - **Port definitions** - `IRemoteDrive`, `ILocalFileSystem`, `IStateRepository`, `IAccountRepository`
//! - **Configuration** - YAML-backed `Config` with validation and settings clamps
//!
//! Adapter and service crates (`skysync-sync`, `skysync-cache`, `skysync-conflict`)
//! depend on this crate; it depends on none of them.

pub mod config;
pub mod domain;
pub mod ports;
