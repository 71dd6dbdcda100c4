//! SkySync Audit - File operation log
//!
//! Provides:
//! - `OperationLogger`: records uploads, downloads, deletions and conflict
//!   resolutions through `IStateRepository::append_operation`
//! - A structured `tracing` event for every recorded operation
//!
//! Logging is never fatal: persistence errors are reported with
//! `tracing::warn!` and swallowed so the sync run carries on.

pub mod logger;

pub use logger::OperationLogger;
