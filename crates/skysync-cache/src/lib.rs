//! SkySync Cache - Metadata persistence
//!
//! SQLite-backed store for:
//! - File records (per-path sync baselines and status)
//! - Sync conflicts and their resolution history
//! - Delta tokens
//! - The file operation log
//! - Folder selections and accounts
//!
//! ## Architecture
//!
//! This crate implements the `IStateRepository` and `IAccountRepository`
//! ports from `skysync-core` and is a driven (secondary) adapter in the
//! hexagonal architecture.
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use skysync_cache::{DatabasePool, SqliteStateRepository};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = DatabasePool::new(Path::new("/home/user/.local/share/skysync/skysync.db")).await?;
//! let repo = SqliteStateRepository::new(pool.pool().clone());
//! // Use repo as IStateRepository / IAccountRepository...
//! # Ok(())
//! # }
//! ```

pub mod pool;
pub mod repository;

pub use pool::DatabasePool;
pub use repository::SqliteStateRepository;

/// Errors that can occur during cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// A stored value could not be turned back into a domain type
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for CacheError {
    fn from(e: sqlx::Error) -> Self {
        CacheError::QueryFailed(e.to_string())
    }
}

impl From<skysync_core::domain::DomainError> for CacheError {
    fn from(e: skysync_core::domain::DomainError) -> Self {
        CacheError::SerializationError(e.to_string())
    }
}
