//! SkySync Conflict - Conflict resolution
//!
//! Provides:
//! - `ConflictResolver`: applies keep-local / keep-remote / keep-both to a
//!   detected conflict and rewrites the persisted metadata
//! - `PolicyEngine`: glob rules choosing a strategy for auto-resolution
//! - `ConflictNamer`: names for keep-both conflict copies

pub mod error;
pub mod namer;
pub mod policy;
pub mod resolver;

pub use error::ConflictError;
pub use namer::ConflictNamer;
pub use policy::PolicyEngine;
pub use resolver::{BatchResult, ConflictResolver, ResolveOutcome};
