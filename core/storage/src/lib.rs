//! Sync backends for settingsync.
//!
//! This module provides a trait-based interface for the places snapshots
//! are persisted to (local disk, a GitHub gist, a GitHub repository) and a
//! backend registry that resolves the configured export method.
//!
//! # Design Principles
//! - Backend isolation: no backend-specific logic in the sync engine
//! - One document per category, named the same in every backend
//! - Settings are stored as the raw text they were captured as

pub mod github;
pub mod local;
pub mod memory;
pub mod provider;
pub mod registry;

pub use github::{GistBackend, GitHubClient, RepositoryBackend};
pub use local::LocalBackend;
pub use memory::MemoryBackend;
pub use provider::{BackendContext, SyncBackend};
pub use registry::{create_default_registry, BackendFactory, BackendRegistry};
