//! settingsync sync engine
//!
//! This module provides the add-on reconciliation pipeline and the engine
//! that drives export and import, including:
//! - Collecting snapshots from the editor host
//! - Comparing local and remote add-on sets
//! - Applying installs, updates and enable/disable changes
//! - Import reports with retention
//! - Retry strategy with exponential backoff

pub mod collector;
pub mod compare;
pub mod engine;
pub mod ignore;
pub mod reconcile;
pub mod report;
pub mod retry;

#[cfg(test)]
mod testing;

// Re-export main types
pub use collector::Collector;
pub use compare::{compare, ChangeSet, ComparisonOutcome, ComparisonStatus};
pub use engine::SyncEngine;
pub use ignore::{IgnoreSet, SELF_ID};
pub use reconcile::{ApplyAction, ApplyReport, ApplyResult, Reconciler};
pub use report::{CategoryResult, ImportReport, ReportBuilder, ReportKind, ReportSummary};
pub use retry::{is_transient, RetryConfig, RetryExecutor};
