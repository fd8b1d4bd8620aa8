//! Search layer facade.
//!
//! - **[`matcher`]**: free-text predicate over package summaries.
//! - **[`tantivy`]**: field-weighted full-text index over the local catalog.
//! - **[`merge`]**: bounded merge point fed by one task per source.
//! - **[`auth`]**: per-package access checks with bounded concurrency.
//! - **[`aggregator`]**: the federated search entry point.

pub mod aggregator;
pub mod auth;
pub mod matcher;
pub mod merge;
pub mod tantivy;

pub use aggregator::{SearchAggregator, SearchError, SearchPhase};
pub use auth::{AccessOracle, AllowAll, AuthError, Identity};
pub use matcher::QueryMatcher;
pub use tantivy::{IndexError, IndexHit, LocalIndex};
