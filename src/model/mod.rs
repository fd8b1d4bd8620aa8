//! Data model shared by the search pipeline.

pub mod query;
pub mod types;

pub use query::SearchQuery;
pub use types::{
    CatalogEvent, Flags, Links, Maintainer, PackageManifest, PackageSummary, Person, Score,
    ScoreDetail, ScoredResult, SearchItem, SearchResultSet, VersionManifest,
};
