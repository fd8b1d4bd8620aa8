//! Local package storage.
//!
//! - **discovery**: walks the storage tree for package directories
//! - **validation**: package-name legality
//! - **fs**: [`LocalStore`] backed by `package.json` files on disk

pub mod discovery;
pub mod fs;
pub mod validation;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{PackageManifest, SearchItem, SearchQuery};

pub use discovery::LocalDiscovery;
pub use fs::FsStore;
pub use validation::{NpmNameValidator, PackageNameValidator, validate_name};

/// Errors raised while reading local storage.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid package manifest {}: {source}", .path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("storage walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("storage task failed: {0}")]
    Task(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// The locally hosted catalog as seen by search.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Every package in the catalog.
    async fn list_all(&self) -> Result<Vec<PackageManifest>, StoreError>;

    async fn list_names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .map(|m| m.name)
            .collect())
    }

    /// Package directories whose name matches the query text.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchItem>, StoreError>;

    /// Manifest for a discovered package; `None` when the directory holds none.
    async fn read_manifest(&self, item: &SearchItem)
    -> Result<Option<PackageManifest>, StoreError>;
}
