//! Filesystem-backed [`LocalStore`].

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use super::{LocalDiscovery, LocalStore, PackageNameValidator, StoreError};
use crate::model::{PackageManifest, SearchItem, SearchQuery};

/// File holding a package's metadata inside its directory.
pub const MANIFEST_FILE: &str = "package.json";

#[derive(Debug, Clone)]
pub struct FsStore {
    discovery: LocalDiscovery,
}

impl FsStore {
    pub fn new(storage_path: impl Into<PathBuf>, storage_map: BTreeMap<String, PathBuf>) -> Self {
        Self {
            discovery: LocalDiscovery::new(storage_path, storage_map),
        }
    }

    pub fn with_validator(mut self, validator: impl PackageNameValidator + 'static) -> Self {
        self.discovery = self.discovery.with_validator(validator);
        self
    }

    pub fn storage_path(&self) -> &Path {
        self.discovery.storage_path()
    }
}

/// Read `<dir>/package.json`. A missing file yields `None`; anything else
/// unreadable is an error.
pub async fn read_manifest_at(dir: &Path) -> Result<Option<PackageManifest>, StoreError> {
    let path = dir.join(MANIFEST_FILE);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(StoreError::Io { path, source }),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StoreError::Manifest { path, source })
}

#[async_trait]
impl LocalStore for FsStore {
    async fn list_all(&self) -> Result<Vec<PackageManifest>, StoreError> {
        let items = self.discovery.search_async(&SearchQuery::default()).await?;
        let mut manifests = Vec::with_capacity(items.len());
        for item in &items {
            match read_manifest_at(&item.path).await? {
                Some(manifest) => manifests.push(manifest),
                None => debug!(name = %item.name, "catalog_skip_no_manifest"),
            }
        }
        info!(
            storage = %self.storage_path().display(),
            packages = manifests.len(),
            "catalog_listed"
        );
        Ok(manifests)
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchItem>, StoreError> {
        self.discovery.search_async(query).await
    }

    async fn read_manifest(
        &self,
        item: &SearchItem,
    ) -> Result<Option<PackageManifest>, StoreError> {
        read_manifest_at(&item.path).await
    }
}
