//! Package discovery on local storage.
//!
//! Storage layout:
//!
//! ```text
//! storage/
//! ├── pkg1                 -> pkg1
//! ├── @company/pkg2        -> @company/pkg2
//! ├── storage1/            (alternate storage root)
//! │   └── pkg3             -> pkg3
//! └── storage2/
//!     └── @scope/pkg4      -> @scope/pkg4
//! ```
//!
//! Every leaf directory (one without subdirectories) is a candidate. Its
//! package name is the path relative to the deepest storage root containing
//! it, so alternate roots never leak into names.

use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::debug;
use walkdir::WalkDir;

use super::StoreError;
use super::validation::{NpmNameValidator, PackageNameValidator};
use crate::model::{SearchItem, SearchQuery};

/// List every leaf directory under `root` with its modification time.
///
/// Any read failure aborts the walk.
pub fn leaf_directories(root: &Path) -> Result<Vec<(PathBuf, DateTime<Utc>)>, StoreError> {
    let mut dirs = Vec::new();
    let mut parents = HashSet::new();

    for entry in WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry?;
        if !entry.file_type().is_dir() {
            continue;
        }
        if let Some(parent) = entry.path().parent() {
            parents.insert(parent.to_path_buf());
        }
        let modified = entry
            .metadata()?
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_default();
        dirs.push((entry.into_path(), modified));
    }

    dirs.retain(|(path, _)| !parents.contains(path));
    Ok(dirs)
}

/// Find package directories under `storage_path` whose name matches `query.text`.
///
/// `storage_map` names alternate storage roots, resolved relative to
/// `storage_path`. The query text is applied as a regular expression to the
/// recovered name only; text that is not a valid pattern matches literally.
pub fn search(
    storage_path: &Path,
    storage_map: &BTreeMap<String, PathBuf>,
    query: &SearchQuery,
    validator: &dyn PackageNameValidator,
) -> Result<Vec<SearchItem>, StoreError> {
    let roots: Vec<PathBuf> = storage_map
        .values()
        .map(|dir| storage_path.join(dir))
        .collect();
    debug!(
        storage = %storage_path.display(),
        alternate_roots = roots.len(),
        "local_discovery_start"
    );

    let leaves = leaf_directories(storage_path)?;
    debug!(folders = leaves.len(), "local_discovery_folders");

    let pattern = name_pattern(&query.text);
    let mut items = Vec::new();
    for (path, time) in leaves {
        if roots.iter().any(|root| root == &path) {
            continue;
        }
        let base = roots
            .iter()
            .filter(|root| path.starts_with(root))
            .max_by_key(|root| root.components().count())
            .map_or(storage_path, PathBuf::as_path);
        let Some(name) = package_name(&path, base) else {
            continue;
        };
        if !validator.is_valid(&name) {
            debug!(name = %name, "local_discovery_invalid_name");
            continue;
        }
        if pattern.as_ref().is_none_or(|re| re.is_match(&name)) {
            items.push(SearchItem { name, path, time });
        }
    }

    debug!(matched = items.len(), "local_discovery_complete");
    Ok(items)
}

fn name_pattern(text: &str) -> Option<Regex> {
    if text.is_empty() {
        return None;
    }
    Regex::new(text)
        .or_else(|_| Regex::new(&regex::escape(text)))
        .ok()
}

/// `base/@scope/pkg` -> `@scope/pkg`.
fn package_name(path: &Path, base: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect::<Option<_>>()?;
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Discovery bound to one storage configuration.
#[derive(Clone)]
pub struct LocalDiscovery {
    storage_path: PathBuf,
    storage_map: BTreeMap<String, PathBuf>,
    validator: Arc<dyn PackageNameValidator>,
}

impl std::fmt::Debug for LocalDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalDiscovery")
            .field("storage_path", &self.storage_path)
            .field("storage_map", &self.storage_map)
            .finish_non_exhaustive()
    }
}

impl LocalDiscovery {
    pub fn new(storage_path: impl Into<PathBuf>, storage_map: BTreeMap<String, PathBuf>) -> Self {
        Self {
            storage_path: storage_path.into(),
            storage_map,
            validator: Arc::new(NpmNameValidator),
        }
    }

    pub fn with_validator(mut self, validator: impl PackageNameValidator + 'static) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    /// Blocking search; see [`search`].
    pub fn search(&self, query: &SearchQuery) -> Result<Vec<SearchItem>, StoreError> {
        search(
            &self.storage_path,
            &self.storage_map,
            query,
            self.validator.as_ref(),
        )
    }

    /// Run [`LocalDiscovery::search`] on the blocking pool.
    pub async fn search_async(&self, query: &SearchQuery) -> Result<Vec<SearchItem>, StoreError> {
        let this = self.clone();
        let query = query.clone();
        tokio::task::spawn_blocking(move || this.search(&query))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }
}
