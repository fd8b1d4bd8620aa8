//! Normalized entity structs.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Score assigned to every result produced by the local store.
pub const LOCAL_SEARCH_SCORE: f64 = 100_000.0;

/// Versions at or above this range mark a package as stable.
pub const STABLE_RANGE: &str = "^1.0.0";

/// Scope reported for packages without an `@scope/` prefix.
pub const UNSCOPED: &str = "unscoped";

/// A person field as found in package metadata.
///
/// Registries carry either a bare string (`"Jane <jane@example.com>"`) or a
/// record with arbitrary string fields (`name`, `email`, `url`, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Person {
    Text(String),
    Record(Map<String, Value>),
}

impl Person {
    /// Build a record-shaped person from a name and optional email.
    pub fn named(name: impl Into<String>, email: Option<&str>) -> Self {
        let mut record = Map::new();
        record.insert("name".into(), Value::String(name.into()));
        if let Some(email) = email {
            record.insert("email".into(), Value::String(email.into()));
        }
        Self::Record(record)
    }

    /// Display name: the string itself, or the record's `name` field.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            Self::Record(record) => record.get("name").and_then(Value::as_str),
        }
    }

    /// Every string value carried by this person.
    pub fn strings(&self) -> Vec<&str> {
        match self {
            Self::Text(s) => vec![s.as_str()],
            Self::Record(record) => record.values().filter_map(Value::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Maintainer {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Links {
    #[serde(default)]
    pub npm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bugs: Option<String>,
}

/// Source-agnostic package metadata flowing through the search pipeline.
///
/// Uplinks send this shape already normalized; unknown fields they add are
/// kept in `extra` so the response passes them through untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PackageSummary {
    pub name: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(
        rename = "displayName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub display_name: Option<String>,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub links: Links,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Person>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<Maintainer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintainer: Option<Maintainer>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PackageSummary {
    /// Lift a local manifest into a summary.
    ///
    /// `fallback_date` is used when the manifest carries no usable timestamp
    /// (typically the package directory's modification time).
    pub fn from_manifest(manifest: &PackageManifest, fallback_date: Option<DateTime<Utc>>) -> Self {
        let version = manifest.current_version().unwrap_or_default();
        let current = manifest.versions.get(&version);

        let description = current
            .and_then(|v| v.description.clone())
            .or_else(|| manifest.description.clone());
        let date = manifest
            .time
            .get("modified")
            .or_else(|| manifest.time.get(&version))
            .cloned()
            .or_else(|| fallback_date.map(|d| d.to_rfc3339()))
            .unwrap_or_default();

        let links = Links {
            npm: String::new(),
            homepage: current.and_then(|v| v.homepage.clone()),
            repository: current
                .and_then(|v| v.repository.as_ref())
                .map(|r| r.url().to_string()),
            bugs: current
                .and_then(|v| v.bugs.as_ref())
                .map(|b| b.url().to_string()),
        };

        let author = current
            .and_then(|v| v.author.clone())
            .or_else(|| manifest.author.clone());
        let publisher = current
            .and_then(|v| v.npm_user.as_ref())
            .map(|u| Maintainer {
                username: u.name.clone(),
                email: u.email.clone().unwrap_or_default(),
            });
        let maintainer = current
            .map(|v| v.maintainers.as_slice())
            .filter(|m| !m.is_empty())
            .unwrap_or(manifest.maintainers.as_slice())
            .first()
            .map(|u| Maintainer {
                username: u.name.clone(),
                email: u.email.clone().unwrap_or_default(),
            });

        Self {
            name: manifest.name.clone(),
            scope: scope_of(&manifest.name).to_string(),
            version,
            description,
            display_name: None,
            date,
            links,
            author,
            publisher,
            maintainer,
            extra: Map::new(),
        }
    }
}

/// Scope segment of a package name (`@babel/core` -> `babel`).
pub fn scope_of(name: &str) -> &str {
    name.strip_prefix('@')
        .and_then(|rest| rest.split_once('/'))
        .map_or(UNSCOPED, |(scope, _)| scope)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Flags {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unstable: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ScoreDetail {
    pub quality: f64,
    pub popularity: f64,
    pub maintenance: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Score {
    #[serde(rename = "final")]
    pub final_score: f64,
    pub detail: ScoreDetail,
}

/// One entry of a search response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredResult {
    pub package: PackageSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<Flags>,
    #[serde(default)]
    pub local: bool,
    #[serde(default)]
    pub score: Score,
    #[serde(rename = "searchScore", default)]
    pub search_score: f64,
}

impl ScoredResult {
    /// Wrap a locally hosted package with the fixed local score.
    pub fn local(manifest: &PackageManifest, fallback_date: Option<DateTime<Utc>>) -> Self {
        let unstable = if manifest.has_stable_version() {
            None
        } else {
            Some(true)
        };
        Self {
            package: PackageSummary::from_manifest(manifest, fallback_date),
            flags: Some(Flags { unstable }),
            local: true,
            score: Score {
                final_score: 1.0,
                detail: ScoreDetail {
                    quality: 1.0,
                    popularity: 1.0,
                    maintenance: 0.0,
                },
            },
            search_score: LOCAL_SEARCH_SCORE,
        }
    }

    pub fn name(&self) -> &str {
        &self.package.name
    }
}

/// Wire-level search response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResultSet {
    pub objects: Vec<ScoredResult>,
    pub total: usize,
    pub time: String,
}

impl SearchResultSet {
    /// Build a response stamped with the current time as an HTTP date.
    pub fn new(objects: Vec<ScoredResult>) -> Self {
        Self {
            total: objects.len(),
            objects,
            time: http_date(Utc::now()),
        }
    }
}

/// Format a timestamp the way HTTP `Date` headers do.
pub fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// A package directory found on local storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchItem {
    pub name: String,
    pub path: PathBuf,
    pub time: DateTime<Utc>,
}

// -------------------------------------------------------------------------
// On-disk package metadata
// -------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NpmUser {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// `repository` / `bugs` fields: a bare URL or an object with `url`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum UrlField {
    Url(String),
    Object {
        #[serde(default)]
        url: String,
    },
}

impl UrlField {
    pub fn url(&self) -> &str {
        match self {
            Self::Url(url) | Self::Object { url } => url,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VersionManifest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Person>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<UrlField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bugs: Option<UrlField>,
    #[serde(default)]
    pub maintainers: Vec<NpmUser>,
    #[serde(rename = "_npmUser", default, skip_serializing_if = "Option::is_none")]
    pub npm_user: Option<NpmUser>,
}

/// Package metadata document kept by the local store (`package.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PackageManifest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub versions: BTreeMap<String, VersionManifest>,
    #[serde(rename = "dist-tags", default)]
    pub dist_tags: BTreeMap<String, String>,
    #[serde(default)]
    pub time: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Person>,
    #[serde(default)]
    pub maintainers: Vec<NpmUser>,
}

impl PackageManifest {
    /// Version published under the `latest` tag, else the highest semver version.
    pub fn current_version(&self) -> Option<String> {
        if let Some(latest) = self.dist_tags.get("latest")
            && self.versions.contains_key(latest)
        {
            return Some(latest.clone());
        }
        self.versions
            .keys()
            .filter_map(|v| semver::Version::parse(v).ok().map(|parsed| (parsed, v)))
            .max_by(|a, b| a.0.cmp(&b.0))
            .map(|(_, v)| v.clone())
            .or_else(|| self.versions.keys().next_back().cloned())
    }

    /// Manifest of the current version, if any version is published.
    pub fn current(&self) -> Option<&VersionManifest> {
        self.current_version().and_then(|v| self.versions.get(&v))
    }

    /// True when at least one published version satisfies `^1.0.0`.
    pub fn has_stable_version(&self) -> bool {
        let Ok(req) = semver::VersionReq::parse(STABLE_RANGE) else {
            return false;
        };
        self.versions
            .keys()
            .filter_map(|v| semver::Version::parse(v).ok())
            .any(|v| req.matches(&v))
    }
}

/// Changes to the local catalog that the index must follow.
#[derive(Debug, Clone)]
pub enum CatalogEvent {
    Published(PackageManifest),
    Updated(PackageManifest),
    Unpublished(String),
}
