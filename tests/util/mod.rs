use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use registry_search::model::types::NpmUser;
use registry_search::model::{
    PackageManifest, PackageSummary, Person, ScoredResult, SearchItem, SearchQuery,
    VersionManifest,
};
use registry_search::search::{AccessOracle, AuthError, Identity};
use registry_search::sources::{UplinkError, UplinkRequest, UplinkSearchClient, UplinkStream};
use registry_search::storage::{LocalStore, StoreError};
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Captures tracing output for tests.
#[allow(dead_code)]
pub struct TestTracing {
    buffer: Arc<Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.buffer.clone();
        let make_writer = move || TestWriter(writer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_writer(make_writer)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        let buf = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Assert that the captured log output contains the provided substring.
    pub fn assert_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            out.contains(needle),
            "expected logs to contain `{needle}`, got:\n{out}"
        );
    }
}

struct TestWriter(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.0.lock().unwrap();
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

// -------------------------------------------------------------------------
// Fixtures
// -------------------------------------------------------------------------

/// Builder for local package manifests.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct PackageFixture {
    name: String,
    versions: Vec<String>,
    description: Option<String>,
    author: Option<Person>,
    publisher: Option<String>,
    keywords: Vec<String>,
}

#[allow(dead_code)]
impl PackageFixture {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            versions: vec!["1.0.0".into()],
            description: None,
            author: None,
            publisher: None,
            keywords: Vec::new(),
        }
    }

    pub fn versions(mut self, versions: &[&str]) -> Self {
        self.versions = versions.iter().map(|v| (*v).to_string()).collect();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(Person::Text(author.into()));
        self
    }

    pub fn publisher(mut self, name: impl Into<String>) -> Self {
        self.publisher = Some(name.into());
        self
    }

    pub fn keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords = keywords.iter().map(|k| (*k).to_string()).collect();
        self
    }

    pub fn build(self) -> PackageManifest {
        let versions = self
            .versions
            .iter()
            .map(|v| {
                (
                    v.clone(),
                    VersionManifest {
                        name: self.name.clone(),
                        version: v.clone(),
                        description: self.description.clone(),
                        keywords: self.keywords.clone(),
                        author: self.author.clone(),
                        npm_user: self.publisher.as_ref().map(|name| NpmUser {
                            name: name.clone(),
                            email: None,
                        }),
                        ..Default::default()
                    },
                )
            })
            .collect();
        PackageManifest {
            name: self.name,
            description: self.description,
            versions,
            author: self.author,
            ..Default::default()
        }
    }

    /// Write `<root>/<name>/package.json`.
    pub fn write_to(self, root: &Path) -> PathBuf {
        let manifest = self.build();
        let dir = root.join(&manifest.name);
        std::fs::create_dir_all(&dir).expect("create package dir");
        std::fs::write(
            dir.join("package.json"),
            serde_json::to_vec_pretty(&manifest).expect("serialize manifest"),
        )
        .expect("write manifest");
        dir
    }
}

/// A result as an uplink would send it.
#[allow(dead_code)]
pub fn remote_result(name: &str, description: &str) -> ScoredResult {
    let value = json!({
        "package": {
            "name": name,
            "version": "2.0.0",
            "description": description,
            "links": {"npm": format!("https://www.npmjs.com/package/{name}")}
        },
        "score": {"final": 0.5, "detail": {"quality": 0.5, "popularity": 0.5, "maintenance": 0.5}},
        "searchScore": 10.0
    });
    serde_json::from_value(value).expect("valid remote result")
}

#[allow(dead_code)]
pub fn names(results: &[ScoredResult]) -> Vec<&str> {
    results.iter().map(|r| r.package.name.as_str()).collect()
}

#[allow(dead_code)]
pub fn summary(name: &str) -> PackageSummary {
    PackageSummary {
        name: name.into(),
        ..Default::default()
    }
}

// -------------------------------------------------------------------------
// Local store
// -------------------------------------------------------------------------

/// In-memory catalog. `search` returns every package, so the query matcher
/// is the only filter.
#[allow(dead_code)]
#[derive(Default)]
pub struct MemoryStore {
    packages: Vec<PackageManifest>,
    delay: Option<Duration>,
    fail: bool,
}

#[allow(dead_code)]
impl MemoryStore {
    pub fn new(packages: Vec<PackageManifest>) -> Self {
        Self {
            packages,
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn list_all(&self) -> Result<Vec<PackageManifest>, StoreError> {
        if self.fail {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        Ok(self.packages.clone())
    }

    async fn search(&self, _query: &SearchQuery) -> Result<Vec<SearchItem>, StoreError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        Ok(self
            .packages
            .iter()
            .map(|p| SearchItem {
                name: p.name.clone(),
                path: PathBuf::from("/memory").join(&p.name),
                time: DateTime::<Utc>::default(),
            })
            .collect())
    }

    async fn read_manifest(
        &self,
        item: &SearchItem,
    ) -> Result<Option<PackageManifest>, StoreError> {
        Ok(self.packages.iter().find(|p| p.name == item.name).cloned())
    }
}

// -------------------------------------------------------------------------
// Uplinks
// -------------------------------------------------------------------------

#[allow(dead_code)]
#[derive(Debug, Clone)]
pub enum UplinkScript {
    /// Send every batch, optionally after a delay.
    Batches(Vec<Vec<ScoredResult>>),
    /// Fail before streaming anything.
    Status(u16),
    /// Send the batches, then fail.
    FailAfter(Vec<Vec<ScoredResult>>),
    /// Never answer.
    Hang,
    /// Panic inside `search`.
    Panic,
}

#[allow(dead_code)]
pub struct ScriptedUplink {
    name: String,
    script: UplinkScript,
    delay: Option<Duration>,
    seen: Mutex<Vec<UplinkRequest>>,
}

#[allow(dead_code)]
impl ScriptedUplink {
    pub fn new(name: &str, script: UplinkScript) -> Self {
        Self {
            name: name.into(),
            script,
            delay: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn serving(name: &str, results: Vec<ScoredResult>) -> Self {
        Self::new(name, UplinkScript::Batches(vec![results]))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<UplinkRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl UplinkSearchClient for ScriptedUplink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, request: &UplinkRequest) -> Result<UplinkStream, UplinkError> {
        self.seen.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.script {
            UplinkScript::Batches(batches) => {
                Ok(futures::stream::iter(batches.clone().into_iter().map(Ok)).boxed())
            }
            UplinkScript::Status(status) => Err(UplinkError::Status {
                uplink: self.name.clone(),
                status: *status,
            }),
            UplinkScript::FailAfter(batches) => {
                let failure = UplinkError::Transport {
                    uplink: self.name.clone(),
                    message: "connection reset".into(),
                };
                let items = batches
                    .clone()
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(failure)));
                Ok(futures::stream::iter(items).boxed())
            }
            UplinkScript::Hang => {
                std::future::pending::<()>().await;
                Ok(futures::stream::empty().boxed())
            }
            UplinkScript::Panic => panic!("uplink {} crashed", self.name),
        }
    }
}

// -------------------------------------------------------------------------
// Access oracles
// -------------------------------------------------------------------------

/// Denies the listed packages; fails with `status` for the `failing` ones.
#[allow(dead_code)]
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    denied: HashSet<String>,
    failing: HashSet<String>,
    status: Option<u16>,
}

#[allow(dead_code)]
impl ScriptedOracle {
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn deny(names: &[&str]) -> Self {
        Self {
            denied: names.iter().map(|n| (*n).to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn fail_for(names: &[&str], status: Option<u16>) -> Self {
        Self {
            failing: names.iter().map(|n| (*n).to_string()).collect(),
            status,
            ..Default::default()
        }
    }
}

#[async_trait]
impl AccessOracle for ScriptedOracle {
    async fn allow_access(&self, package: &str, _identity: &Identity) -> Result<bool, AuthError> {
        if self.failing.contains(package) {
            return Err(AuthError::new(self.status, format!("cannot check {package}")));
        }
        Ok(!self.denied.contains(package))
    }
}

/// Storage layout with two alternate roots.
#[allow(dead_code)]
pub fn storage_map() -> BTreeMap<String, PathBuf> {
    BTreeMap::from([
        ("internal".to_string(), PathBuf::from("internal")),
        ("vendor".to_string(), PathBuf::from("vendor")),
    ])
}
