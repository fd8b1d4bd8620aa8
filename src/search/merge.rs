//! Merge point for concurrent search sources.
//!
//! Each source (the local store, every uplink) runs as its own task and
//! sends what it finds through one bounded channel; a full channel suspends
//! the producers until the consumer catches up. The consumer lifts local
//! records into scored results, drops anything the query does not match,
//! and keeps the rest in arrival order.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::aggregator::SearchError;
use super::matcher::QueryMatcher;
use crate::model::{PackageManifest, ScoredResult, SearchQuery};
use crate::sources::{UplinkError, UplinkRequest, UplinkSearchClient};
use crate::storage::{LocalStore, StoreError};

/// Default capacity of the merge channel.
pub const MERGE_CHANNEL_SIZE: usize = 32;

/// Where a merged item came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceId {
    Local,
    Uplink(String),
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Uplink(name) => f.write_str(name),
        }
    }
}

/// A package read from local storage, not yet scored.
#[derive(Debug, Clone)]
pub struct LocalRecord {
    pub manifest: PackageManifest,
    /// Modification time of the package directory.
    pub time: DateTime<Utc>,
}

/// The two shapes sources produce.
#[derive(Debug, Clone)]
pub enum MergeItem {
    /// Already scored results, as uplinks return them.
    Batch(Vec<ScoredResult>),
    /// One local package.
    Single(Box<LocalRecord>),
}

impl MergeItem {
    /// Lift into scored results.
    pub fn normalize(self) -> Vec<ScoredResult> {
        match self {
            Self::Batch(results) => results,
            Self::Single(record) => vec![ScoredResult::local(&record.manifest, Some(record.time))],
        }
    }
}

#[derive(Debug)]
pub enum SourceFailure {
    Local(StoreError),
    Uplink(UplinkError),
}

/// Message type for the merge channel.
#[derive(Debug)]
pub enum MergeMessage {
    Item { source: SourceId, item: MergeItem },
    /// The source stopped early. Fatal for the local source only.
    SourceError {
        source: SourceId,
        error: SourceFailure,
    },
    /// Producer has finished.
    Done { source: SourceId },
}

/// Spawn the local producer: discovery for the query, then one manifest read
/// per discovered package. Directories without a manifest are skipped.
///
/// `stop` is only cancelled when the search gives up early; an abort from the
/// caller does not end local production.
pub fn spawn_local_producer(
    store: Arc<dyn LocalStore>,
    query: SearchQuery,
    tx: Sender<MergeMessage>,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let work = {
            let tx = tx.clone();
            tokio::spawn(async move {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => {
                        debug!(source = "local", "source_cancelled");
                        Ok(0)
                    }
                    r = produce_local(store.as_ref(), &query, &tx) => r,
                }
            })
        };
        let outcome = work
            .await
            .unwrap_or_else(|e| Err(StoreError::Task(e.to_string())));
        match outcome {
            Ok(sent) => info!(source = "local", packages = sent, "source_complete"),
            Err(e) => {
                let _ = tx
                    .send(MergeMessage::SourceError {
                        source: SourceId::Local,
                        error: SourceFailure::Local(e),
                    })
                    .await;
            }
        }
        let _ = tx
            .send(MergeMessage::Done {
                source: SourceId::Local,
            })
            .await;
    })
}

async fn produce_local(
    store: &dyn LocalStore,
    query: &SearchQuery,
    tx: &Sender<MergeMessage>,
) -> Result<usize, StoreError> {
    let items = store.search(query).await?;
    let mut sent = 0;
    for item in items {
        let Some(manifest) = store.read_manifest(&item).await? else {
            debug!(name = %item.name, "local_skip_no_manifest");
            continue;
        };
        let record = LocalRecord {
            manifest,
            time: item.time,
        };
        let message = MergeMessage::Item {
            source: SourceId::Local,
            item: MergeItem::Single(Box::new(record)),
        };
        if tx.send(message).await.is_err() {
            break;
        }
        sent += 1;
    }
    Ok(sent)
}

/// Spawn one uplink producer. Cancellation ends it quietly.
///
/// The uplink runs in its own task so a panic inside the client is reported
/// as that uplink's failure and `Done` is still sent.
pub fn spawn_uplink_producer(
    uplink: Arc<dyn UplinkSearchClient>,
    request: Arc<UplinkRequest>,
    tx: Sender<MergeMessage>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let source = SourceId::Uplink(uplink.name().to_string());
        let work = {
            let tx = tx.clone();
            let source = source.clone();
            tokio::spawn(async move {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(UplinkError::Cancelled),
                    r = produce_uplink(uplink.as_ref(), &request, &source, &tx) => r,
                }
            })
        };
        let outcome = work.await.unwrap_or_else(|e| {
            Err(UplinkError::Task {
                uplink: source.to_string(),
                message: e.to_string(),
            })
        });
        match outcome {
            Ok(batches) => debug!(uplink = %source, batches, "source_complete"),
            Err(UplinkError::Cancelled) => debug!(uplink = %source, "source_cancelled"),
            Err(e) => {
                let _ = tx
                    .send(MergeMessage::SourceError {
                        source: source.clone(),
                        error: SourceFailure::Uplink(e),
                    })
                    .await;
            }
        }
        let _ = tx.send(MergeMessage::Done { source }).await;
    })
}

async fn produce_uplink(
    uplink: &dyn UplinkSearchClient,
    request: &UplinkRequest,
    source: &SourceId,
    tx: &Sender<MergeMessage>,
) -> Result<usize, UplinkError> {
    let mut stream = uplink.search(request).await?;
    let mut sent = 0;
    while let Some(batch) = stream.next().await {
        let message = MergeMessage::Item {
            source: source.clone(),
            item: MergeItem::Batch(batch?),
        };
        if tx.send(message).await.is_err() {
            break;
        }
        sent += 1;
    }
    Ok(sent)
}

/// Run the merge consumer until every producer is done.
///
/// Returns matching results in arrival order. A local failure aborts the
/// merge; an uplink failure only ends that uplink's contribution.
pub async fn run_merge_consumer(
    mut rx: Receiver<MergeMessage>,
    num_producers: usize,
    matcher: &QueryMatcher,
) -> Result<Vec<ScoredResult>, SearchError> {
    let mut active_producers = num_producers;
    let mut merged = Vec::new();
    let mut dropped = 0usize;

    while active_producers > 0 {
        match rx.recv().await {
            Some(MergeMessage::Item { source, item }) => {
                for result in item.normalize() {
                    if matcher.matches(&result.package) {
                        debug!(origin = %source, package = %result.name(), "merge_keep");
                        merged.push(result);
                    } else {
                        dropped += 1;
                        debug!(origin = %source, package = %result.name(), "merge_drop");
                    }
                }
            }
            Some(MergeMessage::SourceError { source, error }) => match error {
                SourceFailure::Local(e) => {
                    warn!(error = %e, "local_source_failed");
                    return Err(SearchError::LocalDiscovery(e));
                }
                SourceFailure::Uplink(e) => {
                    // Non-fatal: the other sources keep contributing.
                    warn!(uplink = %source, error = %e, "uplink_failed");
                }
            },
            Some(MergeMessage::Done { source }) => {
                active_producers -= 1;
                debug!(
                    source = %source,
                    remaining = active_producers,
                    "merge_producer_done"
                );
            }
            None => {
                warn!(remaining = active_producers, "merge channel closed unexpectedly");
                return Err(SearchError::MergeClosed);
            }
        }
    }

    info!(kept = merged.len(), dropped, "merge_complete");
    Ok(merged)
}
