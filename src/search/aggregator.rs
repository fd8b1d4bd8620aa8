//! Federated search: local store plus every uplink, merged into one page.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::auth::{AccessOracle, AuthError, Identity, authorize};
use super::matcher::QueryMatcher;
use super::merge::{run_merge_consumer, spawn_local_producer, spawn_uplink_producer};
use crate::config::SearchSettings;
use crate::model::{ScoredResult, SearchQuery, SearchResultSet};
use crate::sources::{RequestContext, UplinkRequest, UplinkSearchClient};
use crate::storage::{LocalStore, StoreError};

/// Failures surfaced to the caller. Uplink failures never appear here.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("local package discovery failed: {0}")]
    LocalDiscovery(#[source] StoreError),

    #[error("package authorization failed: {0}")]
    AuthOracle(#[from] AuthError),

    #[error("merge closed before every source finished")]
    MergeClosed,
}

impl SearchError {
    /// Whether the framing layer should answer with an internal error.
    pub fn is_internal(&self) -> bool {
        match self {
            Self::LocalDiscovery(_) | Self::AuthOracle(_) | Self::MergeClosed => true,
        }
    }
}

/// Per-query progress, logged at each transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPhase {
    Init,
    FanOut,
    Merging,
    Draining,
    Deduplicating,
    Authorizing,
    Paginated,
    Done,
    Errored,
}

struct PhaseTracker {
    current: SearchPhase,
    started: Instant,
}

impl PhaseTracker {
    fn new() -> Self {
        Self {
            current: SearchPhase::Init,
            started: Instant::now(),
        }
    }

    fn advance(&mut self, next: SearchPhase) {
        debug!(
            from = ?self.current,
            to = ?next,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "search_phase"
        );
        self.current = next;
    }
}

pub struct SearchAggregator {
    local: Arc<dyn LocalStore>,
    uplinks: Vec<Arc<dyn UplinkSearchClient>>,
    oracle: Arc<dyn AccessOracle>,
    settings: SearchSettings,
}

impl SearchAggregator {
    pub fn new(local: Arc<dyn LocalStore>, oracle: Arc<dyn AccessOracle>) -> Self {
        Self {
            local,
            uplinks: Vec::new(),
            oracle,
            settings: SearchSettings::default(),
        }
    }

    pub fn with_uplink(mut self, uplink: Arc<dyn UplinkSearchClient>) -> Self {
        self.uplinks.push(uplink);
        self
    }

    pub fn with_uplinks(mut self, uplinks: Vec<Arc<dyn UplinkSearchClient>>) -> Self {
        self.uplinks.extend(uplinks);
        self
    }

    pub fn with_settings(mut self, settings: SearchSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn uplink_count(&self) -> usize {
        self.uplinks.len()
    }

    /// Search every source for `query` on behalf of `identity`.
    ///
    /// Cancelling `abort` ends in-flight uplink fetches; whatever they had
    /// already delivered is still returned. Local discovery runs to completion.
    pub async fn search(
        &self,
        query: &SearchQuery,
        identity: &Identity,
        abort: CancellationToken,
    ) -> Result<SearchResultSet, SearchError> {
        self.search_with_context(query, RequestContext::default(), identity, abort)
            .await
    }

    /// [`SearchAggregator::search`] with the inbound request forwarded to uplinks.
    pub async fn search_with_context(
        &self,
        query: &SearchQuery,
        context: RequestContext,
        identity: &Identity,
        abort: CancellationToken,
    ) -> Result<SearchResultSet, SearchError> {
        info!(
            query = %query.text,
            size = query.size,
            from = query.from,
            uplinks = self.uplinks.len(),
            "search_start"
        );
        let mut phase = PhaseTracker::new();
        let outcome = self
            .run(&mut phase, query, context, identity, abort)
            .await;
        match &outcome {
            Ok(result) => {
                phase.advance(SearchPhase::Done);
                info!(
                    total = result.total,
                    elapsed_ms = phase.started.elapsed().as_millis() as u64,
                    "search_complete"
                );
            }
            Err(e) => {
                phase.advance(SearchPhase::Errored);
                warn!(error = %e, "search_failed");
            }
        }
        outcome
    }

    async fn run(
        &self,
        phase: &mut PhaseTracker,
        query: &SearchQuery,
        context: RequestContext,
        identity: &Identity,
        abort: CancellationToken,
    ) -> Result<SearchResultSet, SearchError> {
        // Abort cancels uplink fetches only. Every producer stops when this
        // search returns early.
        let cancel = abort.child_token();
        let _stop_uplinks = cancel.clone().drop_guard();
        let local_stop = CancellationToken::new();
        let _stop_local = local_stop.clone().drop_guard();

        phase.advance(SearchPhase::FanOut);
        let (tx, rx) = mpsc::channel(self.settings.merge_buffer.max(1));
        let request = Arc::new(UplinkRequest {
            query: query.clone(),
            context,
        });
        let mut handles = Vec::with_capacity(self.uplinks.len() + 1);
        handles.push(spawn_local_producer(
            Arc::clone(&self.local),
            query.clone(),
            tx.clone(),
            local_stop,
        ));
        for uplink in &self.uplinks {
            handles.push(spawn_uplink_producer(
                Arc::clone(uplink),
                Arc::clone(&request),
                tx.clone(),
                cancel.clone(),
            ));
        }
        drop(tx);

        phase.advance(SearchPhase::Merging);
        let matcher = QueryMatcher::compile(&query.text);
        let merged = run_merge_consumer(rx, handles.len(), &matcher).await?;

        phase.advance(SearchPhase::Draining);
        for handle in handles {
            // Producers report their own failures.
            let _ = handle.await;
        }

        phase.advance(SearchPhase::Deduplicating);
        let unique = dedup_by_name(merged);

        phase.advance(SearchPhase::Authorizing);
        let allowed = authorize(
            self.oracle.as_ref(),
            identity,
            unique,
            self.settings.auth_concurrency,
        )
        .await?;

        phase.advance(SearchPhase::Paginated);
        Ok(SearchResultSet::new(paginate(allowed, query.from, query.size)))
    }
}

/// Keep the first result for each package name, in order.
pub fn dedup_by_name(results: Vec<ScoredResult>) -> Vec<ScoredResult> {
    let mut seen = HashSet::with_capacity(results.len());
    results
        .into_iter()
        .filter(|r| seen.insert(r.package.name.clone()))
        .collect()
}

/// `items[from..size]` with array-slice semantics: `size` is the end index,
/// not a count. Out-of-range bounds clamp to an empty page.
pub fn paginate<T>(items: Vec<T>, from: usize, size: usize) -> Vec<T> {
    items
        .into_iter()
        .skip(from)
        .take(size.saturating_sub(from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PackageSummary;

    fn result(name: &str, score: f64) -> ScoredResult {
        ScoredResult {
            package: PackageSummary {
                name: name.into(),
                ..Default::default()
            },
            flags: None,
            local: false,
            score: Default::default(),
            search_score: score,
        }
    }

    #[test]
    fn dedup_keeps_first_seen() {
        let unique = dedup_by_name(vec![
            result("bar", 1.0),
            result("foo", 1.0),
            result("bar", 2.0),
        ]);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].name(), "bar");
        assert_eq!(unique[0].search_score, 1.0);
    }

    #[test]
    fn paginate_uses_slice_semantics() {
        let items: Vec<u32> = (0..10).collect();
        assert_eq!(paginate(items.clone(), 0, 20), items);
        assert_eq!(paginate(items.clone(), 2, 5), vec![2, 3, 4]);
        assert!(paginate(items.clone(), 5, 3).is_empty());
        assert!(paginate(items.clone(), 12, 20).is_empty());
        assert_eq!(paginate(items, 8, 20), vec![8, 9]);
    }

    #[test]
    fn every_search_error_is_internal() {
        assert!(SearchError::MergeClosed.is_internal());
        assert!(SearchError::AuthOracle(AuthError::new(Some(500), "x")).is_internal());
    }
}
