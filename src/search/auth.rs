//! Per-package read authorization.
//!
//! Every candidate is checked against the [`AccessOracle`] with a bounded
//! number of checks in flight. Decisions come back aligned with the input.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use thiserror::Error;
use tracing::debug;

use crate::model::ScoredResult;

/// Who is asking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub name: Option<String>,
    pub groups: Vec<String>,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(name: impl Into<String>, groups: Vec<String>) -> Self {
        Self {
            name: Some(name.into()),
            groups,
        }
    }
}

/// Oracle failure. Client-error statuses (4xx) count as a denial.
#[derive(Error, Debug, Clone)]
#[error("access check failed: {message}")]
pub struct AuthError {
    pub status: Option<u16>,
    pub message: String,
}

impl AuthError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.status.is_some_and(|s| (400..500).contains(&s))
    }
}

#[async_trait]
pub trait AccessOracle: Send + Sync {
    async fn allow_access(&self, package: &str, identity: &Identity) -> Result<bool, AuthError>;
}

/// Grants every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl AccessOracle for AllowAll {
    async fn allow_access(&self, _package: &str, _identity: &Identity) -> Result<bool, AuthError> {
        Ok(true)
    }
}

/// One allow/deny per package, in input order.
///
/// A 4xx-shaped failure is a deny; any other failure aborts the whole batch.
pub async fn decide(
    oracle: &dyn AccessOracle,
    identity: &Identity,
    packages: &[&str],
    concurrency: usize,
) -> Result<Vec<bool>, AuthError> {
    futures::stream::iter(packages.iter().copied())
        .map(|package| async move {
            match oracle.allow_access(package, identity).await {
                Ok(allowed) => Ok(allowed),
                Err(e) if e.is_client_error() => {
                    debug!(package = %package, status = ?e.status, "access_denied_by_error");
                    Ok(false)
                }
                Err(e) => Err(e),
            }
        })
        .buffered(concurrency.max(1))
        .try_collect()
        .await
}

/// Keep the results `identity` may read, preserving order.
pub async fn authorize(
    oracle: &dyn AccessOracle,
    identity: &Identity,
    results: Vec<ScoredResult>,
    concurrency: usize,
) -> Result<Vec<ScoredResult>, AuthError> {
    let names: Vec<&str> = results.iter().map(ScoredResult::name).collect();
    let decisions = decide(oracle, identity, &names, concurrency).await?;
    Ok(results
        .into_iter()
        .zip(decisions)
        .filter_map(|(result, allowed)| allowed.then_some(result))
        .collect())
}
