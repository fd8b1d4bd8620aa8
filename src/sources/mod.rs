//! Upstream registries ("uplinks") as search sources.
//!
//! The aggregator only sees [`UplinkSearchClient`]: given a request it either
//! fails up front (unreachable, non-2xx) or hands back a stream of result
//! batches that may itself fail part way through.
//!
//! - **http**: [`http::HttpUplink`], the reqwest implementation

pub mod http;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::model::{ScoredResult, SearchQuery};

pub use http::HttpUplink;

/// Errors produced by an uplink search.
#[derive(Error, Debug)]
pub enum UplinkError {
    #[error("bad status code {status} from uplink")]
    Status { uplink: String, status: u16 },

    #[error("uplink {uplink} unreachable: {message}")]
    Transport { uplink: String, message: String },

    #[error("uplink {uplink} sent an unreadable response: {message}")]
    Decode { uplink: String, message: String },

    /// The producer task panicked or was torn down.
    #[error("uplink {uplink} task failed: {message}")]
    Task { uplink: String, message: String },

    #[error("uplink search cancelled")]
    Cancelled,
}

impl UplinkError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Headers and URL of the inbound request, forwarded to uplinks.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub headers: Vec<(String, String)>,
    pub url: Option<String>,
}

impl RequestContext {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            headers: Vec::new(),
            url: Some(url.into()),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// One search request as sent to every uplink.
#[derive(Debug, Clone, Default)]
pub struct UplinkRequest {
    pub query: SearchQuery,
    pub context: RequestContext,
}

/// Result batches from one uplink, in the order the uplink produced them.
pub type UplinkStream = BoxStream<'static, Result<Vec<ScoredResult>, UplinkError>>;

#[async_trait]
pub trait UplinkSearchClient: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    async fn search(&self, request: &UplinkRequest) -> Result<UplinkStream, UplinkError>;
}
