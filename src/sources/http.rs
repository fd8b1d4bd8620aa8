//! Search against an npm-compatible registry over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tracing::{debug, info};

use super::{UplinkError, UplinkRequest, UplinkSearchClient, UplinkStream};
use crate::model::ScoredResult;

pub const SEARCH_PATH: &str = "/-/v1/search";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_BATCH: usize = 100;

/// Request headers that describe the inbound connection, not the request.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

#[derive(Debug, Clone)]
pub struct HttpUplink {
    name: String,
    base_url: String,
    max_batch: usize,
    client: Client,
}

impl HttpUplink {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        timeout: Duration,
        max_batch: usize,
    ) -> Result<Self, UplinkError> {
        let name = name.into();
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("registry-search/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UplinkError::Transport {
                uplink: name.clone(),
                message: e.to_string(),
            })?;
        Ok(Self {
            name,
            base_url: url.into().trim_end_matches('/').to_string(),
            max_batch: max_batch.max(1),
            client,
        })
    }

    pub fn search_url(&self) -> String {
        format!("{}{}", self.base_url, SEARCH_PATH)
    }

    fn transport(&self, err: reqwest::Error) -> UplinkError {
        UplinkError::Transport {
            uplink: self.name.clone(),
            message: err.to_string(),
        }
    }
}

fn forwardable(name: &str) -> bool {
    !HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Pulls the elements of the top-level `objects` array out of a search
/// response body as it arrives, without buffering the rest of the body.
#[derive(Debug, Default)]
struct ObjectsScanner {
    depth: usize,
    in_string: bool,
    escaped: bool,
    /// First byte of the document, `{` for a well-formed response.
    root: Option<u8>,
    /// Strings seen directly inside the root object, i.e. its keys.
    key: Vec<u8>,
    last_key: Vec<u8>,
    in_objects: bool,
    element: Vec<u8>,
}

impl ObjectsScanner {
    /// Feed the next chunk, returning every element it completed.
    fn feed(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let mut complete = Vec::new();
        for &b in chunk {
            let capturing = self.in_objects && self.depth >= 3;
            if self.in_string {
                if capturing {
                    self.element.push(b);
                } else if self.depth == 1 {
                    self.key.push(b);
                }
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                    if self.depth == 1 {
                        self.key.pop();
                        self.last_key = std::mem::take(&mut self.key);
                    }
                }
                continue;
            }
            match b {
                b'"' => {
                    self.in_string = true;
                    if capturing {
                        self.element.push(b);
                    } else if self.depth == 1 {
                        self.key.clear();
                    }
                }
                b'{' | b'[' => {
                    if self.in_objects && self.depth >= 2 {
                        self.element.push(b);
                    }
                    if self.depth == 0 && self.root.is_none() {
                        self.root = Some(b);
                    }
                    if b == b'[' && self.depth == 1 && self.last_key == b"objects" {
                        self.in_objects = true;
                    }
                    self.depth += 1;
                }
                b'}' | b']' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.in_objects {
                        if self.depth >= 2 {
                            self.element.push(b);
                            if self.depth == 2 {
                                complete.push(std::mem::take(&mut self.element));
                            }
                        } else {
                            self.in_objects = false;
                        }
                    }
                }
                _ if capturing => self.element.push(b),
                _ => {}
            }
        }
        complete
    }

    /// The root object was opened and closed.
    fn is_complete(&self) -> bool {
        self.root == Some(b'{') && self.depth == 0 && !self.in_string
    }
}

/// A response body turned into batches of at most `max_batch` results.
struct BodyBatches {
    uplink: String,
    response: reqwest::Response,
    scanner: ObjectsScanner,
    pending: Vec<ScoredResult>,
    max_batch: usize,
    total: usize,
    finished: bool,
}

impl BodyBatches {
    fn decode_error(&self, message: impl Into<String>) -> UplinkError {
        UplinkError::Decode {
            uplink: self.uplink.clone(),
            message: message.into(),
        }
    }

    fn fail(&mut self, error: UplinkError) -> Option<Result<Vec<ScoredResult>, UplinkError>> {
        self.finished = true;
        self.pending.clear();
        Some(Err(error))
    }

    async fn next_batch(&mut self) -> Option<Result<Vec<ScoredResult>, UplinkError>> {
        loop {
            if self.pending.len() >= self.max_batch {
                return Some(Ok(self.pending.drain(..self.max_batch).collect()));
            }
            if self.finished {
                return (!self.pending.is_empty()).then(|| Ok(std::mem::take(&mut self.pending)));
            }
            match self.response.chunk().await {
                Ok(Some(chunk)) => {
                    for element in self.scanner.feed(&chunk) {
                        match serde_json::from_slice::<ScoredResult>(&element) {
                            Ok(result) => {
                                self.total += 1;
                                self.pending.push(result);
                            }
                            Err(e) => {
                                let error = self.decode_error(e.to_string());
                                return self.fail(error);
                            }
                        }
                    }
                }
                Ok(None) => {
                    if !self.scanner.is_complete() {
                        let error = self.decode_error("truncated or malformed search body");
                        return self.fail(error);
                    }
                    self.finished = true;
                    info!(uplink = %self.uplink, results = self.total, "uplink_response");
                }
                Err(e) => {
                    let error = UplinkError::Transport {
                        uplink: self.uplink.clone(),
                        message: e.to_string(),
                    };
                    return self.fail(error);
                }
            }
        }
    }
}

#[async_trait]
impl UplinkSearchClient for HttpUplink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, request: &UplinkRequest) -> Result<UplinkStream, UplinkError> {
        let mut builder = self
            .client
            .get(self.search_url())
            .query(&request.query.to_params());
        for (name, value) in &request.context.headers {
            if forwardable(name) {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }

        debug!(uplink = %self.name, url = %self.search_url(), "uplink_request");
        let response = builder.send().await.map_err(|e| self.transport(e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(UplinkError::Status {
                uplink: self.name.clone(),
                status: status.as_u16(),
            });
        }

        let batches = BodyBatches {
            uplink: self.name.clone(),
            response,
            scanner: ObjectsScanner::default(),
            pending: Vec::new(),
            max_batch: self.max_batch,
            total: 0,
            finished: false,
        };
        let stream = futures::stream::unfold(batches, |mut batches| async move {
            let next = batches.next_batch().await?;
            Some((next, batches))
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_url_joins_base_and_path() {
        let uplink = HttpUplink::new(
            "npmjs",
            "https://registry.npmjs.org/",
            Duration::from_secs(5),
            DEFAULT_MAX_BATCH,
        )
        .unwrap();
        assert_eq!(uplink.search_url(), "https://registry.npmjs.org/-/v1/search");
        assert_eq!(uplink.name(), "npmjs");
    }

    #[test]
    fn hop_by_hop_headers_are_not_forwarded() {
        assert!(!forwardable("Host"));
        assert!(!forwardable("connection"));
        assert!(forwardable("authorization"));
        assert!(forwardable("accept"));
    }

    const BODY: &str = r#"{
        "total": 2,
        "objects": [
            {"package": {"name": "left-pad", "version": "1.3.0", "description": "pads [strings] {left}"},
             "score": {"final": 0.5, "detail": {"quality": 0.9, "popularity": 0.2, "maintenance": 0.3}},
             "searchScore": 12.5},
            {"package": {"name": "right-pad", "version": "0.1.0", "keywords": ["a\\\"]"]},
             "score": {"final": 0.1, "detail": {"quality": 0.1, "popularity": 0.1, "maintenance": 0.1}},
             "searchScore": 1.0}
        ],
        "time": "Thu, 01 Jan 2026 00:00:00 GMT"
    }"#;

    fn decode(elements: Vec<Vec<u8>>) -> Vec<ScoredResult> {
        elements
            .iter()
            .map(|e| serde_json::from_slice(e).unwrap())
            .collect()
    }

    #[test]
    fn scanner_extracts_objects_in_one_pass() {
        let mut scanner = ObjectsScanner::default();
        let results = decode(scanner.feed(BODY.as_bytes()));
        assert!(scanner.is_complete());
        let names: Vec<_> = results.iter().map(ScoredResult::name).collect();
        assert_eq!(names, vec!["left-pad", "right-pad"]);
        assert!(!results[0].local);
        assert_eq!(results[0].search_score, 12.5);
    }

    #[test]
    fn scanner_handles_byte_sized_chunks() {
        let mut scanner = ObjectsScanner::default();
        let mut elements = Vec::new();
        for b in BODY.as_bytes() {
            elements.extend(scanner.feed(std::slice::from_ref(b)));
        }
        assert!(scanner.is_complete());
        assert_eq!(decode(elements).len(), 2);
    }

    #[test]
    fn scanner_ignores_arrays_under_other_keys() {
        let mut scanner = ObjectsScanner::default();
        let body = br#"{"other": [{"package": {"name": "x"}}], "objects": []}"#;
        assert!(scanner.feed(body).is_empty());
        assert!(scanner.is_complete());
    }

    #[test]
    fn truncated_body_is_incomplete() {
        let mut scanner = ObjectsScanner::default();
        let cut = &BODY.as_bytes()[..BODY.len() / 2];
        let elements = scanner.feed(cut);
        assert!(elements.len() <= 1);
        assert!(!scanner.is_complete());

        let mut scanner = ObjectsScanner::default();
        scanner.feed(b"[]");
        assert!(!scanner.is_complete());
    }

    #[tokio::test]
    async fn unreachable_uplink_is_a_transport_error() {
        let uplink = HttpUplink::new(
            "dead",
            "http://127.0.0.1:1",
            Duration::from_millis(500),
            DEFAULT_MAX_BATCH,
        )
        .unwrap();
        let Err(err) = uplink.search(&UplinkRequest::default()).await else {
            panic!("expected an error");
        };
        assert!(matches!(err, UplinkError::Transport { .. }));
    }
}
