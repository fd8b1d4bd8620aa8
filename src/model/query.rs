//! Search query as accepted from the `/-/v1/search` query string.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub const DEFAULT_SIZE: usize = 20;
pub const DEFAULT_FROM: usize = 0;

/// A parsed search request. Built once per request and never mutated.
///
/// `quality`, `popularity` and `maintenance` are forwarded to uplinks but are
/// not applied to local scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub text: String,
    pub size: usize,
    pub from: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub popularity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintenance: Option<f64>,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            text: String::new(),
            size: DEFAULT_SIZE,
            from: DEFAULT_FROM,
            quality: None,
            popularity: None,
            maintenance: None,
        }
    }
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn with_from(mut self, from: usize) -> Self {
        self.from = from;
        self
    }

    pub fn with_weights(mut self, quality: f64, popularity: f64, maintenance: f64) -> Self {
        self.quality = Some(quality);
        self.popularity = Some(popularity);
        self.maintenance = Some(maintenance);
        self
    }

    /// Build a query from already-decoded query-string parameters.
    ///
    /// `size` falls back to 20 when missing, zero, negative or non-numeric;
    /// `from` falls back to 0 when missing, negative or non-numeric. Both
    /// accept a numeric prefix (`"15abc"` reads as 15).
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let size = params
            .get("size")
            .and_then(|v| leading_int(v))
            .filter(|n| *n > 0)
            .map_or(DEFAULT_SIZE, |n| n as usize);
        let from = params
            .get("from")
            .and_then(|v| leading_int(v))
            .filter(|n| *n >= 0)
            .map_or(DEFAULT_FROM, |n| n as usize);

        Self {
            text: params.get("text").cloned().unwrap_or_default(),
            size,
            from,
            quality: params.get("quality").and_then(|v| v.trim().parse().ok()),
            popularity: params.get("popularity").and_then(|v| v.trim().parse().ok()),
            maintenance: params.get("maintenance").and_then(|v| v.trim().parse().ok()),
        }
    }

    /// Query-string pairs to forward to an uplink's search endpoint.
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("text", self.text.clone()),
            ("size", self.size.to_string()),
            ("from", self.from.to_string()),
        ];
        if let Some(q) = self.quality {
            params.push(("quality", q.to_string()));
        }
        if let Some(p) = self.popularity {
            params.push(("popularity", p.to_string()));
        }
        if let Some(m) = self.maintenance {
            params.push(("maintenance", m.to_string()));
        }
        params
    }
}

/// Parse the leading optionally-signed integer of `raw`, ignoring leading whitespace.
fn leading_int(raw: &str) -> Option<i64> {
    let s = raw.trim_start();
    let (sign, digits) = match s.as_bytes().first()? {
        b'-' => (-1, &s[1..]),
        b'+' => (1, &s[1..]),
        _ => (1, s),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().ok().map(|n| sign * n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply_when_absent() {
        let q = SearchQuery::from_params(&params(&[("text", "react")]));
        assert_eq!(q.text, "react");
        assert_eq!(q.size, 20);
        assert_eq!(q.from, 0);
        assert_eq!(q.quality, None);
    }

    #[test]
    fn non_numeric_and_zero_size_fall_back() {
        let q = SearchQuery::from_params(&params(&[("size", "lots"), ("from", "x")]));
        assert_eq!((q.size, q.from), (20, 0));
        let q = SearchQuery::from_params(&params(&[("size", "0"), ("from", "-4")]));
        assert_eq!((q.size, q.from), (20, 0));
    }

    #[test]
    fn numeric_prefix_is_accepted() {
        let q = SearchQuery::from_params(&params(&[("size", "15abc"), ("from", " 3")]));
        assert_eq!((q.size, q.from), (15, 3));
    }

    #[test]
    fn weights_are_parsed_and_forwarded() {
        let q = SearchQuery::from_params(&params(&[
            ("text", "vue"),
            ("quality", "0.65"),
            ("popularity", "0.98"),
            ("maintenance", "0.5"),
        ]));
        assert_eq!(q.popularity, Some(0.98));
        let forwarded = q.to_params();
        assert!(forwarded.contains(&("maintenance", "0.5".to_string())));
        assert!(forwarded.contains(&("text", "vue".to_string())));
    }
}
