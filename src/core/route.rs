//! Route entity: a predicate + upstream binding with priority.
//!
//! Routes are born in the config store, decoded from JSON, validated and
//! normalized here, then installed into the route table. Matching is pure
//! over the validated entity and runs in the request hot path.
use std::collections::HashMap;

use http::HeaderMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by route validation and decoding.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RouteError {
    #[error("route id cannot be empty")]
    EmptyId,

    #[error("route path cannot be empty")]
    EmptyPath,

    #[error("upstream_id cannot be empty")]
    EmptyUpstreamId,

    #[error("invalid path regex: {0}")]
    InvalidRegex(#[from] regex::Error),

    #[error("invalid http method: {0}")]
    InvalidMethod(String),

    #[error("invalid route json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Whether a route participates in matching.
///
/// Wire encoding is an integer (0 disabled, 1 enabled) to stay compatible
/// with the persisted layout; anything other than 1 reads as disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum RouteStatus {
    #[default]
    Disabled,
    Enabled,
}

impl From<i32> for RouteStatus {
    fn from(v: i32) -> Self {
        if v == 1 {
            RouteStatus::Enabled
        } else {
            RouteStatus::Disabled
        }
    }
}

impl From<RouteStatus> for i32 {
    fn from(s: RouteStatus) -> Self {
        match s {
            RouteStatus::Disabled => 0,
            RouteStatus::Enabled => 1,
        }
    }
}

/// Path predicate interpretation. Unknown or absent values fall back to
/// prefix matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum PathType {
    #[default]
    Prefix,
    Exact,
    Regex,
}

impl From<String> for PathType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "exact" => PathType::Exact,
            "regex" => PathType::Regex,
            _ => PathType::Prefix,
        }
    }
}

/// The conditions a request must satisfy to select a route.
///
/// Empty collections match anything; `path` is the only required field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutePredicates {
    pub path: String,
    #[serde(default)]
    pub path_type: PathType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub query_params: HashMap<String, String>,

    /// Compiled during validation when `path_type` is regex.
    #[serde(skip)]
    pub path_regex: Option<Regex>,
}

impl PartialEq for RoutePredicates {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
            && self.path_type == other.path_type
            && self.methods == other.methods
            && self.headers == other.headers
            && self.hosts == other.hosts
            && self.query_params == other.query_params
    }
}

/// A named forwarding rule. Higher `priority` wins; ties resolve in
/// insertion order inside the route table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub status: RouteStatus,
    #[serde(default)]
    pub predicates: RoutePredicates,
    #[serde(default)]
    pub upstream_id: String,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub create_time: i64,
    #[serde(default)]
    pub update_time: i64,
}

/// The request facts matching runs against. Borrowed from the live
/// request; the query map is parsed once per request by the dispatcher.
pub struct MatchRequest<'a> {
    pub path: &'a str,
    pub method: &'a str,
    pub host: &'a str,
    pub headers: &'a HeaderMap,
    pub query: &'a HashMap<String, String>,
}

const ALLOWED_METHODS: [&str; 7] = ["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

impl Route {
    /// Validate and normalize the route in place: methods are uppercased
    /// and a regex path is compiled. Invalid routes never reach a snapshot.
    pub fn validate(&mut self) -> Result<(), RouteError> {
        if self.id.is_empty() {
            return Err(RouteError::EmptyId);
        }
        if self.predicates.path.is_empty() {
            return Err(RouteError::EmptyPath);
        }
        if self.upstream_id.is_empty() {
            return Err(RouteError::EmptyUpstreamId);
        }

        if self.predicates.path_type == PathType::Regex {
            self.predicates.path_regex = Some(Regex::new(&self.predicates.path)?);
        }

        for method in &mut self.predicates.methods {
            *method = method.to_ascii_uppercase();
            if !ALLOWED_METHODS.contains(&method.as_str()) {
                return Err(RouteError::InvalidMethod(method.clone()));
            }
        }

        Ok(())
    }

    /// Decode a persisted route and validate it.
    pub fn from_json(data: &[u8]) -> Result<Self, RouteError> {
        let mut route: Route = serde_json::from_slice(data)?;
        route.validate()?;
        Ok(route)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, RouteError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// True when the route is enabled and every predicate holds.
    pub fn matches(&self, req: &MatchRequest<'_>) -> bool {
        self.status == RouteStatus::Enabled
            && self.match_path(req.path)
            && self.match_method(req.method)
            && self.match_host(req.host)
            && self.match_headers(req.headers)
            && self.match_query(req.query)
    }

    fn match_path(&self, path: &str) -> bool {
        match self.predicates.path_type {
            PathType::Exact => path == self.predicates.path,
            PathType::Regex => self
                .predicates
                .path_regex
                .as_ref()
                .is_some_and(|re| re.is_match(path)),
            PathType::Prefix => path.starts_with(&self.predicates.path),
        }
    }

    fn match_method(&self, method: &str) -> bool {
        self.predicates.methods.is_empty()
            || self
                .predicates
                .methods
                .iter()
                .any(|m| m.eq_ignore_ascii_case(method))
    }

    fn match_host(&self, host: &str) -> bool {
        self.predicates.hosts.is_empty()
            || self.predicates.hosts.iter().any(|h| h == host || h == "*")
    }

    /// Header names compare case-insensitively per HTTP semantics; values
    /// must equal the first value of the request header exactly.
    fn match_headers(&self, headers: &HeaderMap) -> bool {
        self.predicates.headers.iter().all(|(name, expected)| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|actual| actual == expected)
        })
    }

    fn match_query(&self, query: &HashMap<String, String>) -> bool {
        self.predicates
            .query_params
            .iter()
            .all(|(key, expected)| query.get(key) == Some(expected))
    }

    /// Capture `:name` segments from the matched pattern.
    ///
    /// Runs after matching succeeded and is independent of the path type.
    /// Segment counts must agree exactly, otherwise the map is empty.
    pub fn path_params(&self, request_path: &str) -> HashMap<String, String> {
        let pattern_segs: Vec<&str> = split_segments(&self.predicates.path);
        let path_segs: Vec<&str> = split_segments(request_path);

        let mut params = HashMap::new();
        if pattern_segs.len() != path_segs.len() {
            return params;
        }
        for (pat, seg) in pattern_segs.iter().zip(path_segs.iter()) {
            if let Some(name) = pat.strip_prefix(':') {
                params.insert(name.to_string(), (*seg).to_string());
            }
        }
        params
    }
}

fn split_segments(path: &str) -> Vec<&str> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    }
}
