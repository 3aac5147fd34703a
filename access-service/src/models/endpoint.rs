//! Endpoint model - protected (path pattern, method) pairs.
//!
//! A path pattern is a `/`-separated list of segments. A segment written as
//! `:name`, `{name}` or `[name]` is a placeholder that matches any single
//! concrete segment; every other segment must match exactly.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use std::cmp::Ordering;
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow, ToSchema)]
pub struct Endpoint {
    pub endpoint_id: i64,
    pub path_pattern: String,
    pub method: String,
    pub created_utc: DateTime<Utc>,
}

impl Endpoint {
    pub fn pattern(&self) -> PathPattern {
        PathPattern::parse(&self.path_pattern)
    }
}

/// Endpoint ↔ permission link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, FromRow)]
pub struct EndpointPermission {
    pub endpoint_id: i64,
    pub permission_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Placeholder(String),
}

impl Segment {
    fn parse(raw: &str) -> Self {
        let placeholder = raw
            .strip_prefix(':')
            .or_else(|| raw.strip_prefix('{').and_then(|s| s.strip_suffix('}')))
            .or_else(|| raw.strip_prefix('[').and_then(|s| s.strip_suffix(']')));

        match placeholder {
            Some(name) if !name.is_empty() => Segment::Placeholder(name.to_string()),
            _ => Segment::Literal(raw.to_string()),
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Segment::Literal(_))
    }

    fn matches(&self, concrete: &str) -> bool {
        match self {
            Segment::Literal(lit) => lit == concrete,
            Segment::Placeholder(_) => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Self {
        Self {
            segments: split_path(pattern).map(Segment::parse).collect(),
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Same segment count, and every literal segment equal.
    pub fn matches(&self, concrete: &[&str]) -> bool {
        self.segments.len() == concrete.len()
            && self
                .segments
                .iter()
                .zip(concrete)
                .all(|(seg, value)| seg.matches(value))
    }

    /// Orders two patterns by specificity: walking left to right, the first
    /// position where one is literal and the other a placeholder decides,
    /// and the literal side is greater.
    pub fn specificity_cmp(&self, other: &Self) -> Ordering {
        self.segments
            .iter()
            .zip(&other.segments)
            .map(|(a, b)| a.is_literal().cmp(&b.is_literal()))
            .find(|ord| ord.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

/// Split a path into its non-empty segments.
pub fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Canonical method spelling used for storage and comparison.
pub fn normalize_method(method: &str) -> String {
    method.trim().to_ascii_uppercase()
}

/// Select the endpoint that serves `path` among `candidates` (already filtered
/// by method). The most specific pattern wins; equal specificity falls back
/// to the lowest id so the choice is stable.
pub fn resolve_endpoint<'a>(candidates: &'a [Endpoint], path: &str) -> Option<&'a Endpoint> {
    let concrete: Vec<&str> = split_path(path).collect();

    candidates
        .iter()
        .map(|endpoint| (endpoint, endpoint.pattern()))
        .filter(|(_, pattern)| pattern.matches(&concrete))
        .max_by(|(a, pa), (b, pb)| {
            pa.specificity_cmp(pb)
                .then_with(|| b.endpoint_id.cmp(&a.endpoint_id))
        })
        .map(|(endpoint, _)| endpoint)
}
