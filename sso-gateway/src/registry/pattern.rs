//! Resource path and method patterns.
//!
//! Path patterns are `/`-separated. `{name}` matches one segment, a
//! trailing `*` matches whatever remains (including nothing), anything else
//! must match literally.

use http::Method;
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("invalid path segment '{segment}' in pattern '{pattern}'")]
    InvalidSegment { pattern: String, segment: String },

    #[error("'*' must be the last segment of pattern '{0}'")]
    MisplacedWildcard(String),

    #[error("invalid method pattern '{0}'")]
    InvalidMethod(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param,
    CatchAll,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        let parts: Vec<&str> = split_path(raw).collect();
        let mut segments = Vec::with_capacity(parts.len());

        for (idx, part) in parts.iter().enumerate() {
            let segment = if *part == "*" {
                if idx + 1 != parts.len() {
                    return Err(PatternError::MisplacedWildcard(raw.to_string()));
                }
                Segment::CatchAll
            } else if part.len() > 2 && part.starts_with('{') && part.ends_with('}') {
                let name = &part[1..part.len() - 1];
                if name.contains(['{', '}', '*']) {
                    return Err(invalid_segment(raw, part));
                }
                Segment::Param
            } else if part.contains(['{', '}', '*']) || is_unsafe_segment(part) {
                return Err(invalid_segment(raw, part));
            } else {
                Segment::Literal(part.to_string())
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Match already-split, non-empty path segments.
    pub fn matches(&self, path: &[&str]) -> bool {
        let mut idx = 0;
        for segment in &self.segments {
            match segment {
                Segment::CatchAll => return true,
                Segment::Param => {
                    if idx >= path.len() {
                        return false;
                    }
                }
                Segment::Literal(lit) => {
                    if path.get(idx) != Some(&lit.as_str()) {
                        return false;
                    }
                }
            }
            idx += 1;
        }
        idx == path.len()
    }

    fn literal_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count()
    }

    fn param_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Param))
            .count()
    }

    /// Ordering where the more specific pattern sorts first.
    pub fn cmp_specificity(&self, other: &Self) -> Ordering {
        other
            .literal_count()
            .cmp(&self.literal_count())
            .then_with(|| other.param_count().cmp(&self.param_count()))
    }
}

fn invalid_segment(pattern: &str, segment: &str) -> PatternError {
    PatternError::InvalidSegment {
        pattern: pattern.to_string(),
        segment: segment.to_string(),
    }
}

/// Non-empty segments of a path; leading, trailing and repeated slashes
/// are insignificant.
pub fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Segments a downstream could reinterpret into a different path: dot
/// segments (raw or percent-encoded) and encoded separators.
pub fn is_unsafe_segment(segment: &str) -> bool {
    let lower = segment.to_ascii_lowercase();
    let decoded_dots = lower.replace("%2e", ".");
    decoded_dots == "." || decoded_dots == ".." || lower.contains("%2f") || lower.contains("%5c")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodPattern {
    Any,
    Exact(Method),
}

impl MethodPattern {
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        let upper = raw.trim().to_ascii_uppercase();
        match upper.as_str() {
            "" | "*" | "ANY" => Ok(MethodPattern::Any),
            _ => Method::from_bytes(upper.as_bytes())
                .map(MethodPattern::Exact)
                .map_err(|_| PatternError::InvalidMethod(raw.to_string())),
        }
    }

    pub fn matches(&self, method: &Method) -> bool {
        match self {
            MethodPattern::Any => true,
            MethodPattern::Exact(m) => m == method,
        }
    }

    /// Concrete methods sort before the wildcard.
    pub fn cmp_specificity(&self, other: &Self) -> Ordering {
        match (self, other) {
            (MethodPattern::Exact(_), MethodPattern::Any) => Ordering::Less,
            (MethodPattern::Any, MethodPattern::Exact(_)) => Ordering::Greater,
            _ => Ordering::Equal,
        }
    }
}
