//! Slash-separated addresses into the synchronized tree.

use std::fmt;

use crate::{StrokeId, UserId};

pub const STROKES: &str = "strokes";
pub const ONLINE_USERS: &str = "onlineUsers";
pub const CURSORS: &str = "cursors";

/// Characters the store refuses inside a key.
const FORBIDDEN: &[char] = &['/', '.', '#', '$', '[', ']'];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("empty path segment")]
    EmptySegment,
    #[error("invalid character in path segment {0:?}")]
    InvalidSegment(String),
}

pub(crate) fn validate_segment(segment: &str) -> Result<(), PathError> {
    if segment.is_empty() {
        return Err(PathError::EmptySegment);
    }
    if segment.contains(FORBIDDEN) || segment.chars().any(char::is_control) {
        return Err(PathError::InvalidSegment(segment.to_string()));
    }
    Ok(())
}

/// Validated path. The empty path is the root of the tree.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse `a/b/c`. Leading and trailing slashes are ignored.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let trimmed = raw.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        let segments = trimmed
            .split('/')
            .map(|s| validate_segment(s).map(|()| s.to_string()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { segments })
    }

    pub fn child(&self, segment: &str) -> Result<Self, PathError> {
        validate_segment(segment)?;
        Ok(self.push_unchecked(segment))
    }

    fn push_unchecked(&self, segment: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Self { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// `self` equals `other` or lies above it.
    pub fn is_prefix_of(&self, other: &StorePath) -> bool {
        other.segments.starts_with(&self.segments)
    }

    /// A change at one path is visible at the other.
    pub fn overlaps(&self, other: &StorePath) -> bool {
        self.is_prefix_of(other) || other.is_prefix_of(self)
    }

    // ── Schema ────────────────────────────────────────────────────

    pub fn strokes() -> Self {
        Self::root().push_unchecked(STROKES)
    }

    pub fn user_strokes(user: &UserId) -> Self {
        Self::strokes().push_unchecked(user.as_str())
    }

    pub fn stroke(user: &UserId, stroke: &StrokeId) -> Self {
        Self::user_strokes(user).push_unchecked(stroke.as_str())
    }

    pub fn online_users() -> Self {
        Self::root().push_unchecked(ONLINE_USERS)
    }

    pub fn online_user(user: &UserId) -> Self {
        Self::online_users().push_unchecked(user.as_str())
    }

    pub fn cursors() -> Self {
        Self::root().push_unchecked(CURSORS)
    }

    pub fn cursor(user: &UserId) -> Self {
        Self::cursors().push_unchecked(user.as_str())
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

impl std::str::FromStr for StorePath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
