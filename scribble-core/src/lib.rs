//! # scribble-core: shared canvas data model
//!
//! Types stored in the synchronized tree and the path schema that addresses
//! them:
//!
//! ```text
//! strokes/{userId}/{strokeId}   Stroke        (append-only, owner writes)
//! onlineUsers/{userId}          PresenceEntry (one per live connection)
//! cursors/{userId}              CursorEntry   (owner writes, ≤ 30 Hz)
//! ```
//!
//! Field names on the wire follow the existing store schema (`userId`,
//! `email`, `timestamp`, ...) so that every store-compatible client sees the
//! same records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub mod path;
pub mod snapshot;

pub use path::{PathError, StorePath};

/// Canvas-local pixel coordinates.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

macro_rules! segment_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Validates `raw` as a single path segment.
            pub fn new(raw: impl Into<String>) -> Result<Self, PathError> {
                let raw = raw.into();
                path::validate_segment(&raw)?;
                Ok(Self(raw))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = PathError;

            fn try_from(raw: String) -> Result<Self, Self::Error> {
                Self::new(raw)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

segment_id!(
    /// Identity of an authenticated user, as issued by the identity provider.
    UserId
);

segment_id!(
    /// Key of a single stroke inside its owner's namespace.
    StrokeId
);

/// One continuous pointer-down → pointer-up gesture.
///
/// Immutable once committed. Only the owner ever writes it.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Stroke {
    #[serde(rename = "userId")]
    pub owner_id: UserId,
    #[serde(rename = "userEmail", default, skip_serializing_if = "Option::is_none")]
    pub owner_email: Option<String>,
    pub points: Vec<Point>,
    /// Epoch milliseconds at pointer-down.
    #[serde(rename = "timestamp")]
    pub created_at: i64,
}

impl Stroke {
    /// Start a stroke at `origin`.
    pub fn begin(owner_id: UserId, owner_email: Option<String>, origin: Point, created_at: i64) -> Self {
        Self {
            owner_id,
            owner_email,
            points: vec![origin],
            created_at,
        }
    }

    pub fn last_point(&self) -> Option<&Point> {
        self.points.last()
    }

    /// Zero-point strokes are never committed nor rendered.
    pub fn is_renderable(&self) -> bool {
        !self.points.is_empty()
    }
}

/// Record that a user is currently connected.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct PresenceEntry {
    /// Path key; not part of the stored value.
    #[serde(skip)]
    pub user_id: Option<UserId>,
    #[serde(rename = "email", default)]
    pub display_identity: String,
    #[serde(rename = "avatarSeed", default)]
    pub avatar_seed: String,
    #[serde(rename = "timestamp", default)]
    pub since: i64,
}

impl PresenceEntry {
    /// Key used for the cosmetic avatar lookup.
    ///
    /// Falls back to the display identity and then the user id for records
    /// written by clients that predate per-session seeds.
    pub fn avatar_key(&self) -> &str {
        if !self.avatar_seed.is_empty() {
            &self.avatar_seed
        } else if !self.display_identity.is_empty() {
            &self.display_identity
        } else {
            self.user_id.as_ref().map_or("", UserId::as_str)
        }
    }
}

/// Last published pointer position of a connected user.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct CursorEntry {
    #[serde(skip)]
    pub user_id: Option<UserId>,
    pub x: f64,
    pub y: f64,
    #[serde(rename = "email", default)]
    pub display_identity: String,
    /// Epoch milliseconds of the publish. Records without it are malformed.
    #[serde(rename = "timestamp")]
    pub updated_at: i64,
}

impl CursorEntry {
    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }

    /// Age-based staleness: strictly older than `stale_after_ms`.
    pub fn is_stale(&self, now_ms: i64, stale_after_ms: i64) -> bool {
        now_ms.saturating_sub(self.updated_at) > stale_after_ms
    }
}

/// All committed strokes, grouped by owner.
///
/// Ordered maps make iteration deterministic; the order carries no meaning.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StrokeSet {
    users: BTreeMap<UserId, BTreeMap<StrokeId, Stroke>>,
}

impl StrokeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a stroke under its owner's namespace.
    ///
    /// Zero-point strokes are refused. Returns `false` when refused.
    pub fn insert(&mut self, stroke_id: StrokeId, stroke: Stroke) -> bool {
        if !stroke.is_renderable() {
            return false;
        }
        self.users
            .entry(stroke.owner_id.clone())
            .or_default()
            .insert(stroke_id, stroke);
        true
    }

    pub fn get(&self, owner: &UserId, stroke_id: &StrokeId) -> Option<&Stroke> {
        self.users.get(owner).and_then(|strokes| strokes.get(stroke_id))
    }

    pub fn contains(&self, owner: &UserId, stroke_id: &StrokeId) -> bool {
        self.get(owner, stroke_id).is_some()
    }

    /// Strokes owned by one user.
    pub fn strokes_of(&self, owner: &UserId) -> impl Iterator<Item = (&StrokeId, &Stroke)> {
        self.users.get(owner).into_iter().flat_map(|strokes| strokes.iter())
    }

    pub fn users(&self) -> impl Iterator<Item = &UserId> {
        self.users.keys()
    }

    /// Every stroke of every user, owners in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&UserId, &StrokeId, &Stroke)> {
        self.users
            .iter()
            .flat_map(|(owner, strokes)| strokes.iter().map(move |(id, s)| (owner, id, s)))
    }

    pub fn len(&self) -> usize {
        self.users.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_points(&self) -> usize {
        self.iter().map(|(_, _, s)| s.points.len()).sum()
    }
}
