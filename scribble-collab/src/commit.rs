//! Publishes finished strokes under their owner's namespace.

use scribble_core::{PathError, StorePath, Stroke, StrokeId, UserId};

use crate::store::{StoreClient, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error("refusing to commit a stroke with no points")]
    EmptyStroke,
    #[error("stroke owned by {owner} cannot be committed by {committer}")]
    ForeignOwner { owner: UserId, committer: UserId },
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct StrokeCommitter {
    user: UserId,
}

impl StrokeCommitter {
    pub fn new(user: UserId) -> Self {
        Self { user }
    }

    /// Write `stroke` at `strokes/{user}/{fresh key}` in one operation.
    ///
    /// Returns as soon as the write is handed to the store; delivery is not
    /// awaited.
    pub fn commit(&self, store: &dyn StoreClient, stroke: &Stroke) -> Result<StrokeId, CommitError> {
        if stroke.points.is_empty() {
            return Err(CommitError::EmptyStroke);
        }
        if stroke.owner_id != self.user {
            return Err(CommitError::ForeignOwner {
                owner: stroke.owner_id.clone(),
                committer: self.user.clone(),
            });
        }

        let path = store.push_unique(&StorePath::user_strokes(&self.user))?;
        let key = path.last().ok_or(StoreError::InvalidPath(PathError::EmptySegment))?;
        let stroke_id = StrokeId::new(key).map_err(StoreError::from)?;

        store.write(&path, serde_json::to_value(stroke).map_err(StoreError::from)?)?;
        log::debug!("Committed stroke {stroke_id} with {} point(s)", stroke.points.len());
        Ok(stroke_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use scribble_core::Point;
    use serde_json::Value;

    fn alice() -> UserId {
        UserId::new("alice").unwrap()
    }

    fn stroke(owner: UserId) -> Stroke {
        let mut s = Stroke::begin(owner, None, Point::new(0.0, 0.0), 7);
        s.points.push(Point::new(4.0, 0.0));
        s
    }

    #[test]
    fn test_commit_writes_under_owner() {
        let store = MemoryStore::new();
        let conn = store.connect();
        let committer = StrokeCommitter::new(alice());

        let id = committer.commit(&conn, &stroke(alice())).unwrap();
        let written = store.get(&StorePath::stroke(&alice(), &id));
        assert_eq!(written["userId"], "alice");
        assert_eq!(written["timestamp"], 7);
        assert_eq!(written["points"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_each_commit_gets_a_fresh_key() {
        let store = MemoryStore::new();
        let conn = store.connect();
        let committer = StrokeCommitter::new(alice());
        let a = committer.commit(&conn, &stroke(alice())).unwrap();
        let b = committer.commit(&conn, &stroke(alice())).unwrap();
        assert_ne!(a, b);
        assert_eq!(store.get(&StorePath::user_strokes(&alice())).as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_foreign_owner_rejected() {
        let store = MemoryStore::new();
        let conn = store.connect();
        let committer = StrokeCommitter::new(alice());
        let bob = UserId::new("bob").unwrap();

        let err = committer.commit(&conn, &stroke(bob)).unwrap_err();
        assert!(matches!(err, CommitError::ForeignOwner { .. }));
        assert_eq!(store.get(&StorePath::strokes()), Value::Null);
    }

    #[test]
    fn test_empty_stroke_rejected() {
        let store = MemoryStore::new();
        let conn = store.connect();
        let mut empty = stroke(alice());
        empty.points.clear();
        let err = StrokeCommitter::new(alice()).commit(&conn, &empty).unwrap_err();
        assert!(matches!(err, CommitError::EmptyStroke));
    }

    #[test]
    fn test_unavailable_store() {
        let store = MemoryStore::new();
        let conn = store.connect();
        conn.disconnect();
        let err = StrokeCommitter::new(alice()).commit(&conn, &stroke(alice())).unwrap_err();
        assert!(matches!(err, CommitError::Store(StoreError::Unavailable)));
    }
}
