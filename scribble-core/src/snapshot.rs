//! Typed views over full-value snapshots.
//!
//! Every subscription delivers the complete JSON value at its path. These
//! parsers turn that value into typed records, skipping any entry that does
//! not match the schema so one bad record never hides the others.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::{CursorEntry, PresenceEntry, Stroke, StrokeId, StrokeSet, UserId};

/// Parse the value at `strokes`.
pub fn parse_stroke_set(value: &Value) -> StrokeSet {
    let mut set = StrokeSet::new();
    let Some(users) = value.as_object() else {
        if !value.is_null() {
            log::debug!("Ignoring non-object stroke snapshot");
        }
        return set;
    };

    for (user_key, strokes) in users {
        let Ok(owner) = UserId::new(user_key.as_str()) else {
            log::debug!("Skipping stroke namespace with invalid key {user_key:?}");
            continue;
        };
        let Some(strokes) = strokes.as_object() else {
            log::debug!("Skipping non-object stroke namespace {owner}");
            continue;
        };
        for (stroke_key, raw) in strokes {
            let Ok(stroke_id) = StrokeId::new(stroke_key.as_str()) else {
                continue;
            };
            match serde_json::from_value::<Stroke>(raw.clone()) {
                // A stroke filed under someone else's namespace is not trusted.
                Ok(stroke) if stroke.owner_id != owner => {
                    log::debug!("Skipping stroke {stroke_id}: owner {} filed under {owner}", stroke.owner_id);
                }
                Ok(stroke) => {
                    if !set.insert(stroke_id.clone(), stroke) {
                        log::debug!("Skipping empty stroke {owner}/{stroke_id}");
                    }
                }
                Err(e) => {
                    log::debug!("Skipping malformed stroke {owner}/{stroke_id}: {e}");
                }
            }
        }
    }
    set
}

/// Parse the value at `cursors`.
pub fn parse_cursors(value: &Value) -> BTreeMap<UserId, CursorEntry> {
    parse_keyed(value, "cursor", |entry: &mut CursorEntry, user| {
        entry.user_id = Some(user);
    })
}

/// Parse the value at `onlineUsers`.
pub fn parse_presence(value: &Value) -> BTreeMap<UserId, PresenceEntry> {
    parse_keyed(value, "presence", |entry: &mut PresenceEntry, user| {
        entry.user_id = Some(user);
    })
}

fn parse_keyed<T, F>(value: &Value, kind: &str, mut attach: F) -> BTreeMap<UserId, T>
where
    T: DeserializeOwned,
    F: FnMut(&mut T, UserId),
{
    let mut out = BTreeMap::new();
    let Some(entries) = value.as_object() else {
        return out;
    };

    for (key, raw) in entries {
        let Ok(user) = UserId::new(key.as_str()) else {
            log::debug!("Skipping {kind} record with invalid key {key:?}");
            continue;
        };
        match serde_json::from_value::<T>(raw.clone()) {
            Ok(mut entry) => {
                attach(&mut entry, user.clone());
                out.insert(user, entry);
            }
            Err(e) => log::debug!("Skipping malformed {kind} record {user}: {e}"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_stroke_set() {
        let value = json!({
            "alice": {
                "s1": { "userId": "alice", "points": [{"x": 1.0, "y": 2.0}, {"x": 5.0, "y": 2.0}], "timestamp": 10 },
            },
            "bob": {
                "s2": { "userId": "bob", "userEmail": "b@example.com", "points": [{"x": 0.0, "y": 0.0}], "timestamp": 11 },
            }
        });
        let set = parse_stroke_set(&value);
        assert_eq!(set.len(), 2);
        assert_eq!(set.total_points(), 3);
    }

    #[test]
    fn test_parse_null_is_empty() {
        assert!(parse_stroke_set(&Value::Null).is_empty());
        assert!(parse_cursors(&Value::Null).is_empty());
        assert!(parse_presence(&Value::Null).is_empty());
    }

    #[test]
    fn test_malformed_stroke_does_not_hide_others() {
        let value = json!({
            "alice": {
                "bad": { "userId": "alice", "points": "nope", "timestamp": 1 },
                "empty": { "userId": "alice", "points": [], "timestamp": 1 },
                "good": { "userId": "alice", "points": [{"x": 1.0, "y": 1.0}], "timestamp": 1 },
            },
            "bob": 17,
        });
        let set = parse_stroke_set(&value);
        assert_eq!(set.len(), 1);
        let alice = UserId::new("alice").unwrap();
        assert!(set.contains(&alice, &StrokeId::new("good").unwrap()));
    }

    #[test]
    fn test_foreign_owner_is_skipped() {
        let value = json!({
            "bob": {
                "s1": { "userId": "alice", "points": [{"x": 1.0, "y": 1.0}], "timestamp": 1 },
            }
        });
        assert!(parse_stroke_set(&value).is_empty());
    }

    #[test]
    fn test_cursor_without_timestamp_is_skipped() {
        let value = json!({
            "alice": { "x": 1.0, "y": 2.0, "email": "a@example.com", "timestamp": 100 },
            "bob": { "x": 3.0, "y": 4.0, "email": "b@example.com" },
        });
        let cursors = parse_cursors(&value);
        assert_eq!(cursors.len(), 1);
        let alice = UserId::new("alice").unwrap();
        let entry = &cursors[&alice];
        assert_eq!(entry.user_id.as_ref(), Some(&alice));
        assert_eq!(entry.updated_at, 100);
        assert_eq!(entry.display_identity, "a@example.com");
    }

    #[test]
    fn test_parse_presence_attaches_key() {
        let value = json!({
            "u1": { "email": "a@example.com", "avatarSeed": "a-1-2", "timestamp": 5 },
            "u2": { "email": null },
        });
        let presence = parse_presence(&value);
        // `email: null` is not a string.
        assert_eq!(presence.len(), 1);
        let u1 = UserId::new("u1").unwrap();
        assert_eq!(presence[&u1].avatar_seed, "a-1-2");
        assert_eq!(presence[&u1].user_id.as_ref(), Some(&u1));
    }
}
