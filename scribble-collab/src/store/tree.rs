//! JSON tree shared by the in-memory store and the WebSocket server.
//!
//! The tree never holds `null` members or empty objects: writing either is
//! a remove, and parents emptied by a remove are pruned.

use scribble_core::StorePath;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default)]
pub struct StoreTree {
    root: Value,
}

impl StoreTree {
    pub fn new() -> Self {
        Self { root: Value::Null }
    }

    /// Value at `path`, `null` if absent.
    pub fn get(&self, path: &StorePath) -> Value {
        let mut node = &self.root;
        for segment in path.segments() {
            match node.get(segment) {
                Some(child) => node = child,
                None => return Value::Null,
            }
        }
        node.clone()
    }

    /// Set `path` to `value`. Returns whether the tree changed.
    pub fn set(&mut self, path: &StorePath, value: Value) -> bool {
        let value = normalize(value);
        if value.is_null() {
            return self.remove(path);
        }
        if self.get(path) == value {
            return false;
        }

        let Some((last, parents)) = path.segments().split_last() else {
            self.root = value;
            return true;
        };

        let mut node = &mut self.root;
        for segment in parents {
            node = child_object(node).entry(segment.clone()).or_insert(Value::Null);
        }
        child_object(node).insert(last.clone(), value);
        true
    }

    /// Remove `path` and its descendants. Returns whether anything was removed.
    pub fn remove(&mut self, path: &StorePath) -> bool {
        let Some((last, parents)) = path.segments().split_last() else {
            let had = !self.root.is_null();
            self.root = Value::Null;
            return had;
        };
        let removed = remove_at(&mut self.root, parents, last);
        if self.root.as_object().is_some_and(Map::is_empty) {
            self.root = Value::Null;
        }
        removed
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_null()
    }
}

/// Turn `node` into an object if it is not one, and borrow its map.
fn child_object(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just made an object"),
    }
}

fn remove_at(node: &mut Value, parents: &[String], last: &str) -> bool {
    let Some(map) = node.as_object_mut() else {
        return false;
    };
    match parents.split_first() {
        None => map.remove(last).is_some(),
        Some((head, rest)) => {
            let Some(child) = map.get_mut(head) else {
                return false;
            };
            let removed = remove_at(child, rest, last);
            if child.as_object().is_some_and(Map::is_empty) {
                map.remove(head);
            }
            removed
        }
    }
}

/// Strip `null` members and empty objects.
fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, normalize(v)))
                .filter(|(_, v)| !v.is_null())
                .collect();
            if cleaned.is_empty() {
                Value::Null
            } else {
                Value::Object(cleaned)
            }
        }
        Value::Array(items) => Value::Array(items.into_iter().map(normalize).collect()),
        other => other,
    }
}
