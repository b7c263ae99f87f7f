//! Online status and cleanup of everything a user leaves behind.
//!
//! Two mechanisms remove a user's records, and either may run first:
//!
//! | Trigger | Removes |
//! |---------|---------|
//! | connection drops (store-side hook) | `onlineUsers/{uid}`, `cursors/{uid}` (+ `strokes/{uid}` if configured) |
//! | logout, teardown, session drop | `strokes/{uid}`, `onlineUsers/{uid}`, `cursors/{uid}` |
//!
//! Both are plain removes, so running them in any order, or twice, ends in
//! the same state.

use std::collections::BTreeMap;

use scribble_core::snapshot::parse_presence;
use scribble_core::{PresenceEntry, StorePath, UserId};
use serde_json::Value;
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::identity::Identity;
use crate::store::{StoreClient, StoreError};

pub struct PresenceManager {
    user: UserId,
    display_identity: String,
    clear_strokes_on_disconnect: bool,
    entry: Option<PresenceEntry>,
    departed: bool,
}

impl PresenceManager {
    pub fn new(identity: &Identity, config: &SyncConfig) -> Self {
        Self {
            user: identity.user_id.clone(),
            display_identity: identity.display_identity(),
            clear_strokes_on_disconnect: config.clear_strokes_on_disconnect,
            entry: None,
            departed: false,
        }
    }

    /// Announce the user and register the store-side cleanup.
    ///
    /// The hooks are registered before the entry is written, so a drop in
    /// between never strands a presence record.
    pub fn connect(&mut self, store: &dyn StoreClient, now_ms: i64) -> Result<&PresenceEntry, StoreError> {
        store.on_disconnect_remove(&StorePath::online_user(&self.user))?;
        store.on_disconnect_remove(&StorePath::cursor(&self.user))?;
        if self.clear_strokes_on_disconnect {
            store.on_disconnect_remove(&StorePath::user_strokes(&self.user))?;
        }

        let entry = PresenceEntry {
            user_id: None,
            display_identity: self.display_identity.clone(),
            avatar_seed: avatar_seed(&self.display_identity, now_ms),
            since: now_ms,
        };
        store.write(&StorePath::online_user(&self.user), serde_json::to_value(&entry)?)?;
        log::info!("{} is online", self.user);

        self.departed = false;
        Ok(self.entry.insert(entry))
    }

    /// Remove the user's strokes, presence and cursor. Runs at most once
    /// per connect; returns whether it ran.
    ///
    /// Every remove is attempted even if an earlier one fails.
    pub fn depart(&mut self, store: &dyn StoreClient) -> bool {
        if self.departed {
            return false;
        }
        self.departed = true;

        let paths = [
            StorePath::user_strokes(&self.user),
            StorePath::online_user(&self.user),
            StorePath::cursor(&self.user),
        ];
        for path in &paths {
            if let Err(e) = store.remove(path) {
                log::warn!("Cleanup of {path} failed: {e}");
            }
        }
        log::info!("{} left, records removed", self.user);
        true
    }

    pub fn is_departed(&self) -> bool {
        self.departed
    }

    /// The entry written by the last `connect`.
    pub fn entry(&self) -> Option<&PresenceEntry> {
        self.entry.as_ref()
    }
}

/// Fresh per-session seed: `{identity}-{millis}-{random}`.
fn avatar_seed(display_identity: &str, now_ms: i64) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("{display_identity}-{now_ms}-{}", &random[..9])
}

/// Who is online, from `onlineUsers` snapshots.
#[derive(Debug, Default)]
pub struct PresenceRoster {
    entries: BTreeMap<UserId, PresenceEntry>,
}

impl PresenceRoster {
    pub fn on_snapshot(&mut self, value: &Value) {
        self.entries = parse_presence(value);
    }

    pub fn online(&self) -> impl Iterator<Item = &PresenceEntry> {
        self.entries.values()
    }

    pub fn contains(&self, user: &UserId) -> bool {
        self.entries.contains_key(user)
    }

    pub fn get(&self, user: &UserId) -> Option<&PresenceEntry> {
        self.entries.get(user)
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }
}
