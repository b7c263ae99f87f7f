//! Live cursors: throttled local publish, remote overlay with staleness.
//!
//! ## Local publish
//!
//! ```text
//! move ──► CursorThrottle::offer ──► window open?  ── yes ──► write cursors/{uid}
//!                                       │ no
//!                                       ▼
//!                               hold as pending ──(window elapses)──► flush
//! ```
//!
//! A held sample is always replaced by a newer one, so the publish that
//! ends a burst carries the final position.
//!
//! ## Remote overlay
//!
//! Every `cursors` snapshot replaces the remote set. Entries older than the
//! staleness window are hidden at render time and evicted by the periodic
//! sweep. Eviction is local only; the remote record is never deleted here.

use std::collections::BTreeMap;

use scribble_core::snapshot::parse_cursors;
use scribble_core::{CursorEntry, Point, StorePath, UserId};
use serde_json::Value;

use crate::config::SyncConfig;
use crate::store::{StoreClient, StoreError};

// ───────────────────────────────────────────────────────────────────
// Throttle
// ───────────────────────────────────────────────────────────────────

/// Trailing-edge throttle over wall-clock milliseconds.
#[derive(Debug, Clone)]
pub struct CursorThrottle {
    window_ms: i64,
    last_publish: Option<i64>,
    pending: Option<Point>,
}

impl CursorThrottle {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms: i64::try_from(window_ms).unwrap_or(i64::MAX),
            last_publish: None,
            pending: None,
        }
    }

    /// Offer a sample. Returns it if it may be published now; otherwise it
    /// is held until [`flush_due`](Self::flush_due).
    pub fn offer(&mut self, p: Point, now_ms: i64) -> Option<Point> {
        if self.window_open(now_ms) {
            self.last_publish = Some(now_ms);
            self.pending = None;
            Some(p)
        } else {
            self.pending = Some(p);
            None
        }
    }

    /// The held sample, once its window has elapsed.
    pub fn flush_due(&mut self, now_ms: i64) -> Option<Point> {
        if self.pending.is_none() || !self.window_open(now_ms) {
            return None;
        }
        self.last_publish = Some(now_ms);
        self.pending.take()
    }

    /// When the held sample becomes publishable.
    pub fn next_deadline(&self) -> Option<i64> {
        self.pending?;
        Some(self.last_publish.map_or(i64::MIN, |t| t.saturating_add(self.window_ms)))
    }

    pub fn pending(&self) -> Option<Point> {
        self.pending
    }

    fn window_open(&self, now_ms: i64) -> bool {
        self.last_publish.map_or(true, |t| now_ms.saturating_sub(t) >= self.window_ms)
    }
}

// ───────────────────────────────────────────────────────────────────
// Marker color
// ───────────────────────────────────────────────────────────────────

/// RGBA color of a remote cursor marker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CursorColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl CursorColor {
    /// Stable color for a user: the hue comes from an FNV-1a hash of the id.
    pub fn for_user(user: &UserId) -> Self {
        let hash = user
            .as_str()
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325u64, |h, b| (h ^ b as u64).wrapping_mul(0x0100_0000_01b3));
        let hue = (hash % 360) as f32 / 360.0;
        let (r, g, b) = hsl_to_rgb(hue, 0.7, 0.6);
        Self { r, g, b, a: 1.0 }
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s == 0.0 {
        return (l, l, l);
    }
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    (
        hue_to_rgb(p, q, h + 1.0 / 3.0),
        hue_to_rgb(p, q, h),
        hue_to_rgb(p, q, h - 1.0 / 3.0),
    )
}

fn hue_to_rgb(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        p + (q - p) * 6.0 * t
    } else if t < 1.0 / 2.0 {
        q
    } else if t < 2.0 / 3.0 {
        p + (q - p) * (2.0 / 3.0 - t) * 6.0
    } else {
        p
    }
}

// ───────────────────────────────────────────────────────────────────
// Broadcaster
// ───────────────────────────────────────────────────────────────────

/// One remote cursor to draw over the canvas.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorMarker {
    pub user_id: UserId,
    pub position: Point,
    pub label: String,
    pub color: CursorColor,
}

pub struct CursorBroadcaster {
    user: UserId,
    display_identity: String,
    throttle: CursorThrottle,
    stale_after_ms: i64,
    remote: BTreeMap<UserId, CursorEntry>,
    published: u64,
    failed: u64,
    failing: bool,
}

impl CursorBroadcaster {
    pub fn new(user: UserId, display_identity: impl Into<String>, config: &SyncConfig) -> Self {
        Self {
            user,
            display_identity: display_identity.into(),
            throttle: CursorThrottle::new(config.cursor_throttle_ms),
            stale_after_ms: config.cursor_stale_after_ms,
            remote: BTreeMap::new(),
            published: 0,
            failed: 0,
            failing: false,
        }
    }

    /// Local pointer moved. Returns whether a publish went out.
    pub fn on_local_move(&mut self, store: &dyn StoreClient, p: Point, now_ms: i64) -> bool {
        match self.throttle.offer(p, now_ms) {
            Some(p) => self.publish(store, p, now_ms),
            None => false,
        }
    }

    /// Publish the held sample if its window has elapsed.
    pub fn flush(&mut self, store: &dyn StoreClient, now_ms: i64) -> bool {
        match self.throttle.flush_due(now_ms) {
            Some(p) => self.publish(store, p, now_ms),
            None => false,
        }
    }

    pub fn next_flush_deadline(&self) -> Option<i64> {
        self.throttle.next_deadline()
    }

    fn publish(&mut self, store: &dyn StoreClient, p: Point, now_ms: i64) -> bool {
        let entry = CursorEntry {
            user_id: None,
            x: p.x,
            y: p.y,
            display_identity: self.display_identity.clone(),
            updated_at: now_ms,
        };
        let result = serde_json::to_value(&entry)
            .map_err(StoreError::from)
            .and_then(|value| store.write(&StorePath::cursor(&self.user), value));
        match result {
            Ok(()) => {
                log::trace!("Cursor {} → ({:.1}, {:.1})", self.user, p.x, p.y);
                self.published += 1;
                self.failing = false;
                true
            }
            Err(e) => {
                // One warning per outage, not one per pointer move.
                if !self.failing {
                    log::warn!("Dropping cursor update for {}: {e}", self.user);
                } else {
                    log::trace!("Dropping cursor update for {}: {e}", self.user);
                }
                self.failed += 1;
                self.failing = true;
                false
            }
        }
    }

    /// Replace the remote set with a fresh `cursors` snapshot.
    pub fn on_remote(&mut self, value: &Value) {
        let mut cursors = parse_cursors(value);
        cursors.remove(&self.user);
        self.remote = cursors;
    }

    /// Drop stale entries. Returns who was evicted.
    pub fn sweep(&mut self, now_ms: i64) -> Vec<UserId> {
        let stale_after = self.stale_after_ms;
        let evicted: Vec<UserId> = self
            .remote
            .iter()
            .filter(|(_, c)| c.is_stale(now_ms, stale_after))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &evicted {
            self.remote.remove(id);
            log::debug!("Evicted stale cursor of {id}");
        }
        evicted
    }

    /// Markers for every fresh remote cursor.
    pub fn overlay(&self, now_ms: i64) -> Vec<CursorMarker> {
        self.remote
            .iter()
            .filter(|(_, c)| !c.is_stale(now_ms, self.stale_after_ms))
            .map(|(id, c)| CursorMarker {
                user_id: id.clone(),
                position: c.position(),
                label: c.display_identity.clone(),
                color: CursorColor::for_user(id),
            })
            .collect()
    }

    pub fn remote(&self) -> &BTreeMap<UserId, CursorEntry> {
        &self.remote
    }

    pub fn published_count(&self) -> u64 {
        self.published
    }

    pub fn failed_count(&self) -> u64 {
        self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn pt(x: f64) -> Point {
        Point::new(x, x / 2.0)
    }

    fn uid(s: &str) -> UserId {
        UserId::new(s).unwrap()
    }

    // ── Throttle ─────────────────────────────────────────────────

    #[test]
    fn test_first_sample_publishes() {
        let mut t = CursorThrottle::new(33);
        assert_eq!(t.offer(pt(1.0), 1_000), Some(pt(1.0)));
        assert_eq!(t.next_deadline(), None);
    }

    #[test]
    fn test_sample_inside_window_is_held_then_flushed() {
        let mut t = CursorThrottle::new(33);
        t.offer(pt(0.0), 0);
        assert_eq!(t.offer(pt(10.0), 10), None);
        assert_eq!(t.offer(pt(20.0), 20), None);
        assert_eq!(t.next_deadline(), Some(33));
        assert_eq!(t.flush_due(32), None);
        assert_eq!(t.flush_due(33), Some(pt(20.0)));
        assert_eq!(t.pending(), None);
        assert_eq!(t.flush_due(100), None);
    }

    #[test]
    fn test_burst_publishes_at_most_four_in_100ms() {
        let mut t = CursorThrottle::new(33);
        let mut published = Vec::new();
        for now in 0..100 {
            if let Some(p) = t.offer(pt(now as f64), now) {
                published.push((now, p));
            }
            if let Some(p) = t.flush_due(now) {
                published.push((now, p));
            }
        }
        assert!(published.len() <= 4, "published {published:?}");
        let (_, last) = published.last().unwrap();
        assert_eq!(*last, pt(99.0));
    }

    // ── Color ────────────────────────────────────────────────────

    #[test]
    fn test_color_is_stable_per_user() {
        assert_eq!(CursorColor::for_user(&uid("alice")), CursorColor::for_user(&uid("alice")));
        let c = CursorColor::for_user(&uid("bob")).to_array();
        assert!(c.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_hsl_achromatic() {
        assert_eq!(hsl_to_rgb(0.3, 0.0, 0.4), (0.4, 0.4, 0.4));
    }

    // ── Broadcaster ──────────────────────────────────────────────

    #[test]
    fn test_publish_writes_cursor_record() {
        let store = MemoryStore::new();
        let conn = store.connect();
        let mut b = CursorBroadcaster::new(uid("alice"), "a@example.com", &SyncConfig::default());

        assert!(b.on_local_move(&conn, Point::new(12.0, 34.0), 5_000));
        assert!(!b.on_local_move(&conn, Point::new(13.0, 35.0), 5_010));
        let record = store.get(&StorePath::cursor(&uid("alice")));
        assert_eq!(record, json!({"x": 12.0, "y": 34.0, "email": "a@example.com", "timestamp": 5_000}));

        assert!(b.flush(&conn, 5_033));
        assert_eq!(store.get(&StorePath::cursor(&uid("alice")))["x"], 13.0);
        assert_eq!(b.published_count(), 2);
    }

    #[test]
    fn test_publish_failure_is_counted() {
        let store = MemoryStore::new();
        let conn = store.connect();
        conn.disconnect();
        let mut b = CursorBroadcaster::new(uid("alice"), "a", &SyncConfig::default());
        assert!(!b.on_local_move(&conn, pt(1.0), 0));
        assert!(!b.on_local_move(&conn, pt(1.0), 100));
        assert_eq!(b.failed_count(), 2);
    }

    #[test]
    fn test_remote_excludes_self() {
        let mut b = CursorBroadcaster::new(uid("alice"), "a", &SyncConfig::default());
        b.on_remote(&json!({
            "alice": {"x": 1.0, "y": 1.0, "email": "a", "timestamp": 100},
            "bob": {"x": 2.0, "y": 3.0, "email": "b", "timestamp": 100},
        }));
        let overlay = b.overlay(100);
        assert_eq!(overlay.len(), 1);
        assert_eq!(overlay[0].user_id, uid("bob"));
        assert_eq!(overlay[0].position, Point::new(2.0, 3.0));
        assert_eq!(overlay[0].label, "b");
    }

    #[test]
    fn test_staleness_boundary() {
        let mut b = CursorBroadcaster::new(uid("me"), "me", &SyncConfig::default());
        b.on_remote(&json!({
            "fresh": {"x": 0.0, "y": 0.0, "email": "f", "timestamp": 10_000 - 4_999},
            "edge": {"x": 0.0, "y": 0.0, "email": "e", "timestamp": 10_000 - 5_000},
            "stale": {"x": 0.0, "y": 0.0, "email": "s", "timestamp": 10_000 - 5_001},
        }));

        let shown: Vec<String> = b.overlay(10_000).into_iter().map(|m| m.label).collect();
        assert_eq!(shown, vec!["e", "f"]);

        assert_eq!(b.sweep(10_000), vec![uid("stale")]);
        assert_eq!(b.remote().len(), 2);
    }

    #[test]
    fn test_extreme_timestamp_is_stale() {
        let mut b = CursorBroadcaster::new(uid("me"), "me", &SyncConfig::default());
        b.on_remote(&json!({
            "bob": {"x": 1.0, "y": 1.0, "email": "b", "timestamp": i64::MIN},
            "carol": {"x": 2.0, "y": 2.0, "email": "c", "timestamp": 9_000},
        }));

        let shown: Vec<String> = b.overlay(10_000).into_iter().map(|m| m.label).collect();
        assert_eq!(shown, vec!["c"]);
        assert_eq!(b.sweep(10_000), vec![uid("bob")]);
        assert_eq!(b.remote().len(), 1);
    }

    #[test]
    fn test_throttle_window_beyond_i64() {
        let mut throttle = CursorThrottle::new(u64::MAX);
        assert!(throttle.offer(Point::new(1.0, 1.0), 0).is_some());
        assert!(throttle.offer(Point::new(2.0, 2.0), 1_000_000).is_none());
        assert_eq!(throttle.next_deadline(), Some(i64::MAX));
        assert!(throttle.flush_due(1_000_000).is_none());
    }

    #[test]
    fn test_snapshot_replaces_remote_set() {
        let mut b = CursorBroadcaster::new(uid("me"), "me", &SyncConfig::default());
        b.on_remote(&json!({"bob": {"x": 0.0, "y": 0.0, "email": "b", "timestamp": 1}}));
        b.on_remote(&Value::Null);
        assert!(b.remote().is_empty());
    }
}
