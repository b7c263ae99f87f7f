//! One user's live connection to the shared canvas.
//!
//! ```text
//!                 ┌──────────────── SessionDriver (one task) ────────────────┐
//!  pointer ──────►│                                                          │
//!  resize  ──────►│  mpsc<SessionEvent> ─┐                                   │
//!  shutdown ─────►│                      ├──► Session::handle ──► components │
//!  strokes sub ──►│  watch snapshots ────┤                                   │
//!  cursors sub ──►│                      │                                   │
//!  presence sub ─►│  ticks: staleness, frame, cursor flush ─┘                │
//!                 └──────────────────────────────────────────────────────────┘
//! ```
//!
//! All state lives in [`Session`] and is touched only from the driver task.
//! Store writes are handed off without waiting.

use std::sync::Arc;
use std::time::Duration;

use scribble_core::snapshot::parse_stroke_set;
use scribble_core::{Point, StorePath, Stroke, StrokeSet};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::capture::{CaptureState, StrokeCapture};
use crate::clock::Clock;
use crate::commit::StrokeCommitter;
use crate::config::{ConfigError, SyncConfig};
use crate::cursor::{CursorBroadcaster, CursorMarker};
use crate::identity::{Identity, IdentityProvider};
use crate::presence::{PresenceManager, PresenceRoster};
use crate::reconciler::{LocalLayer, RenderReconciler};
use crate::store::{StoreClient, StoreError, Subscription};
use crate::surface::DrawSurface;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    Down(Point),
    Move(Point),
    /// Button released anywhere, inside the canvas or not.
    Up,
    Leave,
    Enter { position: Point, pressed: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StrokeSetUpdated(Value),
    CursorSetUpdated(Value),
    PresenceSetUpdated(Value),
    LocalPointer(PointerEvent),
    StalenessTick,
    Resize { width: u32, height: u32 },
    Frame,
    Shutdown,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no authenticated user")]
    NotAuthenticated,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub strokes_committed: u64,
    pub commits_failed: u64,
    pub cursor_publishes: u64,
    pub cursor_failures: u64,
    pub repaints: u64,
    pub cursors_evicted: u64,
}

/// The three shared subtrees a session observes.
///
/// Dropping these unsubscribes and nothing else.
pub struct SessionSubscriptions {
    pub strokes: Subscription,
    pub cursors: Subscription,
    pub presence: Subscription,
}

impl SessionSubscriptions {
    /// Current snapshots, as events.
    pub fn initial_events(&mut self) -> [SessionEvent; 3] {
        [
            SessionEvent::StrokeSetUpdated(self.strokes.current()),
            SessionEvent::CursorSetUpdated(self.cursors.current()),
            SessionEvent::PresenceSetUpdated(self.presence.current()),
        ]
    }
}

pub struct Session<S: DrawSurface> {
    identity: Identity,
    store: Arc<dyn StoreClient>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    surface: S,
    capture: StrokeCapture,
    committer: StrokeCommitter,
    reconciler: RenderReconciler,
    cursors: CursorBroadcaster,
    presence: PresenceManager,
    roster: PresenceRoster,
    strokes_committed: u64,
    commits_failed: u64,
    cursors_evicted: u64,
    ended: bool,
}

impl<S: DrawSurface> Session<S> {
    /// Go online as `identity`: write presence and register cleanup.
    pub fn start(
        identity: Identity,
        store: Arc<dyn StoreClient>,
        clock: Arc<dyn Clock>,
        surface: S,
        config: SyncConfig,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let mut presence = PresenceManager::new(&identity, &config);
        presence.connect(store.as_ref(), clock.now_ms())?;

        let user = identity.user_id.clone();
        log::info!("Session started for {user}");
        Ok(Self {
            capture: StrokeCapture::new(user.clone(), identity.email.clone(), config.min_sample_distance),
            committer: StrokeCommitter::new(user.clone()),
            reconciler: RenderReconciler::new(user.clone()),
            cursors: CursorBroadcaster::new(user, identity.display_identity(), &config),
            presence,
            roster: PresenceRoster::default(),
            identity,
            store,
            clock,
            config,
            surface,
            strokes_committed: 0,
            commits_failed: 0,
            cursors_evicted: 0,
            ended: false,
        })
    }

    /// [`start`](Self::start) as whoever `provider` says is signed in.
    pub fn start_signed_in(
        provider: &dyn IdentityProvider,
        store: Arc<dyn StoreClient>,
        clock: Arc<dyn Clock>,
        surface: S,
        config: SyncConfig,
    ) -> Result<Self, SessionError> {
        let identity = provider.current().ok_or(SessionError::NotAuthenticated)?;
        Self::start(identity, store, clock, surface, config)
    }

    pub fn subscribe(&self) -> Result<SessionSubscriptions, SessionError> {
        Ok(SessionSubscriptions {
            strokes: self.store.subscribe(&StorePath::strokes())?,
            cursors: self.store.subscribe(&StorePath::cursors())?,
            presence: self.store.subscribe(&StorePath::online_users())?,
        })
    }

    /// Fresh subscriptions for a session that stays online. The caller drops
    /// the old ones; no cleanup runs.
    pub fn resubscribe(&self) -> Result<SessionSubscriptions, SessionError> {
        log::info!("Resubscribing session for {}", self.identity.user_id);
        self.subscribe()
    }

    /// Apply one event. Returns `false` once the session has ended.
    pub fn handle(&mut self, event: SessionEvent) -> bool {
        if self.ended {
            return false;
        }
        match event {
            SessionEvent::StrokeSetUpdated(value) => {
                self.reconciler.on_stroke_set(parse_stroke_set(&value));
            }
            SessionEvent::CursorSetUpdated(value) => self.cursors.on_remote(&value),
            SessionEvent::PresenceSetUpdated(value) => self.roster.on_snapshot(&value),
            SessionEvent::LocalPointer(pointer) => self.on_pointer(pointer),
            SessionEvent::StalenessTick => {
                let evicted = self.cursors.sweep(self.clock.now_ms());
                self.cursors_evicted += evicted.len() as u64;
            }
            SessionEvent::Resize { width, height } => {
                self.reconciler.on_resize(&mut self.surface, width, height);
            }
            SessionEvent::Frame => {
                self.flush_cursor();
                self.reconciler.on_frame(&mut self.surface, self.capture.pending());
            }
            SessionEvent::Shutdown => {
                self.end();
            }
        }
        !self.ended
    }

    fn on_pointer(&mut self, pointer: PointerEvent) {
        let now = self.clock.now_ms();
        match pointer {
            PointerEvent::Down(p) => {
                let (width, height) = self.surface.size();
                if width == 0 || height == 0 {
                    log::debug!("Ignoring pointer down on a surface with no area");
                    return;
                }
                if let Some(unfinished) = self.capture.pointer_down(p, now) {
                    self.commit(unfinished);
                }
            }
            PointerEvent::Move(p) => {
                self.cursors.on_local_move(self.store.as_ref(), p, now);
                if let Some((from, to)) = self.capture.pointer_move(p) {
                    self.surface.draw_segment(from, to);
                }
            }
            PointerEvent::Up => {
                if let Some(stroke) = self.capture.pointer_up() {
                    self.commit(stroke);
                }
            }
            PointerEvent::Leave => self.capture.pointer_leave(),
            PointerEvent::Enter { position, pressed } => {
                if let Some(stroke) = self.capture.pointer_enter(position, pressed) {
                    self.commit(stroke);
                }
            }
        }
    }

    fn commit(&mut self, stroke: Stroke) {
        match self.committer.commit(self.store.as_ref(), &stroke) {
            Ok(id) => {
                self.strokes_committed += 1;
                self.reconciler.track_commit(id, stroke);
            }
            Err(e) => {
                log::warn!("Dropping stroke of {} point(s): {e}", stroke.points.len());
                self.commits_failed += 1;
                self.reconciler.track_failed(stroke);
            }
        }
    }

    /// Publish a held cursor sample whose throttle window has elapsed.
    pub fn flush_cursor(&mut self) -> bool {
        let now = self.clock.now_ms();
        self.cursors.flush(self.store.as_ref(), now)
    }

    /// Time until a held cursor sample is due, if one is held.
    pub fn cursor_flush_delay(&self) -> Option<Duration> {
        let deadline = self.cursors.next_flush_deadline()?;
        let wait = deadline.saturating_sub(self.clock.now_ms()).max(0);
        Some(Duration::from_millis(wait as u64))
    }

    /// Leave for good: remove this user's strokes, presence and cursor.
    /// Returns `false` if the session had already ended.
    pub fn end(&mut self) -> bool {
        if self.ended {
            return false;
        }
        self.ended = true;
        if self.capture.is_drawing() {
            log::debug!("Discarding stroke in progress at session end");
        }
        self.presence.depart(self.store.as_ref());
        log::info!("Session ended for {}", self.identity.user_id);
        true
    }

    /// End the session and sign the user out.
    pub fn logout(&mut self, provider: &dyn IdentityProvider) {
        self.end();
        provider.sign_out();
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn capture_state(&self) -> CaptureState {
        self.capture.state()
    }

    pub fn strokes(&self) -> &StrokeSet {
        self.reconciler.strokes()
    }

    pub fn local_layer(&self) -> &LocalLayer {
        self.reconciler.local_layer()
    }

    pub fn repaint_pending(&self) -> bool {
        self.reconciler.repaint_pending()
    }

    /// Remote cursors to draw now.
    pub fn cursor_overlay(&self) -> Vec<CursorMarker> {
        self.cursors.overlay(self.clock.now_ms())
    }

    pub fn roster(&self) -> &PresenceRoster {
        &self.roster
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            strokes_committed: self.strokes_committed,
            commits_failed: self.commits_failed,
            cursor_publishes: self.cursors.published_count(),
            cursor_failures: self.cursors.failed_count(),
            repaints: self.reconciler.repaint_count(),
            cursors_evicted: self.cursors_evicted,
        }
    }
}

impl<S: DrawSurface> Drop for Session<S> {
    fn drop(&mut self) {
        self.end();
    }
}

// ───────────────────────────────────────────────────────────────────
// Driver
// ───────────────────────────────────────────────────────────────────

/// Runs a session as a single task until shutdown.
pub struct SessionDriver<S: DrawSurface> {
    session: Session<S>,
    subscriptions: SessionSubscriptions,
    events: mpsc::Receiver<SessionEvent>,
}

impl<S: DrawSurface> SessionDriver<S> {
    pub fn new(session: Session<S>, events: mpsc::Receiver<SessionEvent>) -> Result<Self, SessionError> {
        let subscriptions = session.subscribe()?;
        Ok(Self {
            session,
            subscriptions,
            events,
        })
    }

    /// Driver plus the sender for host events.
    pub fn channel(session: Session<S>, capacity: usize) -> Result<(Self, mpsc::Sender<SessionEvent>), SessionError> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Ok((Self::new(session, rx)?, tx))
    }

    /// Replace the subscriptions without ending the session.
    pub fn resubscribe(&mut self) -> Result<(), SessionError> {
        self.subscriptions = self.session.resubscribe()?;
        Ok(())
    }

    pub fn session(&self) -> &Session<S> {
        &self.session
    }

    /// Handle events until `Shutdown`, the event channel closing, or the
    /// session ending. The session is ended on return.
    pub async fn run(self) -> Session<S> {
        let Self {
            mut session,
            mut subscriptions,
            mut events,
        } = self;

        for event in subscriptions.initial_events() {
            session.handle(event);
        }

        let mut staleness = tokio::time::interval(Duration::from_millis(session.config().staleness_sweep_ms));
        staleness.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut frames = tokio::time::interval(Duration::from_millis(session.config().refresh_interval_ms));
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let (mut strokes_open, mut cursors_open, mut presence_open) = (true, true, true);

        loop {
            let flush_in = session.cursor_flush_delay();
            tokio::select! {
                event = events.recv() => match event {
                    Some(SessionEvent::Shutdown) | None => break,
                    Some(event) => {
                        session.handle(event);
                    }
                },
                snapshot = subscriptions.strokes.changed(), if strokes_open => match snapshot {
                    Ok(value) => {
                        session.handle(SessionEvent::StrokeSetUpdated(value));
                    }
                    Err(e) => {
                        log::warn!("Stroke subscription ended: {e}");
                        strokes_open = false;
                    }
                },
                snapshot = subscriptions.cursors.changed(), if cursors_open => match snapshot {
                    Ok(value) => {
                        session.handle(SessionEvent::CursorSetUpdated(value));
                    }
                    Err(e) => {
                        log::warn!("Cursor subscription ended: {e}");
                        cursors_open = false;
                    }
                },
                snapshot = subscriptions.presence.changed(), if presence_open => match snapshot {
                    Ok(value) => {
                        session.handle(SessionEvent::PresenceSetUpdated(value));
                    }
                    Err(e) => {
                        log::warn!("Presence subscription ended: {e}");
                        presence_open = false;
                    }
                },
                _ = staleness.tick() => {
                    session.handle(SessionEvent::StalenessTick);
                }
                _ = frames.tick() => {
                    session.handle(SessionEvent::Frame);
                }
                _ = tokio::time::sleep(flush_in.unwrap_or_default()), if flush_in.is_some() => {
                    session.flush_cursor();
                }
            }
            if session.is_ended() {
                break;
            }
        }

        session.end();
        session
    }
}
