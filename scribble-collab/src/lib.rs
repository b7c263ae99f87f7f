//! # scribble-collab: shared whiteboard sessions over a realtime tree store
//!
//! Every participant draws freehand strokes that all others see, with live
//! cursors and an online roster. All shared state lives in one JSON tree:
//!
//! ```text
//! strokes/{uid}/{strokeId}   append-only, one writer per uid
//! onlineUsers/{uid}          presence, removed on leave or disconnect
//! cursors/{uid}              last published pointer position
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────── Session ────────────────────┐
//! │ StrokeCapture ─► StrokeCommitter ─┐             │
//! │ CursorBroadcaster ────────────────┼─► StoreClient ◄──► StoreServer
//! │ PresenceManager ──────────────────┘      ▲      │     (WebSocket,
//! │ RenderReconciler ◄── snapshots ──────────┘      │      bincode)
//! │        │                                        │
//! │        ▼                                        │
//! │   DrawSurface                                   │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`store`]: store client trait, snapshot subscriptions, in-memory store
//! - [`protocol`]: bincode frames between [`client`] and [`server`]
//! - [`broadcast`]: change fan-out to server connections
//! - [`server`]: WebSocket store server with disconnect hooks
//! - [`client`]: WebSocket [`StoreClient`]
//! - [`capture`], [`commit`], [`reconciler`]: stroke path from pointer to screen
//! - [`cursor`], [`presence`]: live cursors and the online roster
//! - [`session`]: one user's session and its event loop

pub mod broadcast;
pub mod capture;
pub mod client;
pub mod clock;
pub mod commit;
pub mod config;
pub mod cursor;
pub mod identity;
pub mod presence;
pub mod protocol;
pub mod reconciler;
pub mod server;
pub mod session;
pub mod store;
pub mod surface;

pub use broadcast::{BroadcastGroup, BroadcastStats, ChangeEvent, PeerInfo};
pub use capture::{CaptureState, StrokeCapture};
pub use client::{ConnectionState, RemoteStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use commit::{CommitError, StrokeCommitter};
pub use config::{ConfigError, SyncConfig};
pub use cursor::{CursorBroadcaster, CursorColor, CursorMarker, CursorThrottle};
pub use identity::{Identity, IdentityProvider, StaticIdentity};
pub use presence::{PresenceManager, PresenceRoster};
pub use protocol::{ProtocolError, StoreFrame};
pub use reconciler::{LocalLayer, RenderReconciler, RepaintScheduler};
pub use server::{ServerConfig, ServerError, ServerStats, StoreServer};
pub use session::{
    PointerEvent, Session, SessionDriver, SessionError, SessionEvent, SessionStats, SessionSubscriptions,
};
pub use store::{MemoryConnection, MemoryStore, StoreClient, StoreError, StoreTree, Subscription};
pub use surface::{DrawOp, DrawSurface, RecordingSurface};
