//! WebSocket client side of the store.
//!
//! [`RemoteStore`] implements [`StoreClient`] against a
//! [`StoreServer`](crate::server::StoreServer):
//! - operations are queued on a bounded channel and written by a writer task
//! - a reader task routes snapshots into per-path watch channels
//! - closing or dropping the client closes the socket, which makes the
//!   server run this connection's disconnect hooks
//!
//! There is no offline queue. While disconnected every operation fails with
//! [`StoreError::Unavailable`] and is dropped.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use scribble_core::StorePath;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::protocol::{parse_path, parse_value, StoreFrame};
use crate::store::{StoreClient, StoreError, Subscription};

/// Operations buffered before the client starts refusing them.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

enum Outgoing {
    Frame(StoreFrame),
    Close,
}

type Routes = Arc<Mutex<HashMap<StorePath, watch::Sender<Value>>>>;
type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

pub struct RemoteStore {
    url: String,
    state: Arc<watch::Sender<ConnectionState>>,
    outgoing: mpsc::Sender<Outgoing>,
    routes: Routes,
}

impl RemoteStore {
    pub async fn connect(url: impl Into<String>) -> Result<Self, StoreError> {
        Self::connect_with_capacity(url, DEFAULT_QUEUE_CAPACITY).await
    }

    /// Connect with an explicit outgoing queue bound.
    pub async fn connect_with_capacity(url: impl Into<String>, capacity: usize) -> Result<Self, StoreError> {
        let url = url.into();
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let state = Arc::new(state);

        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str()).await.map_err(|e| {
            log::error!("Failed to connect to store at {url}: {e}");
            StoreError::Connection(e.to_string())
        })?;
        let (mut ws_writer, ws_reader) = ws_stream.split();

        let (outgoing, mut out_rx) = mpsc::channel::<Outgoing>(capacity.max(1));
        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));

        // Writer task: forward queued frames to the socket.
        let writer_state = Arc::clone(&state);
        tokio::spawn(async move {
            while let Some(out) = out_rx.recv().await {
                let frame = match out {
                    Outgoing::Frame(frame) => frame,
                    Outgoing::Close => break,
                };
                let bytes = match frame.encode() {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        log::warn!("Dropping unencodable {} frame: {e}", frame.kind());
                        continue;
                    }
                };
                if let Err(e) = ws_writer.send(Message::Binary(bytes.into())).await {
                    log::error!("Store connection write failed: {e}");
                    break;
                }
            }
            let _ = ws_writer.close().await;
            writer_state.send_replace(ConnectionState::Disconnected);
        });

        tokio::spawn(Self::read_loop(
            ws_reader,
            Arc::clone(&routes),
            Arc::clone(&state),
            outgoing.downgrade(),
        ));

        state.send_replace(ConnectionState::Connected);
        log::info!("Connected to store at {url}");
        Ok(Self {
            url,
            state,
            outgoing,
            routes,
        })
    }

    /// Reader task: route snapshots to their subscribers.
    async fn read_loop(
        mut ws_reader: WsReader,
        routes: Routes,
        state: Arc<watch::Sender<ConnectionState>>,
        outgoing: mpsc::WeakSender<Outgoing>,
    ) {
        while let Some(msg) = ws_reader.next().await {
            let data = match msg {
                Ok(Message::Binary(data)) => data,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    log::error!("Store connection read failed: {e}");
                    break;
                }
            };
            match StoreFrame::decode(&data) {
                Ok(StoreFrame::Snapshot { path, value }) => {
                    let (path, value) = match (parse_path(&path), parse_value(&value)) {
                        (Ok(path), Ok(value)) => (path, value),
                        (Err(e), _) | (_, Err(e)) => {
                            log::debug!("Ignoring malformed snapshot: {e}");
                            continue;
                        }
                    };
                    Self::route_snapshot(&routes, &outgoing, path, value);
                }
                Ok(StoreFrame::Pong) => log::trace!("Pong from store"),
                Ok(StoreFrame::Error { message }) => log::warn!("Store rejected a request: {message}"),
                Ok(other) => log::debug!("Unhandled {} frame from store", other.kind()),
                Err(e) => log::warn!("Failed to decode frame from store: {e}"),
            }
        }

        state.send_replace(ConnectionState::Disconnected);
        // Dropping the senders ends every subscription.
        routes.lock().clear();
        log::info!("Store connection closed");
    }

    fn route_snapshot(routes: &Routes, outgoing: &mpsc::WeakSender<Outgoing>, path: StorePath, value: Value) {
        let mut routes = routes.lock();
        let Some(tx) = routes.get(&path) else {
            return;
        };
        if tx.send(value).is_ok() {
            return;
        }
        // Every subscriber for this path is gone.
        routes.remove(&path);
        if let Some(out) = outgoing.upgrade() {
            let _ = out.try_send(Outgoing::Frame(StoreFrame::unsubscribe(&path)));
        }
    }

    fn send(&self, frame: StoreFrame) -> Result<(), StoreError> {
        if self.connection_state() != ConnectionState::Connected {
            return Err(StoreError::Unavailable);
        }
        let kind = frame.kind();
        self.outgoing.try_send(Outgoing::Frame(frame)).map_err(|e| {
            if let TrySendError::Full(_) = e {
                log::warn!("Outgoing queue full, dropping {kind}");
            }
            StoreError::Unavailable
        })
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Forget a registered disconnect remove.
    pub fn cancel_on_disconnect(&self, path: &StorePath) -> Result<(), StoreError> {
        self.send(StoreFrame::cancel_on_disconnect(path))
    }

    pub fn ping(&self) -> Result<(), StoreError> {
        self.send(StoreFrame::Ping)
    }

    /// Close the socket once queued operations are flushed.
    pub fn close(&self) {
        if self.outgoing.try_send(Outgoing::Close).is_err() {
            log::debug!("Store connection already closing");
        }
    }
}

impl StoreClient for RemoteStore {
    fn subscribe(&self, path: &StorePath) -> Result<Subscription, StoreError> {
        let mut routes = self.routes.lock();
        if let Some(tx) = routes.get(path) {
            return Ok(Subscription::new(path.clone(), tx.subscribe()));
        }
        let (tx, rx) = watch::channel(Value::Null);
        routes.insert(path.clone(), tx);
        if let Err(e) = self.send(StoreFrame::subscribe(path)) {
            routes.remove(path);
            return Err(e);
        }
        Ok(Subscription::new(path.clone(), rx))
    }

    fn write(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        self.send(StoreFrame::write(path, &value))
    }

    fn remove(&self, path: &StorePath) -> Result<(), StoreError> {
        self.send(StoreFrame::remove(path))
    }

    fn on_disconnect_remove(&self, path: &StorePath) -> Result<(), StoreError> {
        self.send(StoreFrame::on_disconnect_remove(path))
    }
}
