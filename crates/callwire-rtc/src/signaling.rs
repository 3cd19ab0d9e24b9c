//! Persistent signaling socket to the SFU.
//!
//! One [`SignalingClient`] owns one WebSocket connection carrying binary
//! envelope frames. Socket reads happen on a dedicated task; decoded
//! envelopes cross a channel into a single dispatch task that runs listener
//! callbacks, so callbacks never run on the read loop. A keepalive task
//! probes the server on a fixed interval and tears the connection down when
//! acknowledgments stop arriving.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use callwire_protocol::{ClientEnvelope, EventKind, ServerEnvelope};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::error::SignalingError;

/// Grace period for background tasks to exit during close before they are
/// aborted.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type EventCallback = Box<dyn Fn(&ServerEnvelope) + Send + Sync>;

/// Selects which inbound envelopes a listener receives.
#[derive(Debug, Clone, Copy)]
pub enum EventFilter {
    /// Envelopes of one specific kind
    Kind(EventKind),
    /// Every inbound envelope, in addition to kind-specific listeners
    Any,
}

#[derive(Default)]
struct ListenerRegistry {
    by_kind: HashMap<EventKind, Vec<EventCallback>>,
    wildcard: Vec<EventCallback>,
}

impl ListenerRegistry {
    fn register(&mut self, filter: EventFilter, callback: EventCallback) {
        match filter {
            EventFilter::Kind(kind) => self.by_kind.entry(kind).or_default().push(callback),
            EventFilter::Any => self.wildcard.push(callback),
        }
    }

    fn dispatch(&self, envelope: &ServerEnvelope) {
        let kind = envelope.kind();
        // Health check acks are plumbing, not call events. Kind-specific
        // listeners never see them; wildcard listeners see everything.
        if kind != EventKind::HealthCheckResponse {
            if let Some(callbacks) = self.by_kind.get(&kind) {
                for callback in callbacks {
                    callback(envelope);
                }
            }
        }
        for callback in &self.wildcard {
            callback(envelope);
        }
    }

    fn clear(&mut self) {
        self.by_kind.clear();
        self.wildcard.clear();
    }
}

struct Shared {
    running: AtomicBool,
    closed: AtomicBool,
    listeners: Mutex<ListenerRegistry>,
    last_ack: Mutex<Instant>,
    shutdown_tx: watch::Sender<bool>,
}

impl Shared {
    fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            running: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            listeners: Mutex::new(ListenerRegistry::default()),
            last_ack: Mutex::new(Instant::now()),
            shutdown_tx,
        }
    }

    /// Flags the client as closed and wakes every background task. Safe to
    /// call from any task, including the keepalive loop itself; joining the
    /// tasks is left to [`SignalingClient::close`].
    fn begin_close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.clear();
        }
    }

    fn touch_ack(&self) {
        let mut last_ack = self.last_ack.lock().unwrap_or_else(|e| e.into_inner());
        *last_ack = Instant::now();
    }

    fn since_last_ack(&self) -> Duration {
        let last_ack = self.last_ack.lock().unwrap_or_else(|e| e.into_inner());
        last_ack.elapsed()
    }
}

pub struct SignalingClient {
    shared: Arc<Shared>,
    outbound: Mutex<Option<mpsc::Sender<Message>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    keepalive_interval: Duration,
}

impl SignalingClient {
    pub fn new(keepalive_interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared::new()),
            outbound: Mutex::new(None),
            handles: Mutex::new(Vec::new()),
            keepalive_interval,
        }
    }

    /// Registers a callback for inbound envelopes matching `filter`.
    ///
    /// Callbacks run on the dispatch task in registration order. They are
    /// dropped when the client closes.
    pub fn on_event(
        &self,
        filter: EventFilter,
        callback: impl Fn(&ServerEnvelope) + Send + Sync + 'static,
    ) {
        if let Ok(mut listeners) = self.shared.listeners.lock() {
            listeners.register(filter, Box::new(callback));
        }
    }

    /// Opens the socket, sends `join` as the first frame, and awaits the
    /// server's first envelope.
    ///
    /// Resolves with the first envelope when it is a join response. Fails
    /// when the server answers with an error envelope, when the first
    /// envelope is of any other kind, or when the transport dies before a
    /// first envelope arrives. The first envelope is consumed here and is
    /// never replayed through listener dispatch.
    pub async fn connect(
        &self,
        url: &str,
        join: ClientEnvelope,
    ) -> Result<ServerEnvelope, SignalingError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(SignalingError::Closed);
        }

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| SignalingError::Transport(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        let frame = join
            .encode()
            .map_err(|e| SignalingError::Transport(e.to_string()))?;
        write
            .send(Message::Binary(frame.into()))
            .await
            .map_err(|e| SignalingError::Transport(e.to_string()))?;

        let (tx, mut rx) = mpsc::channel::<Message>(100);
        let (dispatch_tx, mut dispatch_rx) = mpsc::channel::<ServerEnvelope>(100);
        let (first_tx, first_rx) = oneshot::channel::<Result<ServerEnvelope, SignalingError>>();

        // Writer task: drains the outbound channel into the sink and sends a
        // close frame once the channel is dropped or shutdown is signalled.
        // Shutdown must be observed here too, not only in the reader, so an
        // internally initiated close actually closes the socket.
        let mut writer_shutdown = self.shared.shutdown_tx.subscribe();
        let writer = tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    _ = writer_shutdown.changed() => break,
                    msg = rx.recv() => msg,
                };
                let Some(msg) = msg else { break };
                if let Err(e) = write.send(msg).await {
                    tracing::error!("Failed to send signaling frame: {}", e);
                    break;
                }
            }
            let _ = write.send(Message::Close(None)).await;
        });

        // Reader task: decodes frames, resolves the first-envelope wait, and
        // forwards the rest to the dispatch task.
        let shared = self.shared.clone();
        let mut shutdown_rx = self.shared.shutdown_tx.subscribe();
        let reader = tokio::spawn(async move {
            let mut first_tx = Some(first_tx);
            loop {
                let msg = tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    msg = read.next() => msg,
                };
                match msg {
                    Some(Ok(Message::Binary(bytes))) => {
                        let envelope = match ServerEnvelope::decode(&bytes) {
                            Ok(envelope) => envelope,
                            Err(e) => {
                                tracing::warn!("Dropping undecodable frame: {}", e);
                                continue;
                            }
                        };
                        if let Some(first_tx) = first_tx.take() {
                            let _ = first_tx.send(Ok(envelope));
                            continue;
                        }
                        if envelope.kind() == EventKind::HealthCheckResponse {
                            shared.touch_ack();
                        }
                        if dispatch_tx.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("Signaling socket closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("Signaling socket error: {}", e);
                        break;
                    }
                }
            }
            if let Some(first_tx) = first_tx.take() {
                let _ = first_tx.send(Err(SignalingError::Transport(
                    "connection closed before first message".to_string(),
                )));
            }
            shared.begin_close();
        });

        // Dispatch task: runs listener callbacks off the read loop, in
        // receipt order. Dispatch against a cleared registry is a no-op.
        let shared = self.shared.clone();
        let dispatcher = tokio::spawn(async move {
            while let Some(envelope) = dispatch_rx.recv().await {
                if let Ok(listeners) = shared.listeners.lock() {
                    listeners.dispatch(&envelope);
                }
            }
        });

        {
            let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
            handles.push(writer);
            handles.push(reader);
            handles.push(dispatcher);
        }
        {
            let mut outbound = self.outbound.lock().unwrap_or_else(|e| e.into_inner());
            *outbound = Some(tx.clone());
        }

        let first = first_rx.await.map_err(|_| {
            SignalingError::Transport("connection closed before first message".to_string())
        })??;

        match &first {
            ServerEnvelope::JoinResponse { .. } => {}
            ServerEnvelope::Error { message } => {
                return Err(SignalingError::Rejected(message.clone()));
            }
            other => return Err(SignalingError::ProtocolViolation(other.kind())),
        }

        self.shared.touch_ack();
        self.shared.running.store(true, Ordering::SeqCst);
        let keepalive = self.spawn_keepalive(tx);
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(keepalive);

        tracing::info!("Signaling connection established");
        Ok(first)
    }

    /// Sends an envelope over the established connection.
    pub async fn send(&self, envelope: ClientEnvelope) -> Result<(), SignalingError> {
        let tx = {
            let outbound = self.outbound.lock().unwrap_or_else(|e| e.into_inner());
            outbound.clone()
        };
        let Some(tx) = tx else {
            return Err(SignalingError::Closed);
        };
        let frame = envelope
            .encode()
            .map_err(|e| SignalingError::Transport(e.to_string()))?;
        tx.send(Message::Binary(frame.into()))
            .await
            .map_err(|_| SignalingError::Closed)
    }

    fn spawn_keepalive(&self, tx: mpsc::Sender<Message>) -> JoinHandle<()> {
        let shared = self.shared.clone();
        let interval = self.keepalive_interval;
        let mut shutdown_rx = self.shared.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.changed() => break,
                }
                if shared.closed.load(Ordering::SeqCst) || !shared.running.load(Ordering::SeqCst) {
                    break;
                }
                let idle = shared.since_last_ack();
                if idle > interval * 2 {
                    tracing::warn!(
                        "No health check ack for {:?}, closing signaling connection",
                        idle
                    );
                    shared.begin_close();
                    break;
                }
                let frame = match ClientEnvelope::HealthCheckRequest.encode() {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!("Failed to encode health check: {}", e);
                        continue;
                    }
                };
                if let Err(e) = tx.send(Message::Binary(frame.into())).await {
                    tracing::warn!("Failed to send health check: {}", e);
                }
            }
        })
    }

    /// True after a successful connect and until the client closes.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst) && !self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Closes the connection and tears down background tasks.
    ///
    /// Idempotent, and safe to call even if connect never completed. Tasks
    /// get a bounded grace period to exit before they are aborted, so a hung
    /// peer cannot block shutdown. Listeners are cleared.
    pub async fn close(&self) {
        self.shared.begin_close();
        {
            let mut outbound = self.outbound.lock().unwrap_or_else(|e| e.into_inner());
            outbound.take();
        }
        let handles: Vec<JoinHandle<()>> = {
            let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *handles)
        };
        for mut handle in handles {
            if tokio::time::timeout(CLOSE_TIMEOUT, &mut handle).await.is_err() {
                tracing::warn!("Signaling task did not stop in time, aborting");
                handle.abort();
            }
        }
        tracing::debug!("Signaling client closed");
    }
}
