//! Call connection lifecycle.
//!
//! [`ConnectionManager`] drives one call attempt end to end: discover the
//! nearest edge, join through the coordinator, connect the signaling socket,
//! then hand out lifecycle ticks until the caller leaves. It is both a
//! scoped resource (enter/leave) and a restartable tick sequence.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use callwire_protocol::{ClientEnvelope, ServerEnvelope};
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::RtcConfig;
use crate::coordinator::{Coordinator, JoinCallRequest, JoinCredentials, JoinOptions};
use crate::error::ConnectionError;
use crate::location::LocationDiscovery;
use crate::sdp;
use crate::signaling::SignalingClient;

/// Upper bound on how long one tick waits before observing the stop signal.
const TICK_SLICE: Duration = Duration::from_millis(100);

/// The call a manager connects to.
#[derive(Debug, Clone)]
pub struct CallTarget {
    pub call_type: String,
    pub call_id: String,
}

impl CallTarget {
    pub fn new(call_type: impl Into<String>, call_id: impl Into<String>) -> Self {
        Self {
            call_type: call_type.into(),
            call_id: call_id.into(),
        }
    }
}

/// Lifecycle phase of a connection attempt.
///
/// Transitions are one-directional except `Connected` to `Leaving`; a
/// manager never leaves `Closed` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Discovering,
    Joining,
    Connected,
    Leaving,
    Closed,
    Failed,
}

/// One element of the lifecycle sequence while the call is up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleTick {
    pub seq: u64,
}

struct Inner {
    call: CallTarget,
    user_id: String,
    create: bool,
    options: JoinOptions,
    session_id: String,
    coordinator: Arc<dyn Coordinator>,
    config: RtcConfig,
    discovery: LocationDiscovery,
    state: Mutex<ConnectionState>,
    signaling: tokio::sync::Mutex<Option<SignalingClient>>,
    credentials: Mutex<Option<JoinCredentials>>,
    join_response: Mutex<Option<ServerEnvelope>>,
    stop_tx: watch::Sender<bool>,
    ticks: AtomicU64,
}

#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(
        call: CallTarget,
        user_id: impl Into<String>,
        create: bool,
        options: JoinOptions,
        coordinator: Arc<dyn Coordinator>,
        config: RtcConfig,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        let discovery = LocationDiscovery::from_config(&config);
        Self {
            inner: Arc::new(Inner {
                call,
                user_id: user_id.into(),
                create,
                options,
                session_id: Uuid::new_v4().to_string(),
                coordinator,
                config,
                discovery,
                state: Mutex::new(ConnectionState::Idle),
                signaling: tokio::sync::Mutex::new(None),
                credentials: Mutex::new(None),
                join_response: Mutex::new(None),
                stop_tx,
                ticks: AtomicU64::new(0),
            }),
        }
    }

    /// Establishes the session: edge discovery, coordinator join, signaling
    /// connect.
    ///
    /// Discovery failures are absorbed into the fallback region and never
    /// fail the flow. A coordinator or signaling failure leaves the manager
    /// in `Failed` with any partially opened socket closed.
    pub async fn enter(&self) -> Result<(), ConnectionError> {
        {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            match *state {
                ConnectionState::Idle => *state = ConnectionState::Discovering,
                ConnectionState::Closed | ConnectionState::Failed => {
                    return Err(ConnectionError::Terminated);
                }
                _ => return Err(ConnectionError::AlreadyConnected),
            }
        }

        let location = self.inner.discovery.discover().await;
        tracing::info!("Joining call {} from {}", self.inner.call.call_id, location);
        self.set_state(ConnectionState::Joining);

        let mut options = self.inner.options.clone();
        if let Some(offer) = options.publisher_sdp.take() {
            options.publisher_sdp = Some(sdp::canonicalize(&offer));
        }

        let request = JoinCallRequest {
            call_type: self.inner.call.call_type.clone(),
            call_id: self.inner.call.call_id.clone(),
            user_id: self.inner.user_id.clone(),
            create: self.inner.create,
            location,
            options: options.clone(),
        };

        let credentials = match self.inner.coordinator.join_call(request).await {
            Ok(credentials) => credentials,
            Err(e) => {
                tracing::error!("Coordinator join failed: {}", e);
                self.set_state(ConnectionState::Failed);
                return Err(ConnectionError::Join(e.to_string()));
            }
        };

        let join = ClientEnvelope::JoinRequest {
            token: credentials.token.clone(),
            session_id: self.inner.session_id.clone(),
            publisher_sdp: options.publisher_sdp,
            subscriber_sdp: options.subscriber_sdp,
        };

        let client = SignalingClient::new(self.inner.config.keepalive_interval());
        match client.connect(&credentials.server.ws_endpoint, join).await {
            Ok(response) => {
                {
                    let mut slot = self
                        .inner
                        .join_response
                        .lock()
                        .unwrap_or_else(|e| e.into_inner());
                    *slot = Some(response);
                }
                {
                    let mut slot = self
                        .inner
                        .credentials
                        .lock()
                        .unwrap_or_else(|e| e.into_inner());
                    *slot = Some(credentials);
                }
                *self.inner.signaling.lock().await = Some(client);
                self.set_state(ConnectionState::Connected);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Signaling connect failed: {}", e);
                client.close().await;
                self.set_state(ConnectionState::Failed);
                Err(ConnectionError::Signaling(e.to_string()))
            }
        }
    }

    /// Produces the next lifecycle tick, or `None` when the sequence is
    /// over.
    ///
    /// Blocks for at most one short slice waiting on the stop signal, so
    /// leaving is observed promptly. Returns `None` before enter()
    /// completes, after leave(), and once the signaling connection dies.
    pub async fn next_tick(&self) -> Option<LifecycleTick> {
        if self.state() != ConnectionState::Connected {
            return None;
        }
        {
            let signaling = self.inner.signaling.lock().await;
            match signaling.as_ref() {
                Some(client) if client.is_running() => {}
                _ => return None,
            }
        }

        let mut stop_rx = self.inner.stop_tx.subscribe();
        if *stop_rx.borrow() {
            return None;
        }
        match tokio::time::timeout(TICK_SLICE, stop_rx.changed()).await {
            // Stop signal fired within the slice.
            Ok(_) => None,
            Err(_) => Some(LifecycleTick {
                seq: self.inner.ticks.fetch_add(1, Ordering::SeqCst),
            }),
        }
    }

    /// Tears the session down. Idempotent; a no-op unless currently
    /// connected.
    pub async fn leave(&self) {
        {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state != ConnectionState::Connected {
                return;
            }
            *state = ConnectionState::Leaving;
        }

        let _ = self.inner.stop_tx.send(true);
        let client = self.inner.signaling.lock().await.take();
        if let Some(client) = client {
            client.close().await;
        }
        self.set_state(ConnectionState::Closed);
        tracing::info!("Left call {}", self.inner.call.call_id);
    }

    /// Runs `body` inside an entered session, leaving on the way out no
    /// matter how the body exits.
    pub async fn scope<F, Fut, T>(&self, body: F) -> Result<T, ConnectionError>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = T>,
    {
        self.enter().await?;
        let result = body(self.clone()).await;
        self.leave().await;
        Ok(result)
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Client-generated session id, stable for the whole call attempt.
    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn credentials(&self) -> Option<JoinCredentials> {
        self.inner
            .credentials
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// The join response envelope received on connect.
    pub fn join_response(&self) -> Option<ServerEnvelope> {
        self.inner
            .join_response
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Registers an event listener on the live signaling connection.
    pub async fn on_event(
        &self,
        filter: crate::signaling::EventFilter,
        callback: impl Fn(&ServerEnvelope) + Send + Sync + 'static,
    ) -> Result<(), ConnectionError> {
        let signaling = self.inner.signaling.lock().await;
        match signaling.as_ref() {
            Some(client) => {
                client.on_event(filter, callback);
                Ok(())
            }
            None => Err(ConnectionError::Terminated),
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        tracing::debug!("Connection state {:?} -> {:?}", *state, next);
        *state = next;
    }
}
