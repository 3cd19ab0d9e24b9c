use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use callwire_protocol::{ClientEnvelope, EventKind, ParticipantData, ServerEnvelope};
use callwire_rtc::{
    CallTarget, ConnectionManager, ConnectionState, Coordinator, EventFilter, JoinCallRequest,
    JoinCredentials, JoinOptions, RtcConfig, SfuServer, SignalingClient, SignalingError,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, tungstenite::Message};

fn participant(user_id: &str) -> ParticipantData {
    ParticipantData {
        user_id: user_id.to_string(),
        session_id: format!("{user_id}-session"),
        name: None,
    }
}

fn join_response() -> ServerEnvelope {
    ServerEnvelope::JoinResponse {
        own_session_id: "sfu-session".to_string(),
        participants: vec![participant("alice")],
    }
}

fn join_request() -> ClientEnvelope {
    ClientEnvelope::JoinRequest {
        token: "test-token".to_string(),
        session_id: "test-session".to_string(),
        publisher_sdp: None,
        subscriber_sdp: None,
    }
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Accepts one signaling connection, waits for the join frame, answers with
/// `first`, then streams `events`. Afterwards it answers health checks
/// unless `answer_health_checks` is false.
async fn spawn_sfu_stub(
    first: ServerEnvelope,
    events: Vec<ServerEnvelope>,
    answer_health_checks: bool,
) -> String {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let Ok(mut ws) = accept_async(stream).await else {
            return;
        };

        // First inbound frame must be the join request.
        let join_frame = loop {
            match ws.next().await {
                Some(Ok(Message::Binary(bytes))) => break bytes,
                Some(Ok(_)) => continue,
                _ => return,
            }
        };
        let join = ClientEnvelope::decode(&join_frame).unwrap();
        assert!(matches!(join, ClientEnvelope::JoinRequest { .. }));

        let frame = first.encode().unwrap();
        if ws.send(Message::Binary(frame.into())).await.is_err() {
            return;
        }

        for event in events {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let frame = event.encode().unwrap();
            if ws.send(Message::Binary(frame.into())).await.is_err() {
                return;
            }
        }

        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Binary(bytes) = msg {
                let is_health_check = matches!(
                    ClientEnvelope::decode(&bytes),
                    Ok(ClientEnvelope::HealthCheckRequest)
                );
                if is_health_check && answer_health_checks {
                    let frame = ServerEnvelope::HealthCheckResponse.encode().unwrap();
                    if ws.send(Message::Binary(frame.into())).await.is_err() {
                        return;
                    }
                }
            }
        }
    });

    format!("ws://{addr}")
}

/// Accepts one connection, answers the join, then reads without ever
/// acking health checks. Reports when the client's side of the socket goes
/// away.
async fn spawn_mute_sfu_stub() -> (String, Arc<AtomicBool>) {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let socket_gone = Arc::new(AtomicBool::new(false));
    let socket_gone_flag = socket_gone.clone();

    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let Ok(mut ws) = accept_async(stream).await else {
            return;
        };
        if ws.next().await.is_none() {
            return;
        }
        let frame = join_response().encode().unwrap();
        if ws.send(Message::Binary(frame.into())).await.is_err() {
            return;
        }
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
        socket_gone_flag.store(true, Ordering::SeqCst);
    });

    (format!("ws://{addr}"), socket_gone)
}

struct StubCoordinator {
    ws_endpoint: String,
}

#[async_trait]
impl Coordinator for StubCoordinator {
    async fn join_call(&self, request: JoinCallRequest) -> anyhow::Result<JoinCredentials> {
        assert_eq!(request.location.len(), 3);
        Ok(JoinCredentials {
            token: "test-token".to_string(),
            server: SfuServer {
                url: "http://sfu.test".to_string(),
                ws_endpoint: self.ws_endpoint.clone(),
            },
            ice_servers: vec![],
        })
    }
}

/// Config that makes discovery fall back quickly instead of probing the
/// real network.
fn offline_config() -> RtcConfig {
    RtcConfig {
        hint_url: "http://127.0.0.1:1/".to_string(),
        discovery_max_retries: 1,
        probe_timeout_ms: 50,
        ..RtcConfig::default()
    }
}

async fn stub_manager(ws_endpoint: String) -> ConnectionManager {
    ConnectionManager::new(
        CallTarget::new("default", "call-1"),
        "user-1",
        true,
        JoinOptions::default(),
        Arc::new(StubCoordinator { ws_endpoint }),
        offline_config(),
    )
}

#[tokio::test]
async fn connect_resolves_with_the_join_response() {
    let url = spawn_sfu_stub(join_response(), vec![], true).await;
    let client = SignalingClient::new(Duration::from_secs(15));

    let first = client.connect(&url, join_request()).await.unwrap();
    match first {
        ServerEnvelope::JoinResponse {
            own_session_id,
            participants,
        } => {
            assert_eq!(own_session_id, "sfu-session");
            assert_eq!(participants.len(), 1);
        }
        other => panic!("unexpected first envelope: {other:?}"),
    }
    assert!(client.is_running());
    client.close().await;
    assert!(!client.is_running());
}

#[tokio::test]
async fn rejected_join_surfaces_the_server_message() {
    let url = spawn_sfu_stub(
        ServerEnvelope::Error {
            message: "Unauthorized".to_string(),
        },
        vec![],
        true,
    )
    .await;
    let client = SignalingClient::new(Duration::from_secs(15));

    let err = client
        .connect(&url, join_request())
        .await
        .expect_err("rejected join must fail");
    assert!(err.to_string().contains("Unauthorized"));
    assert!(matches!(err, SignalingError::Rejected(_)));
    client.close().await;
}

#[tokio::test]
async fn unexpected_first_envelope_is_a_protocol_violation() {
    let url = spawn_sfu_stub(
        ServerEnvelope::ParticipantJoined {
            participant: participant("bob"),
        },
        vec![],
        true,
    )
    .await;
    let client = SignalingClient::new(Duration::from_secs(15));

    let err = client
        .connect(&url, join_request())
        .await
        .expect_err("unexpected first envelope must fail");
    assert!(matches!(
        err,
        SignalingError::ProtocolViolation(EventKind::ParticipantJoined)
    ));
    client.close().await;
}

#[tokio::test]
async fn events_dispatch_in_order_without_replaying_the_first() {
    let events = vec![
        ServerEnvelope::ParticipantJoined {
            participant: participant("bob"),
        },
        ServerEnvelope::HealthCheckResponse,
        ServerEnvelope::ParticipantLeft {
            participant: participant("bob"),
        },
    ];
    let url = spawn_sfu_stub(join_response(), events, true).await;
    let client = SignalingClient::new(Duration::from_secs(15));

    let joined: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let all: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let log = joined.clone();
    client.on_event(EventFilter::Kind(EventKind::ParticipantJoined), move |e| {
        log.lock().unwrap().push(e.kind().to_string());
    });
    let log = all.clone();
    client.on_event(EventFilter::Any, move |e| {
        log.lock().unwrap().push(e.kind().to_string());
    });

    client.connect(&url, join_request()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(*joined.lock().unwrap(), vec!["participant_joined"]);
    // The join response resolved connect() and is not redelivered; the
    // health check ack reaches only the wildcard listener.
    assert_eq!(
        *all.lock().unwrap(),
        vec![
            "participant_joined",
            "health_check_response",
            "participant_left"
        ]
    );
    client.close().await;
}

#[tokio::test]
async fn health_check_acks_keep_the_connection_alive() {
    let url = spawn_sfu_stub(join_response(), vec![], true).await;
    let client = SignalingClient::new(Duration::from_millis(100));

    client.connect(&url, join_request()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(client.is_running());
    client.close().await;
}

#[tokio::test]
async fn missing_acks_trip_the_keepalive_watchdog() {
    let url = spawn_sfu_stub(join_response(), vec![], false).await;
    let client = SignalingClient::new(Duration::from_millis(100));

    client.connect(&url, join_request()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(!client.is_running());
    assert!(client.is_closed());
    client.close().await;
}

#[tokio::test]
async fn watchdog_close_reaches_the_socket_without_an_external_close() {
    let (url, socket_gone) = spawn_mute_sfu_stub().await;
    let client = SignalingClient::new(Duration::from_millis(100));

    client.connect(&url, join_request()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(700)).await;

    // The watchdog closed the client internally; the server side must see
    // the socket go away without anyone calling close() on the client.
    assert!(client.is_closed());
    assert!(
        socket_gone.load(Ordering::SeqCst),
        "server never observed the socket closing"
    );
    client.close().await;
}

#[tokio::test]
async fn transport_death_before_first_envelope_fails_connect() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let Ok(mut ws) = accept_async(stream).await else {
            return;
        };
        // Take the join frame, then hang up without answering.
        let _ = ws.next().await;
        let _ = ws.close(None).await;
    });

    let client = SignalingClient::new(Duration::from_secs(15));
    let err = client
        .connect(&format!("ws://{addr}"), join_request())
        .await
        .expect_err("connect must fail when the server hangs up first");
    assert!(matches!(err, SignalingError::Transport(_)));
    client.close().await;
}

#[tokio::test]
async fn manager_connects_and_leaves_cleanly() {
    let url = spawn_sfu_stub(join_response(), vec![], true).await;
    let manager = stub_manager(url).await;

    manager.enter().await.unwrap();
    assert!(manager.is_running());
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert!(manager.credentials().is_some());
    assert!(matches!(
        manager.join_response(),
        Some(ServerEnvelope::JoinResponse { .. })
    ));

    let tick = manager.next_tick().await.expect("tick while connected");
    assert_eq!(tick.seq, 0);

    manager.leave().await;
    assert_eq!(manager.state(), ConnectionState::Closed);
    assert!(manager.next_tick().await.is_none());

    // Leaving again is a no-op.
    manager.leave().await;
    assert_eq!(manager.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn manager_cannot_enter_twice() {
    let url = spawn_sfu_stub(join_response(), vec![], true).await;
    let manager = stub_manager(url).await;

    manager.enter().await.unwrap();
    let err = manager.enter().await.expect_err("second enter must fail");
    assert!(err.to_string().contains("already"));
    manager.leave().await;
}

#[tokio::test]
async fn scope_leaves_on_normal_exit() {
    let url = spawn_sfu_stub(join_response(), vec![], true).await;
    let manager = stub_manager(url).await;

    let ticks = manager
        .scope(|m| async move {
            let mut seen = 0u64;
            while seen < 3 {
                match m.next_tick().await {
                    Some(_) => seen += 1,
                    None => break,
                }
            }
            seen
        })
        .await
        .unwrap();

    assert_eq!(ticks, 3);
    assert_eq!(manager.state(), ConnectionState::Closed);
    assert!(manager.next_tick().await.is_none());
}

#[tokio::test]
async fn scope_leaves_when_the_body_bails_early() {
    let url = spawn_sfu_stub(join_response(), vec![], true).await;
    let manager = stub_manager(url).await;

    let result: Result<(), &str> = manager
        .scope(|_m| async move { Err("application error") })
        .await
        .unwrap();

    assert!(result.is_err());
    assert_eq!(manager.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn signaling_rejection_fails_enter_and_marks_failed() {
    let url = spawn_sfu_stub(
        ServerEnvelope::Error {
            message: "Unauthorized".to_string(),
        },
        vec![],
        true,
    )
    .await;
    let manager = stub_manager(url).await;

    let err = manager.enter().await.expect_err("enter must fail");
    assert!(err.to_string().contains("Unauthorized"));
    assert!(!manager.is_running());
    assert_eq!(manager.state(), ConnectionState::Failed);
}
