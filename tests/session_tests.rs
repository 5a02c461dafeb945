use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use lgremote::payloads::{AudioStatusResponse, MuteStatusResponse, OneShotResponse};
use lgremote::{
    AcceptMode, ConnectionState, Envelope, Error, ManifestProvider, PairingRequest, RemoteKey,
    RemoteKeys, Result, SessionEvent, Timings, TvClient,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::test;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

type TvSocket = WebSocketStream<TcpStream>;

const STEP: Duration = Duration::from_secs(5);

/// Loopback stand-in for the television's primary channel
struct FakeTv {
    listener: TcpListener,
}

impl FakeTv {
    async fn bind() -> Self {
        Self {
            listener: TcpListener::bind("127.0.0.1:0").await.unwrap(),
        }
    }

    fn port(&self) -> u16 {
        self.listener.local_addr().unwrap().port()
    }

    async fn accept(&self) -> TvSocket {
        let (stream, _) = timeout(STEP, self.listener.accept())
            .await
            .expect("client did not connect")
            .unwrap();
        accept_async(stream).await.unwrap()
    }
}

async fn next_json(ws: &mut TvSocket) -> Value {
    loop {
        let message = timeout(STEP, ws.next())
            .await
            .expect("no frame from client")
            .expect("connection closed")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn send_json(ws: &mut TvSocket, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

/// Wait until the client closes the connection
async fn expect_closed(ws: &mut TvSocket) {
    loop {
        match timeout(STEP, ws.next()).await.expect("connection stayed open") {
            None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
            Some(Ok(_)) => {}
        }
    }
}

/// Answer the register envelope and collect the standing subscriptions by uri
async fn handshake(ws: &mut TvSocket) -> HashMap<String, String> {
    let register = next_json(ws).await;
    assert_eq!(register["type"], "register");
    send_json(
        ws,
        json!({"type": "registered", "id": register["id"], "payload": {"client-key": "KEY1"}}),
    )
    .await;

    let mut ids = HashMap::new();
    while ids.len() < 5 {
        let subscribe = next_json(ws).await;
        assert_eq!(subscribe["type"], "subscribe");
        ids.insert(
            subscribe["uri"].as_str().unwrap().to_string(),
            subscribe["id"].as_str().unwrap().to_string(),
        );
    }
    ids
}

async fn wait_event<F>(events: &mut broadcast::Receiver<SessionEvent>, matches: F) -> SessionEvent
where
    F: Fn(&SessionEvent) -> bool,
{
    loop {
        let event = timeout(STEP, events.recv())
            .await
            .expect("event did not arrive")
            .unwrap();
        if matches(&event) {
            return event;
        }
    }
}

fn fast_timings() -> Timings {
    Timings {
        connect_timeout: Duration::from_secs(1),
        reconnect_delay: Duration::from_millis(100),
        write_timeout: Duration::from_secs(1),
        pairing_timeout: Duration::from_secs(3),
        accept_settle: Duration::from_millis(50),
        too_many_requests_backoff: Duration::from_millis(400),
        power_state_backoff: Duration::from_millis(100),
        keep_alive_interval: None,
        keep_alive_timeout: Duration::from_millis(200),
        response_timeout: Duration::from_secs(2),
    }
}

fn client_for(tv: &FakeTv, timings: Timings) -> TvClient {
    TvClient::builder()
        .host("127.0.0.1")
        .port(tv.port())
        .client_key("KEY0")
        .timings(timings)
        .build()
}

/// Key channel that reports every call with its time
struct RecordingRemote {
    calls: mpsc::UnboundedSender<(String, Instant)>,
}

#[async_trait]
impl RemoteKeys for RecordingRemote {
    async fn open(&self) -> Result<()> {
        self.calls.send(("open".to_string(), Instant::now())).unwrap();
        Ok(())
    }

    async fn send_key(&self, key: RemoteKey) -> Result<()> {
        self.calls.send((format!("{:?}", key), Instant::now())).unwrap();
        Ok(())
    }

    async fn close(&self) {}
}

/// Key channel that cannot be opened
struct BrokenRemote;

#[async_trait]
impl RemoteKeys for BrokenRemote {
    async fn open(&self) -> Result<()> {
        Err(Error::Connection("refused".to_string()))
    }

    async fn send_key(&self, _key: RemoteKey) -> Result<()> {
        Err(Error::NotConnected("key channel".to_string()))
    }

    async fn close(&self) {}
}

/// Manifest provider that counts how often it was asked
#[derive(Default)]
struct CountingManifest {
    calls: AtomicUsize,
}

#[async_trait]
impl ManifestProvider for CountingManifest {
    async fn pairing_request(&self) -> Result<PairingRequest> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PairingRequest::new(json!({"permissions": ["CONTROL_AUDIO"]}))
            .with_client_key(format!("STORED{}", call)))
    }
}

/// Connect, register with the stored key and reach Ready
#[test]
async fn test_register_reaches_ready() {
    let tv = FakeTv::bind().await;
    let client = client_for(&tv, fast_timings());
    let mut events = client.events();

    client.connect().await;
    let mut ws = tv.accept().await;

    let register = next_json(&mut ws).await;
    assert_eq!(register["type"], "register");
    assert_eq!(register["id"], "5d3ed7900001");
    assert_eq!(register["payload"]["client-key"], "KEY0");
    assert_eq!(register["payload"]["pairingType"], "PROMPT");

    send_json(
        &mut ws,
        json!({"type": "registered", "id": "5d3ed7900001", "payload": {"client-key": "KEY1"}}),
    )
    .await;

    let mut states = Vec::new();
    while states.last() != Some(&ConnectionState::Ready) {
        if let SessionEvent::StateChanged(state) =
            wait_event(&mut events, |e| matches!(e, SessionEvent::StateChanged(_))).await
        {
            states.push(state);
        }
    }
    assert_eq!(
        states,
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Ready
        ]
    );

    let key = wait_event(&mut events, |e| matches!(e, SessionEvent::ClientKeyChanged(_))).await;
    assert_eq!(key, SessionEvent::ClientKeyChanged("KEY1".to_string()));

    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Offline);
}

/// Standing subscriptions keep the status snapshot current
#[test]
async fn test_standing_subscriptions_update_status() {
    let tv = FakeTv::bind().await;
    let client = client_for(&tv, fast_timings());
    let mut events = client.events();

    client.connect().await;
    let mut ws = tv.accept().await;
    let ids = handshake(&mut ws).await;

    let power = &ids["ssap://com.webos.service.tvpower/power/getPowerState"];
    send_json(&mut ws, json!({"type": "response", "id": power, "payload": {"state": "Active"}})).await;
    wait_event(&mut events, |e| *e == SessionEvent::ScreenStateChanged(true)).await;

    let audio = &ids["ssap://audio/getStatus"];
    send_json(
        &mut ws,
        json!({"type": "response", "id": audio, "payload": {"volumeStatus": {"volume": 14, "cause": "volumeUp"}}}),
    )
    .await;
    wait_event(&mut events, |e| {
        *e == SessionEvent::VolumeChanged {
            volume: 14,
            via_remote: true,
        }
    })
    .await;

    let app = &ids["ssap://com.webos.applicationManager/getForegroundAppInfo"];
    send_json(
        &mut ws,
        json!({"type": "response", "id": app, "payload": {"appId": "com.webos.app.hdmi2"}}),
    )
    .await;
    wait_event(&mut events, |e| matches!(e, SessionEvent::InputChanged(_))).await;

    let status = client.status();
    assert!(status.screen_on);
    assert_eq!(status.volume, Some(14));
    assert_eq!(status.input, lgremote::Input::Hdmi2);

    client.disconnect().await;
}

/// Unmatched and malformed frames are reported, not fatal
#[test]
async fn test_unknown_and_malformed_frames() {
    let tv = FakeTv::bind().await;
    let client = client_for(&tv, fast_timings());
    let mut events = client.events();

    client.connect().await;
    let mut ws = tv.accept().await;
    handshake(&mut ws).await;

    send_json(&mut ws, json!({"type": "response", "id": "5d3ed7900999", "payload": {}})).await;
    wait_event(&mut events, |e| matches!(e, SessionEvent::UnknownPacket(_))).await;

    ws.send(Message::text("{not json")).await.unwrap();
    wait_event(&mut events, |e| matches!(e, SessionEvent::MessageError(_))).await;

    assert_eq!(client.state(), ConnectionState::Ready);
    client.disconnect().await;
}

/// The prompt is accepted through the key channel with a settle delay
/// before opening it and between the two keys
#[test]
async fn test_pairing_auto_accept() {
    let tv = FakeTv::bind().await;
    let (calls, mut recorded) = mpsc::unbounded_channel();
    let mut timings = fast_timings();
    timings.accept_settle = Duration::from_millis(300);
    let client = TvClient::builder()
        .host("127.0.0.1")
        .port(tv.port())
        .accept_mode(AcceptMode::DownEnter)
        .remote_keys(Arc::new(RecordingRemote { calls }))
        .timings(timings)
        .build();

    client.connect().await;
    let mut ws = tv.accept().await;

    let register = next_json(&mut ws).await;
    assert!(register["payload"].get("client-key").is_none());
    let prompted = Instant::now();
    send_json(
        &mut ws,
        json!({"type": "response", "id": "5d3ed7900001", "payload": {"pairingType": "PROMPT", "returnValue": true}}),
    )
    .await;

    client
        .supervisor()
        .wait_for(ConnectionState::Pairing, STEP)
        .await
        .unwrap();

    let mut calls = Vec::new();
    while calls.len() < 3 {
        calls.push(timeout(STEP, recorded.recv()).await.unwrap().unwrap());
    }
    let names: Vec<&str> = calls.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["open", "Down", "Enter"]);

    let settle = Duration::from_millis(250);
    assert!(calls[0].1.duration_since(prompted) >= settle);
    assert!(calls[2].1.duration_since(calls[1].1) >= settle);

    send_json(
        &mut ws,
        json!({"type": "registered", "id": "5d3ed7900001", "payload": {"client-key": "NEWKEY"}}),
    )
    .await;
    client.wait_ready(STEP).await.unwrap();

    client.disconnect().await;
}

/// A key channel failure during auto-accept is reported as a pairing error
#[test]
async fn test_pairing_auto_accept_failure_reported() {
    let tv = FakeTv::bind().await;
    let client = TvClient::builder()
        .host("127.0.0.1")
        .port(tv.port())
        .accept_mode(AcceptMode::RightEnter)
        .remote_keys(Arc::new(BrokenRemote))
        .timings(fast_timings())
        .build();
    let mut events = client.events();

    client.connect().await;
    let mut ws = tv.accept().await;
    next_json(&mut ws).await;
    send_json(
        &mut ws,
        json!({"type": "response", "id": "5d3ed7900001", "payload": {"pairingType": "PROMPT"}}),
    )
    .await;

    let failure = wait_event(&mut events, |e| matches!(e, SessionEvent::ConnectionError(_))).await;
    match failure {
        SessionEvent::ConnectionError(message) => assert!(message.starts_with("Pairing error")),
        other => panic!("expected connection error, got {:?}", other),
    }
    assert_eq!(client.state(), ConnectionState::Pairing);

    client.disconnect().await;
}

/// An unanswered pairing ends the connection and a fresh one starts over
#[test]
async fn test_pairing_deadline_reconnects() {
    let tv = FakeTv::bind().await;
    let mut timings = fast_timings();
    timings.pairing_timeout = Duration::from_millis(300);
    let client = client_for(&tv, timings);
    let mut events = client.events();

    client.connect().await;
    let mut ws = tv.accept().await;
    next_json(&mut ws).await;
    send_json(
        &mut ws,
        json!({"type": "response", "id": "5d3ed7900001", "payload": {"pairingType": "PROMPT"}}),
    )
    .await;
    wait_event(&mut events, |e| *e == SessionEvent::StateChanged(ConnectionState::Pairing)).await;

    expect_closed(&mut ws).await;
    wait_event(&mut events, |e| *e == SessionEvent::StateChanged(ConnectionState::Offline)).await;
    wait_event(&mut events, |e| *e == SessionEvent::StateChanged(ConnectionState::Connecting)).await;

    // Packet numbering restarts on the new connection
    let mut second = tv.accept().await;
    let register = next_json(&mut second).await;
    assert_eq!(register["type"], "register");
    assert_eq!(register["id"], "5d3ed7900001");

    client.disconnect().await;
}

/// "Too many pairing requests" closes the connection and backs off
#[test]
async fn test_too_many_pairing_requests_backoff() {
    let tv = FakeTv::bind().await;
    let client = client_for(&tv, fast_timings());

    client.connect().await;
    let mut ws = tv.accept().await;
    next_json(&mut ws).await;

    let rejected = Instant::now();
    send_json(
        &mut ws,
        json!({"type": "error", "id": "5d3ed7900001", "error": "403 too many pairing requests", "payload": {}}),
    )
    .await;
    expect_closed(&mut ws).await;

    let _second = tv.accept().await;
    assert!(rejected.elapsed() >= Duration::from_millis(350));

    client.disconnect().await;
}

/// Stopping closes the connection and no attempt follows
#[test]
async fn test_stop_does_not_reconnect() {
    let tv = FakeTv::bind().await;
    let client = client_for(&tv, fast_timings());

    client.connect().await;
    let mut ws = tv.accept().await;
    handshake(&mut ws).await;
    client.wait_ready(STEP).await.unwrap();

    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Offline);
    expect_closed(&mut ws).await;

    let again = timeout(Duration::from_millis(500), tv.listener.accept()).await;
    assert!(again.is_err(), "client reconnected after stop");
}

/// A refused connection is reported and retried
#[test]
async fn test_connect_failure_retries() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = TvClient::builder()
        .host("127.0.0.1")
        .port(port)
        .timings(fast_timings())
        .build();
    let mut events = client.events();

    client.connect().await;
    wait_event(&mut events, |e| matches!(e, SessionEvent::ConnectionError(_))).await;
    wait_event(&mut events, |e| *e == SessionEvent::StateChanged(ConnectionState::Offline)).await;
    wait_event(&mut events, |e| *e == SessionEvent::StateChanged(ConnectionState::Connecting)).await;

    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Offline);
}

/// A silent television is dropped by the keep-alive request
#[test]
async fn test_keep_alive_drops_silent_tv() {
    let tv = FakeTv::bind().await;
    let mut timings = fast_timings();
    timings.keep_alive_interval = Some(Duration::from_millis(150));
    let client = client_for(&tv, timings);

    client.connect().await;
    let mut ws = tv.accept().await;
    handshake(&mut ws).await;

    // Answered probe keeps the connection
    let probe = next_json(&mut ws).await;
    assert_eq!(probe["type"], "request");
    assert_eq!(probe["uri"], "ssap://system/getSystemInfo");
    send_json(
        &mut ws,
        json!({"type": "response", "id": probe["id"], "payload": {"modelName": "OLED55C1"}}),
    )
    .await;

    // Unanswered probe drops it
    let probe = next_json(&mut ws).await;
    assert_eq!(probe["uri"], "ssap://system/getSystemInfo");
    expect_closed(&mut ws).await;
    let _second = tv.accept().await;

    client.disconnect().await;
}

/// Commands go out as request envelopes; queries await their answer
#[test]
async fn test_commands_and_queries() {
    let tv = FakeTv::bind().await;
    let client = client_for(&tv, fast_timings());

    assert!(matches!(client.set_volume(3).await, Err(Error::NotConnected(_))));

    client.connect().await;
    let mut ws = tv.accept().await;
    handshake(&mut ws).await;
    client.wait_ready(STEP).await.unwrap();

    client.set_volume(12).await.unwrap();
    let request = next_json(&mut ws).await;
    assert_eq!(request["type"], "request");
    assert_eq!(request["uri"], "ssap://audio/setVolume");
    assert_eq!(request["payload"], json!({"volume": 12}));

    client.set_channel(7).await.unwrap();
    let request = next_json(&mut ws).await;
    assert_eq!(request["payload"], json!({"channelNumber": "7"}));

    let (info, ()) = tokio::join!(client.system_info(), async {
        let request = next_json(&mut ws).await;
        assert_eq!(request["uri"], "ssap://system/getSystemInfo");
        send_json(
            &mut ws,
            json!({"type": "response", "id": request["id"], "payload": {"modelName": "OLED55C1", "serialNumber": "X1"}}),
        )
        .await;
    });
    let info = info.unwrap();
    assert_eq!(info.model_name, "OLED55C1");
    assert_eq!(info.serial_number, "X1");

    client.disconnect().await;
}

/// Closing the connection on request leads to a new one
#[test]
async fn test_close_connection_reconnects() {
    let tv = FakeTv::bind().await;
    let client = client_for(&tv, fast_timings());

    client.connect().await;
    let mut ws = tv.accept().await;
    handshake(&mut ws).await;
    client.wait_ready(STEP).await.unwrap();

    client.supervisor().close_connection().await;
    expect_closed(&mut ws).await;

    let mut second = tv.accept().await;
    handshake(&mut second).await;
    client.wait_ready(STEP).await.unwrap();

    client.disconnect().await;
}

/// The manifest provider is asked again for every connection
#[test]
async fn test_manifest_provider_per_connection() {
    let tv = FakeTv::bind().await;
    let manifest = Arc::new(CountingManifest::default());
    let client = TvClient::builder()
        .host("127.0.0.1")
        .port(tv.port())
        .manifest_provider(manifest.clone())
        .timings(fast_timings())
        .build();

    client.connect().await;
    let mut ws = tv.accept().await;
    let register = next_json(&mut ws).await;
    assert_eq!(register["payload"]["client-key"], "STORED1");
    assert_eq!(
        register["payload"]["manifest"]["permissions"],
        json!(["CONTROL_AUDIO"])
    );

    client.supervisor().close_connection().await;
    expect_closed(&mut ws).await;

    let mut second = tv.accept().await;
    let register = next_json(&mut second).await;
    assert_eq!(register["payload"]["client-key"], "STORED2");
    assert_eq!(manifest.calls.load(Ordering::SeqCst), 2);

    client.disconnect().await;
}

/// A television that answers register slowly, without a prompt, keeps its
/// connection past the pairing timeout
#[test]
async fn test_slow_register_answer_keeps_connection() {
    let tv = FakeTv::bind().await;
    let mut timings = fast_timings();
    timings.pairing_timeout = Duration::from_millis(300);
    let client = client_for(&tv, timings);

    client.connect().await;
    let mut ws = tv.accept().await;
    let register = next_json(&mut ws).await;
    assert_eq!(register["type"], "register");

    let quiet = timeout(Duration::from_secs(1), ws.next()).await;
    assert!(quiet.is_err(), "client closed or wrote before the television answered");
    assert_eq!(client.state(), ConnectionState::Connected);

    send_json(
        &mut ws,
        json!({"type": "registered", "id": "5d3ed7900001", "payload": {"client-key": "KEY1"}}),
    )
    .await;
    client.wait_ready(STEP).await.unwrap();

    client.disconnect().await;
}

/// "Invalid power state" closes the connection and reconnects after its
/// own back-off
#[test]
async fn test_invalid_power_state_backoff() {
    let tv = FakeTv::bind().await;
    let mut timings = fast_timings();
    timings.power_state_backoff = Duration::from_millis(400);
    let client = client_for(&tv, timings);
    let mut events = client.events();

    client.connect().await;
    let mut ws = tv.accept().await;
    next_json(&mut ws).await;

    let rejected = Instant::now();
    send_json(
        &mut ws,
        json!({"type": "error", "id": "5d3ed7900001", "error": "403 Error!! power state", "payload": {}}),
    )
    .await;
    expect_closed(&mut ws).await;
    wait_event(&mut events, |e| *e == SessionEvent::StateChanged(ConnectionState::Offline)).await;

    let mut second = tv.accept().await;
    assert!(rejected.elapsed() >= Duration::from_millis(350));
    let register = next_json(&mut second).await;
    assert_eq!(register["id"], "5d3ed7900001");

    client.disconnect().await;
}

/// Registration wipes subscriptions made before it; only the standing
/// ones remain
#[test]
async fn test_registered_clears_pending_subscriptions() {
    let tv = FakeTv::bind().await;
    let client = client_for(&tv, fast_timings());
    let mut events = client.events();

    client.connect().await;
    let mut ws = tv.accept().await;
    let register = next_json(&mut ws).await;

    let registry = client.registry();
    let a = registry
        .subscribe("ssap://test/a", Value::Null, |_: AudioStatusResponse| Ok(()))
        .await
        .unwrap();
    registry
        .subscribe("ssap://test/b", Value::Null, |_: MuteStatusResponse| Ok(()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut ws).await["uri"], "ssap://test/a");
    assert_eq!(next_json(&mut ws).await["uri"], "ssap://test/b");
    assert_eq!(registry.len(), 2);

    send_json(
        &mut ws,
        json!({"type": "registered", "id": register["id"], "payload": {"client-key": "KEY1"}}),
    )
    .await;

    let mut standing = 0;
    while standing < 5 {
        let subscribe = next_json(&mut ws).await;
        assert_eq!(subscribe["type"], "subscribe");
        assert!(!subscribe["uri"].as_str().unwrap().starts_with("ssap://test/"));
        standing += 1;
    }
    assert_eq!(registry.len(), 5);
    assert_eq!(registry.packet_id_of::<AudioStatusResponse>("ssap://test/a"), None);
    assert_eq!(registry.packet_id_of::<MuteStatusResponse>("ssap://test/b"), None);

    // Late answers to the wiped subscription are surfaced, not dispatched
    send_json(
        &mut ws,
        json!({"type": "response", "id": format!("5d3ed79{}", a), "payload": {"volume": 1}}),
    )
    .await;
    wait_event(&mut events, |e| matches!(e, SessionEvent::UnknownPacket(_))).await;

    client.disconnect().await;
}

/// Sends that fail without a connection use up no packet id
#[test]
async fn test_failed_send_keeps_packet_numbering() {
    let tv = FakeTv::bind().await;
    let client = client_for(&tv, fast_timings());

    let offline = client
        .send(Envelope::request("ssap://audio/volumeUp", Value::Null))
        .await;
    assert!(matches!(offline, Err(Error::NotConnected(_))));

    client.connect().await;

    // Hold the handshake so the session stays in Connecting
    let (stream, _) = timeout(STEP, tv.listener.accept()).await.unwrap().unwrap();
    client
        .supervisor()
        .wait_for(ConnectionState::Connecting, STEP)
        .await
        .unwrap();

    let connecting = client
        .send(Envelope::request("ssap://audio/volumeUp", Value::Null))
        .await;
    assert!(matches!(connecting, Err(Error::NotConnected(_))));
    let subscribed = client
        .registry()
        .subscribe("ssap://test/a", Value::Null, |_: AudioStatusResponse| Ok(()))
        .await;
    assert!(matches!(subscribed, Err(Error::NotConnected(_))));

    let mut ws = accept_async(stream).await.unwrap();
    let register = next_json(&mut ws).await;
    assert_eq!(register["type"], "register");
    assert_eq!(register["id"], "5d3ed7900001");

    client.disconnect().await;
}

/// An error reply fails the query that asked
#[test]
async fn test_error_reply_fails_query() {
    let tv = FakeTv::bind().await;
    let client = client_for(&tv, fast_timings());

    client.connect().await;
    let mut ws = tv.accept().await;
    handshake(&mut ws).await;
    client.wait_ready(STEP).await.unwrap();

    let (shot, ()) = tokio::join!(client.screenshot(), async {
        let request = next_json(&mut ws).await;
        assert_eq!(request["uri"], "ssap://tv/executeOneShot");
        send_json(
            &mut ws,
            json!({"type": "error", "id": request["id"], "error": "401 insufficient permissions", "payload": {}}),
        )
        .await;
    });

    match shot {
        Err(Error::Protocol(message)) => assert!(message.contains("401")),
        other => panic!("expected protocol error, got {:?}", other),
    }
    assert_eq!(
        client
            .registry()
            .packet_id_of::<OneShotResponse>("ssap://tv/executeOneShot"),
        None
    );
    assert_eq!(client.state(), ConnectionState::Ready);

    client.disconnect().await;
}
