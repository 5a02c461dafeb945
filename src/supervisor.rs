//! Connection supervisor: owns the primary channel, reconnects forever until
//! stopped, and turns inbound frames into state transitions, subscription
//! dispatch and session events.

use crate::client::Timings;
use crate::envelope::{classify, Envelope, Inbound};
use crate::error::{Error, Result};
use crate::events::{emit, ConnectionState, EventSender, Input, SessionEvent, StatusCell, TvStatus};
use crate::link::{Link, WsSource};
use crate::pairing::{PairingCoordinator, PairingSettings};
use crate::payloads::{
    to_payload, AudioStatusResponse, CurrentChannelResponse, ForegroundAppInfoResponse,
    MuteStatusResponse, PowerStateRequest, PowerStateResponse, SystemInfoResponse, URI_AUDIO_STATUS,
    URI_CURRENT_CHANNEL, URI_FOREGROUND_APP, URI_GET_MUTE, URI_POWER_STATE, URI_SYSTEM_INFO,
};
use crate::registry::SubscriptionRegistry;
use futures_util::StreamExt;
use log::{debug, error, info, trace, warn};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Identity of one run of the reconnect loop
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: Uuid,
    token: CancellationToken,
}

impl SessionHandle {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            token: CancellationToken::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

struct Running {
    handle: SessionHandle,
    task: JoinHandle<()>,
}

/// State shared between the supervisor and its loop task
struct Shared {
    url: String,
    timings: Timings,
    link: Arc<Link>,
    registry: Arc<SubscriptionRegistry>,
    pairing: PairingCoordinator,
    state: watch::Sender<ConnectionState>,
    events: EventSender,
    status: StatusCell,
}

/// Supervisor of the primary channel
pub struct Supervisor {
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("url", &self.shared.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    pub fn new(
        url: impl Into<String>,
        timings: Timings,
        pairing: PairingSettings,
        events: EventSender,
    ) -> Self {
        let link = Arc::new(Link::new(timings.write_timeout));
        let registry = Arc::new(SubscriptionRegistry::new(link.clone(), events.clone()));
        let pairing = PairingCoordinator::new(link.clone(), events.clone(), pairing);
        let (state, _) = watch::channel(ConnectionState::Offline);

        Self {
            shared: Arc::new(Shared {
                url: url.into(),
                timings,
                link,
                registry,
                pairing,
                state,
                events,
                status: StatusCell::default(),
            }),
            running: Mutex::new(None),
        }
    }

    /// Start the reconnect loop and return immediately.
    ///
    /// Starting an already running supervisor returns the current handle.
    pub async fn start(&self) -> SessionHandle {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            if !current.task.is_finished() {
                return current.handle.clone();
            }
        }

        let handle = SessionHandle::new();
        let task = tokio::spawn(run(Arc::clone(&self.shared), handle.clone()));
        *running = Some(Running {
            handle: handle.clone(),
            task,
        });
        handle
    }

    /// Stop the loop; no reconnect attempt follows
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        info!("Stopping session {}", running.handle.id);
        running.handle.token.cancel();
        if let Err(e) = running.task.await {
            if e.is_panic() {
                error!("Session {} panicked: {}", running.handle.id, e);
            }
        }
        self.shared.set_state(ConnectionState::Offline, &running.handle.token);
    }

    pub async fn session(&self) -> Option<SessionHandle> {
        self.running.lock().await.as_ref().map(|r| r.handle.clone())
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub fn status(&self) -> TvStatus {
        self.shared.status.snapshot()
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.shared.registry
    }

    /// Wait until the session reaches `state`
    pub async fn wait_for(&self, state: ConnectionState, timeout: Duration) -> Result<()> {
        let mut rx = self.watch_state();
        let reached = time::timeout(timeout, rx.wait_for(|current| *current == state))
            .await
            .map(|seen| seen.is_ok());

        match reached {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::Other("state channel closed".to_string())),
            Err(_) => Err(Error::Timeout(format!("waiting for {} state", state))),
        }
    }

    /// Send an envelope; an id is assigned when missing. Returns the wire id.
    pub async fn send(&self, envelope: Envelope) -> Result<String> {
        self.shared.link.send(envelope).await
    }

    /// Fire-and-forget request
    pub async fn request(&self, uri: &str, payload: Value) -> Result<String> {
        self.send(Envelope::request(uri, payload)).await
    }

    /// Close the current connection; the loop reconnects
    pub async fn close_connection(&self) {
        self.shared.link.close_output("closed by caller").await;
    }
}

async fn run(shared: Arc<Shared>, session: SessionHandle) {
    let token = &session.token;
    info!("Session {} started for {}", session.id, shared.url);

    while !token.is_cancelled() {
        shared.set_state(ConnectionState::Offline, token);
        shared.set_state(ConnectionState::Connecting, token);

        debug!("Connecting to {}", shared.url);
        let attempt = tokio::select! {
            _ = token.cancelled() => break,
            attempt = time::timeout(shared.timings.connect_timeout, connect_async(shared.url.as_str())) => attempt,
        };

        let stream = match attempt {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => {
                shared.soft_failure(format!("connect to {} failed: {}", shared.url, e));
                if !shared.pause(shared.timings.reconnect_delay, token).await {
                    break;
                }
                continue;
            }
            Err(_) => {
                shared.soft_failure(format!(
                    "connect to {} timed out after {:?}",
                    shared.url, shared.timings.connect_timeout
                ));
                if !shared.pause(shared.timings.reconnect_delay, token).await {
                    break;
                }
                continue;
            }
        };

        let (sink, source) = stream.split();
        let connection = shared.link.attach(sink, token).await;
        shared.set_state(ConnectionState::Connected, token);

        if let Err(e) = shared.pairing.register().await {
            shared.soft_failure(format!("register failed: {}", e));
        }

        shared.read_loop(source, &connection, token).await;
        shared.link.detach().await;
        debug!("Connection to {} ended", shared.url);
    }

    shared.link.detach().await;
    shared.set_state(ConnectionState::Offline, token);
    info!("Session {} stopped", session.id);
}

impl Shared {
    fn set_state(&self, state: ConnectionState, session: &CancellationToken) {
        let previous = self.state.send_replace(state);
        if previous == state {
            return;
        }
        debug!("State {} -> {}", previous, state);
        emit(&self.events, SessionEvent::StateChanged(state));
        self.pairing.on_state(state, session);
    }

    fn soft_failure(&self, message: String) {
        warn!("{}", message);
        emit(&self.events, SessionEvent::ConnectionError(message));
    }

    /// Sleep unless the session ends first; `false` when it ended
    async fn pause(&self, duration: Duration, session: &CancellationToken) -> bool {
        tokio::select! {
            _ = session.cancelled() => false,
            _ = time::sleep(duration) => true,
        }
    }

    async fn read_loop(
        self: &Arc<Self>,
        mut source: WsSource,
        connection: &CancellationToken,
        session: &CancellationToken,
    ) {
        loop {
            let next = tokio::select! {
                _ = connection.cancelled() => {
                    debug!("Connection closed locally");
                    break;
                }
                next = source.next() => next,
            };

            let message = match next {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    self.soft_failure(format!("read failed: {}", e));
                    break;
                }
                None => {
                    debug!("Connection closed by television");
                    break;
                }
            };

            let text = match message {
                Message::Text(text) => text.as_str().to_owned(),
                Message::Binary(data) => String::from_utf8_lossy(&data).into_owned(),
                Message::Close(frame) => {
                    debug!("Close frame received: {:?}", frame);
                    break;
                }
                _ => continue,
            };
            if text.is_empty() {
                continue;
            }

            trace!("Received {}", text);
            emit(&self.events, SessionEvent::RawMessage(text.clone()));
            self.handle_text(&text, connection, session).await;
        }
    }

    async fn handle_text(
        self: &Arc<Self>,
        text: &str,
        connection: &CancellationToken,
        session: &CancellationToken,
    ) {
        let inbound = match classify(text) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!("Dropping malformed frame: {}", e);
                emit(&self.events, SessionEvent::MessageError(format!("{}: {}", e, text)));
                return;
            }
        };

        match inbound {
            Inbound::Registered { client_key } => {
                self.registry.clear();
                self.set_state(ConnectionState::Ready, session);
                match client_key {
                    Some(key) => emit(&self.events, SessionEvent::ClientKeyChanged(key)),
                    None => warn!("Registration reply carried no client key"),
                }
                if let Err(e) = self.subscribe_status().await {
                    self.soft_failure(format!("standing subscriptions failed: {}", e));
                }
                self.start_keep_alive(connection.clone());
            }
            Inbound::PairingPrompt => {
                info!("Television shows a pairing prompt");
                self.set_state(ConnectionState::Pairing, session);
            }
            Inbound::TooManyPairingRequests => {
                warn!("Television refused pairing: too many requests");
                self.link.close_output("too many pairing requests").await;
                self.pause(self.timings.too_many_requests_backoff, session).await;
            }
            Inbound::InvalidPowerState => {
                debug!("Television is in a power state without the API");
                self.link.close_output("invalid power state").await;
                self.pause(self.timings.power_state_backoff, session).await;
            }
            Inbound::Routed(envelope) => {
                let failure = envelope.failure();
                let dispatched = match (envelope.local_id(), failure) {
                    (Some(id), Some(error)) => {
                        debug!("Television reported error for {}: {}", id, error);
                        self.registry.dispatch_error(id, error)
                    }
                    (Some(id), None) => self.registry.dispatch(id, envelope.payload.clone()),
                    (None, _) => false,
                };
                if !dispatched {
                    trace!("No subscription for {:?}", envelope.id);
                    emit(&self.events, SessionEvent::UnknownPacket(text.to_string()));
                }
            }
        }
    }

    /// Subscriptions that keep the status snapshot current
    async fn subscribe_status(&self) -> Result<()> {
        let (status, events) = (self.status.clone(), self.events.clone());
        self.registry
            .subscribe(
                URI_POWER_STATE,
                to_payload(&PowerStateRequest { subscribe: true })?,
                move |power: PowerStateResponse| {
                    let on = power.state.eq_ignore_ascii_case("active");
                    status.update(|s| s.screen_on = on);
                    emit(&events, SessionEvent::ScreenStateChanged(on));
                    Ok(())
                },
            )
            .await?;

        let (status, events) = (self.status.clone(), self.events.clone());
        self.registry
            .subscribe(
                URI_CURRENT_CHANNEL,
                Value::Null,
                move |channel: CurrentChannelResponse| {
                    let number = channel.channel_number.trim().parse::<i32>().ok();
                    status.update(|s| s.channel = number);
                    emit(&events, SessionEvent::ChannelChanged(number));
                    Ok(())
                },
            )
            .await?;

        let (status, events) = (self.status.clone(), self.events.clone());
        self.registry
            .subscribe(
                URI_FOREGROUND_APP,
                Value::Null,
                move |app: ForegroundAppInfoResponse| {
                    if app.app_id.is_empty() {
                        return Ok(());
                    }
                    let input = Input::from_app_id(&app.app_id);
                    status.update(|s| s.input = input);
                    emit(&events, SessionEvent::InputChanged(input));
                    Ok(())
                },
            )
            .await?;

        let (status, events) = (self.status.clone(), self.events.clone());
        self.registry
            .subscribe(
                URI_AUDIO_STATUS,
                Value::Null,
                move |audio: AudioStatusResponse| {
                    let mute = audio.mute.or(audio.volume_status.mute_status);
                    let volume = audio.current_volume();
                    status.update(|s| {
                        if volume.is_some() {
                            s.volume = volume;
                        }
                        if let Some(mute) = mute {
                            s.mute = mute;
                        }
                    });
                    if let Some(volume) = volume {
                        emit(
                            &events,
                            SessionEvent::VolumeChanged {
                                volume,
                                via_remote: audio.via_remote(),
                            },
                        );
                    }
                    Ok(())
                },
            )
            .await?;

        let (status, events) = (self.status.clone(), self.events.clone());
        self.registry
            .subscribe(URI_GET_MUTE, Value::Null, move |mute: MuteStatusResponse| {
                status.update(|s| s.mute = mute.mute);
                emit(&events, SessionEvent::MuteChanged(mute.mute));
                Ok(())
            })
            .await?;

        Ok(())
    }

    /// Probe a Ready connection; a silent television is reconnected
    fn start_keep_alive(self: &Arc<Self>, connection: CancellationToken) {
        let Some(interval) = self.timings.keep_alive_interval else {
            return;
        };
        let timeout = self.timings.keep_alive_timeout;
        let shared = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                if !shared.pause(interval, &connection).await {
                    break;
                }

                let (tx, rx) = oneshot::channel();
                let sent = shared
                    .registry
                    .request_reply(URI_SYSTEM_INFO, Value::Null, move |_: Result<SystemInfoResponse>| {
                        // An error reply still proves the television is alive
                        let _ = tx.send(());
                        Ok(())
                    })
                    .await;
                if let Err(e) = sent {
                    debug!("Keep-alive probe not sent: {}", e);
                    break;
                }

                let answered = tokio::select! {
                    _ = connection.cancelled() => break,
                    answer = time::timeout(timeout, rx) => matches!(answer, Ok(Ok(()))),
                };
                if !answered {
                    warn!("Keep-alive unanswered within {:?}", timeout);
                    shared.link.close_output("keep-alive timeout").await;
                    break;
                }
                trace!("Keep-alive answered");
            }
        });
    }
}
