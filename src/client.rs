use crate::{
    codec::SecureCodec,
    connection_string::ConnectionString,
    envelope::Envelope,
    error::{Error, Result},
    events::{event_channel, ConnectionState, EventSender, SessionEvent, TvStatus},
    ip_control::IpControlClient,
    pairing::{AcceptMode, ManifestProvider, PairingSettings, StaticManifest},
    payloads::{
        to_payload, CreateToastRequest, LaunchAppRequest, OneShotResponse, OpenChannelRequest,
        PairingRequest, SetMuteRequest, SetVolumeRequest, SwitchInputRequest, SystemInfoResponse,
        URI_CREATE_TOAST, URI_LAUNCH_APP, URI_OPEN_CHANNEL, URI_SCREENSHOT, URI_SCREEN_OFF,
        URI_SCREEN_ON, URI_SET_MUTE, URI_SET_VOLUME, URI_SWITCH_INPUT, URI_SYSTEM_INFO,
        URI_TURN_OFF,
    },
    registry::SubscriptionRegistry,
    remote_keys::{RemoteKey, RemoteKeys, TelnetRemote},
    supervisor::{SessionHandle, Supervisor},
    wol, DEFAULT_IP_CONTROL_PORT, DEFAULT_KEY_PORT, DEFAULT_PORT,
};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{broadcast, oneshot, watch},
    time,
};

/// Every duration the session uses
#[derive(Debug, Clone, PartialEq)]
pub struct Timings {
    /// Limit for opening the primary connection
    pub connect_timeout: Duration,

    /// Pause after a failed connection attempt
    pub reconnect_delay: Duration,

    /// Limit for a single frame write
    pub write_timeout: Duration,

    /// Time the television gets to finish pairing
    pub pairing_timeout: Duration,

    /// Pause around the auto-accept key presses
    pub accept_settle: Duration,

    /// Pause after "too many pairing requests"
    pub too_many_requests_backoff: Duration,

    /// Pause after an invalid power state reply
    pub power_state_backoff: Duration,

    /// Probe interval while Ready; `None` disables the probe
    pub keep_alive_interval: Option<Duration>,

    /// Limit for the probe answer
    pub keep_alive_timeout: Duration,

    /// Limit for one-shot queries made through the client
    pub response_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(3),
            write_timeout: Duration::from_secs(3),
            pairing_timeout: Duration::from_secs(5),
            accept_settle: Duration::from_secs(1),
            too_many_requests_backoff: Duration::from_secs(3),
            power_state_backoff: Duration::from_secs(1),
            keep_alive_interval: Some(Duration::from_secs(30)),
            keep_alive_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(5),
        }
    }
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Television hostname or IP address
    pub host: String,

    /// Primary channel port
    pub port: u16,

    /// Secondary (encrypted) channel port
    pub ip_control_port: u16,

    /// Key channel port used by pairing auto-accept
    pub key_port: u16,

    /// Secondary channel passphrase; the channel is unavailable without it
    pub passphrase: Option<String>,

    /// MAC address for wake-on-LAN
    pub mac_address: Option<String>,

    /// Client key from an earlier pairing
    pub client_key: Option<String>,

    /// How to confirm the pairing prompt
    pub accept_mode: AcceptMode,

    /// Timeouts and back-off delays
    pub timings: Timings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            ip_control_port: DEFAULT_IP_CONTROL_PORT,
            key_port: DEFAULT_KEY_PORT,
            passphrase: None,
            mac_address: None,
            client_key: None,
            accept_mode: AcceptMode::Never,
            timings: Timings::default(),
        }
    }
}

impl ClientConfig {
    /// Primary channel endpoint
    pub fn websocket_url(&self) -> String {
        ConnectionString {
            passphrase: None,
            host: self.host.clone(),
            port: Some(self.port),
        }
        .websocket_url(self.port)
    }
}

/// Builder for creating a television client
#[derive(Default)]
pub struct TvClientBuilder {
    /// Client configuration
    config: ClientConfig,

    manifest: Option<Arc<dyn ManifestProvider>>,
    remote: Option<Arc<dyn RemoteKeys>>,
}

impl std::fmt::Debug for TvClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TvClientBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TvClientBuilder {
    /// Create a new client builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set host, port and passphrase from a connection string
    /// (passphrase@host:port or lgtv://passphrase@host:port)
    pub fn connection_string(mut self, conn_str: &str) -> Result<Self> {
        let conn = ConnectionString::parse(conn_str)?;

        self.config.host = conn.host;

        if let Some(port) = conn.port {
            self.config.port = port;
        }

        if let Some(passphrase) = conn.passphrase {
            self.config.passphrase = Some(passphrase);
        }

        Ok(self)
    }

    /// Set the television host
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the primary channel port
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the secondary channel port
    pub fn ip_control_port(mut self, port: u16) -> Self {
        self.config.ip_control_port = port;
        self
    }

    /// Set the key channel port
    pub fn key_port(mut self, port: u16) -> Self {
        self.config.key_port = port;
        self
    }

    /// Set the secondary channel passphrase
    pub fn passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.config.passphrase = Some(passphrase.into());
        self
    }

    /// Set the MAC address used to wake the television
    pub fn mac_address(mut self, mac: impl Into<String>) -> Self {
        self.config.mac_address = Some(mac.into());
        self
    }

    /// Reuse a client key from an earlier pairing
    pub fn client_key(mut self, key: impl Into<String>) -> Self {
        self.config.client_key = Some(key.into());
        self
    }

    /// Set the pairing accept mode
    pub fn accept_mode(mut self, mode: AcceptMode) -> Self {
        self.config.accept_mode = mode;
        self
    }

    /// Replace all timings
    pub fn timings(mut self, timings: Timings) -> Self {
        self.config.timings = timings;
        self
    }

    /// Supply the register payload (manifest and stored key) per connection
    pub fn manifest_provider(mut self, provider: Arc<dyn ManifestProvider>) -> Self {
        self.manifest = Some(provider);
        self
    }

    /// Use a custom key channel for pairing auto-accept
    pub fn remote_keys(mut self, remote: Arc<dyn RemoteKeys>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Build the client
    pub fn build(self) -> TvClient {
        TvClient::with_parts(self.config, self.manifest, self.remote)
    }
}

/// Television client: the supervised primary channel plus the optional
/// secondary and key channels.
pub struct TvClient {
    /// Client configuration
    config: ClientConfig,

    supervisor: Supervisor,
    ip_control: Option<IpControlClient>,
    remote: Arc<dyn RemoteKeys>,
    events: EventSender,
}

impl std::fmt::Debug for TvClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TvClient")
            .field("config", &self.config)
            .field("supervisor", &self.supervisor)
            .finish_non_exhaustive()
    }
}

impl TvClient {
    /// Create a new client
    pub fn new(config: ClientConfig) -> Self {
        Self::with_parts(config, None, None)
    }

    /// Create a new client builder
    pub fn builder() -> TvClientBuilder {
        TvClientBuilder::new()
    }

    fn with_parts(
        config: ClientConfig,
        manifest: Option<Arc<dyn ManifestProvider>>,
        remote: Option<Arc<dyn RemoteKeys>>,
    ) -> Self {
        let events = event_channel();
        let timings = config.timings.clone();

        let remote: Arc<dyn RemoteKeys> = match remote {
            Some(remote) => remote,
            None => Arc::new(TelnetRemote::new(
                &config.host,
                config.key_port,
                timings.connect_timeout,
                timings.write_timeout,
            )),
        };

        let manifest: Arc<dyn ManifestProvider> = match manifest {
            Some(manifest) => manifest,
            None => {
                let mut request = PairingRequest::default();
                request.client_key = config.client_key.clone();
                Arc::new(StaticManifest(request))
            }
        };

        let pairing = PairingSettings {
            accept_mode: config.accept_mode,
            manifest: Some(manifest),
            remote: Some(Arc::clone(&remote)),
            timeout: timings.pairing_timeout,
            settle: timings.accept_settle,
        };

        let supervisor = Supervisor::new(
            config.websocket_url(),
            timings.clone(),
            pairing,
            events.clone(),
        );

        let ip_control = config.passphrase.as_deref().map(|passphrase| {
            IpControlClient::new(
                &config.host,
                config.ip_control_port,
                SecureCodec::new(passphrase),
                events.clone(),
                timings.connect_timeout,
                timings.write_timeout,
            )
        });

        Self {
            config,
            supervisor,
            ip_control,
            remote,
            events,
        }
    }

    /// Get the client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Start the session; returns at once, the session reconnects on its own
    pub async fn connect(&self) -> SessionHandle {
        info!("Connecting to television at {}", self.config.host);
        self.supervisor.start().await
    }

    /// Stop the session and close every channel
    pub async fn disconnect(&self) {
        info!("Disconnecting from television");
        self.supervisor.stop().await;
        if let Some(ip_control) = &self.ip_control {
            ip_control.disconnect().await;
        }
        self.remote.close().await;
    }

    /// Get the current state
    pub fn state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    /// Watch state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.supervisor.watch_state()
    }

    /// Wait for the Ready state
    pub async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        self.supervisor.wait_for(ConnectionState::Ready, timeout).await
    }

    /// Subscribe to session events
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Last known television status
    pub fn status(&self) -> TvStatus {
        self.supervisor.status()
    }

    /// Get the connection supervisor
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Get the subscription registry
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        self.supervisor.registry()
    }

    /// Secondary channel; needs a passphrase
    pub fn ip_control(&self) -> Result<&IpControlClient> {
        self.ip_control
            .as_ref()
            .ok_or_else(|| Error::Other("no secondary channel passphrase configured".to_string()))
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Ready => Ok(()),
            state => Err(Error::NotConnected(format!("television is {}", state))),
        }
    }

    /// Send a raw envelope; returns its wire id
    pub async fn send(&self, envelope: Envelope) -> Result<String> {
        self.supervisor.send(envelope).await
    }

    async fn request(&self, uri: &str, payload: Value) -> Result<()> {
        self.ensure_ready()?;
        let id = self.supervisor.request(uri, payload).await?;
        debug!("Requested {} as {}", uri, id);
        Ok(())
    }

    /// One-shot request awaiting its answer.
    ///
    /// An error reply from the television becomes [`Error::Protocol`].
    pub async fn query<T>(&self, uri: &str, payload: Value) -> Result<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.ensure_ready()?;

        let (tx, rx) = oneshot::channel::<Result<T>>();
        self.registry()
            .request_reply(uri, payload, move |reply: Result<T>| {
                let _ = tx.send(reply);
                Ok(())
            })
            .await?;

        match time::timeout(self.config.timings.response_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(Error::Connection(format!(
                "connection reset before {} answered",
                uri
            ))),
            Err(_) => {
                // A stale entry would swallow the next query for the same uri
                self.registry().unregister::<T>(uri);
                Err(Error::Timeout(format!("no answer from {}", uri)))
            }
        }
    }

    /// Set the volume level
    pub async fn set_volume(&self, volume: i32) -> Result<()> {
        self.request(URI_SET_VOLUME, to_payload(&SetVolumeRequest { volume })?)
            .await
    }

    /// Mute or unmute the sound
    pub async fn set_mute(&self, mute: bool) -> Result<()> {
        self.request(URI_SET_MUTE, to_payload(&SetMuteRequest { mute })?)
            .await
    }

    /// Switch to a channel number
    pub async fn set_channel(&self, channel: i32) -> Result<()> {
        let request = OpenChannelRequest {
            channel_number: channel.to_string(),
        };
        self.request(URI_OPEN_CHANNEL, to_payload(&request)?).await
    }

    /// Show a notification on screen
    pub async fn show_toast(&self, message: impl Into<String>) -> Result<()> {
        let request = CreateToastRequest {
            message: message.into(),
        };
        self.request(URI_CREATE_TOAST, to_payload(&request)?).await
    }

    /// Launch an application by id
    pub async fn launch_app(&self, app_id: impl Into<String>) -> Result<()> {
        let request = LaunchAppRequest { id: app_id.into() };
        self.request(URI_LAUNCH_APP, to_payload(&request)?).await
    }

    /// Switch to an external input by id
    pub async fn switch_input(&self, input_id: impl Into<String>) -> Result<()> {
        let request = SwitchInputRequest {
            input_id: input_id.into(),
        };
        self.request(URI_SWITCH_INPUT, to_payload(&request)?).await
    }

    /// Turn the television off
    pub async fn turn_off(&self) -> Result<()> {
        self.request(URI_TURN_OFF, Value::Null).await
    }

    /// Turn the screen off, keeping the sound
    pub async fn screen_off(&self) -> Result<()> {
        self.request(URI_SCREEN_OFF, Value::Null).await
    }

    /// Turn the screen back on
    pub async fn screen_on(&self) -> Result<()> {
        self.request(URI_SCREEN_ON, Value::Null).await
    }

    /// Capture the screen; returns the image URI served by the television
    pub async fn screenshot(&self) -> Result<String> {
        let response: OneShotResponse = self.query(URI_SCREENSHOT, Value::Null).await?;
        Ok(response.image_uri)
    }

    /// Read model name and serial number
    pub async fn system_info(&self) -> Result<SystemInfoResponse> {
        self.query(URI_SYSTEM_INFO, Value::Null).await
    }

    /// Wake the television; needs the MAC address
    pub async fn turn_on(&self) -> Result<()> {
        let mac = self
            .config
            .mac_address
            .as_deref()
            .ok_or_else(|| Error::Other("no MAC address configured".to_string()))?;
        wol::wake(&self.config.host, mac).await
    }

    /// Press a key on the key channel
    pub async fn press_key(&self, key: RemoteKey) -> Result<()> {
        self.remote.send_key(key).await.map_err(|e| {
            warn!("Key {:?} not sent: {}", key, e);
            e
        })
    }
}
