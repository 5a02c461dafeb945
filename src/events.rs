use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Capacity of the session event channel
pub const EVENT_CAPACITY: usize = 256;

/// Lifecycle state of the primary channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection; set before every connection attempt
    Offline,

    /// Opening the duplex connection
    Connecting,

    /// Connected, registration sent
    Connected,

    /// The television shows a pairing prompt
    Pairing,

    /// Registered; commands and subscriptions are accepted
    Ready,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Offline => "offline",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Pairing => "pairing",
            Self::Ready => "ready",
        };
        write!(f, "{}", name)
    }
}

/// Input source derived from the foreground application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Input {
    #[default]
    Unknown,
    LiveTv,
    Browser,
    Hdmi1,
    Hdmi2,
    Hdmi3,
}

impl Input {
    pub fn from_app_id(app_id: &str) -> Self {
        match app_id {
            "com.webos.app.livetv" => Self::LiveTv,
            "com.webos.app.browser" => Self::Browser,
            "com.webos.app.hdmi1" => Self::Hdmi1,
            "com.webos.app.hdmi2" => Self::Hdmi2,
            "com.webos.app.hdmi3" => Self::Hdmi3,
            _ => Self::Unknown,
        }
    }
}

/// Last known television status, kept current by the standing subscriptions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TvStatus {
    pub screen_on: bool,
    pub channel: Option<i32>,
    pub volume: Option<i32>,
    pub mute: bool,
    pub input: Input,
}

/// Unsolicited lines of the secondary channel
#[derive(Debug, Clone, PartialEq)]
pub enum IpControlEvent {
    Volume(i32),
    App(String),
    Channel(String),
    Mute(bool),
    /// Any line without a known prefix
    Error(String),
}

/// Everything a session reports to its observers
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(ConnectionState),

    /// A pairing issued a (new) client key; callers persist it
    ClientKeyChanged(String),

    /// Every inbound text frame, before classification
    RawMessage(String),

    ScreenStateChanged(bool),
    ChannelChanged(Option<i32>),
    VolumeChanged { volume: i32, via_remote: bool },
    MuteChanged(bool),
    InputChanged(Input),

    /// A routed packet matched no subscription
    UnknownPacket(String),

    /// Soft connection failure; the session keeps reconnecting
    ConnectionError(String),

    /// An inbound frame could not be handled
    MessageError(String),

    /// A subscription callback failed
    SubscriptionError { uri: String, message: String },

    IpControl(IpControlEvent),
}

pub type EventSender = broadcast::Sender<SessionEvent>;

pub(crate) fn event_channel() -> EventSender {
    broadcast::channel(EVENT_CAPACITY).0
}

/// Publish an event; having no receivers is fine
pub(crate) fn emit(events: &EventSender, event: SessionEvent) {
    let _ = events.send(event);
}

/// Shared status snapshot
#[derive(Debug, Clone, Default)]
pub(crate) struct StatusCell {
    inner: Arc<Mutex<TvStatus>>,
}

impl StatusCell {
    pub fn snapshot(&self) -> TvStatus {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn update(&self, apply: impl FnOnce(&mut TvStatus)) {
        let mut status = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        apply(&mut status);
    }
}
