//! Pairing: the register envelope, the pairing deadline and the optional
//! key sequence that accepts the on-screen prompt without a person.

use crate::deadline::Deadline;
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::events::{emit, ConnectionState, EventSender, SessionEvent};
use crate::link::Link;
use crate::payloads::{to_payload, PairingRequest};
use crate::remote_keys::{RemoteKey, RemoteKeys};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;

/// Key sequence that confirms the pairing prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcceptMode {
    /// Leave the prompt to the user
    #[default]
    Never,

    /// Move focus down, then press Enter
    DownEnter,

    /// Move focus right, then press Enter
    RightEnter,
}

impl AcceptMode {
    pub fn keys(&self) -> Option<[RemoteKey; 2]> {
        match self {
            Self::Never => None,
            Self::DownEnter => Some([RemoteKey::Down, RemoteKey::Enter]),
            Self::RightEnter => Some([RemoteKey::Right, RemoteKey::Enter]),
        }
    }
}

impl std::str::FromStr for AcceptMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "never" | "none" => Ok(Self::Never),
            "downenter" => Ok(Self::DownEnter),
            "rightenter" => Ok(Self::RightEnter),
            other => Err(Error::Other(format!("unknown accept mode: {}", other))),
        }
    }
}

/// Supplies the register payload for every connection.
///
/// Asked again on each reconnect, so a provider can hand out a client key
/// stored after an earlier pairing.
#[async_trait]
pub trait ManifestProvider: Send + Sync {
    async fn pairing_request(&self) -> Result<PairingRequest>;
}

/// Fixed register payload
#[derive(Debug, Clone, Default)]
pub struct StaticManifest(pub PairingRequest);

#[async_trait]
impl ManifestProvider for StaticManifest {
    async fn pairing_request(&self) -> Result<PairingRequest> {
        Ok(self.0.clone())
    }
}

/// What the coordinator needs besides the link
#[derive(Clone, Default)]
pub struct PairingSettings {
    pub accept_mode: AcceptMode,
    pub manifest: Option<Arc<dyn ManifestProvider>>,
    pub remote: Option<Arc<dyn RemoteKeys>>,
    pub timeout: Duration,
    pub settle: Duration,
}

impl fmt::Debug for PairingSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingSettings")
            .field("accept_mode", &self.accept_mode)
            .field("manifest", &self.manifest.is_some())
            .field("remote", &self.remote.is_some())
            .field("timeout", &self.timeout)
            .field("settle", &self.settle)
            .finish()
    }
}

pub(crate) struct PairingCoordinator {
    link: Arc<Link>,
    events: EventSender,
    settings: PairingSettings,
    pending: Mutex<Option<Deadline>>,
}

impl PairingCoordinator {
    pub fn new(link: Arc<Link>, events: EventSender, settings: PairingSettings) -> Self {
        Self {
            link,
            events,
            settings,
            pending: Mutex::new(None),
        }
    }

    fn pending(&self) -> MutexGuard<'_, Option<Deadline>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Send the register envelope on a fresh connection.
    ///
    /// The deadline is not armed here: a television that answers slowly
    /// without prompting keeps its connection.
    pub async fn register(&self) -> Result<()> {
        let request = match &self.settings.manifest {
            Some(provider) => provider.pairing_request().await?,
            None => PairingRequest::default(),
        };
        if request.client_key.is_none() {
            debug!("Registering without a client key; expect a pairing prompt");
        }

        self.link.send(Envelope::register(to_payload(&request)?)).await?;
        Ok(())
    }

    /// Follow a state transition of the session.
    ///
    /// Entering Pairing (re)arms the deadline; leaving it for Ready, Offline
    /// or Connecting cancels the pending pairing.
    pub fn on_state(&self, state: ConnectionState, session: &CancellationToken) {
        match state {
            ConnectionState::Pairing => {
                let token = self.arm(session);
                self.auto_accept(token);
            }
            ConnectionState::Connected => {}
            ConnectionState::Ready | ConnectionState::Offline | ConnectionState::Connecting => {
                if self.pending().take().is_some() {
                    debug!("Pairing deadline cancelled ({})", state);
                }
            }
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending().is_some()
    }

    /// (Re)start the deadline; returns the token of the new deadline
    fn arm(&self, session: &CancellationToken) -> CancellationToken {
        let link = Arc::clone(&self.link);
        let timeout = self.settings.timeout;
        let deadline = Deadline::arm(session, timeout, move || async move {
            warn!("Pairing not completed within {:?}; reconnecting", timeout);
            link.close_output("pairing deadline expired").await;
        });
        let token = deadline.token();
        // Replacing drops, and so cancels, the previous deadline
        *self.pending() = Some(deadline);
        token
    }

    fn auto_accept(&self, token: CancellationToken) {
        let Some(keys) = self.settings.accept_mode.keys() else {
            return;
        };
        let Some(remote) = self.settings.remote.clone() else {
            warn!(
                "Auto-accept {:?} configured without a key channel",
                self.settings.accept_mode
            );
            return;
        };

        let settle = self.settings.settle;
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => debug!("Auto-accept abandoned"),
                result = accept_sequence(remote.as_ref(), keys, settle) => match result {
                    Ok(()) => info!("Pairing prompt accepted with {:?}", keys),
                    Err(e) => {
                        warn!("Auto-accept failed: {}", e);
                        emit(&events, SessionEvent::ConnectionError(e.to_string()));
                    }
                },
            }
        });
    }
}

async fn accept_sequence(
    remote: &dyn RemoteKeys,
    keys: [RemoteKey; 2],
    settle: Duration,
) -> Result<()> {
    // Let the prompt render before touching the remote
    time::sleep(settle).await;
    let pressed = async {
        remote.open().await?;
        remote.send_key(keys[0]).await?;
        time::sleep(settle).await;
        remote.send_key(keys[1]).await
    }
    .await;
    pressed.map_err(|e| Error::Pairing(format!("key channel: {}", e)))
}
