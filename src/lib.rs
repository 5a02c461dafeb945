//! webOS Television Remote Control Library
//!
//! This library keeps a supervised session with a webOS television: it
//! reconnects on its own, handles pairing (optionally accepting the prompt
//! through the key channel), multiplexes subscriptions over the single
//! primary connection and publishes everything as session events. The
//! encrypted secondary control channel and wake-on-LAN are available too.

pub mod client;
pub mod codec;
pub mod connection_string;
mod deadline;
pub mod envelope;
pub mod error;
pub mod events;
pub mod ip_control;
pub mod link;
pub mod pairing;
pub mod payloads;
pub mod registry;
pub mod remote_keys;
pub mod supervisor;
pub mod wol;

pub use client::{ClientConfig, Timings, TvClient, TvClientBuilder};
pub use codec::SecureCodec;
pub use connection_string::ConnectionString;
pub use envelope::{Envelope, Inbound};
pub use error::{Error, Result};
pub use events::{ConnectionState, Input, IpControlEvent, SessionEvent, TvStatus};
pub use ip_control::{IpControlClient, IpControlInput, IpControlKey};
pub use pairing::{AcceptMode, ManifestProvider, StaticManifest};
pub use payloads::PairingRequest;
pub use registry::{Outbound, PayloadKind, SubscribeMode, SubscriptionRegistry};
pub use remote_keys::{RemoteKey, RemoteKeys, TelnetRemote};
pub use supervisor::{SessionHandle, Supervisor};

/// Default port of the primary channel
pub const DEFAULT_PORT: u16 = 3000;

/// Default port of the encrypted secondary channel
pub const DEFAULT_IP_CONTROL_PORT: u16 = 9761;

/// Default port of the key channel
pub const DEFAULT_KEY_PORT: u16 = 9761;

/// A simple example of using the client:
///
/// ```rust,no_run
/// use lgremote::{AcceptMode, SessionEvent, TvClient};
/// use tokio::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// // Create the client
/// let client = TvClient::builder()
///     .connection_string("PASSPHRASE@192.168.1.40")?
///     .mac_address("a8:23:fe:01:02:0c")
///     .accept_mode(AcceptMode::DownEnter)
///     .build();
///
/// // Start the session; it keeps reconnecting until disconnected
/// let mut events = client.events();
/// client.connect().await;
/// client.wait_ready(Duration::from_secs(30)).await?;
///
/// client.set_volume(12).await?;
///
/// while let Ok(event) = events.recv().await {
///     if let SessionEvent::ClientKeyChanged(key) = event {
///         println!("store this key: {}", key);
///         break;
///     }
/// }
///
/// client.disconnect().await;
/// # Ok(())
/// # }
/// ```
#[doc(hidden)]
pub struct Examples;
