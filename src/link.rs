use crate::envelope::{wire_id, Envelope, PacketCounter};
use crate::error::{Error, Result};
use crate::registry::Outbound;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::SinkExt;
use log::{debug, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub(crate) type WsSink = SplitSink<WsStream, Message>;
pub(crate) type WsSource = SplitStream<WsStream>;

/// Write side of the current primary connection.
///
/// Outlives individual connections: the supervisor attaches the write half of
/// every new connection and detaches it when the connection ends. Closing the
/// link cancels the connection token the read loop waits on.
pub struct Link {
    writer: tokio::sync::Mutex<Option<WsSink>>,
    counter: PacketCounter,
    connection: Mutex<CancellationToken>,
    attached: AtomicBool,
    write_timeout: Duration,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("write_timeout", &self.write_timeout)
            .finish_non_exhaustive()
    }
}

impl Link {
    pub fn new(write_timeout: Duration) -> Self {
        let closed = CancellationToken::new();
        closed.cancel();
        Self {
            writer: tokio::sync::Mutex::new(None),
            counter: PacketCounter::new(),
            connection: Mutex::new(closed),
            attached: AtomicBool::new(false),
            write_timeout,
        }
    }

    fn connection(&self) -> MutexGuard<'_, CancellationToken> {
        self.connection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Attach the write half of a fresh connection and restart packet
    /// numbering at 1.
    ///
    /// Returns the token cancelled when this connection is closed locally or
    /// the session ends.
    pub(crate) async fn attach(&self, sink: WsSink, session: &CancellationToken) -> CancellationToken {
        let token = session.child_token();
        let mut writer = self.writer.lock().await;
        {
            let mut current = self.connection();
            current.cancel();
            *current = token.clone();
        }
        self.counter.reset();
        *writer = Some(sink);
        self.attached.store(true, Ordering::SeqCst);
        token
    }

    /// Drop the write half after the read loop ended
    pub(crate) async fn detach(&self) {
        self.mark_closed();
        if let Some(mut sink) = self.writer.lock().await.take() {
            let _ = time::timeout(self.write_timeout, sink.close()).await;
        }
    }

    /// Send an envelope, assigning the next packet id if it has none.
    ///
    /// Returns the wire id. No id is used up while no connection is attached.
    pub async fn send(&self, mut envelope: Envelope) -> Result<String> {
        let mut writer = self.writer.lock().await;
        if writer.is_none() {
            return Err(not_open());
        }

        let id = match &envelope.id {
            Some(id) => id.clone(),
            None => {
                let id = wire_id(&self.counter.next_id());
                envelope.id = Some(id.clone());
                id
            }
        };
        self.write_locked(&mut writer, envelope.to_json()?).await?;
        Ok(id)
    }

    async fn write_locked(&self, writer: &mut Option<WsSink>, text: String) -> Result<()> {
        let sink = writer.as_mut().ok_or_else(not_open)?;

        trace!("Sending {}", text);
        match time::timeout(self.write_timeout, sink.send(Message::text(text))).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => {
                warn!(
                    "Write did not complete within {:?}; closing connection",
                    self.write_timeout
                );
                if let Some(mut sink) = writer.take() {
                    let _ = time::timeout(self.write_timeout, sink.close()).await;
                }
                self.mark_closed();
                Err(Error::Timeout(format!(
                    "write did not complete within {:?}",
                    self.write_timeout
                )))
            }
        }
    }

    /// Close the output side of the current connection.
    ///
    /// The read loop observes the cancelled connection token and falls back
    /// to reconnecting.
    pub async fn close_output(&self, reason: &str) {
        debug!("Closing primary connection: {}", reason);
        self.attached.store(false, Ordering::SeqCst);
        let sink = self.writer.lock().await.take();
        if let Some(mut sink) = sink {
            if let Err(e) = time::timeout(self.write_timeout, sink.close()).await {
                debug!("Close frame not sent: {}", e);
            }
        }
        self.mark_closed();
    }

    fn mark_closed(&self) {
        self.attached.store(false, Ordering::SeqCst);
        self.connection().cancel();
    }

    pub async fn is_open(&self) -> bool {
        self.writer.lock().await.is_some()
    }
}

#[async_trait]
impl Outbound for Link {
    fn next_packet_id(&self) -> Result<String> {
        if !self.attached.load(Ordering::SeqCst) {
            return Err(not_open());
        }
        Ok(self.counter.next_id())
    }

    async fn write(&self, envelope: Envelope) -> Result<()> {
        let text = envelope.to_json()?;
        let mut writer = self.writer.lock().await;
        self.write_locked(&mut writer, text).await
    }
}

fn not_open() -> Error {
    Error::NotConnected("primary channel is not open".to_string())
}
