use crate::error::{Error, Result};
use async_trait::async_trait;
use log::{debug, trace, warn};
use std::fmt;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time;

/// Remote control keys the pairing auto-accept and the CLI can press
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteKey {
    Up,
    Down,
    Left,
    Right,
    Enter,
    Menu,
    Return,
    VolumeUp,
    VolumeDown,
    ChannelUp,
    ChannelDown,
}

impl RemoteKey {
    /// Line sent on the key channel
    pub fn command(&self) -> &'static str {
        match self {
            Self::ChannelUp => "mc 1 00",
            Self::ChannelDown => "mc 1 01",
            Self::VolumeUp => "mc 1 02",
            Self::VolumeDown => "mc 1 03",
            Self::Right => "mc 1 06",
            Self::Left => "mc 1 07",
            Self::Return => "mc 1 28",
            Self::Up => "mc 1 40",
            Self::Down => "mc 1 41",
            Self::Menu => "mc 1 43",
            Self::Enter => "mc 1 44",
        }
    }
}

impl std::str::FromStr for RemoteKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            "enter" | "ok" => Ok(Self::Enter),
            "menu" => Ok(Self::Menu),
            "return" | "back" => Ok(Self::Return),
            "volumeup" | "volup" => Ok(Self::VolumeUp),
            "volumedown" | "voldown" => Ok(Self::VolumeDown),
            "channelup" | "chup" => Ok(Self::ChannelUp),
            "channeldown" | "chdown" => Ok(Self::ChannelDown),
            other => Err(Error::Other(format!("unknown remote key: {}", other))),
        }
    }
}

/// Channel that presses remote control keys on the television
#[async_trait]
pub trait RemoteKeys: Send + Sync {
    /// (Re)open the channel
    async fn open(&self) -> Result<()>;

    /// Press one key, opening the channel first if needed
    async fn send_key(&self, key: RemoteKey) -> Result<()>;

    async fn close(&self);
}

/// Plain-text key channel: one LF-terminated command line per key press
pub struct TelnetRemote {
    addr: String,
    connect_timeout: Duration,
    write_timeout: Duration,
    stream: Mutex<Option<TcpStream>>,
}

impl fmt::Debug for TelnetRemote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelnetRemote")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

impl TelnetRemote {
    pub fn new(host: &str, port: u16, connect_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            addr: format!("{}:{}", host, port),
            connect_timeout,
            write_timeout,
            stream: Mutex::new(None),
        }
    }

    async fn connect(&self) -> Result<TcpStream> {
        debug!("Opening key channel to {}", self.addr);
        match time::timeout(self.connect_timeout, TcpStream::connect(&self.addr)).await {
            Ok(stream) => Ok(stream?),
            Err(_) => Err(Error::Timeout(format!(
                "key channel connect to {} after {:?}",
                self.addr, self.connect_timeout
            ))),
        }
    }

    /// Write a raw command line
    pub async fn send_line(&self, command: &str) -> Result<()> {
        let mut guard = self.stream.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }

        let Some(stream) = guard.as_mut() else {
            return Err(Error::NotConnected("key channel".to_string()));
        };

        trace!("Key channel <- {}", command);
        let line = format!("{}\n", command);
        let written = time::timeout(self.write_timeout, async {
            stream.write_all(line.as_bytes()).await?;
            stream.flush().await
        })
        .await;

        // A failed stream is reopened on the next key press
        match written {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                guard.take();
                Err(e.into())
            }
            Err(_) => {
                warn!("Key channel write stalled; closing it");
                if let Some(mut stream) = guard.take() {
                    let _ = stream.shutdown().await;
                }
                Err(Error::Timeout(format!(
                    "key channel write after {:?}",
                    self.write_timeout
                )))
            }
        }
    }
}

#[async_trait]
impl RemoteKeys for TelnetRemote {
    async fn open(&self) -> Result<()> {
        let mut guard = self.stream.lock().await;
        if let Some(mut old) = guard.take() {
            let _ = old.shutdown().await;
        }
        *guard = Some(self.connect().await?);
        Ok(())
    }

    async fn send_key(&self, key: RemoteKey) -> Result<()> {
        self.send_line(key.command()).await
    }

    async fn close(&self) {
        if let Some(mut stream) = self.stream.lock().await.take() {
            let _ = stream.shutdown().await;
        }
    }
}
