use crate::error::{Error, Result};
use std::str::FromStr;
use url::Url;

const SCHEMES: [&str; 2] = ["lgtv", "ws"];

/// Represents a parsed television address in the format:
/// lgtv://\[passphrase@\]host\[:port\]
/// or the short format:
/// \[passphrase@\]host\[:port\]
///
/// The passphrase is the secondary channel key shown in the television's
/// network settings. `ws://host:port` is accepted as well.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    /// Secondary channel passphrase
    pub passphrase: Option<String>,

    /// Host to connect to
    pub host: String,

    /// Primary channel port
    pub port: Option<u16>,
}

impl ConnectionString {
    /// Parse a connection string
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::Connection("Empty connection string".to_string()));
        }

        if input.contains("://") {
            return Self::parse_as_url(input);
        }

        // Try the URL parser first, it also handles bracketed IPv6 hosts
        if let Ok(cs) = Self::parse_as_url(&format!("lgtv://{}", input)) {
            return Ok(cs);
        }

        Self::parse_short(input)
    }

    /// Parse as a URL (lgtv://passphrase@host:port)
    fn parse_as_url(input: &str) -> Result<Self> {
        let url = Url::parse(input)
            .map_err(|e| Error::Connection(format!("Invalid connection string: {}", e)))?;

        if !SCHEMES.contains(&url.scheme()) {
            return Err(Error::Connection(format!(
                "Unsupported scheme: {}",
                url.scheme()
            )));
        }

        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| Error::Connection("Invalid host in connection string".to_string()))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();

        let passphrase = if url.username().is_empty() {
            None
        } else {
            Some(url.username().to_string())
        };

        Ok(Self {
            passphrase,
            host,
            port: url.port(),
        })
    }

    /// Parse the short form (passphrase@host:port)
    fn parse_short(input: &str) -> Result<Self> {
        let (passphrase, rest) = match input.rsplit_once('@') {
            Some((passphrase, rest)) if !passphrase.is_empty() => {
                (Some(passphrase.to_string()), rest)
            }
            Some((_, rest)) => (None, rest),
            None => (None, input),
        };

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| Error::Connection("Invalid port format".to_string()))?;
                (host, Some(port))
            }
            None => (rest, None),
        };

        if host.is_empty() {
            return Err(Error::Connection(
                "Invalid host in connection string".to_string(),
            ));
        }

        Ok(Self {
            passphrase,
            host: host.to_string(),
            port,
        })
    }

    /// Primary channel endpoint
    pub fn websocket_url(&self, default_port: u16) -> String {
        let port = self.port.unwrap_or(default_port);
        if self.host.contains(':') {
            format!("ws://[{}]:{}", self.host, port)
        } else {
            format!("ws://{}:{}", self.host, port)
        }
    }
}

impl FromStr for ConnectionString {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ConnectionString::parse(s)
    }
}
