use crate::error::Result;
use crate::payloads::PairingResponse;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};

/// Namespace prepended to every outbound packet id of a session
pub const PACKET_PREFIX: &str = "5d3ed79";

/// Width of the zero-padded packet counter
pub const PACKET_ID_WIDTH: usize = 5;

const PROMPT_MARKER: &str = "pairingType\":\"PROMPT";
const TOO_MANY_PAIRING_MARKER: &str = "403 too many pairing requests";
const POWER_STATE_MARKER: &str = "403 Error!! power state";

/// The single wire structure of the primary channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Wire id, prefix included
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Message type (`register`, `subscribe`, `request`, `response`, ...)
    #[serde(rename = "type", default)]
    pub kind: String,

    /// Endpoint for subscribe and request messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,

    /// Opaque payload; its shape depends on type and uri
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,

    /// Error text the device attaches to rejected requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    /// Create an envelope without an id
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            id: None,
            kind: kind.into(),
            uri: None,
            payload,
            error: None,
        }
    }

    /// Pairing request
    pub fn register(payload: Value) -> Self {
        Self::new("register", payload)
    }

    /// One-off request to an endpoint
    pub fn request(uri: impl Into<String>, payload: Value) -> Self {
        Self::new("request", payload).with_uri(uri)
    }

    /// Subscription to an endpoint
    pub fn subscribe(uri: impl Into<String>, payload: Value) -> Self {
        Self::new("subscribe", payload).with_uri(uri)
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Packet id with the session prefix removed
    pub fn local_id(&self) -> Option<&str> {
        self.id.as_deref().map(local_id)
    }

    /// Error text when the device rejected the request this envelope answers
    pub fn failure(&self) -> Option<String> {
        match &self.error {
            Some(error) => Some(error.clone()),
            None if self.kind == "error" => Some("unspecified error".to_string()),
            None => None,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| crate::Error::Serialize(e.to_string()))
    }
}

/// Prefix a local packet id for the wire
pub fn wire_id(local: &str) -> String {
    format!("{}{}", PACKET_PREFIX, local)
}

/// Strip the session prefix from a wire id
pub fn local_id(wire: &str) -> &str {
    wire.strip_prefix(PACKET_PREFIX).unwrap_or(wire)
}

/// Per-connection packet counter.
///
/// Starts at 1 and is reset whenever a new physical connection opens.
#[derive(Debug)]
pub struct PacketCounter {
    next: AtomicU32,
}

impl Default for PacketCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketCounter {
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    /// Take the next local id (`00001`, `00002`, ...)
    pub fn next_id(&self) -> String {
        let value = self.next.fetch_add(1, Ordering::SeqCst);
        format!("{:0width$}", value, width = PACKET_ID_WIDTH)
    }

    pub fn reset(&self) {
        self.next.store(1, Ordering::SeqCst);
    }
}

/// What an inbound text frame means to the session
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Pairing succeeded; carries the issued client key
    Registered { client_key: Option<String> },

    /// The television shows a pairing prompt
    PairingPrompt,

    /// The television throttles pairing attempts
    TooManyPairingRequests,

    /// The television rejects the session in its current power state
    InvalidPowerState,

    /// Anything else; routed by packet id
    Routed(Envelope),
}

/// Classify an inbound text frame.
///
/// Marker checks run on the raw text so rejections are recognised even when
/// the body is not a well-formed envelope.
pub fn classify(text: &str) -> Result<Inbound> {
    let parsed = serde_json::from_str::<Envelope>(text);

    if let Ok(envelope) = &parsed {
        if envelope.kind == "registered" {
            let client_key = serde_json::from_value::<PairingResponse>(envelope.payload.clone())
                .ok()
                .and_then(|response| response.client_key);
            return Ok(Inbound::Registered { client_key });
        }
    }

    if text.contains(PROMPT_MARKER) {
        return Ok(Inbound::PairingPrompt);
    }

    if text.to_ascii_lowercase().contains(TOO_MANY_PAIRING_MARKER) {
        return Ok(Inbound::TooManyPairingRequests);
    }

    if text.contains(POWER_STATE_MARKER) {
        return Ok(Inbound::InvalidPowerState);
    }

    Ok(Inbound::Routed(parsed?))
}
