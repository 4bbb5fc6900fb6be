//! Wire envelope exchanged over every client connection.
//!
//! On the wire an envelope is a JSON object with three optional members:
//!
//! ```text
//! { "message": {...} }   chat message
//! { "ping": {...} }      liveness ping / pong
//! { "roster": {...} }    presence roster
//! ```
//!
//! Exactly one member must be populated. [`Envelope`] is the typed form; the
//! conversion from the wire shape rejects empty and ambiguous envelopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Errors produced while decoding or encoding an envelope.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The frame was not valid JSON for the envelope shape.
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),

    /// No variant was populated.
    #[error("envelope has no populated variant")]
    Empty,

    /// More than one variant was populated.
    #[error("envelope has multiple populated variants: {}", .0.join(", "))]
    Ambiguous(Vec<&'static str>),
}

/// A conversation message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatMessage {
    /// When the hub accepted the message.
    pub ts: DateTime<Utc>,
    /// Sender display name.
    pub name: String,
    /// Plain text for console clients.
    pub text: String,
    /// Rendered markup for browsers.
    pub html: String,
    /// Short notification digest; empty on echoes and replays.
    pub notification: String,
    /// Sender color as `RRGGBB`.
    pub color: String,
    /// Sender color as an xterm SGR fragment (`38;5;N`).
    pub color_xterm256: String,
}

/// Liveness check. The hub sets `ping`; the peer echoes it in `pong`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessPing {
    /// When the ping was issued.
    pub ts: DateTime<Utc>,
    /// Monotonic sequence number assigned by the hub.
    pub ping: u64,
    /// Echo of `ping` set by the peer.
    pub pong: u64,
}

/// List of currently attached users.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceRoster {
    /// When the roster was built.
    pub ts: DateTime<Utc>,
    /// Rendered markup for browsers.
    pub html: String,
    /// Comma-joined display names.
    pub text: String,
}

/// Raw wire shape. Every member is optional; validation happens in
/// `TryFrom<WireEnvelope> for Envelope`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WireEnvelope {
    /// Conversation message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<ChatMessage>,
    /// Ping message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ping: Option<LivenessPing>,
    /// Roster message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roster: Option<PresenceRoster>,
}

/// A validated envelope carrying exactly one variant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireEnvelope", into = "WireEnvelope")]
pub enum Envelope {
    /// Conversation message.
    Chat(ChatMessage),
    /// Liveness ping or pong.
    Ping(LivenessPing),
    /// Presence roster.
    Roster(PresenceRoster),
}

impl Envelope {
    /// Decode one text frame.
    pub fn decode(frame: &str) -> Result<Self, CodecError> {
        let wire: WireEnvelope = serde_json::from_str(frame)?;
        Self::try_from(wire)
    }

    /// Encode into one text frame.
    pub fn encode(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(&WireEnvelope::from(self.clone()))?)
    }

    /// Wire member name of the populated variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Chat(_) => "message",
            Self::Ping(_) => "ping",
            Self::Roster(_) => "roster",
        }
    }
}

impl TryFrom<WireEnvelope> for Envelope {
    type Error = CodecError;

    fn try_from(wire: WireEnvelope) -> Result<Self, Self::Error> {
        match (wire.message, wire.ping, wire.roster) {
            (Some(message), None, None) => Ok(Self::Chat(message)),
            (None, Some(ping), None) => Ok(Self::Ping(ping)),
            (None, None, Some(roster)) => Ok(Self::Roster(roster)),
            (None, None, None) => Err(CodecError::Empty),
            (message, ping, roster) => {
                let mut present = Vec::with_capacity(3);
                if message.is_some() {
                    present.push("message");
                }
                if ping.is_some() {
                    present.push("ping");
                }
                if roster.is_some() {
                    present.push("roster");
                }
                Err(CodecError::Ambiguous(present))
            }
        }
    }
}

impl From<Envelope> for WireEnvelope {
    fn from(envelope: Envelope) -> Self {
        match envelope {
            Envelope::Chat(message) => Self {
                message: Some(message),
                ..Self::default()
            },
            Envelope::Ping(ping) => Self {
                ping: Some(ping),
                ..Self::default()
            },
            Envelope::Roster(roster) => Self {
                roster: Some(roster),
                ..Self::default()
            },
        }
    }
}

impl From<ChatMessage> for Envelope {
    fn from(message: ChatMessage) -> Self {
        Self::Chat(message)
    }
}

impl From<LivenessPing> for Envelope {
    fn from(ping: LivenessPing) -> Self {
        Self::Ping(ping)
    }
}

impl From<PresenceRoster> for Envelope {
    fn from(roster: PresenceRoster) -> Self {
        Self::Roster(roster)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
