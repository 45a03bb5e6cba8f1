//! Control-Protokoll (TCP)
//!
//! Definiert alle Signaling-Nachrichten die ueber die TCP-Verbindung
//! zwischen Client und Server ausgetauscht werden.
//!
//! ## Design
//! - Ereignis-Pattern: `{"event": "<name>", "data": {...}}`
//! - JSON-Serialisierung via serde (TCP, nicht zeitkritisch)
//! - Aushandlungs-Payloads (Offer, Answer, Candidate) sind opak und werden
//!   als `serde_json::Value` unveraendert durchgereicht

use rendezvous_core::types::{ConnectionId, RoomId};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Fehler-Codes
// ---------------------------------------------------------------------------

/// Standardisierte Fehler-Codes fuer `error`-Ereignisse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Allgemein
    InternalError,
    InvalidRequest,
    // Anruf-Zustandsmaschine
    InvalidTransition,
    NotInRoom,
    UnknownTarget,
    // Server
    ServerFull,
}

/// Grund fuer eine sofortige Ablehnung eines Anrufs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Ziel ist bereits in einem Anruf oder waehlt selbst
    Busy,
}

/// Inhalt von Ereignissen ohne Felder
///
/// Fehlendes `data`, `null` und `{}` werden gleich behandelt; gesendet
/// wird immer `{}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Leer {}

impl<'de> Deserialize<'de> for Leer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<serde_json::Map<String, Value>>::deserialize(deserializer)?;
        Ok(Leer {})
    }
}

// ---------------------------------------------------------------------------
// Client -> Server
// ---------------------------------------------------------------------------

/// Nachricht vom Client an den Server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientMessage {
    /// Raum beitreten (verlaesst vorher einen anderen Raum)
    #[serde(rename = "room.join")]
    RoomJoin { room: RoomId },

    /// Raum verlassen
    #[serde(rename = "room.leave")]
    RoomLeave { room: RoomId },

    /// Mitgliederliste anfordern (nur an den Anfragenden)
    #[serde(rename = "room.listMembers")]
    RoomListMembers { room: RoomId },

    /// Anruf mit SDP-Offer starten
    #[serde(rename = "call.initiate")]
    CallInitiate { target: ConnectionId, offer: Value },

    /// Eingehenden Anruf mit SDP-Answer annehmen
    #[serde(rename = "call.accept")]
    CallAccept { target: ConnectionId, answer: Value },

    /// Aktuellen Partner verlassen und zum naechsten Teilnehmer wechseln
    #[serde(rename = "call.next")]
    CallNext(Leer),

    /// ICE-Kandidat an den Partner weiterleiten
    #[serde(rename = "negotiation.candidate")]
    NegotiationCandidate {
        target: ConnectionId,
        candidate: Value,
    },

    /// Keepalive-Antwort
    #[serde(rename = "pong")]
    Pong { timestamp_ms: u64 },
}

impl ClientMessage {
    /// Ereignisname fuer Logging
    pub fn ereignis_name(&self) -> &'static str {
        match self {
            Self::RoomJoin { .. } => "room.join",
            Self::RoomLeave { .. } => "room.leave",
            Self::RoomListMembers { .. } => "room.listMembers",
            Self::CallInitiate { .. } => "call.initiate",
            Self::CallAccept { .. } => "call.accept",
            Self::CallNext(_) => "call.next",
            Self::NegotiationCandidate { .. } => "negotiation.candidate",
            Self::Pong { .. } => "pong",
        }
    }

    /// Deserialisiert eine Nachricht aus JSON
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Serialisiert die Nachricht als JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Server -> Client
// ---------------------------------------------------------------------------

/// Nachricht vom Server an einen Client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerMessage {
    /// Erste Nachricht nach dem Verbindungsaufbau: eigene Identitaet
    #[serde(rename = "welcome")]
    Welcome { connection_id: ConnectionId },

    #[serde(rename = "member.joined")]
    MemberJoined { connection_id: ConnectionId },

    #[serde(rename = "member.left")]
    MemberLeft { connection_id: ConnectionId },

    /// Geordnete Mitgliederliste (ohne den Empfaenger)
    #[serde(rename = "room.members")]
    RoomMembers {
        room: RoomId,
        members: Vec<ConnectionId>,
    },

    #[serde(rename = "call.incoming")]
    CallIncoming { from: ConnectionId, offer: Value },

    #[serde(rename = "call.accepted")]
    CallAccepted { from: ConnectionId, answer: Value },

    #[serde(rename = "negotiation.candidate")]
    NegotiationCandidate {
        from: ConnectionId,
        candidate: Value,
    },

    /// Der Koordinator hat einen Partner gewaehlt; der Client muss ein
    /// Offer an `target` erzeugen und per `call.initiate` senden
    #[serde(rename = "call.dial")]
    CallDial { target: ConnectionId },

    /// Der Partner hat den Anruf verlassen
    #[serde(rename = "call.ended")]
    CallEnded { from: ConnectionId },

    /// Das Ziel hat den Anruf sofort abgelehnt
    #[serde(rename = "call.rejected")]
    CallRejected {
        target: ConnectionId,
        reason: RejectReason,
    },

    #[serde(rename = "error")]
    Error { code: ErrorCode, message: String },

    #[serde(rename = "ping")]
    Ping { timestamp_ms: u64 },
}

impl ServerMessage {
    /// Erstellt eine Fehler-Nachricht
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    /// Erstellt eine Ping-Nachricht
    pub fn ping(timestamp_ms: u64) -> Self {
        Self::Ping { timestamp_ms }
    }

    /// Serialisiert die Nachricht als JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Deserialisiert eine Nachricht aus JSON
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
