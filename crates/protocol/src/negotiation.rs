//! Aushandlungs-Nachrichten (Offer, Answer, ICE-Kandidat)
//!
//! Interne Darstellung einer weiterzuleitenden Nachricht zwischen genau zwei
//! Verbindungen. Der Payload wird nie inspiziert oder veraendert.

use rendezvous_core::types::ConnectionId;
use serde_json::Value;

use crate::control::ServerMessage;

/// Eine weiterzuleitende Aushandlungs-Nachricht
#[derive(Debug, Clone, PartialEq)]
pub enum NegotiationMessage {
    Offer {
        from: ConnectionId,
        target: ConnectionId,
        payload: Value,
    },
    Answer {
        from: ConnectionId,
        target: ConnectionId,
        payload: Value,
    },
    Candidate {
        from: ConnectionId,
        target: ConnectionId,
        payload: Value,
    },
}

impl NegotiationMessage {
    /// Absender der Nachricht
    pub fn from(&self) -> ConnectionId {
        match self {
            Self::Offer { from, .. } | Self::Answer { from, .. } | Self::Candidate { from, .. } => {
                *from
            }
        }
    }

    /// Empfaenger der Nachricht
    pub fn target(&self) -> ConnectionId {
        match self {
            Self::Offer { target, .. }
            | Self::Answer { target, .. }
            | Self::Candidate { target, .. } => *target,
        }
    }

    pub fn art(&self) -> &'static str {
        match self {
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Candidate { .. } => "candidate",
        }
    }

    /// Wandelt die Nachricht in das Ereignis fuer den Empfaenger um
    pub fn into_server_message(self) -> ServerMessage {
        match self {
            Self::Offer { from, payload, .. } => ServerMessage::CallIncoming {
                from,
                offer: payload,
            },
            Self::Answer { from, payload, .. } => ServerMessage::CallAccepted {
                from,
                answer: payload,
            },
            Self::Candidate { from, payload, .. } => ServerMessage::NegotiationCandidate {
                from,
                candidate: payload,
            },
        }
    }
}
