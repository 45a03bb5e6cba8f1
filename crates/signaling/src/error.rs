//! Fehlertypen fuer den Signaling-Service

use rendezvous_core::types::ConnectionId;
use rendezvous_protocol::control::ErrorCode;
use thiserror::Error;

/// Fehlertyp fuer den Signaling-Service
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Guard der Anruf-Zustandsmaschine hat die Aktion abgelehnt
    #[error("Ungueltiger Zustandsuebergang: {0}")]
    UngueltigerUebergang(String),

    /// Ziel einer Weiterleitung ist nicht (mehr) registriert
    #[error("Unbekanntes Ziel: {0}")]
    UnbekanntesZiel(ConnectionId),

    /// Aktion bezieht sich auf einen Raum, in dem die Verbindung nicht ist
    #[error("Nicht im Raum")]
    NichtImRaum,

    /// Protokollfehler (ungueltiges Frame, unbekanntes Ereignis)
    #[error("Protokollfehler: {0}")]
    Protokoll(String),

    /// Server ist voll
    #[error("Server ist voll")]
    ServerVoll,

    /// Verbindung wurde getrennt
    #[error("Verbindung getrennt")]
    VerbindungGetrennt,

    /// Senden an Client fehlgeschlagen (Queue voll oder geschlossen)
    #[error("Senden fehlgeschlagen")]
    SendFehler,

    /// Interner Fehler
    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl SignalingError {
    /// Erstellt einen abgelehnten Zustandsuebergang
    pub fn uebergang(msg: impl Into<String>) -> Self {
        Self::UngueltigerUebergang(msg.into())
    }

    /// Erstellt einen internen Fehler
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Erstellt einen Protokollfehler
    pub fn protokoll(msg: impl Into<String>) -> Self {
        Self::Protokoll(msg.into())
    }

    /// Fehler-Code fuer das `error`-Ereignis an den Client
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::UngueltigerUebergang(_) => ErrorCode::InvalidTransition,
            Self::UnbekanntesZiel(_) => ErrorCode::UnknownTarget,
            Self::NichtImRaum => ErrorCode::NotInRoom,
            Self::Protokoll(_) => ErrorCode::InvalidRequest,
            Self::ServerVoll => ErrorCode::ServerFull,
            Self::VerbindungGetrennt | Self::SendFehler | Self::Intern(_) => {
                ErrorCode::InternalError
            }
        }
    }

    /// Label fuer `rendezvous_transitions_rejected_total`
    pub fn metrik_grund(&self) -> &'static str {
        match self {
            Self::UngueltigerUebergang(_) => "invalid_transition",
            Self::UnbekanntesZiel(_) => "unknown_target",
            Self::NichtImRaum => "not_in_room",
            _ => "other",
        }
    }

    /// Fehler, die dem Absender nie gemeldet werden
    pub fn ist_still(&self) -> bool {
        matches!(self, Self::UnbekanntesZiel(_))
    }
}

/// Result-Typ fuer den Signaling-Service
pub type SignalingResult<T> = Result<T, SignalingError>;
