//! Postausgang – Ergebnis einer Zustandsaenderung
//!
//! Jede Operation des `SignalingContext` berechnet zuerst, welche
//! Nachrichten an wen gehen, und stellt sie danach zu. Der Postausgang
//! wird an den Aufrufer zurueckgegeben, damit Tests ohne Transport pruefen
//! koennen, was verschickt wurde.

use rendezvous_core::types::ConnectionId;
use rendezvous_protocol::control::ServerMessage;
use rendezvous_protocol::negotiation::NegotiationMessage;

/// Eine einzelne ausgehende Zustellung
#[derive(Debug, Clone, PartialEq)]
pub enum Ausgehend {
    /// Ereignis an genau eine Verbindung
    Ereignis {
        an: ConnectionId,
        nachricht: ServerMessage,
    },
    /// Aushandlungs-Nachricht, wird ueber den `SignalRelay` zugestellt
    Signal(NegotiationMessage),
}

impl Ausgehend {
    /// Empfaenger der Zustellung
    pub fn empfaenger(&self) -> ConnectionId {
        match self {
            Self::Ereignis { an, .. } => *an,
            Self::Signal(signal) => signal.target(),
        }
    }
}

/// Geordnete Liste ausgehender Zustellungen
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Postausgang {
    eintraege: Vec<Ausgehend>,
}

impl Postausgang {
    pub fn neu() -> Self {
        Self::default()
    }

    pub fn ereignis(&mut self, an: ConnectionId, nachricht: ServerMessage) {
        self.eintraege.push(Ausgehend::Ereignis { an, nachricht });
    }

    pub fn signal(&mut self, signal: NegotiationMessage) {
        self.eintraege.push(Ausgehend::Signal(signal));
    }

    /// Haengt einen weiteren Postausgang hinten an
    pub fn anhaengen(&mut self, anderer: Postausgang) {
        self.eintraege.extend(anderer.eintraege);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Ausgehend> {
        self.eintraege.iter()
    }

    pub fn len(&self) -> usize {
        self.eintraege.len()
    }

    pub fn is_empty(&self) -> bool {
        self.eintraege.is_empty()
    }

    /// Alle Nachrichten an `id` in Zustellreihenfolge, so wie der Client sie sieht
    pub fn an(&self, id: ConnectionId) -> Vec<ServerMessage> {
        self.eintraege
            .iter()
            .filter(|eintrag| eintrag.empfaenger() == id)
            .map(|eintrag| match eintrag {
                Ausgehend::Ereignis { nachricht, .. } => nachricht.clone(),
                Ausgehend::Signal(signal) => signal.clone().into_server_message(),
            })
            .collect()
    }
}

impl IntoIterator for Postausgang {
    type Item = Ausgehend;
    type IntoIter = std::vec::IntoIter<Ausgehend>;

    fn into_iter(self) -> Self::IntoIter {
        self.eintraege.into_iter()
    }
}
