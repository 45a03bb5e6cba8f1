//! Connection-Registry – Wer ist verbunden, in welchem Raum
//!
//! Einzige Quelle der Wahrheit fuer die Frage, ob ein Teilnehmer noch
//! existiert. Jede Verbindung besitzt genau eine ausgehende Queue; die
//! `ClientConnection` liest daraus und schreibt via TCP.

use dashmap::DashMap;
use rendezvous_core::types::{ConnectionId, RoomId};
use rendezvous_protocol::control::ServerMessage;
use std::sync::Arc;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// ClientSender
// ---------------------------------------------------------------------------

/// Handle auf die Send-Queue einer Verbindung
#[derive(Clone, Debug)]
pub struct ClientSender {
    pub connection_id: ConnectionId,
    pub tx: mpsc::Sender<ServerMessage>,
}

impl ClientSender {
    /// Sendet eine Nachricht nicht-blockierend an den Client
    ///
    /// Gibt `false` zurueck wenn die Queue voll oder geschlossen ist.
    pub fn senden(&self, nachricht: ServerMessage) -> bool {
        match self.tx.try_send(nachricht) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    connection_id = %self.connection_id,
                    "Send-Queue voll – Nachricht verworfen"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(
                    connection_id = %self.connection_id,
                    "Send-Queue geschlossen (Client getrennt)"
                );
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Raum-Bindung
// ---------------------------------------------------------------------------

/// Ergebnis von [`ConnectionRegistry::raum_binden`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bindung {
    /// Verbindung war raumlos und ist jetzt an den Raum gebunden
    Gebunden,
    /// Verbindung war bereits in diesem Raum
    BereitsDrin,
    /// Verbindung ist in einem anderen Raum und muss ihn zuerst verlassen
    AndererRaum(RoomId),
    /// Verbindung ist nicht (mehr) registriert
    NichtLive,
}

// ---------------------------------------------------------------------------
// ConnectionRegistry
// ---------------------------------------------------------------------------

struct Eintrag {
    sender: ClientSender,
    raum: Option<RoomId>,
}

/// Verwaltet alle lebenden Verbindungen
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    verbindungen: DashMap<ConnectionId, Eintrag>,
    queue_groesse: usize,
}

impl ConnectionRegistry {
    /// Erstellt eine leere Registry mit der gegebenen Queue-Groesse pro Verbindung
    pub fn neu(queue_groesse: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                verbindungen: DashMap::new(),
                queue_groesse: queue_groesse.max(1),
            }),
        }
    }

    /// Registriert eine neue Verbindung und gibt ihre Empfangs-Queue zurueck
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
        let connection_id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.inner.queue_groesse);
        self.inner.verbindungen.insert(
            connection_id,
            Eintrag {
                sender: ClientSender { connection_id, tx },
                raum: None,
            },
        );
        tracing::debug!(connection_id = %connection_id, "Verbindung registriert");
        (connection_id, rx)
    }

    /// Entfernt eine Verbindung
    ///
    /// Gibt den Raum zurueck, in dem die Verbindung war. Unbekannte IDs
    /// sind kein Fehler (Disconnect nach Disconnect).
    pub fn unregister(&self, id: &ConnectionId) -> Option<RoomId> {
        let (_, eintrag) = self.inner.verbindungen.remove(id)?;
        tracing::debug!(connection_id = %id, "Verbindung entfernt");
        eintrag.raum
    }

    pub fn is_live(&self, id: &ConnectionId) -> bool {
        self.inner.verbindungen.contains_key(id)
    }

    /// Aktueller Raum einer Verbindung (`None` auch fuer unbekannte IDs)
    pub fn raum_von(&self, id: &ConnectionId) -> Option<RoomId> {
        self.inner
            .verbindungen
            .get(id)
            .and_then(|eintrag| eintrag.raum.clone())
    }

    /// Bindet eine Verbindung an einen Raum
    ///
    /// Muss unter der Sperre des Raums aufgerufen werden, damit Bindung und
    /// Mitgliederliste konsistent bleiben.
    pub fn raum_binden(&self, id: &ConnectionId, raum: &RoomId) -> Bindung {
        let Some(mut eintrag) = self.inner.verbindungen.get_mut(id) else {
            return Bindung::NichtLive;
        };
        match &eintrag.raum {
            None => {
                eintrag.raum = Some(raum.clone());
                Bindung::Gebunden
            }
            Some(aktuell) if aktuell == raum => Bindung::BereitsDrin,
            Some(anderer) => Bindung::AndererRaum(anderer.clone()),
        }
    }

    /// Loest die Raum-Bindung, falls die Verbindung noch an `raum` gebunden ist
    pub fn raum_loesen(&self, id: &ConnectionId, raum: &RoomId) {
        if let Some(mut eintrag) = self.inner.verbindungen.get_mut(id) {
            if eintrag.raum.as_ref() == Some(raum) {
                eintrag.raum = None;
            }
        }
    }

    /// Reiht eine Nachricht in die Queue einer Verbindung ein
    ///
    /// Gibt `true` zurueck wenn die Verbindung gefunden und die Nachricht
    /// eingereiht wurde.
    pub fn senden(&self, id: &ConnectionId, nachricht: ServerMessage) -> bool {
        match self.inner.verbindungen.get(id) {
            Some(eintrag) => eintrag.sender.senden(nachricht),
            None => {
                tracing::debug!(connection_id = %id, "Senden an unbekannte Verbindung");
                false
            }
        }
    }

    /// Anzahl lebender Verbindungen
    pub fn anzahl(&self) -> usize {
        self.inner.verbindungen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_liefert_eindeutige_ids() {
        let registry = ConnectionRegistry::neu(8);
        let (a, _rx_a) = registry.register();
        let (b, _rx_b) = registry.register();
        assert_ne!(a, b);
        assert!(registry.is_live(&a));
        assert!(registry.is_live(&b));
        assert_eq!(registry.anzahl(), 2);
    }

    #[test]
    fn unregister_ist_idempotent() {
        let registry = ConnectionRegistry::neu(8);
        let (a, _rx) = registry.register();
        let raum = RoomId::from("r1");
        assert_eq!(registry.raum_binden(&a, &raum), Bindung::Gebunden);

        assert_eq!(registry.unregister(&a), Some(raum));
        assert!(!registry.is_live(&a));
        assert_eq!(registry.unregister(&a), None);
        assert_eq!(registry.unregister(&ConnectionId::new()), None);
    }

    #[test]
    fn raum_binden_zustaende() {
        let registry = ConnectionRegistry::neu(8);
        let (a, _rx) = registry.register();
        let r1 = RoomId::from("r1");
        let r2 = RoomId::from("r2");

        assert_eq!(registry.raum_binden(&a, &r1), Bindung::Gebunden);
        assert_eq!(registry.raum_binden(&a, &r1), Bindung::BereitsDrin);
        assert_eq!(registry.raum_binden(&a, &r2), Bindung::AndererRaum(r1.clone()));
        assert_eq!(
            registry.raum_binden(&ConnectionId::new(), &r1),
            Bindung::NichtLive
        );

        // Loesen nur fuer den passenden Raum
        registry.raum_loesen(&a, &r2);
        assert_eq!(registry.raum_von(&a), Some(r1.clone()));
        registry.raum_loesen(&a, &r1);
        assert_eq!(registry.raum_von(&a), None);
    }

    #[test]
    fn senden_an_lebende_verbindung() {
        let registry = ConnectionRegistry::neu(8);
        let (a, mut rx) = registry.register();

        assert!(registry.senden(&a, ServerMessage::ping(1)));
        assert_eq!(rx.try_recv().unwrap(), ServerMessage::ping(1));
    }

    #[test]
    fn senden_an_unbekannte_verbindung() {
        let registry = ConnectionRegistry::neu(8);
        assert!(!registry.senden(&ConnectionId::new(), ServerMessage::ping(1)));
    }

    #[test]
    fn volle_queue_verwirft() {
        let registry = ConnectionRegistry::neu(1);
        let (a, _rx) = registry.register();
        assert!(registry.senden(&a, ServerMessage::ping(1)));
        assert!(!registry.senden(&a, ServerMessage::ping(2)));
    }

    #[test]
    fn reihenfolge_pro_verbindung_bleibt_erhalten() {
        let registry = ConnectionRegistry::neu(16);
        let (a, mut rx) = registry.register();
        for ts in 0..10 {
            assert!(registry.senden(&a, ServerMessage::ping(ts)));
        }
        for ts in 0..10 {
            assert_eq!(rx.try_recv().unwrap(), ServerMessage::ping(ts));
        }
    }
}
