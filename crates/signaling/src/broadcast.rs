//! Event-Broadcaster – Verteilt Mitgliedschafts-Aenderungen an einen Raum
//!
//! Wird genau einmal pro Beitritt/Austritt aufgerufen, nach der Aenderung
//! der Mitgliederliste und noch unter der Sperre des Raums. Jeder Empfaenger
//! sieht damit den Stand nach der Aenderung, in Commit-Reihenfolge.

use rendezvous_core::types::ConnectionId;
use rendezvous_protocol::control::ServerMessage;

use crate::directory::Raum;
use crate::outbox::Postausgang;
use crate::registry::ConnectionRegistry;

/// Erzeugt `member.joined`, `member.left` und `room.members`
#[derive(Clone)]
pub struct EventBroadcaster {
    registry: ConnectionRegistry,
}

impl EventBroadcaster {
    pub fn neu(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    /// `member.joined` an alle anderen, `room.members` an den Neuen
    pub fn broadcast_join(&self, raum: &Raum, neu: ConnectionId, post: &mut Postausgang) {
        let andere = self.lebende_ausser(raum, neu);
        for mitglied in &andere {
            post.ereignis(*mitglied, ServerMessage::MemberJoined { connection_id: neu });
        }
        post.ereignis(neu, self.mitglieder_liste(raum, neu));

        tracing::debug!(
            connection_id = %neu,
            room = %raum.id(),
            empfaenger = andere.len(),
            "Beitritt verteilt"
        );
    }

    /// `member.left` an alle verbleibenden Mitglieder
    pub fn broadcast_leave(&self, raum: &Raum, weg: ConnectionId, post: &mut Postausgang) {
        let verbleibend = self.lebende_ausser(raum, weg);
        for mitglied in &verbleibend {
            post.ereignis(*mitglied, ServerMessage::MemberLeft { connection_id: weg });
        }

        tracing::debug!(
            connection_id = %weg,
            room = %raum.id(),
            empfaenger = verbleibend.len(),
            "Austritt verteilt"
        );
    }

    /// `room.members` aus Sicht von `fuer` (ohne `fuer` selbst)
    pub fn mitglieder_liste(&self, raum: &Raum, fuer: ConnectionId) -> ServerMessage {
        ServerMessage::RoomMembers {
            room: raum.id().clone(),
            members: self.lebende_ausser(raum, fuer),
        }
    }

    fn lebende_ausser(&self, raum: &Raum, id: ConnectionId) -> Vec<ConnectionId> {
        raum.mitglieder()
            .iter()
            .filter(|m| **m != id && self.registry.is_live(m))
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rendezvous_core::types::RoomId;

    fn setup() -> (ConnectionRegistry, EventBroadcaster, Raum) {
        let registry = ConnectionRegistry::neu(8);
        let broadcaster = EventBroadcaster::neu(registry.clone());
        (registry, broadcaster, Raum::neu(RoomId::from("global_room")))
    }

    #[test]
    fn join_benachrichtigt_alle_anderen() {
        let (registry, broadcaster, mut raum) = setup();
        let (a, _ra) = registry.register();
        let (b, _rb) = registry.register();
        let (c, _rc) = registry.register();
        raum.hinzufuegen(a);
        raum.hinzufuegen(b);
        raum.hinzufuegen(c);

        let mut post = Postausgang::neu();
        broadcaster.broadcast_join(&raum, c, &mut post);

        assert_eq!(post.an(a), vec![ServerMessage::MemberJoined { connection_id: c }]);
        assert_eq!(post.an(b), vec![ServerMessage::MemberJoined { connection_id: c }]);
        assert_eq!(
            post.an(c),
            vec![ServerMessage::RoomMembers {
                room: RoomId::from("global_room"),
                members: vec![a, b]
            }]
        );
    }

    #[test]
    fn leave_benachrichtigt_verbleibende() {
        let (registry, broadcaster, mut raum) = setup();
        let (a, _ra) = registry.register();
        let (b, _rb) = registry.register();
        raum.hinzufuegen(a);
        raum.hinzufuegen(b);
        raum.entfernen(&b);

        let mut post = Postausgang::neu();
        broadcaster.broadcast_leave(&raum, b, &mut post);

        assert_eq!(post.an(a), vec![ServerMessage::MemberLeft { connection_id: b }]);
        assert!(post.an(b).is_empty());
    }

    #[test]
    fn getrennte_verbindungen_tauchen_nicht_auf() {
        let (registry, broadcaster, mut raum) = setup();
        let (a, _ra) = registry.register();
        let (b, _rb) = registry.register();
        raum.hinzufuegen(a);
        raum.hinzufuegen(b);
        registry.unregister(&b);

        match broadcaster.mitglieder_liste(&raum, a) {
            ServerMessage::RoomMembers { members, .. } => assert!(members.is_empty()),
            andere => panic!("Erwartet RoomMembers, erhalten {andere:?}"),
        }
    }
}
