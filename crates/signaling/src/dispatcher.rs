//! Message-Dispatcher – Routet ClientMessages an den SignalingContext
//!
//! Der Dispatcher empfaengt `ClientMessage`s von einer `ClientConnection`,
//! ruft die passende Operation auf und gibt eine direkte Antwort an den
//! Absender zurueck, falls es eine gibt.
//!
//! ## Ablehnungen
//! Abgelehnte Aktionen aendern keinen Zustand. Sie werden gezaehlt und,
//! wenn `ablehnungen_melden` gesetzt ist, als `error`-Ereignis gemeldet.
//! Nachrichten an unbekannte Ziele werden still verworfen.

use rendezvous_core::types::ConnectionId;
use rendezvous_protocol::control::{ClientMessage, ServerMessage};
use std::sync::Arc;

use crate::context::SignalingContext;
use crate::error::{SignalingError, SignalingResult};

/// Zentraler Message-Dispatcher
pub struct MessageDispatcher {
    ctx: Arc<SignalingContext>,
}

impl MessageDispatcher {
    /// Erstellt einen neuen Dispatcher
    pub fn neu(ctx: Arc<SignalingContext>) -> Self {
        Self { ctx }
    }

    /// Verarbeitet eine eingehende Nachricht von `id`
    ///
    /// Gibt `None` zurueck wenn keine direkte Antwort gesendet werden soll.
    /// Ereignisse an andere Mitglieder laufen ueber deren Send-Queues.
    pub fn dispatch(&self, id: ConnectionId, nachricht: ClientMessage) -> Option<ServerMessage> {
        let ereignis = nachricht.ereignis_name();
        tracing::trace!(connection_id = %id, ereignis, "Nachricht empfangen");

        let ergebnis: SignalingResult<Option<ServerMessage>> = match nachricht {
            // -------------------------------------------------------------------
            // Raum
            // -------------------------------------------------------------------
            ClientMessage::RoomJoin { room } => self.ctx.join(id, room).map(|_| None),
            ClientMessage::RoomLeave { room } => self.ctx.leave(id, &room).map(|_| None),
            ClientMessage::RoomListMembers { room } => self.ctx.list_members(id, &room).map(Some),

            // -------------------------------------------------------------------
            // Anrufe
            // -------------------------------------------------------------------
            ClientMessage::CallInitiate { target, offer } => {
                self.ctx.initiate(id, target, offer).map(|_| None)
            }
            ClientMessage::CallAccept { target, answer } => {
                self.ctx.accept(id, target, answer).map(|_| None)
            }
            ClientMessage::CallNext(_) => self.ctx.next(id).map(|_| None),
            ClientMessage::NegotiationCandidate { target, candidate } => {
                self.ctx.candidate(id, target, candidate).map(|_| None)
            }

            // Keepalive, die Verbindung hat den Empfang bereits vermerkt
            ClientMessage::Pong { .. } => Ok(None),
        };

        match ergebnis {
            Ok(antwort) => antwort,
            Err(fehler) => self.ablehnung(id, ereignis, fehler),
        }
    }

    fn ablehnung(
        &self,
        id: ConnectionId,
        ereignis: &'static str,
        fehler: SignalingError,
    ) -> Option<ServerMessage> {
        if fehler.ist_still() {
            tracing::debug!(connection_id = %id, ereignis, fehler = %fehler, "Nachricht verworfen");
            return None;
        }

        self.ctx
            .metriken()
            .transitions_rejected_total
            .with_label_values(&[fehler.metrik_grund()])
            .inc();
        tracing::debug!(connection_id = %id, ereignis, fehler = %fehler, "Aktion abgelehnt");

        if !self.ctx.config().ablehnungen_melden {
            return None;
        }
        Some(ServerMessage::error(fehler.error_code(), fehler.to_string()))
    }
}
