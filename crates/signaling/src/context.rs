//! Signaling-Kontext – Gemeinsamer Zustand aller Verbindungs-Tasks
//!
//! Wird einmal beim Serverstart erstellt und als `Arc` in jeden
//! Verbindungs-Task gereicht. Jede Operation entscheidet unter der Sperre
//! des betroffenen Raums, stellt das Ergebnis noch unter der Sperre zu und
//! gibt den Postausgang an den Aufrufer zurueck.

use rendezvous_core::types::{ConnectionId, RoomId};
use rendezvous_observability::SignalingMetrics;
use rendezvous_protocol::control::ServerMessage;
use rendezvous_protocol::negotiation::NegotiationMessage;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::broadcast::EventBroadcaster;
use crate::call::{CallCoordinator, RotationsRegeln};
use crate::directory::{Beitritt, Raum, RoomDirectory};
use crate::error::{SignalingError, SignalingResult};
use crate::outbox::{Ausgehend, Postausgang};
use crate::registry::ConnectionRegistry;
use crate::relay::SignalRelay;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Konfiguration fuer den Signaling-Service
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// Maximale gleichzeitige Verbindungen
    pub max_verbindungen: usize,
    /// Keepalive-Intervall in Sekunden
    pub keepalive_sek: u64,
    /// Timeout fuer inaktive Verbindungen in Sekunden
    pub verbindungs_timeout_sek: u64,
    /// Maximale Frame-Groesse in Bytes (beide Richtungen)
    pub max_frame_bytes: usize,
    /// Groesse der ausgehenden Queue pro Verbindung
    pub send_queue_groesse: usize,
    /// Abgelehnte Aktionen als `error`-Ereignis an den Absender melden
    pub ablehnungen_melden: bool,
    /// Automatische Partnerwahl
    pub rotation: RotationsRegeln,
    /// Leere Raeume aus dem Verzeichnis entfernen
    pub leere_raeume_entfernen: bool,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            max_verbindungen: 512,
            keepalive_sek: 30,
            verbindungs_timeout_sek: 90,
            max_frame_bytes: rendezvous_protocol::wire::DEFAULT_MAX_FRAME_SIZE,
            send_queue_groesse: 256,
            ablehnungen_melden: true,
            rotation: RotationsRegeln::default(),
            leere_raeume_entfernen: true,
        }
    }
}

// ---------------------------------------------------------------------------
// SignalingContext
// ---------------------------------------------------------------------------

/// Besitzt Registry, Verzeichnis, Koordinator, Relay und Broadcaster
pub struct SignalingContext {
    config: SignalingConfig,
    registry: ConnectionRegistry,
    directory: RoomDirectory,
    coordinator: CallCoordinator,
    relay: SignalRelay,
    broadcaster: EventBroadcaster,
    metriken: SignalingMetrics,
}

impl SignalingContext {
    /// Erstellt einen neuen Kontext
    pub fn neu(config: SignalingConfig, metriken: SignalingMetrics) -> Arc<Self> {
        let registry = ConnectionRegistry::neu(config.send_queue_groesse);
        let directory = RoomDirectory::neu(registry.clone(), config.leere_raeume_entfernen);
        let coordinator = CallCoordinator::neu(config.rotation, metriken.clone());
        let relay = SignalRelay::neu(registry.clone(), metriken.clone());
        let broadcaster = EventBroadcaster::neu(registry.clone());

        Arc::new(Self {
            config,
            registry,
            directory,
            coordinator,
            relay,
            broadcaster,
            metriken,
        })
    }

    pub fn config(&self) -> &SignalingConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn directory(&self) -> &RoomDirectory {
        &self.directory
    }

    pub fn metriken(&self) -> &SignalingMetrics {
        &self.metriken
    }

    // -----------------------------------------------------------------------
    // Verbindungs-Lebenszyklus
    // -----------------------------------------------------------------------

    /// Registriert eine neue Verbindung
    pub fn connect(&self) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
        let (id, rx) = self.registry.register();
        self.metriken_aktualisieren();
        (id, rx)
    }

    /// Entfernt eine Verbindung und raeumt ihren Raum auf
    ///
    /// Idempotent: ein zweiter Aufruf ist ein No-op.
    pub fn disconnect(&self, id: ConnectionId) -> Postausgang {
        let post = match self.registry.unregister(&id) {
            Some(raum) => self
                .directory
                .leave_mit(&raum, id, |r| self.austritt_verarbeiten(r, id))
                .unwrap_or_default(),
            None => Postausgang::neu(),
        };
        self.metriken_aktualisieren();
        post
    }

    // -----------------------------------------------------------------------
    // Raum
    // -----------------------------------------------------------------------

    /// Tritt einem Raum bei (verlaesst vorher einen anderen)
    pub fn join(&self, id: ConnectionId, raum: RoomId) -> SignalingResult<Postausgang> {
        let mut verlassen = Postausgang::neu();

        let beitritt = self.directory.join_mit(
            &raum,
            id,
            |alt| verlassen.anhaengen(self.austritt_verarbeiten(alt, id)),
            |r| {
                let mut post = Postausgang::neu();
                self.broadcaster.broadcast_join(r, id, &mut post);
                self.coordinator.beigetreten(r, id, &mut post);
                self.zustellen(&post);
                post
            },
        )?;

        let post = match beitritt {
            Beitritt::Neu(post) => {
                tracing::info!(connection_id = %id, room = %raum, "Raum beigetreten");
                post
            }
            Beitritt::Bereits(andere) => {
                let members = andere
                    .into_iter()
                    .filter(|m| self.registry.is_live(m))
                    .collect();
                let mut post = Postausgang::neu();
                post.ereignis(id, ServerMessage::RoomMembers { room: raum, members });
                self.zustellen(&post);
                post
            }
        };

        verlassen.anhaengen(post);
        self.metriken_aktualisieren();
        Ok(verlassen)
    }

    /// Verlaesst einen Raum
    pub fn leave(&self, id: ConnectionId, raum: &RoomId) -> SignalingResult<Postausgang> {
        let post = self
            .directory
            .leave_mit(raum, id, |r| self.austritt_verarbeiten(r, id))
            .ok_or(SignalingError::NichtImRaum)?;
        tracing::info!(connection_id = %id, room = %raum, "Raum verlassen");
        self.metriken_aktualisieren();
        Ok(post)
    }

    /// `room.members` fuer den eigenen Raum
    pub fn list_members(&self, id: ConnectionId, raum: &RoomId) -> SignalingResult<ServerMessage> {
        if self.registry.raum_von(&id).as_ref() != Some(raum) {
            return Err(SignalingError::NichtImRaum);
        }
        self.directory
            .mit_raum(raum, |r| self.broadcaster.mitglieder_liste(r, id))
            .ok_or(SignalingError::NichtImRaum)
    }

    // -----------------------------------------------------------------------
    // Anrufe
    // -----------------------------------------------------------------------

    /// `call.initiate`: Offer an `ziel`
    pub fn initiate(
        &self,
        id: ConnectionId,
        ziel: ConnectionId,
        offer: Value,
    ) -> SignalingResult<Postausgang> {
        self.im_eigenen_raum(id, |r, post| {
            self.coordinator.initiate_call(r, id, ziel, offer, post)
        })
    }

    /// `call.accept`: Answer an `von`
    pub fn accept(
        &self,
        id: ConnectionId,
        von: ConnectionId,
        answer: Value,
    ) -> SignalingResult<Postausgang> {
        self.im_eigenen_raum(id, |r, post| {
            self.coordinator.accept_incoming_call(r, id, von, answer, post)
        })
    }

    /// `call.next`: zum naechsten Teilnehmer weiterschalten
    pub fn next(&self, id: ConnectionId) -> SignalingResult<Postausgang> {
        self.im_eigenen_raum(id, |r, post| self.coordinator.explicit_next(r, id, post))
    }

    /// `negotiation.candidate`: ohne Raum-Sperre direkt weiterleiten
    pub fn candidate(
        &self,
        id: ConnectionId,
        ziel: ConnectionId,
        kandidat: Value,
    ) -> SignalingResult<()> {
        self.relay.relay(NegotiationMessage::Candidate {
            from: id,
            target: ziel,
            payload: kandidat,
        })
    }

    // -----------------------------------------------------------------------
    // Intern
    // -----------------------------------------------------------------------

    /// Fuehrt eine Koordinator-Operation unter der Sperre des eigenen Raums aus
    fn im_eigenen_raum(
        &self,
        id: ConnectionId,
        f: impl FnOnce(&mut Raum, &mut Postausgang) -> SignalingResult<()>,
    ) -> SignalingResult<Postausgang> {
        let raum = self.registry.raum_von(&id).ok_or(SignalingError::NichtImRaum)?;
        self.directory
            .mit_raum(&raum, |r| {
                let mut post = Postausgang::neu();
                f(r, &mut post)?;
                self.zustellen(&post);
                Ok(post)
            })
            .ok_or(SignalingError::NichtImRaum)?
    }

    /// Austritt verteilen und Anrufe der Verbliebenen aufraeumen (unter Sperre)
    fn austritt_verarbeiten(&self, r: &mut Raum, weg: ConnectionId) -> Postausgang {
        let mut post = Postausgang::neu();
        self.broadcaster.broadcast_leave(r, weg, &mut post);
        self.coordinator.mitglied_entfernt(r, weg, &mut post);
        self.zustellen(&post);
        post
    }

    /// Reiht alle Zustellungen nicht-blockierend ein
    fn zustellen(&self, post: &Postausgang) {
        for eintrag in post.iter() {
            match eintrag {
                Ausgehend::Ereignis { an, nachricht } => {
                    if !self.registry.senden(an, nachricht.clone()) {
                        self.metriken.signals_dropped_total.inc();
                    }
                }
                Ausgehend::Signal(signal) => {
                    if let Err(e) = self.relay.relay(signal.clone()) {
                        tracing::debug!(fehler = %e, "Signal nicht zugestellt");
                    }
                }
            }
        }
    }

    fn metriken_aktualisieren(&self) {
        self.metriken.connections.set(self.registry.anzahl() as i64);
        self.metriken
            .rooms_active
            .set(self.directory.aktive_raeume() as i64);
    }
}
