//! Signal-Relay – Leitet Aushandlungs-Nachrichten zwischen zwei Verbindungen weiter
//!
//! Kein eigener Zustand ausser dem Routing ueber die Registry. Die
//! Reihenfolge zweier Nachrichten an dasselbe Ziel bleibt erhalten, da jede
//! Verbindung genau eine FIFO-Queue hat.

use rendezvous_observability::SignalingMetrics;
use rendezvous_protocol::negotiation::NegotiationMessage;

use crate::error::{SignalingError, SignalingResult};
use crate::registry::ConnectionRegistry;

/// Leitet Offer, Answer und Kandidaten unveraendert weiter
#[derive(Clone)]
pub struct SignalRelay {
    registry: ConnectionRegistry,
    metriken: SignalingMetrics,
}

impl SignalRelay {
    pub fn neu(registry: ConnectionRegistry, metriken: SignalingMetrics) -> Self {
        Self { registry, metriken }
    }

    /// Stellt die Nachricht dem Ziel zu
    ///
    /// Ist das Ziel nicht registriert, wird die Nachricht verworfen
    /// (`UnbekanntesZiel`); der Absender wird nicht benachrichtigt.
    pub fn relay(&self, nachricht: NegotiationMessage) -> SignalingResult<()> {
        let von = nachricht.from();
        let ziel = nachricht.target();
        let art = nachricht.art();

        if self.registry.senden(&ziel, nachricht.into_server_message()) {
            self.metriken
                .signals_relayed_total
                .with_label_values(&[art])
                .inc();
            tracing::trace!(from = %von, target = %ziel, art, "Signal weitergeleitet");
            return Ok(());
        }

        self.metriken.signals_dropped_total.inc();
        if self.registry.is_live(&ziel) {
            Err(SignalingError::SendFehler)
        } else {
            tracing::debug!(from = %von, target = %ziel, art, "Signal an unbekanntes Ziel verworfen");
            Err(SignalingError::UnbekanntesZiel(ziel))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rendezvous_core::types::ConnectionId;
    use rendezvous_protocol::control::ServerMessage;
    use serde_json::json;

    fn setup() -> (ConnectionRegistry, SignalRelay, SignalingMetrics) {
        let registry = ConnectionRegistry::neu(4);
        let metriken = SignalingMetrics::neu().unwrap();
        let relay = SignalRelay::neu(registry.clone(), metriken.clone());
        (registry, relay, metriken)
    }

    #[test]
    fn kandidat_wird_unveraendert_zugestellt() {
        let (registry, relay, metriken) = setup();
        let (a, _ra) = registry.register();
        let (b, mut rb) = registry.register();
        let kandidat = json!({"candidate": "candidate:0 1 UDP 1 192.0.2.1 5000 typ host", "sdpMid": "0"});

        relay
            .relay(NegotiationMessage::Candidate {
                from: a,
                target: b,
                payload: kandidat.clone(),
            })
            .unwrap();

        assert_eq!(
            rb.try_recv().unwrap(),
            ServerMessage::NegotiationCandidate {
                from: a,
                candidate: kandidat
            }
        );
        assert_eq!(
            metriken
                .signals_relayed_total
                .with_label_values(&["candidate"])
                .get(),
            1
        );
    }

    #[test]
    fn unbekanntes_ziel_wird_still_verworfen() {
        let (registry, relay, metriken) = setup();
        let (a, mut ra) = registry.register();
        let weg = ConnectionId::new();

        let err = relay
            .relay(NegotiationMessage::Offer {
                from: a,
                target: weg,
                payload: json!({}),
            })
            .unwrap_err();

        assert!(matches!(err, SignalingError::UnbekanntesZiel(id) if id == weg));
        assert!(ra.try_recv().is_err(), "Absender wird nicht benachrichtigt");
        assert_eq!(metriken.signals_dropped_total.get(), 1);
    }

    #[test]
    fn reihenfolge_an_dasselbe_ziel_bleibt_erhalten() {
        let (registry, relay, _) = setup();
        let (a, _ra) = registry.register();
        let (b, mut rb) = registry.register();

        for i in 0..3 {
            relay
                .relay(NegotiationMessage::Candidate {
                    from: a,
                    target: b,
                    payload: json!({ "n": i }),
                })
                .unwrap();
        }
        for i in 0..3 {
            match rb.try_recv().unwrap() {
                ServerMessage::NegotiationCandidate { candidate, .. } => {
                    assert_eq!(candidate, json!({ "n": i }))
                }
                andere => panic!("Unerwartete Nachricht: {andere:?}"),
            }
        }
    }

    #[test]
    fn volle_queue_ist_sendefehler() {
        let (registry, relay, _) = setup();
        let (a, _ra) = registry.register();
        let (b, _rb) = registry.register();

        for _ in 0..4 {
            relay
                .relay(NegotiationMessage::Candidate {
                    from: a,
                    target: b,
                    payload: json!({}),
                })
                .unwrap();
        }
        let err = relay
            .relay(NegotiationMessage::Candidate {
                from: a,
                target: b,
                payload: json!({}),
            })
            .unwrap_err();
        assert!(matches!(err, SignalingError::SendFehler));
    }
}
