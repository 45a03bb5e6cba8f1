//! Anruf-Koordinator – Zustandsmaschine pro Verbindung und Partnerwahl
//!
//! ## Zustandsmaschine
//! ```text
//!          initiate_call               confirm_call_accepted
//!   Idle -----------------> Calling -------------------------> InCall
//!    ^ |                                                          |
//!    | +---------------- accept_incoming_call -------------------->|
//!    |                                                            |
//!    +------------- partner_disconnected | explicit_next ---------+
//! ```
//!
//! Alle Methoden laufen unter der Sperre des Raums, in dem beide Seiten
//! Mitglied sind. Guard-Verletzungen aendern keinen Zustand.
//!
//! ## Rotation
//! Der Koordinator waehlt Partner selbst (Beitritt, Partnerverlust,
//! `call.next`). Da nur der Client ein Offer erzeugen kann, wird die Wahl
//! per `call.dial` mitgeteilt; das folgende `call.initiate` an dasselbe Ziel
//! vervollstaendigt den Aufbau. Ziele, die in einem Durchlauf besetzt waren,
//! werden bis zum Ende des Durchlaufs uebersprungen. Ein freies Mitglied,
//! das bereits von einer anderen Sitzung angewaehlt wird, gilt als besetzt.

use rendezvous_core::types::ConnectionId;
use rendezvous_observability::SignalingMetrics;
use rendezvous_protocol::control::{RejectReason, ServerMessage};
use rendezvous_protocol::negotiation::NegotiationMessage;
use serde_json::Value;

use crate::directory::Raum;
use crate::error::{SignalingError, SignalingResult};
use crate::outbox::Postausgang;

// ---------------------------------------------------------------------------
// Zustand
// ---------------------------------------------------------------------------

/// Anruf-Zustand einer Verbindung
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CallState {
    #[default]
    Idle,
    /// Anruf an `target` im Aufbau; `angebot_gesendet == false` heisst, der
    /// Koordinator hat gewaehlt und wartet auf das Offer des Clients
    Calling {
        target: ConnectionId,
        angebot_gesendet: bool,
    },
    InCall {
        partner: ConnectionId,
    },
}

impl CallState {
    pub fn ist_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Gegenueber im Aufbau oder im Anruf
    pub fn gegenueber(&self) -> Option<ConnectionId> {
        match self {
            Self::Idle => None,
            Self::Calling { target, .. } => Some(*target),
            Self::InCall { partner } => Some(*partner),
        }
    }
}

/// Anruf-Sitzung einer Verbindung innerhalb ihres Raums
#[derive(Debug, Clone, Default)]
pub struct CallSession {
    zustand: CallState,
    /// Letzter Partner oder zuletzt verlassenes Ziel (Rotations-Cursor)
    letzter_partner: Option<ConnectionId>,
    /// Im aktuellen Rotations-Durchlauf nicht erreichbare Ziele
    fehlversuche: Vec<ConnectionId>,
    /// Aktueller Aufbau stammt aus der Rotation
    per_rotation: bool,
}

impl CallSession {
    pub fn zustand(&self) -> CallState {
        self.zustand
    }

    pub fn letzter_partner(&self) -> Option<ConnectionId> {
        self.letzter_partner
    }

    pub fn fehlversuche(&self) -> &[ConnectionId] {
        &self.fehlversuche
    }

    fn fehlversuch_merken(&mut self, ziel: ConnectionId) {
        if !self.fehlversuche.contains(&ziel) {
            self.fehlversuche.push(ziel);
        }
    }

    fn verbunden_mit(&mut self, partner: ConnectionId) {
        self.zustand = CallState::InCall { partner };
        self.letzter_partner = Some(partner);
        self.fehlversuche.clear();
        self.per_rotation = false;
    }
}

// ---------------------------------------------------------------------------
// CallCoordinator
// ---------------------------------------------------------------------------

/// Regeln der automatischen Partnerwahl
#[derive(Debug, Clone, Copy)]
pub struct RotationsRegeln {
    /// Neues Mitglied waehlt das erste freie Mitglied
    pub beim_beitritt_waehlen: bool,
    /// Nach Partnerverlust den naechsten freien Teilnehmer waehlen
    pub nach_partnerverlust_waehlen: bool,
}

impl Default for RotationsRegeln {
    fn default() -> Self {
        Self {
            beim_beitritt_waehlen: true,
            nach_partnerverlust_waehlen: true,
        }
    }
}

/// Zustandsmaschine und Partnerwahl fuer alle Anrufe
#[derive(Clone)]
pub struct CallCoordinator {
    regeln: RotationsRegeln,
    metriken: SignalingMetrics,
}

impl CallCoordinator {
    pub fn neu(regeln: RotationsRegeln, metriken: SignalingMetrics) -> Self {
        Self { regeln, metriken }
    }

    pub fn regeln(&self) -> RotationsRegeln {
        self.regeln
    }

    /// Ein Mitglied ist dem Raum beigetreten
    pub fn beigetreten(&self, raum: &mut Raum, id: ConnectionId, post: &mut Postausgang) {
        if self.regeln.beim_beitritt_waehlen {
            self.rotieren(raum, id, None, post);
        }
    }

    /// Ein Mitglied hat den Raum verlassen (bereits aus `raum` entfernt)
    ///
    /// Sitzungen, deren Partner oder Ziel `weg` war, fallen auf Idle zurueck.
    pub fn mitglied_entfernt(&self, raum: &mut Raum, weg: ConnectionId, post: &mut Postausgang) {
        let mitglieder = raum.mitglieder().to_vec();
        for mitglied in mitglieder {
            let betroffen = match raum.sitzung_mut(&mitglied) {
                Some(sitzung) => {
                    sitzung.fehlversuche.retain(|f| *f != weg);
                    sitzung.zustand.gegenueber() == Some(weg)
                }
                None => false,
            };
            if betroffen {
                self.partner_disconnected(raum, mitglied, post);
            }
        }
    }

    /// `selbst` startet (oder vervollstaendigt) einen Anruf an `ziel`
    pub fn initiate_call(
        &self,
        raum: &mut Raum,
        selbst: ConnectionId,
        ziel: ConnectionId,
        offer: Value,
        post: &mut Postausgang,
    ) -> SignalingResult<()> {
        Self::pruefen(raum, selbst, ziel)?;

        let eigener = Self::zustand_von(raum, selbst)?;
        let war_idle = match eigener {
            CallState::Idle => true,
            CallState::Calling {
                target,
                angebot_gesendet: false,
            } if target == ziel => false,
            CallState::Calling { .. } => {
                return Err(SignalingError::uebergang("Anruf bereits im Aufbau"))
            }
            CallState::InCall { .. } => {
                return Err(SignalingError::uebergang("bereits in einem Anruf"))
            }
        };

        match Self::zustand_von(raum, ziel)? {
            CallState::Idle => {}
            // Gegenseitige Wahl: das Ziel hat noch kein Offer, dessen Wahl verfaellt
            CallState::Calling {
                target,
                angebot_gesendet: false,
            } if target == selbst => {
                if let Some(gegenseite) = raum.sitzung_mut(&ziel) {
                    gegenseite.zustand = CallState::Idle;
                    gegenseite.per_rotation = false;
                }
                tracing::debug!(from = %selbst, target = %ziel, "Gegenseitige Wahl aufgeloest");
            }
            _ => {
                self.besetzt(raum, selbst, ziel, post);
                return Ok(());
            }
        }

        if let Some(sitzung) = raum.sitzung_mut(&selbst) {
            sitzung.zustand = CallState::Calling {
                target: ziel,
                angebot_gesendet: true,
            };
            if war_idle {
                sitzung.per_rotation = false;
            }
        }
        post.signal(NegotiationMessage::Offer {
            from: selbst,
            target: ziel,
            payload: offer,
        });

        tracing::debug!(from = %selbst, target = %ziel, "Idle -> Calling");
        Ok(())
    }

    /// `selbst` nimmt den Anruf von `von` an
    ///
    /// Nur aus Idle moeglich; ein zweiter Anrufer wird abgelehnt, nicht
    /// eingereiht. Wer danach noch eine der beiden Seiten anwaehlt, erhaelt
    /// sofort `call.rejected{busy}`.
    pub fn accept_incoming_call(
        &self,
        raum: &mut Raum,
        selbst: ConnectionId,
        von: ConnectionId,
        answer: Value,
        post: &mut Postausgang,
    ) -> SignalingResult<()> {
        Self::pruefen(raum, selbst, von)?;

        if !Self::zustand_von(raum, selbst)?.ist_idle() {
            return Err(SignalingError::uebergang(
                "bereits in einem Anruf oder Anruf im Aufbau",
            ));
        }

        match Self::zustand_von(raum, von)? {
            CallState::Calling {
                target,
                angebot_gesendet: true,
            } if target == selbst => {}
            _ => {
                return Err(SignalingError::uebergang(
                    "kein ausstehender Anruf von diesem Teilnehmer",
                ))
            }
        }

        if let Some(sitzung) = raum.sitzung_mut(&selbst) {
            sitzung.verbunden_mit(von);
        }
        post.signal(NegotiationMessage::Answer {
            from: selbst,
            target: von,
            payload: answer,
        });
        tracing::debug!(connection_id = %selbst, partner = %von, "Idle -> InCall");

        self.confirm_call_accepted(raum, von, selbst);
        self.wartende_abweisen(raum, selbst, von, post);
        Ok(())
    }

    /// `selbst` erhaelt die Annahme von `von`
    ///
    /// Veraltete oder doppelte Annahmen werden ignoriert (`false`).
    pub fn confirm_call_accepted(
        &self,
        raum: &mut Raum,
        selbst: ConnectionId,
        von: ConnectionId,
    ) -> bool {
        let Some(sitzung) = raum.sitzung_mut(&selbst) else {
            return false;
        };
        match sitzung.zustand {
            CallState::Calling { target, .. } if target == von => {
                sitzung.verbunden_mit(von);
                self.metriken.calls_established_total.inc();
                tracing::info!(
                    connection_id = %selbst,
                    partner = %von,
                    room = %raum.id(),
                    "Anruf aufgebaut"
                );
                true
            }
            _ => {
                tracing::debug!(
                    connection_id = %selbst,
                    from = %von,
                    "Veraltete Annahme ignoriert"
                );
                false
            }
        }
    }

    /// Partner oder Ziel von `selbst` ist weg: zurueck auf Idle, dann Rotation
    pub fn partner_disconnected(&self, raum: &mut Raum, selbst: ConnectionId, post: &mut Postausgang) {
        let Some(sitzung) = raum.sitzung_mut(&selbst) else {
            return;
        };
        let vorher = sitzung.zustand;
        sitzung.zustand = CallState::Idle;
        sitzung.per_rotation = false;
        sitzung.fehlversuche.clear();

        tracing::debug!(connection_id = %selbst, vorher = ?vorher, "Partner getrennt -> Idle");

        if self.regeln.nach_partnerverlust_waehlen {
            self.rotieren(raum, selbst, None, post);
        }
    }

    /// Aktuellen Partner verlassen und zum naechsten Mitglied weiterschalten
    ///
    /// Abgelehnt ohne Zustandsaenderung, wenn der Raum keine anderen
    /// Mitglieder hat.
    pub fn explicit_next(
        &self,
        raum: &mut Raum,
        selbst: ConnectionId,
        post: &mut Postausgang,
    ) -> SignalingResult<()> {
        if !raum.ist_mitglied(&selbst) {
            return Err(SignalingError::NichtImRaum);
        }
        if raum.members_except(&selbst).is_empty() {
            return Err(SignalingError::uebergang("keine anderen Teilnehmer im Raum"));
        }

        let (zustand, letzter) = match raum.sitzung(&selbst) {
            Some(sitzung) => (sitzung.zustand, sitzung.letzter_partner),
            None => return Err(SignalingError::NichtImRaum),
        };

        let ab = match zustand {
            CallState::InCall { partner } => {
                self.verlassen(raum, selbst, partner, post);
                Some(partner)
            }
            CallState::Calling {
                target,
                angebot_gesendet,
            } => {
                if angebot_gesendet {
                    self.verlassen(raum, selbst, target, post);
                }
                Some(target)
            }
            CallState::Idle => letzter,
        };

        if let Some(sitzung) = raum.sitzung_mut(&selbst) {
            sitzung.zustand = CallState::Idle;
            sitzung.fehlversuche.clear();
            if ab.is_some() {
                sitzung.letzter_partner = ab;
            }
        }

        tracing::debug!(connection_id = %selbst, ab = ?ab, "Weiter zum naechsten Teilnehmer");
        self.rotieren(raum, selbst, ab, post);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Intern
    // -----------------------------------------------------------------------

    /// Waehlt den naechsten freien Kandidaten fuer `selbst`
    ///
    /// Reihenfolge: Beitrittsreihenfolge, bei gesetztem `ab` zyklisch nach
    /// diesem Mitglied. Waehlt ein Kandidat bereits `selbst`, wird auf dessen
    /// Offer gewartet statt zurueckzuwaehlen.
    fn rotieren(
        &self,
        raum: &mut Raum,
        selbst: ConnectionId,
        ab: Option<ConnectionId>,
        post: &mut Postausgang,
    ) {
        let kandidaten = kandidaten_reihenfolge(raum.mitglieder(), selbst, ab);

        for kandidat in kandidaten {
            let uebersprungen = raum
                .sitzung(&selbst)
                .map(|s| s.fehlversuche.contains(&kandidat))
                .unwrap_or(true);
            if uebersprungen {
                continue;
            }

            match raum.sitzung(&kandidat).map(|s| s.zustand) {
                Some(CallState::Calling { target, .. }) if target == selbst => {
                    tracing::debug!(
                        connection_id = %selbst,
                        kandidat = %kandidat,
                        "Kandidat waehlt bereits, warte auf dessen Offer"
                    );
                    return;
                }
                Some(CallState::Idle) if !Self::wird_angewaehlt(raum, kandidat, selbst) => {
                    self.waehlen(raum, selbst, kandidat, post);
                    return;
                }
                _ => {
                    if let Some(sitzung) = raum.sitzung_mut(&selbst) {
                        sitzung.fehlversuch_merken(kandidat);
                    }
                }
            }
        }

        if let Some(sitzung) = raum.sitzung_mut(&selbst) {
            sitzung.fehlversuche.clear();
            sitzung.per_rotation = false;
        }
        tracing::debug!(connection_id = %selbst, room = %raum.id(), "Kein freier Partner");
    }

    fn waehlen(&self, raum: &mut Raum, selbst: ConnectionId, ziel: ConnectionId, post: &mut Postausgang) {
        if let Some(sitzung) = raum.sitzung_mut(&selbst) {
            sitzung.zustand = CallState::Calling {
                target: ziel,
                angebot_gesendet: false,
            };
            sitzung.per_rotation = true;
        }
        post.ereignis(selbst, ServerMessage::CallDial { target: ziel });
        tracing::debug!(connection_id = %selbst, target = %ziel, "Partner gewaehlt");
    }

    /// Ziel ist nicht Idle: sofort ablehnen, in der Rotation weitermachen
    fn besetzt(&self, raum: &mut Raum, selbst: ConnectionId, ziel: ConnectionId, post: &mut Postausgang) {
        let per_rotation = match raum.sitzung_mut(&selbst) {
            Some(sitzung) => {
                let per_rotation = sitzung.per_rotation;
                sitzung.zustand = CallState::Idle;
                sitzung.per_rotation = false;
                sitzung.fehlversuch_merken(ziel);
                per_rotation
            }
            None => false,
        };

        self.metriken
            .transitions_rejected_total
            .with_label_values(&["busy"])
            .inc();
        post.ereignis(
            selbst,
            ServerMessage::CallRejected {
                target: ziel,
                reason: RejectReason::Busy,
            },
        );
        tracing::debug!(from = %selbst, target = %ziel, "Ziel besetzt");

        if per_rotation {
            self.rotieren(raum, selbst, Some(ziel), post);
        }
    }

    /// Andere Sitzungen im Aufbau zu `a` oder `b` als besetzt abweisen
    fn wartende_abweisen(&self, raum: &mut Raum, a: ConnectionId, b: ConnectionId, post: &mut Postausgang) {
        let wartende: Vec<(ConnectionId, ConnectionId)> = raum
            .mitglieder()
            .iter()
            .filter(|m| **m != a && **m != b)
            .filter_map(|m| match raum.sitzung(m).map(|s| s.zustand) {
                Some(CallState::Calling { target, .. }) if target == a || target == b => {
                    Some((*m, target))
                }
                _ => None,
            })
            .collect();

        for (anrufer, ziel) in wartende {
            // Eine vorherige Rotation kann den Zustand bereits geaendert haben
            let noch_wartend = matches!(
                raum.sitzung(&anrufer).map(|s| s.zustand),
                Some(CallState::Calling { target, .. }) if target == ziel
            );
            if noch_wartend {
                self.besetzt(raum, anrufer, ziel, post);
            }
        }
    }

    /// Eine andere Sitzung als `ausser` baut bereits einen Anruf zu `ziel` auf
    fn wird_angewaehlt(raum: &Raum, ziel: ConnectionId, ausser: ConnectionId) -> bool {
        raum.mitglieder().iter().filter(|m| **m != ausser).any(|m| {
            matches!(
                raum.sitzung(m).map(|s| s.zustand),
                Some(CallState::Calling { target, .. }) if target == ziel
            )
        })
    }

    /// `selbst` verlaesst `anderer`; der Verlassene wird Idle und benachrichtigt
    fn verlassen(&self, raum: &mut Raum, selbst: ConnectionId, anderer: ConnectionId, post: &mut Postausgang) {
        if let Some(sitzung) = raum.sitzung_mut(&anderer) {
            if sitzung.zustand == (CallState::InCall { partner: selbst }) {
                sitzung.zustand = CallState::Idle;
                sitzung.fehlversuche.clear();
            }
        }
        post.ereignis(anderer, ServerMessage::CallEnded { from: selbst });
    }

    fn pruefen(raum: &Raum, selbst: ConnectionId, anderer: ConnectionId) -> SignalingResult<()> {
        if !raum.ist_mitglied(&selbst) {
            return Err(SignalingError::NichtImRaum);
        }
        if anderer == selbst {
            return Err(SignalingError::uebergang("Ziel ist der Absender selbst"));
        }
        if !raum.ist_mitglied(&anderer) {
            return Err(SignalingError::uebergang("Ziel ist nicht im selben Raum"));
        }
        Ok(())
    }

    fn zustand_von(raum: &Raum, id: ConnectionId) -> SignalingResult<CallState> {
        raum.sitzung(&id)
            .map(|s| s.zustand)
            .ok_or(SignalingError::NichtImRaum)
    }
}

/// Andere Mitglieder in Beitrittsreihenfolge, zyklisch nach `ab` (falls Mitglied)
fn kandidaten_reihenfolge(
    mitglieder: &[ConnectionId],
    selbst: ConnectionId,
    ab: Option<ConnectionId>,
) -> Vec<ConnectionId> {
    let andere: Vec<ConnectionId> = mitglieder.iter().filter(|m| **m != selbst).copied().collect();
    match ab.and_then(|p| andere.iter().position(|m| *m == p)) {
        Some(pos) => andere[pos + 1..]
            .iter()
            .chain(andere[..=pos].iter())
            .copied()
            .collect(),
        None => andere,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rendezvous_core::types::RoomId;
    use serde_json::json;

    fn koordinator(beitritt: bool, verlust: bool) -> CallCoordinator {
        CallCoordinator::neu(
            RotationsRegeln {
                beim_beitritt_waehlen: beitritt,
                nach_partnerverlust_waehlen: verlust,
            },
            SignalingMetrics::neu().unwrap(),
        )
    }

    fn raum_mit(anzahl: usize) -> (Raum, Vec<ConnectionId>) {
        let mut raum = Raum::neu(RoomId::from("test"));
        let ids: Vec<ConnectionId> = (0..anzahl).map(|_| ConnectionId::new()).collect();
        for id in &ids {
            raum.hinzufuegen(*id);
        }
        (raum, ids)
    }

    fn zustand(raum: &Raum, id: ConnectionId) -> CallState {
        raum.sitzung(&id).unwrap().zustand()
    }

    /// Baut einen Anruf a -> b komplett auf
    fn verbinden(k: &CallCoordinator, raum: &mut Raum, a: ConnectionId, b: ConnectionId) {
        let mut post = Postausgang::neu();
        k.initiate_call(raum, a, b, json!({"sdp": "offer"}), &mut post)
            .unwrap();
        k.accept_incoming_call(raum, b, a, json!({"sdp": "answer"}), &mut post)
            .unwrap();
    }

    #[test]
    fn initiate_wechselt_nach_calling_und_leitet_offer_weiter() {
        let k = koordinator(false, false);
        let (mut raum, ids) = raum_mit(2);
        let (a, b) = (ids[0], ids[1]);
        let mut post = Postausgang::neu();

        k.initiate_call(&mut raum, a, b, json!({"sdp": "o"}), &mut post)
            .unwrap();

        assert_eq!(
            zustand(&raum, a),
            CallState::Calling {
                target: b,
                angebot_gesendet: true
            }
        );
        assert_eq!(
            post.an(b),
            vec![ServerMessage::CallIncoming {
                from: a,
                offer: json!({"sdp": "o"})
            }]
        );
    }

    #[test]
    fn zweites_initiate_vor_aufloesung_wird_abgelehnt() {
        let k = koordinator(false, false);
        let (mut raum, ids) = raum_mit(3);
        let (a, b, c) = (ids[0], ids[1], ids[2]);
        let mut post = Postausgang::neu();

        k.initiate_call(&mut raum, a, b, json!({}), &mut post).unwrap();
        let err = k
            .initiate_call(&mut raum, a, c, json!({}), &mut post)
            .unwrap_err();

        assert!(matches!(err, SignalingError::UngueltigerUebergang(_)));
        assert_eq!(
            zustand(&raum, a),
            CallState::Calling {
                target: b,
                angebot_gesendet: true
            }
        );
        assert!(post.an(c).is_empty());
    }

    #[test]
    fn initiate_guards() {
        let k = koordinator(false, false);
        let (mut raum, ids) = raum_mit(2);
        let a = ids[0];
        let fremd = ConnectionId::new();
        let mut post = Postausgang::neu();

        assert!(matches!(
            k.initiate_call(&mut raum, a, a, json!({}), &mut post),
            Err(SignalingError::UngueltigerUebergang(_))
        ));
        assert!(matches!(
            k.initiate_call(&mut raum, a, fremd, json!({}), &mut post),
            Err(SignalingError::UngueltigerUebergang(_))
        ));
        assert!(matches!(
            k.initiate_call(&mut raum, fremd, a, json!({}), &mut post),
            Err(SignalingError::NichtImRaum)
        ));
        assert!(post.is_empty());
        assert!(zustand(&raum, a).ist_idle());
    }

    #[test]
    fn annahme_fuehrt_zu_symmetrischem_incall() {
        let k = koordinator(false, false);
        let (mut raum, ids) = raum_mit(2);
        let (a, b) = (ids[0], ids[1]);
        let mut post = Postausgang::neu();

        k.initiate_call(&mut raum, a, b, json!({"sdp": "o"}), &mut post)
            .unwrap();
        k.accept_incoming_call(&mut raum, b, a, json!({"sdp": "a"}), &mut post)
            .unwrap();

        assert_eq!(zustand(&raum, a), CallState::InCall { partner: b });
        assert_eq!(zustand(&raum, b), CallState::InCall { partner: a });
        assert_eq!(
            post.an(a),
            vec![ServerMessage::CallAccepted {
                from: b,
                answer: json!({"sdp": "a"})
            }]
        );
        assert_eq!(k.metriken.calls_established_total.get(), 1);
    }

    #[test]
    fn zweiter_anrufer_wird_abgelehnt_nicht_eingereiht() {
        let k = koordinator(false, false);
        let (mut raum, ids) = raum_mit(3);
        let (a, b, c) = (ids[0], ids[1], ids[2]);
        verbinden(&k, &mut raum, a, b);

        // c ruft b an, b ist im Anruf: sofortige Ablehnung
        let mut post = Postausgang::neu();
        k.initiate_call(&mut raum, c, b, json!({}), &mut post).unwrap();
        assert!(zustand(&raum, c).ist_idle());
        assert_eq!(
            post.an(c),
            vec![ServerMessage::CallRejected {
                target: b,
                reason: RejectReason::Busy
            }]
        );
        assert!(post.an(b).is_empty());

        // b kann nichts annehmen, solange es im Anruf ist
        let err = k
            .accept_incoming_call(&mut raum, b, c, json!({}), &mut post)
            .unwrap_err();
        assert!(matches!(err, SignalingError::UngueltigerUebergang(_)));
        assert_eq!(zustand(&raum, b), CallState::InCall { partner: a });
    }

    #[test]
    fn annahme_ohne_offer_wird_abgelehnt() {
        let k = koordinator(false, false);
        let (mut raum, ids) = raum_mit(2);
        let (a, b) = (ids[0], ids[1]);
        let mut post = Postausgang::neu();

        let err = k
            .accept_incoming_call(&mut raum, b, a, json!({}), &mut post)
            .unwrap_err();
        assert!(matches!(err, SignalingError::UngueltigerUebergang(_)));
        assert!(zustand(&raum, b).ist_idle());
        assert!(post.is_empty());
    }

    #[test]
    fn veraltete_bestaetigung_wird_ignoriert() {
        let k = koordinator(false, false);
        let (mut raum, ids) = raum_mit(2);
        let (a, b) = (ids[0], ids[1]);

        assert!(!k.confirm_call_accepted(&mut raum, a, b));
        assert!(zustand(&raum, a).ist_idle());

        verbinden(&k, &mut raum, a, b);
        assert!(!k.confirm_call_accepted(&mut raum, a, b));
        assert_eq!(k.metriken.calls_established_total.get(), 1);
    }

    #[test]
    fn beitritt_waehlt_erstes_freies_mitglied() {
        let k = koordinator(true, true);
        let (mut raum, ids) = raum_mit(2);
        let (a, b) = (ids[0], ids[1]);
        let c = ConnectionId::new();

        verbinden(&k, &mut raum, a, b);
        raum.hinzufuegen(c);

        let mut post = Postausgang::neu();
        k.beigetreten(&mut raum, c, &mut post);
        // a und b sind besetzt, c bleibt Idle und die Fehlversuche sind zurueckgesetzt
        assert!(zustand(&raum, c).ist_idle());
        assert!(raum.sitzung(&c).unwrap().fehlversuche().is_empty());
        assert!(post.is_empty());

        let d = ConnectionId::new();
        raum.hinzufuegen(d);
        k.beigetreten(&mut raum, d, &mut post);
        assert_eq!(post.an(d), vec![ServerMessage::CallDial { target: c }]);
        assert_eq!(
            zustand(&raum, d),
            CallState::Calling {
                target: c,
                angebot_gesendet: false
            }
        );
    }

    #[test]
    fn gewaehltes_ziel_wird_per_initiate_vervollstaendigt() {
        let k = koordinator(true, true);
        let (mut raum, ids) = raum_mit(1);
        let a = ids[0];
        let b = ConnectionId::new();
        raum.hinzufuegen(b);

        let mut post = Postausgang::neu();
        k.beigetreten(&mut raum, b, &mut post);
        assert_eq!(post.an(b), vec![ServerMessage::CallDial { target: a }]);

        let mut post = Postausgang::neu();
        k.initiate_call(&mut raum, b, a, json!({"sdp": "o"}), &mut post)
            .unwrap();
        assert_eq!(
            zustand(&raum, b),
            CallState::Calling {
                target: a,
                angebot_gesendet: true
            }
        );
        assert_eq!(post.an(a).len(), 1);
    }

    #[test]
    fn partnerverlust_waehlt_naechstes_freies_mitglied() {
        let k = koordinator(false, true);
        let (mut raum, ids) = raum_mit(3);
        let (a, b, c) = (ids[0], ids[1], ids[2]);
        verbinden(&k, &mut raum, a, b);

        raum.entfernen(&b);
        let mut post = Postausgang::neu();
        k.mitglied_entfernt(&mut raum, b, &mut post);

        assert_eq!(
            zustand(&raum, a),
            CallState::Calling {
                target: c,
                angebot_gesendet: false
            }
        );
        assert_eq!(post.an(a), vec![ServerMessage::CallDial { target: c }]);
    }

    #[test]
    fn partnerverlust_ohne_rotation_bleibt_idle() {
        let k = koordinator(false, false);
        let (mut raum, ids) = raum_mit(3);
        let (a, b) = (ids[0], ids[1]);
        verbinden(&k, &mut raum, a, b);

        raum.entfernen(&b);
        let mut post = Postausgang::neu();
        k.mitglied_entfernt(&mut raum, b, &mut post);

        assert!(zustand(&raum, a).ist_idle());
        assert!(post.is_empty());
    }

    #[test]
    fn next_im_einzelraum_ist_noop() {
        let k = koordinator(true, true);
        let (mut raum, ids) = raum_mit(1);
        let a = ids[0];
        let mut post = Postausgang::neu();

        let err = k.explicit_next(&mut raum, a, &mut post).unwrap_err();
        assert!(matches!(err, SignalingError::UngueltigerUebergang(_)));
        assert!(zustand(&raum, a).ist_idle());
        assert!(post.is_empty());
    }

    #[test]
    fn next_schaltet_zyklisch_weiter() {
        let k = koordinator(false, false);
        let (mut raum, ids) = raum_mit(3);
        let (a, b, c) = (ids[0], ids[1], ids[2]);
        verbinden(&k, &mut raum, c, a);

        let mut post = Postausgang::neu();
        k.explicit_next(&mut raum, c, &mut post).unwrap();

        assert_eq!(
            zustand(&raum, c),
            CallState::Calling {
                target: b,
                angebot_gesendet: false
            }
        );
        assert!(zustand(&raum, a).ist_idle());
        assert_eq!(post.an(a), vec![ServerMessage::CallEnded { from: c }]);
        assert_eq!(post.an(c), vec![ServerMessage::CallDial { target: b }]);
    }

    #[test]
    fn next_mit_einzigem_partner_waehlt_ihn_erneut() {
        let k = koordinator(false, false);
        let (mut raum, ids) = raum_mit(2);
        let (a, b) = (ids[0], ids[1]);
        verbinden(&k, &mut raum, a, b);

        let mut post = Postausgang::neu();
        k.explicit_next(&mut raum, a, &mut post).unwrap();

        assert!(zustand(&raum, b).ist_idle());
        assert_eq!(
            zustand(&raum, a),
            CallState::Calling {
                target: b,
                angebot_gesendet: false
            }
        );
    }

    #[test]
    fn rotation_ueberspringt_besetzte_ziele() {
        let k = koordinator(false, true);
        let (mut raum, ids) = raum_mit(5);
        let (a, b, c, d, e) = (ids[0], ids[1], ids[2], ids[3], ids[4]);
        verbinden(&k, &mut raum, a, b);
        verbinden(&k, &mut raum, c, d);

        // e waehlt per next: a, b, c, d sind besetzt, kein Ziel
        let mut post = Postausgang::neu();
        k.explicit_next(&mut raum, e, &mut post).unwrap();
        assert!(zustand(&raum, e).ist_idle());
        assert!(post.is_empty());

        // b trennt sich: a waehlt e (c, d besetzt)
        raum.entfernen(&b);
        let mut post = Postausgang::neu();
        k.mitglied_entfernt(&mut raum, b, &mut post);
        assert_eq!(post.an(a), vec![ServerMessage::CallDial { target: e }]);
    }

    #[test]
    fn besetzt_waehrend_rotation_versucht_naechsten() {
        let k = koordinator(true, true);
        let (mut raum, ids) = raum_mit(2);
        let (a, b) = (ids[0], ids[1]);
        let c = ConnectionId::new();
        raum.hinzufuegen(c);

        // c waehlt a
        let mut post = Postausgang::neu();
        k.beigetreten(&mut raum, c, &mut post);
        assert_eq!(post.an(c), vec![ServerMessage::CallDial { target: a }]);

        let d = ConnectionId::new();
        raum.hinzufuegen(d);

        // bevor c das Offer schickt, verbinden sich a und b
        let mut post = Postausgang::neu();
        k.initiate_call(&mut raum, a, b, json!({}), &mut post).unwrap();
        k.accept_incoming_call(&mut raum, b, a, json!({}), &mut post)
            .unwrap();

        // c wird sofort abgewiesen und waehlt hinter a weiter: b besetzt, d frei
        assert_eq!(
            post.an(c),
            vec![
                ServerMessage::CallRejected {
                    target: a,
                    reason: RejectReason::Busy
                },
                ServerMessage::CallDial { target: d },
            ]
        );
        assert_eq!(
            zustand(&raum, c),
            CallState::Calling {
                target: d,
                angebot_gesendet: false
            }
        );
    }

    #[test]
    fn rotation_ueberspringt_bereits_angewaehlte_mitglieder() {
        let k = koordinator(true, true);
        let (mut raum, ids) = raum_mit(1);
        let a = ids[0];
        let (b, c) = (ConnectionId::new(), ConnectionId::new());

        let mut post = Postausgang::neu();
        raum.hinzufuegen(b);
        k.beigetreten(&mut raum, b, &mut post);
        raum.hinzufuegen(c);
        k.beigetreten(&mut raum, c, &mut post);

        // a wird schon von b angewaehlt, b selbst waehlt: c bleibt frei
        assert_eq!(post.an(b), vec![ServerMessage::CallDial { target: a }]);
        assert!(post.an(c).is_empty());
        assert!(zustand(&raum, c).ist_idle());
        assert!(raum.sitzung(&c).unwrap().fehlversuche().is_empty());
    }

    #[test]
    fn annahme_weist_andere_anrufer_als_besetzt_ab() {
        let k = koordinator(false, false);
        let (mut raum, ids) = raum_mit(3);
        let (a, b, c) = (ids[0], ids[1], ids[2]);

        let mut post = Postausgang::neu();
        k.initiate_call(&mut raum, b, a, json!({}), &mut post).unwrap();
        k.initiate_call(&mut raum, c, a, json!({}), &mut post).unwrap();
        assert_eq!(post.an(a).len(), 2);

        let mut post = Postausgang::neu();
        k.accept_incoming_call(&mut raum, a, b, json!({}), &mut post)
            .unwrap();

        assert_eq!(zustand(&raum, a), CallState::InCall { partner: b });
        assert!(zustand(&raum, c).ist_idle());
        assert_eq!(
            post.an(c),
            vec![ServerMessage::CallRejected {
                target: a,
                reason: RejectReason::Busy
            }]
        );
    }

    #[test]
    fn rotation_wartet_bei_gegenseitiger_wahl() {
        let k = koordinator(false, true);
        let (mut raum, ids) = raum_mit(3);
        let (a, b, c) = (ids[0], ids[1], ids[2]);
        verbinden(&k, &mut raum, a, b);

        // c ruft a an (a besetzt): c bleibt Idle
        let mut post = Postausgang::neu();
        k.initiate_call(&mut raum, c, a, json!({}), &mut post).unwrap();

        // b trennt sich, a sucht: c ist frei und wird gewaehlt
        raum.entfernen(&b);
        let mut post = Postausgang::neu();
        k.mitglied_entfernt(&mut raum, b, &mut post);
        assert_eq!(post.an(a), vec![ServerMessage::CallDial { target: c }]);

        // c ruft per next weiter: a waehlt c bereits, also wartet c
        let mut post = Postausgang::neu();
        k.explicit_next(&mut raum, c, &mut post).unwrap();
        assert!(zustand(&raum, c).ist_idle());
        assert!(post.an(c).is_empty());
    }

    #[test]
    fn gegenseitige_wahl_vor_offer_wird_aufgeloest() {
        let k = koordinator(false, false);
        let (mut raum, ids) = raum_mit(2);
        let (a, b) = (ids[0], ids[1]);

        // a hat b gewaehlt (ohne Offer), b schickt selbst ein Offer an a
        let mut post = Postausgang::neu();
        k.explicit_next(&mut raum, a, &mut post).unwrap();
        assert_eq!(post.an(a), vec![ServerMessage::CallDial { target: b }]);

        let mut post = Postausgang::neu();
        k.initiate_call(&mut raum, b, a, json!({}), &mut post).unwrap();
        assert!(zustand(&raum, a).ist_idle());
        assert_eq!(post.an(a).len(), 1);

        // a nimmt an
        k.accept_incoming_call(&mut raum, a, b, json!({}), &mut post)
            .unwrap();
        assert_eq!(zustand(&raum, a), CallState::InCall { partner: b });
        assert_eq!(zustand(&raum, b), CallState::InCall { partner: a });
    }

    #[test]
    fn kandidaten_zyklisch_nach_cursor() {
        let ids: Vec<ConnectionId> = (0..4).map(|_| ConnectionId::new()).collect();
        let (a, b, c, d) = (ids[0], ids[1], ids[2], ids[3]);

        assert_eq!(kandidaten_reihenfolge(&ids, a, None), vec![b, c, d]);
        assert_eq!(kandidaten_reihenfolge(&ids, a, Some(c)), vec![d, b, c]);
        assert_eq!(kandidaten_reihenfolge(&ids, a, Some(d)), vec![b, c, d]);
        // Cursor nicht mehr Mitglied: von vorne
        assert_eq!(
            kandidaten_reihenfolge(&ids, a, Some(ConnectionId::new())),
            vec![b, c, d]
        );
    }
}
