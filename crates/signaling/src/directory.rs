//! Raum-Verzeichnis – Welche Verbindungen sind in welchem Raum
//!
//! Jeder Raum liegt hinter einer eigenen `parking_lot::Mutex`. Beitritt,
//! Austritt und alle Uebergaenge der Anruf-Zustandsmaschine laufen unter
//! dieser Sperre; Zustellungen werden noch unter der Sperre eingereiht,
//! damit alle Mitglieder Raum-Ereignisse in Commit-Reihenfolge sehen.
//!
//! ## Sperr-Reihenfolge
//! Raum-Sperre vor DashMap-Shard. Kein Codepfad haelt einen DashMap-Eintrag
//! und wartet danach auf eine Raum-Sperre.

use dashmap::DashMap;
use parking_lot::Mutex;
use rendezvous_core::types::{ConnectionId, RoomId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::call::CallSession;
use crate::error::{SignalingError, SignalingResult};
use crate::registry::{Bindung, ConnectionRegistry};

// ---------------------------------------------------------------------------
// Raum
// ---------------------------------------------------------------------------

/// Zustand eines Raums: Mitglieder in Beitrittsreihenfolge plus die
/// Anruf-Sitzungen dieser Mitglieder
#[derive(Debug)]
pub struct Raum {
    id: RoomId,
    mitglieder: Vec<ConnectionId>,
    sitzungen: HashMap<ConnectionId, CallSession>,
    /// Raum wurde aus dem Verzeichnis entfernt, Sperre neu holen
    verwaist: bool,
}

impl Raum {
    pub fn neu(id: RoomId) -> Self {
        Self {
            id,
            mitglieder: Vec::new(),
            sitzungen: HashMap::new(),
            verwaist: false,
        }
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    /// Mitglieder in Beitrittsreihenfolge
    pub fn mitglieder(&self) -> &[ConnectionId] {
        &self.mitglieder
    }

    pub fn ist_mitglied(&self, id: &ConnectionId) -> bool {
        self.mitglieder.contains(id)
    }

    pub fn ist_leer(&self) -> bool {
        self.mitglieder.is_empty()
    }

    /// Alle Mitglieder ausser `id`, in Beitrittsreihenfolge
    pub fn members_except(&self, id: &ConnectionId) -> Vec<ConnectionId> {
        self.mitglieder.iter().filter(|m| *m != id).copied().collect()
    }

    /// Fuegt ein Mitglied mit frischer (Idle-)Sitzung hinzu
    ///
    /// Gibt `false` zurueck wenn es bereits Mitglied war.
    pub fn hinzufuegen(&mut self, id: ConnectionId) -> bool {
        if self.ist_mitglied(&id) {
            return false;
        }
        self.mitglieder.push(id);
        self.sitzungen.insert(id, CallSession::default());
        true
    }

    /// Entfernt ein Mitglied samt Sitzung
    pub fn entfernen(&mut self, id: &ConnectionId) -> bool {
        let Some(pos) = self.mitglieder.iter().position(|m| m == id) else {
            return false;
        };
        self.mitglieder.remove(pos);
        self.sitzungen.remove(id);
        true
    }

    pub fn sitzung(&self, id: &ConnectionId) -> Option<&CallSession> {
        self.sitzungen.get(id)
    }

    pub fn sitzung_mut(&mut self, id: &ConnectionId) -> Option<&mut CallSession> {
        self.sitzungen.get_mut(id)
    }
}

// ---------------------------------------------------------------------------
// RoomDirectory
// ---------------------------------------------------------------------------

/// Ergebnis eines Beitritts
#[derive(Debug)]
pub enum Beitritt<R> {
    /// Verbindung ist neu beigetreten, enthaelt das Ergebnis des Hooks
    Neu(R),
    /// Verbindung war schon Mitglied; enthaelt die anderen Mitglieder
    Bereits(Vec<ConnectionId>),
}

/// Verwaltet alle Raeume
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct RoomDirectory {
    inner: Arc<DirectoryInner>,
}

struct DirectoryInner {
    raeume: DashMap<RoomId, Arc<Mutex<Raum>>>,
    registry: ConnectionRegistry,
    leere_entfernen: bool,
    /// Anzahl Raeume mit mindestens einem Mitglied
    aktive: AtomicUsize,
}

impl RoomDirectory {
    pub fn neu(registry: ConnectionRegistry, leere_entfernen: bool) -> Self {
        Self {
            inner: Arc::new(DirectoryInner {
                raeume: DashMap::new(),
                registry,
                leere_entfernen,
                aktive: AtomicUsize::new(0),
            }),
        }
    }

    /// Fuehrt `f` unter der Sperre eines bestehenden Raums aus
    pub fn mit_raum<R>(&self, raum: &RoomId, f: impl FnOnce(&mut Raum) -> R) -> Option<R> {
        self.gesperrt(raum, false, f)
    }

    /// Tritt einem Raum bei
    ///
    /// Ist die Verbindung in einem anderen Raum, wird dieser zuerst verlassen
    /// (`beim_verlassen` laeuft dort unter dessen Sperre). `beim_beitritt`
    /// laeuft nach dem Einfuegen unter der Sperre des Zielraums.
    pub fn join_mit<R>(
        &self,
        raum: &RoomId,
        id: ConnectionId,
        mut beim_verlassen: impl FnMut(&mut Raum),
        beim_beitritt: impl FnOnce(&mut Raum) -> R,
    ) -> SignalingResult<Beitritt<R>> {
        let mut beim_beitritt = Some(beim_beitritt);

        loop {
            if let Some(alt) = self.inner.registry.raum_von(&id) {
                if alt != *raum {
                    self.leave_mit(&alt, id, &mut beim_verlassen);
                    continue;
                }
            }

            let ergebnis = self.gesperrt(raum, true, |r| {
                match self.inner.registry.raum_binden(&id, raum) {
                    Bindung::NichtLive => Some(Err(SignalingError::VerbindungGetrennt)),
                    // Zwischenzeitlich woanders beigetreten, erneut versuchen
                    Bindung::AndererRaum(_) => None,
                    Bindung::BereitsDrin => Some(Ok(Beitritt::Bereits(r.members_except(&id)))),
                    Bindung::Gebunden => {
                        r.hinzufuegen(id);
                        tracing::debug!(connection_id = %id, room = %raum, "Raum beigetreten");
                        Some(match beim_beitritt.take() {
                            Some(hook) => Ok(Beitritt::Neu(hook(r))),
                            None => Err(SignalingError::intern("Beitritts-Hook doppelt")),
                        })
                    }
                }
            });

            if let Some(Some(ergebnis)) = ergebnis {
                return ergebnis;
            }
        }
    }

    /// Verlaesst einen Raum; `f` laeuft nach dem Entfernen unter der Sperre
    ///
    /// Gibt `None` zurueck wenn die Verbindung nicht Mitglied war.
    pub fn leave_mit<R>(
        &self,
        raum: &RoomId,
        id: ConnectionId,
        f: impl FnOnce(&mut Raum) -> R,
    ) -> Option<R> {
        self.gesperrt(raum, false, |r| {
            if !r.entfernen(&id) {
                return None;
            }
            self.inner.registry.raum_loesen(&id, raum);
            tracing::debug!(connection_id = %id, room = %raum, "Raum verlassen");
            Some(f(r))
        })
        .flatten()
    }

    /// Tritt einem Raum bei und liefert die anderen Mitglieder
    pub fn join(&self, raum: &RoomId, id: ConnectionId) -> SignalingResult<Vec<ConnectionId>> {
        let beitritt = self.join_mit(raum, id, |_| {}, |r| r.members_except(&id))?;
        Ok(match beitritt {
            Beitritt::Neu(andere) | Beitritt::Bereits(andere) => andere,
        })
    }

    /// Verlaesst einen Raum (kein Fehler wenn nicht Mitglied)
    pub fn leave(&self, raum: &RoomId, id: ConnectionId) {
        self.leave_mit(raum, id, |_| ());
    }

    /// Lebende Mitglieder ausser `id`, in Beitrittsreihenfolge
    pub fn members_except(&self, raum: &RoomId, id: &ConnectionId) -> Vec<ConnectionId> {
        self.mit_raum(raum, |r| self.lebende_ausser(r, id))
            .unwrap_or_default()
    }

    /// Wie [`Raum::members_except`], aber nur registrierte Verbindungen
    pub fn lebende_ausser(&self, raum: &Raum, id: &ConnectionId) -> Vec<ConnectionId> {
        raum.mitglieder
            .iter()
            .filter(|m| *m != id && self.inner.registry.is_live(m))
            .copied()
            .collect()
    }

    /// Anzahl Raeume mit mindestens einem Mitglied
    pub fn aktive_raeume(&self) -> usize {
        self.inner.aktive.load(Ordering::Relaxed)
    }

    /// Anzahl Raeume im Verzeichnis (inklusive leerer, falls nicht entfernt)
    pub fn anzahl_raeume(&self) -> usize {
        self.inner.raeume.len()
    }

    // -----------------------------------------------------------------------
    // Intern
    // -----------------------------------------------------------------------

    /// Holt die Sperre eines Raums und fuehrt `f` aus
    ///
    /// Wird ein Raum zwischen Nachschlagen und Sperren entfernt, wird er
    /// neu nachgeschlagen. Leere Raeume werden danach (optional) entfernt.
    fn gesperrt<R>(
        &self,
        raum: &RoomId,
        anlegen: bool,
        f: impl FnOnce(&mut Raum) -> R,
    ) -> Option<R> {
        let mut f = Some(f);

        loop {
            let eintrag = if anlegen {
                let eintrag = self
                    .inner
                    .raeume
                    .entry(raum.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(Raum::neu(raum.clone()))));
                Arc::clone(eintrag.value())
            } else {
                match self.inner.raeume.get(raum) {
                    Some(eintrag) => Arc::clone(eintrag.value()),
                    None => return None,
                }
            };

            let mut gesperrt = eintrag.lock();
            if gesperrt.verwaist {
                continue;
            }

            let war_leer = gesperrt.ist_leer();
            let ergebnis = f.take().map(|f| f(&mut *gesperrt));
            let ist_leer = gesperrt.ist_leer();

            if war_leer && !ist_leer {
                self.inner.aktive.fetch_add(1, Ordering::Relaxed);
            } else if !war_leer && ist_leer {
                self.inner.aktive.fetch_sub(1, Ordering::Relaxed);
            }

            if ist_leer && self.inner.leere_entfernen {
                gesperrt.verwaist = true;
                self.inner
                    .raeume
                    .remove_if(raum, |_, v| Arc::ptr_eq(v, &eintrag));
                tracing::debug!(room = %raum, "Leerer Raum entfernt");
            }

            return ergebnis;
        }
    }
}
