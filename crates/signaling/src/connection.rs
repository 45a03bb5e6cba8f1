//! Client-Connection – Verwaltet eine einzelne Verbindung
//!
//! Jede Verbindung bekommt eine `ClientConnection` in einem eigenen
//! tokio-Task. Der Task liest Frames, reicht sie an den `MessageDispatcher`
//! und schreibt alles, was in der eigenen Send-Queue landet, zurueck.
//!
//! ## Lebenszyklus
//! ```text
//! connect -> welcome -> (room.join / call.* / negotiation.*)* -> disconnect
//! ```
//!
//! ## Keepalive
//! - Server sendet alle `keepalive_sek` einen Ping
//! - Kommt innerhalb von `verbindungs_timeout_sek` kein Frame, wird getrennt

use futures_util::{SinkExt, StreamExt};
use rendezvous_protocol::control::{ErrorCode, ServerMessage};
use rendezvous_protocol::wire::ServerCodec;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::codec::Framed;

use crate::context::SignalingContext;
use crate::dispatcher::MessageDispatcher;
use crate::error::SignalingError;

/// Verarbeitet eine einzelne Client-Verbindung
pub struct ClientConnection {
    ctx: Arc<SignalingContext>,
    peer_addr: SocketAddr,
}

impl ClientConnection {
    /// Erstellt eine neue ClientConnection
    pub fn neu(ctx: Arc<SignalingContext>, peer_addr: SocketAddr) -> Self {
        Self { ctx, peer_addr }
    }

    /// Startet die Verarbeitungsschleife
    ///
    /// Laeuft bis die Verbindung getrennt wird, ein Timeout eintritt oder
    /// ein Shutdown-Signal eingeht. Danach wird die Verbindung aus Registry
    /// und Raum entfernt.
    pub async fn verarbeiten<S>(self, stream: S, mut shutdown_rx: watch::Receiver<bool>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let peer_addr = self.peer_addr;
        let config = self.ctx.config();
        let keepalive_intervall = Duration::from_secs(config.keepalive_sek.max(1));
        let timeout_dauer = Duration::from_secs(config.verbindungs_timeout_sek);

        let mut framed = Framed::new(stream, ServerCodec::with_max_size(config.max_frame_bytes));
        let (id, mut sende_rx) = self.ctx.connect();
        let dispatcher = MessageDispatcher::neu(Arc::clone(&self.ctx));

        tracing::info!(peer = %peer_addr, connection_id = %id, "Neue Verbindung");

        if let Err(e) = framed.send(ServerMessage::Welcome { connection_id: id }).await {
            tracing::warn!(peer = %peer_addr, fehler = %e, "Welcome-Senden fehlgeschlagen");
            self.ctx.disconnect(id);
            return;
        }

        let mut letzter_empfang = Instant::now();
        let mut naechster_ping = Instant::now() + keepalive_intervall;

        loop {
            let jetzt = Instant::now();

            if jetzt.duration_since(letzter_empfang) > timeout_dauer {
                tracing::warn!(peer = %peer_addr, connection_id = %id, "Verbindungs-Timeout");
                break;
            }

            let ping_verzoegerung = naechster_ping
                .checked_duration_since(jetzt)
                .unwrap_or(Duration::from_millis(1));

            tokio::select! {
                // Eingehende Nachricht vom Client
                frame = framed.next() => {
                    match frame {
                        Some(Ok(nachricht)) => {
                            letzter_empfang = Instant::now();
                            if let Some(antwort) = dispatcher.dispatch(id, nachricht) {
                                if let Err(e) = framed.send(antwort).await {
                                    tracing::warn!(
                                        peer = %peer_addr,
                                        fehler = %e,
                                        "Senden fehlgeschlagen"
                                    );
                                    break;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(
                                peer = %peer_addr,
                                connection_id = %id,
                                fehler = %e,
                                "Frame-Lesefehler"
                            );
                            let fehler = SignalingError::protokoll(e.to_string());
                            let _ = framed
                                .send(ServerMessage::error(fehler.error_code(), fehler.to_string()))
                                .await;
                            break;
                        }
                        None => {
                            tracing::info!(peer = %peer_addr, connection_id = %id, "Verbindung vom Client getrennt");
                            break;
                        }
                    }
                }

                // Ereignisse und weitergeleitete Signale aus der Send-Queue
                Some(ausgehend) = sende_rx.recv() => {
                    if let Err(e) = framed.send(ausgehend).await {
                        tracing::warn!(
                            peer = %peer_addr,
                            fehler = %e,
                            "Queue-Senden fehlgeschlagen"
                        );
                        break;
                    }
                }

                // Keepalive-Ping
                _ = tokio::time::sleep(ping_verzoegerung) => {
                    if Instant::now() >= naechster_ping {
                        let ts = chrono::Utc::now().timestamp_millis().max(0) as u64;
                        if let Err(e) = framed.send(ServerMessage::ping(ts)).await {
                            tracing::warn!(
                                peer = %peer_addr,
                                fehler = %e,
                                "Ping-Senden fehlgeschlagen"
                            );
                            break;
                        }
                        naechster_ping = Instant::now() + keepalive_intervall;
                    }
                }

                // Shutdown-Signal
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!(peer = %peer_addr, "Shutdown-Signal – Verbindung wird getrennt");
                        let abschied = ServerMessage::error(
                            ErrorCode::InternalError,
                            "Server wird heruntergefahren",
                        );
                        let _ = framed.send(abschied).await;
                        break;
                    }
                }
            }
        }

        self.ctx.disconnect(id);
        tracing::info!(peer = %peer_addr, connection_id = %id, "Verbindungs-Task beendet");
    }
}
