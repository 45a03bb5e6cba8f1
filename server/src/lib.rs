//! rendezvous-server – Bibliotheks-Root
//!
//! Deklariert alle Server-Module und stellt den oeffentlichen Einstiegspunkt
//! fuer Integrationstests bereit.

pub mod config;

use anyhow::{Context, Result};
use config::ServerConfig;
use rendezvous_observability::{HealthState, SignalingMetrics};
use rendezvous_signaling::{SignalingContext, SignalingServer};
use std::net::SocketAddr;
use tokio::sync::watch;

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Startet alle Server-Subsysteme und laeuft bis zum Shutdown-Signal
    ///
    /// Reihenfolge:
    /// 1. Metriken und Signaling-Kontext anlegen
    /// 2. TCP-Listener binden (Signaling)
    /// 3. Observability-Server starten (falls aktiviert)
    /// 4. Bis `shutdown_rx` auf `true` wechselt laufen
    pub async fn starten(self, shutdown_rx: watch::Receiver<bool>) -> Result<()> {
        let metriken = SignalingMetrics::neu().context("Metriken konnten nicht registriert werden")?;
        let signaling_config = self.config.signaling_config();
        let max_verbindungen = signaling_config.max_verbindungen;
        let ctx = SignalingContext::neu(signaling_config, metriken.clone());

        let tcp_addr: SocketAddr = self
            .config
            .tcp_bind_adresse()
            .parse()
            .with_context(|| format!("Ungueltige TCP-Adresse '{}'", self.config.tcp_bind_adresse()))?;

        tracing::info!(
            server_name = %self.config.server.name,
            tcp = %tcp_addr,
            max_connections = max_verbindungen,
            "Server startet"
        );

        let signaling = SignalingServer::binden(ctx, tcp_addr)
            .await
            .with_context(|| format!("TCP-Listener auf {tcp_addr} konnte nicht gebunden werden"))?;

        let observability = if self.config.observability.aktiviert {
            let obs_addr: SocketAddr = self
                .config
                .observability_bind_adresse()
                .parse()
                .with_context(|| {
                    format!(
                        "Ungueltige Observability-Adresse '{}'",
                        self.config.observability_bind_adresse()
                    )
                })?;
            let health = HealthState::neu(metriken.clone(), max_verbindungen);
            Some(tokio::spawn(
                rendezvous_observability::observability_server_starten(
                    obs_addr,
                    metriken,
                    health,
                    shutdown_rx.clone(),
                ),
            ))
        } else {
            tracing::info!("Observability-Server deaktiviert");
            None
        };

        signaling
            .starten(shutdown_rx)
            .await
            .context("Signaling-Server abgebrochen")?;

        if let Some(handle) = observability {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(fehler = %e, "Observability-Server mit Fehler beendet"),
                Err(e) => tracing::error!(fehler = %e, "Observability-Task abgebrochen"),
            }
        }

        tracing::info!("Server beendet");
        Ok(())
    }
}
