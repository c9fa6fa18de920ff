//! assistlink-server – Bibliotheks-Root
//!
//! Betreibt den Audio-Relay mit einer Echo-Pipeline: das Geraet spricht,
//! der Server spielt die Aufnahme ueber den UDP-Rueckkanal zurueck.
//! Pro Durchlauf eine Relay-Session; danach wird auf demselben Port eine
//! neue Session geoeffnet.

pub mod config;
pub mod echo;
pub mod handler;
pub mod medien;

use anyhow::Result;
use assistlink_core::{DeviceId, SessionId};
use assistlink_observability::{HealthState, RelayMetriken, RelayZaehler};
use assistlink_voice::{
    PipelineFehler, PipelineStart, RelaySession, RelaySnapshot, SessionHandler,
};
use config::ServerConfig;
use echo::EchoPipeline;
use handler::LogHandler;
use medien::SpeicherMedien;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
    medien: Arc<SpeicherMedien>,
    metriken: RelayMetriken,
    health: HealthState,
}

/// Eine gestartete Relay-Session mit laufender Pipeline
pub struct LaufendeSession {
    pub session: RelaySession,
    pub port: u16,
    pub handler: Arc<LogHandler>,
    pipeline: JoinHandle<Result<(), PipelineFehler>>,
    medien: Arc<SpeicherMedien>,
}

impl LaufendeSession {
    pub fn id(&self) -> SessionId {
        self.session.id()
    }

    /// Wartet auf das Ende der Pipeline und schliesst die Session
    pub async fn abwarten(mut self) -> Result<()> {
        let ergebnis = (&mut self.pipeline).await;
        self.beenden();
        ergebnis??;
        Ok(())
    }

    /// Schliesst die Session und verwirft nicht abgeholte Medien
    fn beenden(&self) {
        self.session.stoppen();
        self.session.schliessen();
        self.medien.leeren();
    }
}

/// Addiert den Stand einer laufenden Session auf die Summe der beendeten
fn zaehler_summe(basis: &RelayZaehler, snap: &RelaySnapshot) -> RelayZaehler {
    RelayZaehler {
        datagramme_empfangen: basis.datagramme_empfangen + snap.datagramme_empfangen,
        datagramme_verworfen: basis.datagramme_verworfen + snap.datagramme_verworfen,
        bytes_empfangen: basis.bytes_empfangen + snap.bytes_empfangen,
        datagramme_gesendet: basis.datagramme_gesendet + snap.datagramme_gesendet,
        bytes_gesendet: basis.bytes_gesendet + snap.bytes_gesendet,
        tts_erfolgreich: basis.tts_erfolgreich + snap.tts_erfolgreich,
        tts_fehlgeschlagen: basis.tts_fehlgeschlagen + snap.tts_fehlgeschlagen,
    }
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Result<Self> {
        Ok(Self {
            config,
            medien: Arc::new(SpeicherMedien::neu()),
            metriken: RelayMetriken::neu()?,
            health: HealthState::neu(),
        })
    }

    /// Oeffnet eine Relay-Session und startet die Echo-Pipeline darauf
    pub async fn session_starten(&self) -> Result<LaufendeSession> {
        let handler = Arc::new(LogHandler::neu());
        let session = RelaySession::neu(
            self.config.relay_config()?,
            Arc::clone(&handler) as Arc<dyn SessionHandler>,
            self.medien.clone(),
        );
        let port = session.starten(self.config.relay.port).await?;

        let runner = EchoPipeline::neu(self.config.echo.clone(), self.medien.clone());
        let start = PipelineStart {
            device_id: DeviceId::new(self.config.relay.geraet.clone()),
            conversation_id: None,
            flags: self.config.relay.flags,
            audio_einstellungen: None,
        };
        let pipeline = {
            let session = session.clone();
            tokio::spawn(async move { session.pipeline_ausfuehren(&runner, start).await })
        };

        tracing::info!(session = %session.id(), port, "Warte auf Audio vom Geraet");
        Ok(LaufendeSession {
            session,
            port,
            handler,
            pipeline,
            medien: self.medien.clone(),
        })
    }

    /// Startet alle Server-Subsysteme und laeuft bis zum Shutdown-Signal
    ///
    /// Reihenfolge:
    /// 1. Observability-Server starten (falls aktiviert)
    /// 2. Relay-Session oeffnen, Echo-Pipeline ausfuehren, Session schliessen
    /// 3. Schritt 2 wiederholen bis Ctrl-C
    pub async fn starten(self) -> Result<()> {
        tracing::info!(
            bind = %self.config.relay.bind_adresse,
            port = self.config.relay.port,
            protokoll = ?self.config.relay.protokoll,
            "Server startet"
        );

        if self.config.observability.aktiviert {
            let addr = self.config.observability_bind_adresse()?;
            let metriken = self.metriken.clone();
            let health = self.health.clone();
            tokio::spawn(async move {
                if let Err(e) =
                    assistlink_observability::observability_server_starten(addr, metriken, health)
                        .await
                {
                    tracing::error!("Observability-Server beendet: {e:#}");
                }
            });
        }

        let strg_c = tokio::signal::ctrl_c();
        tokio::pin!(strg_c);
        let mut basis = RelayZaehler::default();
        let intervall = Duration::from_secs(self.config.observability.intervall_sek.max(1));

        loop {
            let mut laufend = self.session_starten().await?;
            self.health.relay_status_setzen(true);
            self.metriken.sessions_aktiv.set(1);
            let mut ticker = tokio::time::interval(intervall);
            let mut herunterfahren = false;

            loop {
                tokio::select! {
                    ergebnis = &mut laufend.pipeline => {
                        match ergebnis {
                            Ok(Ok(())) => tracing::info!(session = %laufend.id(), "Pipeline abgeschlossen"),
                            Ok(Err(e)) => tracing::error!(session = %laufend.id(), "Pipeline fehlgeschlagen: {e}"),
                            Err(e) => tracing::error!(session = %laufend.id(), "Pipeline-Task abgebrochen: {e}"),
                        }
                        break;
                    }
                    _ = laufend.handler.beendet_abwarten() => {
                        laufend.pipeline.abort();
                        break;
                    }
                    ergebnis = &mut strg_c => {
                        ergebnis?;
                        tracing::info!("Shutdown-Signal empfangen, Server wird beendet");
                        laufend.pipeline.abort();
                        herunterfahren = true;
                        break;
                    }
                    _ = ticker.tick() => {
                        let snap = laufend.session.statistik().snapshot();
                        self.metriken.aktualisieren(&zaehler_summe(&basis, &snap));
                    }
                }
            }

            laufend.beenden();
            basis = zaehler_summe(&basis, &laufend.session.statistik().snapshot());
            self.metriken.aktualisieren(&basis);
            self.metriken.sessions_aktiv.set(0);
            self.health.relay_status_setzen(false);

            if herunterfahren {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assistlink_core::ProtokollVersion;
    use bytes::Bytes;
    use tokio::net::UdpSocket;

    fn test_server(protokoll: ProtokollVersion) -> Server {
        let mut config = ServerConfig::default();
        config.relay.bind_adresse = "127.0.0.1".into();
        config.relay.port = 0;
        config.relay.protokoll = protokoll;
        config.echo.stille_timeout_ms = 100;
        config.observability.aktiviert = false;
        Server::neu(config).unwrap()
    }

    /// Sendet 40 ms Audio, der Client bleibt fuer den Rueckkanal offen
    async fn kurz_sprechen(port: u16) -> UdpSocket {
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for i in 0..4u8 {
            client.send_to(&[i; 320], ("127.0.0.1", port)).await.unwrap();
        }
        client
    }

    #[tokio::test]
    async fn v1_sessions_hinterlassen_keine_medien() {
        let server = test_server(ProtokollVersion::V1);
        for _ in 0..3 {
            let laufend = server.session_starten().await.unwrap();
            let _client = kurz_sprechen(laufend.port).await;
            laufend.abwarten().await.unwrap();
            assert!(server.medien.is_empty());
        }
    }

    #[tokio::test]
    async fn session_ende_verwirft_liegengebliebene_medien() {
        let server = test_server(ProtokollVersion::V2);
        let laufend = server.session_starten().await.unwrap();
        server.medien.ablegen("wav", Bytes::from_static(b"RIFF"));

        let _client = kurz_sprechen(laufend.port).await;
        laufend.abwarten().await.unwrap();
        assert!(server.medien.is_empty());
    }

    #[test]
    fn summe_addiert_alle_zaehler() {
        let basis = RelayZaehler {
            datagramme_empfangen: 2,
            tts_erfolgreich: 1,
            ..Default::default()
        };
        let snap = RelaySnapshot {
            datagramme_empfangen: 3,
            bytes_gesendet: 1024,
            tts_erfolgreich: 1,
            ..Default::default()
        };
        let summe = zaehler_summe(&basis, &snap);
        assert_eq!(summe.datagramme_empfangen, 5);
        assert_eq!(summe.bytes_gesendet, 1024);
        assert_eq!(summe.tts_erfolgreich, 2);
    }
}
