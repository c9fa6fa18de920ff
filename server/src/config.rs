//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Server ohne Konfigurationsdatei
//! lauffaehig ist.

use anyhow::Context;
use assistlink_core::ProtokollVersion;
use assistlink_voice::RelayConfig;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// UDP-Relay
    pub relay: RelayEinstellungen,
    /// Echo-Pipeline
    pub echo: EchoEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Observability-Einstellungen (Metriken, Health)
    pub observability: ObservabilityEinstellungen,
}

/// UDP-Relay-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayEinstellungen {
    /// Bind-Adresse des UDP-Sockets
    pub bind_adresse: String,
    /// UDP-Port (0 = vom OS gewaehlt)
    pub port: u16,
    /// Protokoll-Version des Geraets ("v1" oder "v2")
    pub protokoll: ProtokollVersion,
    /// Maximale Groesse ausgehender Audio-Datagramme in Bytes
    pub paket_groesse: usize,
    /// Sendetempo relativ zur Echtzeit
    pub tempo_faktor: f64,
    /// Geraete-ID fuer die Pipeline-Anfrage
    pub geraet: String,
    /// Befehls-Flags beim Pipeline-Start (1 = VAD, 2 = Wake-Word)
    pub flags: u32,
}

impl Default for RelayEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            port: 6055,
            protokoll: ProtokollVersion::V2,
            paket_groesse: 1024,
            tempo_faktor: 0.9,
            geraet: "assistlink-geraet".into(),
            flags: 1,
        }
    }
}

/// Einstellungen der Echo-Pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoEinstellungen {
    /// Aufnahme endet nach so langer Stille (keine Datagramme) in ms
    pub stille_timeout_ms: u64,
    /// Maximale Aufnahmelaenge in ms (16 kHz / 16 Bit / Mono)
    pub max_aufnahme_ms: u64,
}

impl Default for EchoEinstellungen {
    fn default() -> Self {
        Self {
            stille_timeout_ms: 1500,
            max_aufnahme_ms: 10_000,
        }
    }
}

impl EchoEinstellungen {
    pub fn stille_timeout(&self) -> Duration {
        Duration::from_millis(self.stille_timeout_ms)
    }

    /// Maximale Aufnahmelaenge in Bytes
    pub fn max_aufnahme_bytes(&self) -> usize {
        (self.max_aufnahme_ms * 32) as usize
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Observability-Einstellungen (Metriken + Health-Check)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// Aktiviert den Observability-Server
    pub aktiviert: bool,
    /// Port fuer Metriken und Health (Standard: 9300)
    pub port: u16,
    /// Intervall fuer das Nachziehen der Metriken in Sekunden
    pub intervall_sek: u64,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            port: 9300,
            intervall_sek: 5,
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    fn bind_ip(&self) -> anyhow::Result<IpAddr> {
        self.relay
            .bind_adresse
            .parse()
            .with_context(|| format!("Ungueltige Bind-Adresse '{}'", self.relay.bind_adresse))
    }

    /// Baut die Relay-Konfiguration fuer eine Session
    ///
    /// Lehnt eine Paketgroesse von 0 und einen negativen oder nicht
    /// endlichen Tempo-Faktor ab.
    pub fn relay_config(&self) -> anyhow::Result<RelayConfig> {
        if self.relay.paket_groesse == 0 {
            anyhow::bail!("relay.paket_groesse muss groesser als 0 sein");
        }
        let tempo = self.relay.tempo_faktor;
        if !tempo.is_finite() || tempo < 0.0 {
            anyhow::bail!("relay.tempo_faktor muss endlich und >= 0 sein (ist {tempo})");
        }

        let mut config = RelayConfig::neu(self.relay.protokoll).mit_bind_adresse(self.bind_ip()?);
        config.paket_groesse = self.relay.paket_groesse;
        config.tempo_faktor = self.relay.tempo_faktor;
        Ok(config)
    }

    /// Gibt die Bind-Adresse fuer den Observability-Server zurueck
    pub fn observability_bind_adresse(&self) -> anyhow::Result<SocketAddr> {
        Ok(SocketAddr::new(self.bind_ip()?, self.observability.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_config_ist_valide() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.relay.port, 6055);
        assert_eq!(cfg.relay.protokoll, ProtokollVersion::V2);
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.echo.max_aufnahme_bytes(), 320_000);

        let relay = cfg.relay_config().unwrap();
        assert_eq!(relay.paket_groesse, 1024);
        assert_eq!(relay.tempo_faktor, 0.9);
    }

    #[test]
    fn config_aus_toml_string() {
        let toml = r#"
            [relay]
            bind_adresse = "127.0.0.1"
            port = 0
            protokoll = "v1"

            [echo]
            stille_timeout_ms = 250
        "#;
        let cfg: ServerConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.relay.port, 0);
        assert_eq!(cfg.relay.protokoll, ProtokollVersion::V1);
        assert_eq!(cfg.echo.stille_timeout(), Duration::from_millis(250));
        // Nicht angegebene Felder behalten Standardwerte
        assert_eq!(cfg.echo.max_aufnahme_ms, 10_000);
        assert_eq!(cfg.observability.port, 9300);
        assert_eq!(
            cfg.observability_bind_adresse().unwrap(),
            "127.0.0.1:9300".parse().unwrap()
        );
    }

    #[test]
    fn ungueltige_bind_adresse() {
        let mut cfg = ServerConfig::default();
        cfg.relay.bind_adresse = "kein-host".into();
        assert!(cfg.relay_config().is_err());
    }

    #[test]
    fn ungueltiges_sendetempo_wird_abgelehnt() {
        for tempo in [-0.9, f64::NAN, f64::INFINITY] {
            let mut cfg = ServerConfig::default();
            cfg.relay.tempo_faktor = tempo;
            assert!(cfg.relay_config().is_err(), "tempo_faktor {tempo} angenommen");
        }

        let mut cfg = ServerConfig::default();
        cfg.relay.tempo_faktor = 0.0;
        assert_eq!(cfg.relay_config().unwrap().tempo_faktor, 0.0);
    }

    #[test]
    fn paketgroesse_null_wird_abgelehnt() {
        let mut cfg = ServerConfig::default();
        cfg.relay.paket_groesse = 0;
        assert!(cfg.relay_config().is_err());

        let toml = r#"
            [relay]
            tempo_faktor = -1.0
        "#;
        let cfg: ServerConfig = toml::from_str(toml).unwrap();
        assert!(cfg.relay_config().is_err());
    }

    #[test]
    fn fehlende_datei_ergibt_standardwerte() {
        let cfg = ServerConfig::laden("/nicht/vorhanden/config.toml").unwrap();
        assert_eq!(cfg.relay.port, 6055);
    }
}
