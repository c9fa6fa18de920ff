//! Prometheus-kompatible Metriken fuer den Audio-Relay
//!
//! Registrierte Metriken:
//! - `assistlink_relay_sessions_active` – Gauge: Laufende Relay-Sessions
//! - `assistlink_relay_datagrams_received_total` – Counter: Empfangene Mikrofon-Datagramme
//! - `assistlink_relay_datagrams_dropped_total` – Counter: Verworfene Datagramme (nach Stopp)
//! - `assistlink_relay_bytes_received_total` – Counter: Empfangene Audio-Bytes
//! - `assistlink_relay_datagrams_sent_total` – Counter: Gesendete TTS-Datagramme
//! - `assistlink_relay_bytes_sent_total` – Counter: Gesendete TTS-Bytes
//! - `assistlink_relay_tts_total` – Counter: TTS-Versendungen (result=ok|error)
//!
//! Die Zaehler werden periodisch aus einem `RelayZaehler`-Stand nachgezogen.

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Akkumulierter Stand der Relay-Zaehler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayZaehler {
    pub datagramme_empfangen: u64,
    pub datagramme_verworfen: u64,
    pub bytes_empfangen: u64,
    pub datagramme_gesendet: u64,
    pub bytes_gesendet: u64,
    pub tts_erfolgreich: u64,
    pub tts_fehlgeschlagen: u64,
}

/// Alle Relay-Prometheus-Metriken
#[derive(Clone)]
pub struct RelayMetriken {
    pub registry: Arc<Registry>,

    pub sessions_aktiv: IntGauge,
    pub datagramme_empfangen: IntCounter,
    pub datagramme_verworfen: IntCounter,
    pub bytes_empfangen: IntCounter,
    pub datagramme_gesendet: IntCounter,
    pub bytes_gesendet: IntCounter,
    pub tts_versand: IntCounterVec,
}

fn zaehler(registry: &Registry, name: &str, hilfe: &str) -> Result<IntCounter> {
    let counter = IntCounter::with_opts(Opts::new(name, hilfe))?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

/// Zieht einen monotonen Counter auf den neuen Stand nach
fn nachziehen(counter: &IntCounter, stand: u64) {
    let delta = stand.saturating_sub(counter.get());
    if delta > 0 {
        counter.inc_by(delta);
    }
}

impl RelayMetriken {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let sessions_aktiv = IntGauge::with_opts(Opts::new(
            "assistlink_relay_sessions_active",
            "Anzahl laufender Relay-Sessions",
        ))?;
        registry.register(Box::new(sessions_aktiv.clone()))?;

        let datagramme_empfangen = zaehler(
            &registry,
            "assistlink_relay_datagrams_received_total",
            "Empfangene Mikrofon-Datagramme",
        )?;
        let datagramme_verworfen = zaehler(
            &registry,
            "assistlink_relay_datagrams_dropped_total",
            "Nach dem Stopp verworfene Datagramme",
        )?;
        let bytes_empfangen = zaehler(
            &registry,
            "assistlink_relay_bytes_received_total",
            "Empfangene Audio-Bytes",
        )?;
        let datagramme_gesendet = zaehler(
            &registry,
            "assistlink_relay_datagrams_sent_total",
            "An das Geraet gesendete TTS-Datagramme",
        )?;
        let bytes_gesendet = zaehler(
            &registry,
            "assistlink_relay_bytes_sent_total",
            "An das Geraet gesendete TTS-Bytes",
        )?;

        let tts_versand = IntCounterVec::new(
            Opts::new("assistlink_relay_tts_total", "Abgeschlossene TTS-Versendungen"),
            &["result"],
        )?;
        registry.register(Box::new(tts_versand.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            sessions_aktiv,
            datagramme_empfangen,
            datagramme_verworfen,
            bytes_empfangen,
            datagramme_gesendet,
            bytes_gesendet,
            tts_versand,
        })
    }

    /// Uebernimmt den aktuellen Zaehlerstand einer Session
    pub fn aktualisieren(&self, stand: &RelayZaehler) {
        nachziehen(&self.datagramme_empfangen, stand.datagramme_empfangen);
        nachziehen(&self.datagramme_verworfen, stand.datagramme_verworfen);
        nachziehen(&self.bytes_empfangen, stand.bytes_empfangen);
        nachziehen(&self.datagramme_gesendet, stand.datagramme_gesendet);
        nachziehen(&self.bytes_gesendet, stand.bytes_gesendet);
        nachziehen(&self.tts_versand.with_label_values(&["ok"]), stand.tts_erfolgreich);
        nachziehen(&self.tts_versand.with_label_values(&["error"]), stand.tts_fehlgeschlagen);
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: RelayMetriken) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(State(metriken): State<RelayMetriken>) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metriken_erstellen_erfolgreich() {
        let metriken = RelayMetriken::neu().unwrap();
        assert!(!metriken.registry.gather().is_empty());
    }

    #[test]
    fn aktualisieren_zieht_counter_nach() {
        let metriken = RelayMetriken::neu().unwrap();
        let mut stand = RelayZaehler {
            datagramme_empfangen: 10,
            bytes_empfangen: 10240,
            tts_erfolgreich: 1,
            ..Default::default()
        };
        metriken.aktualisieren(&stand);
        assert_eq!(metriken.datagramme_empfangen.get(), 10);
        assert_eq!(metriken.bytes_empfangen.get(), 10240);

        stand.datagramme_empfangen = 15;
        metriken.aktualisieren(&stand);
        metriken.aktualisieren(&stand);
        assert_eq!(metriken.datagramme_empfangen.get(), 15, "Gleicher Stand zaehlt nicht doppelt");
        assert_eq!(metriken.tts_versand.with_label_values(&["ok"]).get(), 1);
    }

    #[test]
    fn kleinerer_stand_setzt_nicht_zurueck() {
        let metriken = RelayMetriken::neu().unwrap();
        metriken.aktualisieren(&RelayZaehler {
            datagramme_gesendet: 7,
            ..Default::default()
        });
        metriken.aktualisieren(&RelayZaehler::default());
        assert_eq!(metriken.datagramme_gesendet.get(), 7);
    }

    #[test]
    fn metriken_export_prometheus_format() {
        let metriken = RelayMetriken::neu().unwrap();
        metriken.sessions_aktiv.set(1);
        metriken.aktualisieren(&RelayZaehler {
            datagramme_empfangen: 3,
            tts_fehlgeschlagen: 1,
            ..Default::default()
        });

        let output = metriken.exportieren().unwrap();
        assert!(output.contains("assistlink_relay_sessions_active 1"));
        assert!(output.contains("assistlink_relay_datagrams_received_total 3"));
        assert!(output.contains("assistlink_relay_tts_total{result=\"error\"} 1"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }
}
