//! Session-Handler des Servers
//!
//! Protokolliert die Events fuer das Geraet und meldet ein Transport-Ende
//! an die Hauptschleife.

use assistlink_voice::{AssistEventTyp, EventDaten, SessionHandler};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Loggt Geraete-Events und merkt sich ihren Verlauf
#[derive(Debug, Default)]
pub struct LogHandler {
    verlauf: Mutex<Vec<AssistEventTyp>>,
    beendet: Notify,
}

impl LogHandler {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Bisher gemeldete Event-Typen in Reihenfolge
    pub fn verlauf(&self) -> Vec<AssistEventTyp> {
        self.verlauf.lock().clone()
    }

    /// Wartet bis die Session einen Transportfehler meldet
    pub async fn beendet_abwarten(&self) {
        self.beendet.notified().await;
    }
}

impl SessionHandler for LogHandler {
    fn event_behandeln(&self, typ: AssistEventTyp, daten: Option<EventDaten>) {
        match &daten {
            Some(d) if !d.is_empty() => {
                tracing::info!(event = typ.name(), daten = ?d, "Geraete-Event");
            }
            _ => tracing::info!(event = typ.name(), "Geraete-Event"),
        }
        self.verlauf.lock().push(typ);
    }

    fn beendet(&self) {
        tracing::warn!("Relay-Session durch Transportfehler beendet");
        // notify_one speichert die Meldung falls gerade niemand wartet
        self.beendet.notify_one();
    }
}
