//! Relay-Telemetrie – Zaehler pro Session
//!
//! Alle Zaehler sind atomar und koennen ohne Lock aus dem Empfangs-Task,
//! dem Stream-Leser und dem TTS-Task erhoeht werden. Observability-Systeme
//! lesen periodisch einen `RelaySnapshot`.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Momentaufnahme der Relay-Zaehler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelaySnapshot {
    pub datagramme_empfangen: u64,
    pub datagramme_verworfen: u64,
    pub bytes_empfangen: u64,
    pub datagramme_gesendet: u64,
    pub bytes_gesendet: u64,
    pub tts_erfolgreich: u64,
    pub tts_fehlgeschlagen: u64,
}

impl RelaySnapshot {
    /// Gibt eine lesbare Zusammenfassung zurueck
    pub fn zusammenfassung(&self) -> String {
        format!(
            "Empfangen={} ({} B, {} verworfen) Gesendet={} ({} B) TTS ok={} fehler={}",
            self.datagramme_empfangen,
            self.bytes_empfangen,
            self.datagramme_verworfen,
            self.datagramme_gesendet,
            self.bytes_gesendet,
            self.tts_erfolgreich,
            self.tts_fehlgeschlagen,
        )
    }
}

/// Akkumulierte Zaehler einer Relay-Session
#[derive(Debug, Default)]
pub struct RelayStatistik {
    datagramme_empfangen: AtomicU64,
    datagramme_verworfen: AtomicU64,
    bytes_empfangen: AtomicU64,
    datagramme_gesendet: AtomicU64,
    bytes_gesendet: AtomicU64,
    tts_erfolgreich: AtomicU64,
    tts_fehlgeschlagen: AtomicU64,
}

impl RelayStatistik {
    pub fn neu() -> Self {
        Self::default()
    }

    pub fn datagramm_empfangen(&self, bytes: usize) {
        self.datagramme_empfangen.fetch_add(1, Ordering::Relaxed);
        self.bytes_empfangen.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn datagramm_verworfen(&self) {
        self.datagramme_verworfen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn datagramm_gesendet(&self, bytes: usize) {
        self.datagramme_gesendet.fetch_add(1, Ordering::Relaxed);
        self.bytes_gesendet.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Zaehlt das Ergebnis eines TTS-Versands
    pub fn tts_abgeschlossen(&self, erfolgreich: bool) {
        if erfolgreich {
            self.tts_erfolgreich.fetch_add(1, Ordering::Relaxed);
        } else {
            self.tts_fehlgeschlagen.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> RelaySnapshot {
        RelaySnapshot {
            datagramme_empfangen: self.datagramme_empfangen.load(Ordering::Relaxed),
            datagramme_verworfen: self.datagramme_verworfen.load(Ordering::Relaxed),
            bytes_empfangen: self.bytes_empfangen.load(Ordering::Relaxed),
            datagramme_gesendet: self.datagramme_gesendet.load(Ordering::Relaxed),
            bytes_gesendet: self.bytes_gesendet.load(Ordering::Relaxed),
            tts_erfolgreich: self.tts_erfolgreich.load(Ordering::Relaxed),
            tts_fehlgeschlagen: self.tts_fehlgeschlagen.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zaehler_summieren() {
        let statistik = RelayStatistik::neu();
        statistik.datagramm_empfangen(1024);
        statistik.datagramm_empfangen(512);
        statistik.datagramm_verworfen();
        statistik.datagramm_gesendet(1024);
        statistik.tts_abgeschlossen(true);
        statistik.tts_abgeschlossen(false);

        let snap = statistik.snapshot();
        assert_eq!(snap.datagramme_empfangen, 2);
        assert_eq!(snap.bytes_empfangen, 1536);
        assert_eq!(snap.datagramme_verworfen, 1);
        assert_eq!(snap.datagramme_gesendet, 1);
        assert_eq!(snap.bytes_gesendet, 1024);
        assert_eq!(snap.tts_erfolgreich, 1);
        assert_eq!(snap.tts_fehlgeschlagen, 1);
    }

    #[test]
    fn zusammenfassung_enthaelt_werte() {
        let statistik = RelayStatistik::neu();
        statistik.datagramm_empfangen(100);
        let text = statistik.snapshot().zusammenfassung();
        assert!(text.contains("Empfangen=1"));
        assert!(text.contains("100 B"));
    }
}
