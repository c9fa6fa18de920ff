//! Fehlertypen fuer den Audio-Relay

use thiserror::Error;

/// Alle moeglichen Fehler einer Relay-Session
#[derive(Debug, Error)]
pub enum RelayError {
    // --- Lebenszyklus ---
    #[error("Relay kann nur einmal gestartet werden")]
    BereitsGestartet,

    #[error("Relay nimmt keine Verbindungen mehr an")]
    NichtMehrAktiv,

    // --- TTS-Audio ---
    #[error("Nur WAV-Audio kann gestreamt werden, erhalten: {0}")]
    FalschesFormat(String),

    #[error(
        "Erwartet Rate/Breite/Kanaele 16000/2/1, erhalten {abtastrate}/{sample_breite}/{kanaele}"
    )]
    FalschesAudioformat {
        abtastrate: u32,
        sample_breite: u16,
        kanaele: u16,
    },

    #[error("Ungueltige WAV-Daten: {0}")]
    UngueltigeWavDaten(String),

    #[error("Medien konnten nicht geladen werden: {0}")]
    Medien(#[from] anyhow::Error),

    // --- Transport ---
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl RelayError {
    /// Fehlbedienung des Lebenszyklus (doppelter Start, Start nach Schliessen)
    pub fn ist_zustandsfehler(&self) -> bool {
        matches!(self, Self::BereitsGestartet | Self::NichtMehrAktiv)
    }

    /// Ungueltiges Audio fuer den Rueckkanal
    pub fn ist_formatfehler(&self) -> bool {
        matches!(
            self,
            Self::FalschesFormat(_) | Self::FalschesAudioformat { .. } | Self::UngueltigeWavDaten(_)
        )
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
